use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CatalogService, JobStatus};
use crate::client::ClientError;

/// Poll the catalog until it reports healthy.
///
/// Credential failures end the wait immediately; anything else is retried
/// every `interval` until `timeout` elapses.
pub async fn wait_until_healthy(
    catalog: &dyn CatalogService,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ClientError> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match catalog.health().await {
            Ok(true) => {
                info!(attempts, "Catalog is healthy");
                return Ok(());
            }
            Ok(false) => debug!(attempts, "Catalog not ready yet"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(attempts, error = %e, "Catalog health check failed"),
        }

        if Instant::now() + interval > deadline {
            return Err(ClientError::unavailable(
                "catalog",
                format!(
                    "not healthy after {}s ({} attempts)",
                    timeout.as_secs(),
                    attempts
                ),
            ));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Poll a background job until it stops changing state.
///
/// Returns `None` when the catalog no longer knows the job. Times out with
/// [`ClientError::Unavailable`].
pub async fn wait_for_job(
    catalog: &dyn CatalogService,
    job_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<Option<JobStatus>, ClientError> {
    let deadline = Instant::now() + timeout;

    loop {
        match catalog.job_status(job_id).await? {
            None => {
                debug!(job = %job_id, "Catalog no longer tracks job");
                return Ok(None);
            }
            Some(status) if status.is_terminal() => {
                debug!(job = %job_id, ?status, "Job done");
                return Ok(Some(status));
            }
            Some(status) => debug!(job = %job_id, ?status, "Waiting for job"),
        }

        if Instant::now() + interval > deadline {
            return Err(ClientError::unavailable(
                "catalog",
                format!("job {} still running after {}s", job_id, timeout.as_secs()),
            ));
        }
        tokio::time::sleep(interval).await;
    }
}
