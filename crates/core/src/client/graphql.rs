use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_response, graphql_error, ClientError};

/// Minimal GraphQL transport used by the catalog and stash-box clients.
///
/// Both services authenticate with a static `ApiKey` header.
pub(crate) struct GraphqlClient {
    http: Client,
    endpoint: String,
    api_key: String,
    service: String,
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlErrorItem>,
}

#[derive(Deserialize)]
struct GraphqlErrorItem {
    message: String,
}

impl GraphqlClient {
    pub fn new(
        service: &str,
        endpoint: String,
        api_key: String,
        timeout_secs: u64,
    ) -> Result<Self, ClientError> {
        if endpoint.trim().is_empty() {
            return Err(ClientError::NotConfigured(format!(
                "{} endpoint is required",
                service
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ClientError::NotConfigured(format!("{}: {}", service, e)))?;

        Ok(Self {
            http,
            endpoint,
            api_key,
            service: service.to_string(),
        })
    }

    /// Execute a query and return its `data` payload.
    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ClientError> {
        debug!(service = %self.service, endpoint = %self.endpoint, "GraphQL request");

        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&GraphqlRequest { query, variables });
        if !self.api_key.is_empty() {
            request = request.header("ApiKey", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_transport(&self.service, e))?;

        let Some(response) = check_response(&self.service, response).await? else {
            return Err(ClientError::Rejected {
                service: self.service.clone(),
                status: 404,
                message: format!("GraphQL endpoint {} not found", self.endpoint),
            });
        };

        let body: GraphqlResponse<T> = response.json().await.map_err(|e| {
            ClientError::invalid_response(&self.service, format!("Failed to parse response: {}", e))
        })?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(graphql_error(&self.service, &messages));
        }

        body.data
            .ok_or_else(|| ClientError::invalid_response(&self.service, "response has no data"))
    }
}
