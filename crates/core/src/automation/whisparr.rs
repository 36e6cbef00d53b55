//! Whisparr v3 client.
//!
//! A performer with a ThePornDB identifier is tracked through a
//! `TPDbPerformer` import list, tagged `performer` and `performer--<slug>`.
//! With `track_studios` set, a studio is looked up by name among Whisparr's
//! sites, added when missing, monitored in full and searched.
//!
//! Only GET and PUT are retried. A POST that timed out may still have been
//! applied, so it gets one attempt; the next run re-checks before creating.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{AutomationUpdate, DownloadAutomation, PushOutcome};
use crate::catalog::EntityKind;
use crate::client::{check_response, ClientError, RetryPolicy};

const SERVICE: &str = "whisparr";
const IMPLEMENTATION: &str = "TPDbPerformer";
const PERFORMER_FIELD: &str = "performerId";

/// Whisparr connection and import list settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisparrConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Provider whose performer identifiers Whisparr understands.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_root_folder")]
    pub root_folder_path: String,
    #[serde(default = "default_quality_profile")]
    pub quality_profile_id: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Add and monitor studios as Whisparr sites.
    #[serde(default)]
    pub track_studios: bool,
}

fn default_provider() -> String {
    "tpdb".to_string()
}

fn default_root_folder() -> String {
    "/data/media/whisparr".to_string()
}

fn default_quality_profile() -> u32 {
    1
}

fn default_timeout() -> u64 {
    30
}

/// Whisparr client.
pub struct WhisparrClient {
    client: Client,
    base_url: String,
    api_key: String,
    config: WhisparrConfig,
    retry: RetryPolicy,
}

impl WhisparrClient {
    pub fn new(config: WhisparrConfig) -> Result<Self, ClientError> {
        if config.url.trim().is_empty() || config.api_key.is_empty() {
            return Err(ClientError::NotConfigured(
                "Whisparr url and API key are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::NotConfigured(format!("{}: {}", SERVICE, e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            config,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Single attempt.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let url = format!("{}/api/v3/{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .header("X-Api-Key", &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_transport(SERVICE, e))?;

        let response =
            check_response(SERVICE, response)
                .await?
                .ok_or_else(|| ClientError::Rejected {
                    service: SERVICE.to_string(),
                    status: 404,
                    message: format!("{} not found", url),
                })?;

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::invalid_response(SERVICE, format!("{}: {}", url, e)))
    }

    /// Idempotent request, retried on transient failures.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        self.retry
            .retry(path, || self.send::<T>(method.clone(), path, body))
            .await
    }

    async fn create<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ClientError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Tag id for `label`, creating the tag when missing.
    async fn ensure_tag(&self, label: &str, existing: &[Tag]) -> Result<u64, ClientError> {
        if let Some(tag) = existing.iter().find(|t| t.label.eq_ignore_ascii_case(label)) {
            return Ok(tag.id);
        }
        let tag: Tag = self.create("tag", &json!({ "label": label })).await?;
        debug!(label, id = tag.id, "Created Whisparr tag");
        Ok(tag.id)
    }

    fn import_list_payload(&self, performer_id: &str, slug: &str, tags: Vec<u64>) -> Value {
        json!({
            "name": format!("{} - {}", slug, performer_id),
            "implementation": IMPLEMENTATION,
            "implementationName": "TPDb Performer",
            "configContract": "TPDbPerformerSettings",
            "enableAutomaticAdd": false,
            "searchForMissingEpisodes": true,
            "shouldMonitor": "specificEpisode",
            "siteMonitorType": "all",
            "monitorNewItems": "all",
            "qualityProfileId": self.config.quality_profile_id,
            "rootFolderPath": self.config.root_folder_path,
            "listType": "advanced",
            "listOrder": 5,
            "minRefreshInterval": "06:00:00",
            "fields": [{ "name": PERFORMER_FIELD, "value": performer_id }],
            "tags": tags,
        })
    }
}

#[async_trait]
impl DownloadAutomation for WhisparrClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn register_identifier(
        &self,
        update: &AutomationUpdate,
    ) -> Result<PushOutcome, ClientError> {
        match update.kind {
            EntityKind::Performer if update.provider == self.config.provider => {
                self.register_performer(update).await
            }
            EntityKind::Studio if self.config.track_studios => match update.name.as_deref() {
                Some(name) => self.register_studio(name).await,
                None => Ok(PushOutcome::NotTracked),
            },
            _ => Ok(PushOutcome::NotTracked),
        }
    }
}

impl WhisparrClient {
    async fn register_performer(
        &self,
        update: &AutomationUpdate,
    ) -> Result<PushOutcome, ClientError> {
        let lists: Vec<ImportList> = self.request(Method::GET, "importlist", None).await?;
        if lists
            .iter()
            .any(|list| list.tracks_performer(&update.external_id))
        {
            debug!(performer_id = %update.external_id, "Whisparr import list already present");
            return Ok(PushOutcome::AlreadyPresent);
        }

        let slug = slugify(update.name.as_deref().unwrap_or(&update.external_id));
        let existing: Vec<Tag> = self.request(Method::GET, "tag", None).await?;
        let tags = vec![
            self.ensure_tag(&format!("performer--{}", slug), &existing)
                .await?,
            self.ensure_tag("performer", &existing).await?,
        ];

        let payload = self.import_list_payload(&update.external_id, &slug, tags);
        let _: Value = self.create("importlist", &payload).await?;

        info!(
            performer_id = %update.external_id,
            slug = %slug,
            "Registered Whisparr import list"
        );
        Ok(PushOutcome::Registered)
    }

    /// Add the site named `name` if Whisparr lacks it, then monitor it and
    /// everything in it.
    async fn register_studio(&self, name: &str) -> Result<PushOutcome, ClientError> {
        let path = format!("series/lookup?term={}", urlencoding::encode(name));
        let results: Vec<Value> = self.request(Method::GET, &path, None).await?;
        let Some(found) = results.into_iter().find(Value::is_object) else {
            info!(studio = %name, "No Whisparr site matches studio");
            return Ok(PushOutcome::NotTracked);
        };

        let series_id = match found.get("id").and_then(Value::as_u64) {
            Some(id) => {
                let series: Value = self
                    .request(Method::GET, &format!("series/{}", id), None)
                    .await?;
                if fully_monitored(&series) {
                    debug!(studio = %name, series_id = id, "Whisparr site already monitored");
                    return Ok(PushOutcome::AlreadyPresent);
                }
                let _: Value = self
                    .request(
                        Method::PUT,
                        &format!("series/{}", id),
                        Some(&monitored_series(series)),
                    )
                    .await?;
                self.monitor_episodes(id).await?;
                id
            }
            None => {
                let created: Value = self.create("series", &self.new_series_payload(found)).await?;
                let id = created.get("id").and_then(Value::as_u64).ok_or_else(|| {
                    ClientError::invalid_response(SERVICE, "created series has no id")
                })?;
                info!(studio = %name, series_id = id, "Added Whisparr site");
                id
            }
        };

        let _: Value = self
            .create(
                "command",
                &json!({ "name": "SeriesSearch", "seriesId": series_id }),
            )
            .await?;
        info!(studio = %name, series_id, "Whisparr site monitored and searched");
        Ok(PushOutcome::Registered)
    }

    async fn monitor_episodes(&self, series_id: u64) -> Result<(), ClientError> {
        let episodes: Vec<Episode> = self
            .request(Method::GET, &format!("episode?seriesId={}", series_id), None)
            .await?;
        let unmonitored: Vec<u64> = episodes
            .iter()
            .filter(|e| !e.monitored)
            .map(|e| e.id)
            .collect();
        if unmonitored.is_empty() {
            return Ok(());
        }
        let _: Value = self
            .request(
                Method::PUT,
                "episode/monitor",
                Some(&json!({ "episodeIds": unmonitored, "monitored": true })),
            )
            .await?;
        Ok(())
    }

    fn new_series_payload(&self, lookup: Value) -> Value {
        let mut series = monitored_series(lookup);
        if let Some(fields) = series.as_object_mut() {
            fields.insert("qualityProfileId".into(), json!(self.config.quality_profile_id));
            fields.insert("rootFolderPath".into(), json!(self.config.root_folder_path));
            fields.insert(
                "addOptions".into(),
                json!({
                    "monitor": "all",
                    "searchForMissingEpisodes": true,
                    "searchForCutoffUnmetEpisodes": false,
                }),
            );
        }
        series
    }
}

/// `series` with itself, new items and every season monitored.
fn monitored_series(mut series: Value) -> Value {
    if let Some(fields) = series.as_object_mut() {
        fields.insert("monitored".into(), json!(true));
        fields.insert("monitorNewItems".into(), json!("all"));
        if let Some(Value::Array(seasons)) = fields.get_mut("seasons") {
            for season in seasons.iter_mut().filter_map(Value::as_object_mut) {
                season.insert("monitored".into(), json!(true));
            }
        }
    }
    series
}

fn fully_monitored(series: &Value) -> bool {
    let flag = |v: &Value, key: &str| v.get(key).and_then(Value::as_bool).unwrap_or(false);
    flag(series, "monitored")
        && series.get("monitorNewItems").and_then(Value::as_str) == Some("all")
        && series
            .get("seasons")
            .and_then(Value::as_array)
            .is_none_or(|seasons| seasons.iter().all(|s| flag(s, "monitored")))
}

/// Lowercase, alphanumeric runs joined by single hyphens.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

// Whisparr response types

#[derive(Debug, Deserialize)]
struct Episode {
    id: u64,
    #[serde(default)]
    monitored: bool,
}

#[derive(Debug, Deserialize)]
struct Tag {
    id: u64,
    label: String,
}

#[derive(Debug, Deserialize)]
struct ImportList {
    #[serde(default)]
    implementation: String,
    #[serde(default)]
    fields: Vec<ImportListField>,
}

#[derive(Debug, Deserialize)]
struct ImportListField {
    name: String,
    #[serde(default)]
    value: Option<Value>,
}

impl ImportList {
    fn tracks_performer(&self, performer_id: &str) -> bool {
        self.implementation == IMPLEMENTATION
            && self.fields.iter().any(|f| {
                f.name == PERFORMER_FIELD
                    && match &f.value {
                        Some(Value::String(s)) => s == performer_id,
                        Some(Value::Number(n)) => n.to_string() == performer_id,
                        _ => false,
                    }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WhisparrConfig {
        toml::from_str(
            r#"
url = "http://whisparr:6969/"
api_key = "wh"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = config();
        assert_eq!(config.provider, "tpdb");
        assert_eq!(config.root_folder_path, "/data/media/whisparr");
        assert_eq!(config.quality_profile_id, 1);
        assert!(!config.track_studios);
    }

    #[test]
    fn test_new_requires_credentials() {
        let mut config = config();
        config.api_key.clear();
        assert!(matches!(
            WhisparrClient::new(config),
            Err(ClientError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Jane Doe"), "jane-doe");
        assert_eq!(slugify("  A.J. Applegate! "), "a-j-applegate");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_import_list_payload() {
        let client = WhisparrClient::new(config()).unwrap();
        let payload = client.import_list_payload("tp-42", "jane-doe", vec![3, 1]);

        assert_eq!(payload["implementation"], "TPDbPerformer");
        assert_eq!(payload["configContract"], "TPDbPerformerSettings");
        assert_eq!(payload["fields"][0]["name"], "performerId");
        assert_eq!(payload["fields"][0]["value"], "tp-42");
        assert_eq!(payload["rootFolderPath"], "/data/media/whisparr");
        assert_eq!(payload["qualityProfileId"], 1);
        assert_eq!(payload["tags"], json!([3, 1]));
        assert_eq!(payload["name"], "jane-doe - tp-42");
    }

    #[test]
    fn test_existing_import_list_detection() {
        let lists: Vec<ImportList> = serde_json::from_str(
            r#"[
                {"id": 1, "implementation": "TPDbSite", "fields": [{"name": "siteId", "value": "5"}]},
                {"id": 2, "implementation": "TPDbPerformer", "fields": [
                    {"name": "performerId", "value": "tp-42"},
                    {"name": "other"}
                ]}
            ]"#,
        )
        .unwrap();
        assert!(!lists[0].tracks_performer("tp-42"));
        assert!(lists[1].tracks_performer("tp-42"));
        assert!(!lists[1].tracks_performer("tp-43"));
    }

    #[tokio::test]
    async fn test_non_performer_is_not_tracked() {
        let client = WhisparrClient::new(config()).unwrap();
        let update = AutomationUpdate {
            kind: EntityKind::Scene,
            provider: "tpdb".into(),
            external_id: "x".into(),
            name: None,
        };
        assert_eq!(
            client.register_identifier(&update).await.unwrap(),
            PushOutcome::NotTracked
        );

        let update = AutomationUpdate {
            kind: EntityKind::Performer,
            provider: "stashdb".into(),
            external_id: "x".into(),
            name: None,
        };
        assert_eq!(
            client.register_identifier(&update).await.unwrap(),
            PushOutcome::NotTracked
        );
    }

    #[test]
    fn test_monitored_series() {
        let series = json!({
            "id": 7,
            "title": "Studio X",
            "monitored": false,
            "seasons": [{"seasonNumber": 2024, "monitored": false}]
        });
        assert!(!fully_monitored(&series));

        let series = monitored_series(series);
        assert_eq!(series["monitorNewItems"], "all");
        assert_eq!(series["seasons"][0]["monitored"], true);
        assert_eq!(series["title"], "Studio X");
        assert!(fully_monitored(&series));
    }

    mod against_server {
        use super::*;
        use std::collections::HashMap;
        use std::sync::{Arc, Mutex};

        use axum::body::Bytes;
        use axum::extract::State;
        use axum::http::{StatusCode, Uri};
        use axum::Router;

        /// Canned responses keyed by "METHOD /path"; records every request.
        #[derive(Default)]
        struct FakeWhisparr {
            routes: Mutex<HashMap<String, (StatusCode, Value)>>,
            requests: Mutex<Vec<(String, Value)>>,
        }

        impl FakeWhisparr {
            fn route(&self, key: &str, status: StatusCode, body: Value) {
                self.routes
                    .lock()
                    .unwrap()
                    .insert(key.to_string(), (status, body));
            }

            fn requests(&self, key: &str) -> Vec<Value> {
                self.requests
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(k, _)| k == key)
                    .map(|(_, body)| body.clone())
                    .collect()
            }
        }

        async fn handle(
            State(fake): State<Arc<FakeWhisparr>>,
            method: axum::http::Method,
            uri: Uri,
            body: Bytes,
        ) -> (StatusCode, axum::Json<Value>) {
            let key = format!("{} {}", method, uri.path());
            let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
            fake.requests.lock().unwrap().push((key.clone(), body));
            let (status, response) = fake
                .routes
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or((StatusCode::NOT_FOUND, Value::Null));
            (status, axum::Json(response))
        }

        async fn serve(fake: Arc<FakeWhisparr>) -> WhisparrClient {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = Router::new().fallback(handle).with_state(fake);
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let mut config = config();
            config.url = format!("http://{}", addr);
            config.track_studios = true;
            WhisparrClient::new(config)
                .unwrap()
                .with_retry(RetryPolicy::default().with_initial_delay_ms(1))
        }

        fn studio(name: &str) -> AutomationUpdate {
            AutomationUpdate {
                kind: EntityKind::Studio,
                provider: "stashdb".into(),
                external_id: "sdb-studio".into(),
                name: Some(name.into()),
            }
        }

        #[tokio::test]
        async fn test_import_list_post_is_not_retried() {
            let fake = Arc::new(FakeWhisparr::default());
            fake.route("GET /api/v3/importlist", StatusCode::OK, json!([]));
            fake.route("GET /api/v3/tag", StatusCode::OK, json!([{"id": 1, "label": "performer"}]));
            fake.route("POST /api/v3/tag", StatusCode::CREATED, json!({"id": 2, "label": "performer--jane"}));
            fake.route("POST /api/v3/importlist", StatusCode::SERVICE_UNAVAILABLE, json!({}));
            let client = serve(fake.clone()).await;

            let update = AutomationUpdate {
                kind: EntityKind::Performer,
                provider: "tpdb".into(),
                external_id: "tp-42".into(),
                name: Some("Jane".into()),
            };
            let result = client.register_identifier(&update).await;

            assert!(matches!(result, Err(ClientError::Unavailable { .. })));
            assert_eq!(fake.requests("POST /api/v3/importlist").len(), 1);
            assert_eq!(fake.requests("POST /api/v3/tag").len(), 1);
        }

        #[tokio::test]
        async fn test_flaky_get_is_retried() {
            let fake = Arc::new(FakeWhisparr::default());
            fake.route("GET /api/v3/importlist", StatusCode::SERVICE_UNAVAILABLE, json!({}));
            let client = serve(fake.clone()).await;

            let update = AutomationUpdate {
                kind: EntityKind::Performer,
                provider: "tpdb".into(),
                external_id: "tp-42".into(),
                name: None,
            };
            assert!(client.register_identifier(&update).await.is_err());
            assert_eq!(fake.requests("GET /api/v3/importlist").len(), 5);
        }

        #[tokio::test]
        async fn test_missing_studio_is_added_and_searched() {
            let fake = Arc::new(FakeWhisparr::default());
            fake.route(
                "GET /api/v3/series/lookup",
                StatusCode::OK,
                json!([{"title": "Studio X", "foreignId": "55", "seasons": []}]),
            );
            fake.route("POST /api/v3/series", StatusCode::CREATED, json!({"id": 7, "title": "Studio X"}));
            fake.route("POST /api/v3/command", StatusCode::CREATED, json!({"id": 1}));
            let client = serve(fake.clone()).await;

            let outcome = client.register_identifier(&studio("Studio X")).await.unwrap();

            assert_eq!(outcome, PushOutcome::Registered);
            let added = fake.requests("POST /api/v3/series");
            assert_eq!(added.len(), 1);
            assert_eq!(added[0]["foreignId"], "55");
            assert_eq!(added[0]["monitored"], true);
            assert_eq!(added[0]["qualityProfileId"], 1);
            assert_eq!(added[0]["rootFolderPath"], "/data/media/whisparr");
            assert_eq!(added[0]["addOptions"]["monitor"], "all");
            assert_eq!(
                fake.requests("POST /api/v3/command"),
                vec![json!({"name": "SeriesSearch", "seriesId": 7})]
            );
        }

        #[tokio::test]
        async fn test_existing_studio_gets_monitored() {
            let fake = Arc::new(FakeWhisparr::default());
            let series = json!({
                "id": 7,
                "title": "Studio X",
                "monitored": false,
                "seasons": [{"seasonNumber": 2024, "monitored": false}]
            });
            fake.route("GET /api/v3/series/lookup", StatusCode::OK, json!([series.clone()]));
            fake.route("GET /api/v3/series/7", StatusCode::OK, series);
            fake.route("PUT /api/v3/series/7", StatusCode::ACCEPTED, json!({"id": 7}));
            fake.route(
                "GET /api/v3/episode",
                StatusCode::OK,
                json!([{"id": 1, "monitored": false}, {"id": 2, "monitored": true}]),
            );
            fake.route("PUT /api/v3/episode/monitor", StatusCode::ACCEPTED, json!([]));
            fake.route("POST /api/v3/command", StatusCode::CREATED, json!({"id": 1}));
            let client = serve(fake.clone()).await;

            let outcome = client.register_identifier(&studio("Studio X")).await.unwrap();

            assert_eq!(outcome, PushOutcome::Registered);
            assert!(fake.requests("POST /api/v3/series").is_empty());
            let updated = fake.requests("PUT /api/v3/series/7");
            assert_eq!(updated[0]["seasons"][0]["monitored"], true);
            assert_eq!(
                fake.requests("PUT /api/v3/episode/monitor"),
                vec![json!({"episodeIds": [1], "monitored": true})]
            );
            assert_eq!(fake.requests("POST /api/v3/command").len(), 1);
        }

        #[tokio::test]
        async fn test_monitored_studio_is_already_present() {
            let fake = Arc::new(FakeWhisparr::default());
            let series = json!({"id": 7, "monitored": true, "monitorNewItems": "all", "seasons": []});
            fake.route("GET /api/v3/series/lookup", StatusCode::OK, json!([series.clone()]));
            fake.route("GET /api/v3/series/7", StatusCode::OK, series);
            let client = serve(fake.clone()).await;

            let outcome = client.register_identifier(&studio("Studio X")).await.unwrap();

            assert_eq!(outcome, PushOutcome::AlreadyPresent);
            assert!(fake.requests("POST /api/v3/command").is_empty());
        }

        #[tokio::test]
        async fn test_unknown_studio_is_not_tracked() {
            let fake = Arc::new(FakeWhisparr::default());
            fake.route("GET /api/v3/series/lookup", StatusCode::OK, json!([]));
            let client = serve(fake.clone()).await;

            let outcome = client.register_identifier(&studio("Nobody")).await.unwrap();
            assert_eq!(outcome, PushOutcome::NotTracked);
        }
    }
}
