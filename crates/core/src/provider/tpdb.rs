//! ThePornDB REST client.
//!
//! Uses bearer authentication. Collections are `/scenes`, `/performers`
//! and `/sites`; studios map to sites.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::{MetadataProvider, ProviderRecord};
use crate::catalog::{EntityFields, EntityKind};
use crate::client::{check_response, ClientError, RetryPolicy};

/// ThePornDB connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpdbConfig {
    /// Provider name; also the key under which identifiers are stored.
    #[serde(default = "default_name")]
    pub name: String,
    /// REST API base URL.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// stash-box compatible endpoint under which the catalog stores
    /// ThePornDB identifiers.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_name() -> String {
    "tpdb".to_string()
}

fn default_url() -> String {
    "https://api.theporndb.net".to_string()
}

fn default_endpoint() -> String {
    "https://theporndb.net/graphql".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for TpdbConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            url: default_url(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

/// ThePornDB client.
pub struct TpdbClient {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl TpdbClient {
    pub fn new(config: &TpdbConfig) -> Result<Self, ClientError> {
        if config.api_key.is_empty() {
            return Err(ClientError::NotConfigured(
                "ThePornDB API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::NotConfigured(format!("{}: {}", config.name, e)))?;

        Ok(Self {
            client,
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn collection(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Scene => "scenes",
            EntityKind::Performer => "performers",
            EntityKind::Studio => "sites",
        }
    }

    /// GET a JSON document, `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ClientError> {
        let url = format!("{}/{}", self.base_url, path);
        let url = url.as_str();
        let client = &self.client;
        let name = self.name.as_str();
        let api_key = self.api_key.as_str();

        self.retry
            .retry(path, move || async move {
                let response = client
                    .get(url)
                    .query(query)
                    .bearer_auth(api_key)
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .map_err(|e| ClientError::from_transport(name, e))?;

                let Some(response) = check_response(name, response).await? else {
                    return Ok(None);
                };

                let body = response.json::<T>().await.map_err(|e| {
                    ClientError::invalid_response(
                        name,
                        format!("Failed to parse {} response: {}", path, e),
                    )
                })?;
                Ok(Some(body))
            })
            .await
    }
}

#[async_trait]
impl MetadataProvider for TpdbClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<ProviderRecord>, ClientError> {
        debug!(provider = %self.name, %kind, id, "ThePornDB fetch");
        let path = format!(
            "{}/{}",
            Self::collection(kind),
            urlencoding::encode(id)
        );

        let record: Option<ProviderRecord> = match kind {
            EntityKind::Scene => self
                .get_json::<Envelope<TpdbScene>>(&path, &[])
                .await?
                .map(|e| e.data.into()),
            EntityKind::Performer => self
                .get_json::<Envelope<TpdbPerformer>>(&path, &[])
                .await?
                .map(|e| e.data.into()),
            EntityKind::Studio => self
                .get_json::<Envelope<TpdbSite>>(&path, &[])
                .await?
                .map(|e| e.data.into()),
        };
        Ok(record)
    }

    async fn search(
        &self,
        kind: EntityKind,
        term: &str,
    ) -> Result<Vec<ProviderRecord>, ClientError> {
        debug!(provider = %self.name, %kind, term, "ThePornDB search");
        let path = Self::collection(kind);
        let query = [("q", term)];

        let records: Option<Vec<ProviderRecord>> = match kind {
            EntityKind::Scene => self
                .get_json::<Envelope<Vec<TpdbScene>>>(path, &query)
                .await?
                .map(|e| e.data.into_iter().map(Into::into).collect()),
            EntityKind::Performer => self
                .get_json::<Envelope<Vec<TpdbPerformer>>>(path, &query)
                .await?
                .map(|e| e.data.into_iter().map(Into::into).collect()),
            EntityKind::Studio => self
                .get_json::<Envelope<Vec<TpdbSite>>>(path, &query)
                .await?
                .map(|e| e.data.into_iter().map(Into::into).collect()),
        };
        Ok(records.unwrap_or_default())
    }
}

// ThePornDB response types

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TpdbScene {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    title: Option<String>,
    date: Option<String>,
    description: Option<String>,
    url: Option<String>,
    site: Option<TpdbNamed>,
    #[serde(default)]
    performers: Vec<TpdbNamed>,
}

#[derive(Debug, Deserialize)]
struct TpdbPerformer {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
    bio: Option<String>,
    #[serde(default)]
    extras: Option<TpdbPerformerExtras>,
}

#[derive(Debug, Deserialize)]
struct TpdbPerformerExtras {
    birthday: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TpdbSite {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
    description: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TpdbNamed {
    name: String,
}

impl From<TpdbScene> for ProviderRecord {
    fn from(scene: TpdbScene) -> Self {
        ProviderRecord::new(
            EntityKind::Scene,
            scene.id,
            EntityFields {
                title: non_empty(scene.title),
                date: parse_date(scene.date.as_deref()),
                details: non_empty(scene.description),
                performers: scene.performers.into_iter().map(|p| p.name).collect(),
                studio: scene.site.map(|s| s.name),
                urls: non_empty(scene.url).into_iter().collect(),
            },
        )
    }
}

impl From<TpdbPerformer> for ProviderRecord {
    fn from(performer: TpdbPerformer) -> Self {
        ProviderRecord::new(
            EntityKind::Performer,
            performer.id,
            EntityFields {
                title: non_empty(Some(performer.name)),
                date: parse_date(performer.extras.and_then(|e| e.birthday).as_deref()),
                details: non_empty(performer.bio),
                ..Default::default()
            },
        )
    }
}

impl From<TpdbSite> for ProviderRecord {
    fn from(site: TpdbSite) -> Self {
        ProviderRecord::new(
            EntityKind::Studio,
            site.id,
            EntityFields {
                title: non_empty(Some(site.name)),
                details: non_empty(site.description),
                urls: non_empty(site.url).into_iter().collect(),
                ..Default::default()
            },
        )
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    // Dates sometimes carry a time component.
    value.and_then(|v| NaiveDate::parse_from_str(v.get(..10).unwrap_or(v), "%Y-%m-%d").ok())
}
