//! Stash GraphQL client.
//!
//! Stash keys external identifiers by stash-box endpoint URL. The client
//! translates known endpoints to provider names on the way in and back to
//! URLs on the way out; unknown endpoints pass through untouched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    CatalogEntity, CatalogService, EntityFields, EntityKind, EntityPage, EntityUpdate, JobStatus,
};
use crate::client::{ClientError, GraphqlClient, RetryPolicy};

const SERVICE: &str = "stash";

const HEALTH_QUERY: &str = "query SystemStatus { systemStatus { status } }";

const FIND_SCENES: &str = r#"query FindScenes($filter: FindFilterType) {
  findScenes(filter: $filter) {
    count
    scenes {
      id title date details urls updated_at
      studio { id name }
      performers { id name }
      stash_ids { endpoint stash_id }
    }
  }
}"#;

const FIND_PERFORMERS: &str = r#"query FindPerformers($filter: FindFilterType) {
  findPerformers(filter: $filter) {
    count
    performers {
      id name birthdate details urls updated_at
      stash_ids { endpoint stash_id }
    }
  }
}"#;

const FIND_STUDIOS: &str = r#"query FindStudios($filter: FindFilterType) {
  findStudios(filter: $filter) {
    count
    studios {
      id name details url updated_at
      stash_ids { endpoint stash_id }
    }
  }
}"#;

const PERFORMER_BY_NAME: &str = r#"query PerformerByName($name: String!) {
  findPerformers(
    performer_filter: { name: { value: $name, modifier: EQUALS } }
    filter: { per_page: 5 }
  ) { count performers { id name } }
}"#;

const STUDIO_BY_NAME: &str = r#"query StudioByName($name: String!) {
  findStudios(
    studio_filter: { name: { value: $name, modifier: EQUALS } }
    filter: { per_page: 5 }
  ) { count studios { id name } }
}"#;

const SCENE_UPDATE: &str =
    "mutation SceneUpdate($input: SceneUpdateInput!) { sceneUpdate(input: $input) { id } }";
const PERFORMER_UPDATE: &str = "mutation PerformerUpdate($input: PerformerUpdateInput!) { performerUpdate(input: $input) { id } }";
const STUDIO_UPDATE: &str =
    "mutation StudioUpdate($input: StudioUpdateInput!) { studioUpdate(input: $input) { id } }";

const METADATA_SCAN: &str =
    "mutation MetadataScan($input: ScanMetadataInput!) { metadataScan(input: $input) }";

const FIND_JOB: &str = "query FindJob($input: FindJobInput!) { findJob(input: $input) { id status } }";

const UNORGANIZED_SCENES: &str = r#"query UnorganizedScenes {
  findScenes(scene_filter: { organized: false }, filter: { per_page: -1 }) {
    count
    scenes { id }
  }
}"#;

const METADATA_IDENTIFY: &str = "mutation MetadataIdentify($input: IdentifyMetadataInput!) { metadataIdentify(input: $input) }";

const METADATA_GENERATE: &str = "mutation MetadataGenerate($input: GenerateMetadataInput!) { metadataGenerate(input: $input) }";

/// Stash connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashConfig {
    /// Base URL, e.g. `http://stash:9999`. The GraphQL path is appended.
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// How long startup waits for the catalog to report healthy.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_ms: u64,
    /// Enumeration page size.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_timeout() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    120
}

fn default_health_poll_interval() -> u64 {
    2000
}

fn default_page_size() -> u32 {
    100
}

impl StashConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout_secs: default_timeout(),
            health_timeout_secs: default_health_timeout(),
            health_poll_interval_ms: default_health_poll_interval(),
            page_size: default_page_size(),
        }
    }

    /// Full GraphQL endpoint.
    pub fn graphql_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if base.ends_with("/graphql") {
            base.to_string()
        } else {
            format!("{}/graphql", base)
        }
    }
}

/// Stash GraphQL client.
pub struct StashClient {
    gql: GraphqlClient,
    retry: RetryPolicy,
    /// stash-box endpoint URL to provider name.
    endpoints: BTreeMap<String, String>,
}

impl StashClient {
    pub fn new(config: &StashConfig) -> Result<Self, ClientError> {
        if config.url.trim().is_empty() {
            return Err(ClientError::NotConfigured(
                "catalog.url is required".to_string(),
            ));
        }
        let gql = GraphqlClient::new(
            SERVICE,
            config.graphql_url(),
            config.api_key.clone(),
            config.timeout_secs,
        )?;
        Ok(Self {
            gql,
            retry: RetryPolicy::default(),
            endpoints: BTreeMap::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Map a stash-box endpoint URL to a provider name.
    pub fn with_endpoint(mut self, endpoint: &str, provider: &str) -> Self {
        self.endpoints
            .insert(normalize_endpoint(endpoint), provider.to_string());
        self
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, ClientError> {
        self.retry
            .retry(operation, || self.gql.query::<T>(query, variables.clone()))
            .await
    }

    fn provider_for(&self, endpoint: &str) -> String {
        let normalized = normalize_endpoint(endpoint);
        self.endpoints
            .get(&normalized)
            .cloned()
            .unwrap_or_else(|| endpoint.to_string())
    }

    fn endpoint_for(&self, provider: &str) -> String {
        self.endpoints
            .iter()
            .find(|(_, name)| name.as_str() == provider)
            .map(|(endpoint, _)| endpoint.clone())
            .unwrap_or_else(|| provider.to_string())
    }

    /// Identify sources, one per known stash-box, in endpoint order.
    fn identify_input(&self, scene_ids: &[String]) -> Value {
        let sources: Vec<Value> = self
            .endpoints
            .keys()
            .map(|endpoint| json!({ "source": { "stash_box_endpoint": endpoint } }))
            .collect();
        json!({ "sources": sources, "sceneIDs": scene_ids })
    }

    fn external_ids(&self, stash_ids: Vec<StashId>) -> BTreeMap<String, String> {
        stash_ids
            .into_iter()
            .filter(|s| !s.stash_id.is_empty())
            .map(|s| (self.provider_for(&s.endpoint), s.stash_id))
            .collect()
    }

    fn stash_ids(&self, external_ids: &BTreeMap<String, String>) -> Vec<StashId> {
        external_ids
            .iter()
            .filter(|(_, id)| !id.is_empty())
            .map(|(provider, id)| StashId {
                endpoint: self.endpoint_for(provider),
                stash_id: id.clone(),
            })
            .collect()
    }

    fn scene_to_entity(&self, scene: StashScene) -> CatalogEntity {
        CatalogEntity {
            id: scene.id,
            kind: EntityKind::Scene,
            external_ids: self.external_ids(scene.stash_ids),
            fields: EntityFields {
                title: non_empty(scene.title),
                date: parse_date(scene.date.as_deref()),
                details: non_empty(scene.details),
                performers: scene.performers.into_iter().map(|p| p.name).collect(),
                studio: scene.studio.map(|s| s.name).filter(|n| !n.is_empty()),
                urls: scene.urls,
            },
            last_synced: parse_timestamp(scene.updated_at.as_deref()),
        }
    }

    fn performer_to_entity(&self, performer: StashPerformer) -> CatalogEntity {
        CatalogEntity {
            id: performer.id,
            kind: EntityKind::Performer,
            external_ids: self.external_ids(performer.stash_ids),
            fields: EntityFields {
                title: non_empty(Some(performer.name)),
                date: parse_date(performer.birthdate.as_deref()),
                details: non_empty(performer.details),
                urls: performer.urls,
                ..Default::default()
            },
            last_synced: parse_timestamp(performer.updated_at.as_deref()),
        }
    }

    fn studio_to_entity(&self, studio: StashStudio) -> CatalogEntity {
        CatalogEntity {
            id: studio.id,
            kind: EntityKind::Studio,
            external_ids: self.external_ids(studio.stash_ids),
            fields: EntityFields {
                title: non_empty(Some(studio.name)),
                details: non_empty(studio.details),
                urls: non_empty(studio.url).into_iter().collect(),
                ..Default::default()
            },
            last_synced: parse_timestamp(studio.updated_at.as_deref()),
        }
    }

    async fn resolve_performer_ids(&self, names: &[String]) -> Result<Vec<String>, ClientError> {
        let mut ids = Vec::new();
        for name in names {
            let data: PerformerLookupData = self
                .query(
                    "performerByName",
                    PERFORMER_BY_NAME,
                    json!({ "name": name }),
                )
                .await?;
            match exact_match(name, data.find_performers.performers) {
                Some(id) => ids.push(id),
                None => debug!(performer = %name, "Skipping performer not present in catalog"),
            }
        }
        Ok(ids)
    }

    async fn resolve_studio_id(&self, name: &str) -> Result<Option<String>, ClientError> {
        let data: StudioLookupData = self
            .query("studioByName", STUDIO_BY_NAME, json!({ "name": name }))
            .await?;
        let id = exact_match(name, data.find_studios.studios);
        if id.is_none() {
            debug!(studio = %name, "Skipping studio not present in catalog");
        }
        Ok(id)
    }

    /// Build the mutation input for a patch. Name references must already
    /// be resolved to catalog ids.
    fn update_input(
        &self,
        update: &EntityUpdate,
        performer_ids: Option<Vec<String>>,
        studio_id: Option<String>,
    ) -> Value {
        let fields = &update.fields;
        let mut input = Map::new();
        input.insert("id".into(), json!(update.id));

        let name_key = match update.kind {
            EntityKind::Scene => "title",
            EntityKind::Performer | EntityKind::Studio => "name",
        };
        if let Some(title) = &fields.title {
            input.insert(name_key.into(), json!(title));
        }
        if let Some(details) = &fields.details {
            input.insert("details".into(), json!(details));
        }

        match update.kind {
            EntityKind::Scene => {
                if let Some(date) = fields.date {
                    input.insert("date".into(), json!(date.format("%Y-%m-%d").to_string()));
                }
                if !fields.urls.is_empty() {
                    input.insert("urls".into(), json!(fields.urls));
                }
                if let Some(ids) = performer_ids {
                    input.insert("performer_ids".into(), json!(ids));
                }
                if let Some(id) = studio_id {
                    input.insert("studio_id".into(), json!(id));
                }
            }
            EntityKind::Performer => {
                if let Some(date) = fields.date {
                    input.insert(
                        "birthdate".into(),
                        json!(date.format("%Y-%m-%d").to_string()),
                    );
                }
                if !fields.urls.is_empty() {
                    input.insert("urls".into(), json!(fields.urls));
                }
            }
            EntityKind::Studio => {
                if let Some(url) = fields.urls.first() {
                    input.insert("url".into(), json!(url));
                }
            }
        }

        input.insert(
            "stash_ids".into(),
            json!(self.stash_ids(&update.external_ids)),
        );
        Value::Object(input)
    }
}

#[async_trait]
impl CatalogService for StashClient {
    async fn health(&self) -> Result<bool, ClientError> {
        // Single attempt; the caller polls.
        let data: HealthData = self.gql.query(HEALTH_QUERY, json!({})).await?;
        debug!(status = %data.system_status.status, "Stash system status");
        Ok(data.system_status.status == "OK")
    }

    async fn list_entities(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<EntityPage, ClientError> {
        let variables = json!({
            "filter": {
                "page": page,
                "per_page": per_page,
                "sort": "id",
                "direction": "ASC",
            }
        });

        let page = match kind {
            EntityKind::Scene => {
                let data: FindScenesData = self.query("findScenes", FIND_SCENES, variables).await?;
                EntityPage {
                    total: data.find_scenes.count,
                    entities: data
                        .find_scenes
                        .scenes
                        .into_iter()
                        .map(|s| self.scene_to_entity(s))
                        .collect(),
                }
            }
            EntityKind::Performer => {
                let data: FindPerformersData = self
                    .query("findPerformers", FIND_PERFORMERS, variables)
                    .await?;
                EntityPage {
                    total: data.find_performers.count,
                    entities: data
                        .find_performers
                        .performers
                        .into_iter()
                        .map(|p| self.performer_to_entity(p))
                        .collect(),
                }
            }
            EntityKind::Studio => {
                let data: FindStudiosData =
                    self.query("findStudios", FIND_STUDIOS, variables).await?;
                EntityPage {
                    total: data.find_studios.count,
                    entities: data
                        .find_studios
                        .studios
                        .into_iter()
                        .map(|s| self.studio_to_entity(s))
                        .collect(),
                }
            }
        };
        Ok(page)
    }

    async fn update_entity(&self, update: &EntityUpdate) -> Result<(), ClientError> {
        let (performer_ids, studio_id) = if update.kind == EntityKind::Scene {
            let performer_ids = if update.fields.performers.is_empty() {
                None
            } else {
                Some(self.resolve_performer_ids(&update.fields.performers).await?)
            };
            let studio_id = match &update.fields.studio {
                Some(name) => self.resolve_studio_id(name).await?,
                None => None,
            };
            (performer_ids, studio_id)
        } else {
            (None, None)
        };

        let input = self.update_input(update, performer_ids, studio_id);
        let (operation, mutation) = match update.kind {
            EntityKind::Scene => ("sceneUpdate", SCENE_UPDATE),
            EntityKind::Performer => ("performerUpdate", PERFORMER_UPDATE),
            EntityKind::Studio => ("studioUpdate", STUDIO_UPDATE),
        };

        let _: Value = self
            .query(operation, mutation, json!({ "input": input }))
            .await?;
        debug!(kind = %update.kind, id = %update.id, "Catalog entity updated");
        Ok(())
    }

    async fn trigger_scan(&self, paths: &[String]) -> Result<String, ClientError> {
        let data: ScanData = self
            .query(
                "metadataScan",
                METADATA_SCAN,
                json!({ "input": { "paths": paths } }),
            )
            .await?;
        Ok(data.metadata_scan)
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>, ClientError> {
        let data: FindJobData = self
            .query("findJob", FIND_JOB, json!({ "input": { "id": job_id } }))
            .await?;
        Ok(data.find_job.map(|job| job.status))
    }

    async fn unorganized_scenes(&self) -> Result<Vec<String>, ClientError> {
        let data: SceneIdsData = self
            .query("unorganizedScenes", UNORGANIZED_SCENES, json!({}))
            .await?;
        Ok(data.find_scenes.scenes.into_iter().map(|s| s.id).collect())
    }

    async fn identify_scenes(&self, scene_ids: &[String]) -> Result<String, ClientError> {
        let data: IdentifyData = self
            .query(
                "metadataIdentify",
                METADATA_IDENTIFY,
                json!({ "input": self.identify_input(scene_ids) }),
            )
            .await?;
        Ok(data.metadata_identify)
    }

    async fn generate_metadata(&self) -> Result<String, ClientError> {
        let data: GenerateData = self
            .query(
                "metadataGenerate",
                METADATA_GENERATE,
                json!({ "input": { "covers": true, "previews": true, "sprites": true, "phashes": true } }),
            )
            .await?;
        Ok(data.metadata_generate)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn exact_match(name: &str, candidates: Vec<NamedRef>) -> Option<String> {
    candidates
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .and_then(|c| c.id)
}

// Stash response types

#[derive(Debug, Deserialize)]
struct HealthData {
    #[serde(rename = "systemStatus")]
    system_status: SystemStatus,
}

#[derive(Debug, Deserialize)]
struct SystemStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct FindScenesData {
    #[serde(rename = "findScenes")]
    find_scenes: SceneList,
}

#[derive(Debug, Deserialize)]
struct SceneList {
    count: u64,
    #[serde(default)]
    scenes: Vec<StashScene>,
}

#[derive(Debug, Deserialize)]
struct StashScene {
    id: String,
    title: Option<String>,
    date: Option<String>,
    details: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    updated_at: Option<String>,
    studio: Option<NamedRef>,
    #[serde(default)]
    performers: Vec<NamedRef>,
    #[serde(default)]
    stash_ids: Vec<StashId>,
}

#[derive(Debug, Deserialize)]
struct FindPerformersData {
    #[serde(rename = "findPerformers")]
    find_performers: PerformerList,
}

#[derive(Debug, Deserialize)]
struct PerformerList {
    count: u64,
    #[serde(default)]
    performers: Vec<StashPerformer>,
}

#[derive(Debug, Deserialize)]
struct StashPerformer {
    id: String,
    name: String,
    birthdate: Option<String>,
    details: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    updated_at: Option<String>,
    #[serde(default)]
    stash_ids: Vec<StashId>,
}

#[derive(Debug, Deserialize)]
struct FindStudiosData {
    #[serde(rename = "findStudios")]
    find_studios: StudioList,
}

#[derive(Debug, Deserialize)]
struct StudioList {
    count: u64,
    #[serde(default)]
    studios: Vec<StashStudio>,
}

#[derive(Debug, Deserialize)]
struct StashStudio {
    id: String,
    name: String,
    details: Option<String>,
    url: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    stash_ids: Vec<StashId>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PerformerLookupData {
    #[serde(rename = "findPerformers")]
    find_performers: PerformerRefs,
}

#[derive(Debug, Deserialize)]
struct PerformerRefs {
    #[serde(default)]
    performers: Vec<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct StudioLookupData {
    #[serde(rename = "findStudios")]
    find_studios: StudioRefs,
}

#[derive(Debug, Deserialize)]
struct StudioRefs {
    #[serde(default)]
    studios: Vec<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct ScanData {
    #[serde(rename = "metadataScan")]
    metadata_scan: String,
}

#[derive(Debug, Deserialize)]
struct FindJobData {
    #[serde(rename = "findJob")]
    find_job: Option<StashJob>,
}

#[derive(Debug, Deserialize)]
struct StashJob {
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct SceneIdsData {
    #[serde(rename = "findScenes")]
    find_scenes: SceneIds,
}

#[derive(Debug, Deserialize)]
struct SceneIds {
    #[serde(default)]
    scenes: Vec<IdRef>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IdentifyData {
    #[serde(rename = "metadataIdentify")]
    metadata_identify: String,
}

#[derive(Debug, Deserialize)]
struct GenerateData {
    #[serde(rename = "metadataGenerate")]
    metadata_generate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StashId {
    endpoint: String,
    stash_id: String,
}
