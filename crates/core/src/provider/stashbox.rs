//! stash-box GraphQL client (StashDB and compatible instances).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{last_path_segment, MetadataProvider, ProviderRecord};
use crate::catalog::{EntityFields, EntityKind};
use crate::client::{ClientError, GraphqlClient, RetryPolicy};

/// Site name stash-box uses for ThePornDB links.
const TPDB_SITE: &str = "ThePornDB";

const SEARCH_LIMIT: u32 = 10;

const SCENE_FIELDS: &str = r#"id title date details
  urls { url site { name } }
  studio { id name }
  performers { performer { id name } }"#;

const PERFORMER_FIELDS: &str = r#"id name birth_date
  urls { url site { name } }"#;

const STUDIO_FIELDS: &str = r#"id name
  urls { url site { name } }"#;

/// stash-box connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashBoxConfig {
    /// Provider name; also the key under which identifiers are stored.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_name() -> String {
    "stashdb".to_string()
}

fn default_url() -> String {
    "https://stashdb.org/graphql".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for StashBoxConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            url: default_url(),
            api_key: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

/// stash-box client.
pub struct StashBoxClient {
    name: String,
    gql: GraphqlClient,
    retry: RetryPolicy,
    /// Name under which ThePornDB cross-references are reported.
    tpdb_name: String,
}

impl StashBoxClient {
    pub fn new(config: &StashBoxConfig) -> Result<Self, ClientError> {
        if config.api_key.is_empty() {
            return Err(ClientError::NotConfigured(format!(
                "{} API key is required",
                config.name
            )));
        }
        let gql = GraphqlClient::new(
            &config.name,
            config.url.clone(),
            config.api_key.clone(),
            config.timeout_secs,
        )?;
        Ok(Self {
            name: config.name.clone(),
            gql,
            retry: RetryPolicy::default(),
            tpdb_name: "tpdb".to_string(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Provider name used for ThePornDB cross-references.
    pub fn with_tpdb_name(mut self, name: &str) -> Self {
        self.tpdb_name = name.to_string();
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

    fn cross_refs(&self, urls: &[BoxUrl]) -> BTreeMap<String, String> {
        urls.iter()
            .filter(|u| u.site.as_ref().is_some_and(|s| s.name == TPDB_SITE))
            .filter_map(|u| last_path_segment(&u.url))
            .take(1)
            .map(|id| (self.tpdb_name.clone(), id))
            .collect()
    }

    fn scene_record(&self, scene: BoxScene) -> ProviderRecord {
        let cross_refs = self.cross_refs(&scene.urls);
        ProviderRecord {
            id: scene.id,
            kind: EntityKind::Scene,
            fields: EntityFields {
                title: non_empty(scene.title),
                date: parse_date(scene.date.as_deref()),
                details: non_empty(scene.details),
                performers: scene
                    .performers
                    .into_iter()
                    .map(|p| p.performer.name)
                    .collect(),
                studio: scene.studio.map(|s| s.name),
                urls: scene.urls.into_iter().map(|u| u.url).collect(),
            },
            cross_refs,
        }
    }

    fn performer_record(&self, performer: BoxPerformer) -> ProviderRecord {
        let cross_refs = self.cross_refs(&performer.urls);
        ProviderRecord {
            id: performer.id,
            kind: EntityKind::Performer,
            fields: EntityFields {
                title: non_empty(Some(performer.name)),
                date: parse_date(performer.birth_date.as_deref()),
                urls: performer.urls.into_iter().map(|u| u.url).collect(),
                ..Default::default()
            },
            cross_refs,
        }
    }

    fn studio_record(&self, studio: BoxStudio) -> ProviderRecord {
        let cross_refs = self.cross_refs(&studio.urls);
        ProviderRecord {
            id: studio.id,
            kind: EntityKind::Studio,
            fields: EntityFields {
                title: non_empty(Some(studio.name)),
                urls: studio.urls.into_iter().map(|u| u.url).collect(),
                ..Default::default()
            },
            cross_refs,
        }
    }
}

#[async_trait]
impl MetadataProvider for StashBoxClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<ProviderRecord>, ClientError> {
        debug!(provider = %self.name, %kind, id, "stash-box fetch");
        let variables = json!({ "id": id });

        let record = match kind {
            EntityKind::Scene => {
                let query = format!(
                    "query FindScene($id: ID!) {{ findScene(id: $id) {{ {} }} }}",
                    SCENE_FIELDS
                );
                let data: FindSceneData = self.query("findScene", &query, variables).await?;
                data.find_scene.map(|s| self.scene_record(s))
            }
            EntityKind::Performer => {
                let query = format!(
                    "query FindPerformer($id: ID!) {{ findPerformer(id: $id) {{ {} }} }}",
                    PERFORMER_FIELDS
                );
                let data: FindPerformerData =
                    self.query("findPerformer", &query, variables).await?;
                data.find_performer.map(|p| self.performer_record(p))
            }
            EntityKind::Studio => {
                let query = format!(
                    "query FindStudio($id: ID) {{ findStudio(id: $id) {{ {} }} }}",
                    STUDIO_FIELDS
                );
                let data: FindStudioData = self.query("findStudio", &query, variables).await?;
                data.find_studio.map(|s| self.studio_record(s))
            }
        };
        Ok(record)
    }

    async fn search(
        &self,
        kind: EntityKind,
        term: &str,
    ) -> Result<Vec<ProviderRecord>, ClientError> {
        debug!(provider = %self.name, %kind, term, "stash-box search");

        let records = match kind {
            EntityKind::Scene => {
                let query = format!(
                    "query SearchScene($term: String!, $limit: Int) {{ searchScene(term: $term, limit: $limit) {{ {} }} }}",
                    SCENE_FIELDS
                );
                let data: SearchSceneData = self
                    .query(
                        "searchScene",
                        &query,
                        json!({ "term": term, "limit": SEARCH_LIMIT }),
                    )
                    .await?;
                data.search_scene
                    .into_iter()
                    .map(|s| self.scene_record(s))
                    .collect()
            }
            EntityKind::Performer => {
                let query = format!(
                    "query SearchPerformer($term: String!, $limit: Int) {{ searchPerformer(term: $term, limit: $limit) {{ {} }} }}",
                    PERFORMER_FIELDS
                );
                let data: SearchPerformerData = self
                    .query(
                        "searchPerformer",
                        &query,
                        json!({ "term": term, "limit": SEARCH_LIMIT }),
                    )
                    .await?;
                data.search_performer
                    .into_iter()
                    .map(|p| self.performer_record(p))
                    .collect()
            }
            EntityKind::Studio => {
                let query = format!(
                    "query QueryStudios($input: StudioQueryInput!) {{ queryStudios(input: $input) {{ studios {{ {} }} }} }}",
                    STUDIO_FIELDS
                );
                let data: QueryStudiosData = self
                    .query(
                        "queryStudios",
                        &query,
                        json!({ "input": { "name": term, "per_page": SEARCH_LIMIT } }),
                    )
                    .await?;
                data.query_studios
                    .studios
                    .into_iter()
                    .map(|s| self.studio_record(s))
                    .collect()
            }
        };
        Ok(records)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        // Month precision ("2024-03") reads as the first of the month.
        .or_else(|| NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").ok())
}

// stash-box response types

#[derive(Debug, Deserialize)]
struct FindSceneData {
    #[serde(rename = "findScene")]
    find_scene: Option<BoxScene>,
}

#[derive(Debug, Deserialize)]
struct FindPerformerData {
    #[serde(rename = "findPerformer")]
    find_performer: Option<BoxPerformer>,
}

#[derive(Debug, Deserialize)]
struct FindStudioData {
    #[serde(rename = "findStudio")]
    find_studio: Option<BoxStudio>,
}

#[derive(Debug, Deserialize)]
struct SearchSceneData {
    #[serde(rename = "searchScene", default)]
    search_scene: Vec<BoxScene>,
}

#[derive(Debug, Deserialize)]
struct SearchPerformerData {
    #[serde(rename = "searchPerformer", default)]
    search_performer: Vec<BoxPerformer>,
}

#[derive(Debug, Deserialize)]
struct QueryStudiosData {
    #[serde(rename = "queryStudios")]
    query_studios: StudioList,
}

#[derive(Debug, Deserialize)]
struct StudioList {
    #[serde(default)]
    studios: Vec<BoxStudio>,
}

#[derive(Debug, Deserialize)]
struct BoxScene {
    id: String,
    title: Option<String>,
    date: Option<String>,
    details: Option<String>,
    #[serde(default)]
    urls: Vec<BoxUrl>,
    studio: Option<BoxNamed>,
    #[serde(default)]
    performers: Vec<BoxAppearance>,
}

#[derive(Debug, Deserialize)]
struct BoxPerformer {
    id: String,
    name: String,
    birth_date: Option<String>,
    #[serde(default)]
    urls: Vec<BoxUrl>,
}

#[derive(Debug, Deserialize)]
struct BoxStudio {
    id: String,
    name: String,
    #[serde(default)]
    urls: Vec<BoxUrl>,
}

#[derive(Debug, Deserialize)]
struct BoxAppearance {
    performer: BoxNamed,
}

#[derive(Debug, Deserialize)]
struct BoxNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BoxUrl {
    url: String,
    site: Option<BoxSite>,
}

#[derive(Debug, Deserialize)]
struct BoxSite {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StashBoxClient {
        StashBoxClient::new(&StashBoxConfig {
            api_key: "key".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config: StashBoxConfig = toml::from_str(r#"api_key = "k""#).unwrap();
        assert_eq!(config.name, "stashdb");
        assert_eq!(config.url, "https://stashdb.org/graphql");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = StashBoxClient::new(&StashBoxConfig::default());
        assert!(matches!(result, Err(ClientError::NotConfigured(_))));
    }

    #[test]
    fn test_performer_record_with_tpdb_cross_ref() {
        let data: FindPerformerData = serde_json::from_str(
            r#"{"findPerformer": {
                "id": "sdb-perf-1",
                "name": "Jane Doe",
                "birth_date": "1990-05-01",
                "urls": [
                    {"url": "https://twitter.com/jane", "site": {"name": "Twitter"}},
                    {"url": "https://theporndb.net/performers/jane-doe", "site": {"name": "ThePornDB"}}
                ]
            }}"#,
        )
        .unwrap();
        let record = client().performer_record(data.find_performer.unwrap());

        assert_eq!(record.id, "sdb-perf-1");
        assert_eq!(record.fields.title.as_deref(), Some("Jane Doe"));
        assert_eq!(record.fields.date, NaiveDate::from_ymd_opt(1990, 5, 1));
        assert_eq!(record.cross_refs.get("tpdb").unwrap(), "jane-doe");
        assert_eq!(record.fields.urls.len(), 2);
    }

    #[test]
    fn test_scene_record() {
        let data: SearchSceneData = serde_json::from_str(
            r#"{"searchScene": [{
                "id": "sdb-scene-1",
                "title": "SceneTitle",
                "date": "2024-02-10",
                "details": "About the scene",
                "urls": [],
                "studio": {"id": "s1", "name": "Studio Y"},
                "performers": [{"performer": {"id": "p1", "name": "Jane Doe"}}]
            }]}"#,
        )
        .unwrap();
        let client = client();
        let records: Vec<_> = data
            .search_scene
            .into_iter()
            .map(|s| client.scene_record(s))
            .collect();

        assert_eq!(records.len(), 1);
        let scene = &records[0];
        assert_eq!(scene.kind, EntityKind::Scene);
        assert_eq!(scene.fields.studio.as_deref(), Some("Studio Y"));
        assert_eq!(scene.fields.performers, vec!["Jane Doe"]);
        assert!(scene.cross_refs.is_empty());
    }

    #[test]
    fn test_missing_record_is_none() {
        let data: FindSceneData = serde_json::from_str(r#"{"findScene": null}"#).unwrap();
        assert!(data.find_scene.is_none());
    }

    #[test]
    fn test_parse_partial_date() {
        assert_eq!(
            parse_date(Some("2024-03")),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(parse_date(Some("garbage")), None);
        assert_eq!(parse_date(None), None);
    }

    #[test]
    fn test_custom_tpdb_name() {
        let client = client().with_tpdb_name("porndb");
        let urls = vec![BoxUrl {
            url: "https://theporndb.net/sites/brand".into(),
            site: Some(BoxSite {
                name: "ThePornDB".into(),
            }),
        }];
        assert_eq!(client.cross_refs(&urls).get("porndb").unwrap(), "brand");
    }
}
