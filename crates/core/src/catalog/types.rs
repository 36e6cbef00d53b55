use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Kind of catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Scene,
    Performer,
    Studio,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Scene => "scene",
            EntityKind::Performer => "performer",
            EntityKind::Studio => "studio",
        }
    }

    pub fn all() -> [EntityKind; 3] {
        [EntityKind::Scene, EntityKind::Performer, EntityKind::Studio]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scene" => Ok(EntityKind::Scene),
            "performer" => Ok(EntityKind::Performer),
            "studio" => Ok(EntityKind::Studio),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Descriptive metadata shared by catalog records and provider records.
///
/// For performers and studios `title` holds the name. A performer's `date`
/// is the birthdate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub studio: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

impl EntityFields {
    /// Whether no field carries a value.
    pub fn is_empty(&self) -> bool {
        self == &EntityFields::default()
    }
}

/// A scene, performer or studio owned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntity {
    /// Catalog-assigned identifier.
    pub id: String,
    pub kind: EntityKind,
    /// External identifiers keyed by provider name. Endpoints curator does
    /// not know are keyed by their URL.
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: EntityFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl CatalogEntity {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            external_ids: BTreeMap::new(),
            fields: EntityFields::default(),
            last_synced: None,
        }
    }
}

/// One page of an enumeration.
#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    pub entities: Vec<CatalogEntity>,
    /// Total matching records across all pages.
    pub total: u64,
}

/// Patch sent to the catalog.
///
/// `fields` carries only the values to set. `external_ids` is the complete
/// merged set, since the catalog replaces the list wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityUpdate {
    pub id: String,
    pub kind: EntityKind,
    pub external_ids: BTreeMap<String, String>,
    pub fields: EntityFields,
}

/// Compare catalog ids the way the catalog sorts them: numerically when
/// both are numbers, lexically otherwise.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// State of a background catalog job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Ready,
    Running,
    Stopping,
    Finished,
    Cancelled,
    Failed,
}

impl JobStatus {
    /// Whether the job will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::all() {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("gallery".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_serde() {
        let json = serde_json::to_string(&EntityKind::Performer).unwrap();
        assert_eq!(json, "\"performer\"");
        let kinds: Vec<EntityKind> = toml::from_str::<toml::Value>("k = [\"scene\", \"studio\"]")
            .unwrap()["k"]
            .clone()
            .try_into()
            .unwrap();
        assert_eq!(kinds, vec![EntityKind::Scene, EntityKind::Studio]);
    }

    #[test]
    fn test_fields_is_empty() {
        assert!(EntityFields::default().is_empty());
        let fields = EntityFields {
            studio: Some("X".into()),
            ..Default::default()
        };
        assert!(!fields.is_empty());
    }

    #[test]
    fn test_compare_ids() {
        let mut ids = vec!["10", "9", "100", "a", "2"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["2", "9", "10", "100", "a"]);
    }

    #[test]
    fn test_job_status() {
        let status: JobStatus = serde_json::from_str("\"FINISHED\"").unwrap();
        assert_eq!(status, JobStatus::Finished);
        assert!(status.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
