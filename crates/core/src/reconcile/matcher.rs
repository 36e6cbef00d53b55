//! Fallback matching for entities without a known external identifier.

use crate::catalog::{CatalogEntity, EntityKind};
use crate::provider::ProviderRecord;

/// Result of matching search candidates against a catalog entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched(ProviderRecord),
    NoMatch,
    /// Several candidates passed; their ids.
    Ambiguous(Vec<String>),
}

/// Lowercased alphanumeric words separated by single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick the single candidate matching `entity`.
///
/// A candidate passes when its normalized title equals the entity's and the
/// dates are within `tolerance_days`. Scenes need a date on both sides;
/// performers and studios only compare dates when both have one.
pub fn select_candidate(
    entity: &CatalogEntity,
    candidates: Vec<ProviderRecord>,
    tolerance_days: i64,
) -> MatchResult {
    let Some(title) = entity.fields.title.as_deref() else {
        return MatchResult::NoMatch;
    };
    let wanted = normalize_title(title);
    if wanted.is_empty() {
        return MatchResult::NoMatch;
    }

    let mut passing: Vec<ProviderRecord> = candidates
        .into_iter()
        .filter(|c| c.kind == entity.kind)
        .filter(|c| {
            c.fields
                .title
                .as_deref()
                .is_some_and(|t| normalize_title(t) == wanted)
        })
        .filter(|c| dates_compatible(entity, c, tolerance_days))
        .collect();

    match passing.len() {
        0 => MatchResult::NoMatch,
        1 => MatchResult::Matched(passing.remove(0)),
        _ => MatchResult::Ambiguous(passing.into_iter().map(|c| c.id).collect()),
    }
}

fn dates_compatible(entity: &CatalogEntity, candidate: &ProviderRecord, tolerance: i64) -> bool {
    match (entity.fields.date, candidate.fields.date) {
        (Some(a), Some(b)) => (a - b).num_days().abs() <= tolerance,
        _ => entity.kind != EntityKind::Scene,
    }
}
