//! Merge rules: local data always wins, identifiers only grow.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::catalog::EntityFields;

/// Fill empty fields of `target` from `source`.
///
/// Every value copied is also recorded in `patch`, which ends up holding
/// exactly the fields that changed.
pub fn fill_empty(target: &mut EntityFields, source: &EntityFields, patch: &mut EntityFields) {
    fill_option(&mut target.title, &source.title, &mut patch.title);
    fill_option(&mut target.date, &source.date, &mut patch.date);
    fill_option(&mut target.details, &source.details, &mut patch.details);
    fill_option(&mut target.studio, &source.studio, &mut patch.studio);
    fill_vec(&mut target.performers, &source.performers, &mut patch.performers);
    fill_vec(&mut target.urls, &source.urls, &mut patch.urls);
}

fn fill_option<T: Clone>(target: &mut Option<T>, source: &Option<T>, patch: &mut Option<T>) {
    if target.is_none() {
        if let Some(value) = source {
            *target = Some(value.clone());
            *patch = Some(value.clone());
        }
    }
}

fn fill_vec<T: Clone>(target: &mut Vec<T>, source: &[T], patch: &mut Vec<T>) {
    if target.is_empty() && !source.is_empty() {
        *target = source.to_vec();
        *patch = source.to_vec();
    }
}

/// Add `id` for `provider` unless one is already known. Returns whether the
/// identifier was new.
pub fn merge_id(ids: &mut BTreeMap<String, String>, provider: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    match ids.get(provider) {
        Some(existing) if !existing.is_empty() => false,
        _ => {
            ids.insert(provider.to_string(), id.to_string());
            true
        }
    }
}

/// Hex SHA-256 over the merged record.
pub fn digest(ids: &BTreeMap<String, String>, fields: &EntityFields) -> String {
    let mut hasher = Sha256::new();
    // BTreeMap and struct field order keep the serialization stable.
    if let Ok(bytes) = serde_json::to_vec(&(ids, fields)) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}
