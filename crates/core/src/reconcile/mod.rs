//! Metadata reconciliation.
//!
//! Walks every catalog entity, consults the configured providers, fills
//! empty fields and records new external identifiers. Results are cached
//! so unchanged entities are skipped until their entry expires.

mod config;
mod engine;
mod matcher;
mod merge;
mod types;

pub use config::ReconcileConfig;
pub use engine::Reconciler;
pub use matcher::{normalize_title, select_candidate, MatchResult};
pub use merge::{digest, fill_empty, merge_id};
pub use types::*;
