//! Offline-first reconciliation engine.
//!
//! The reconciler refreshes one entity collection at a time from the remote
//! service while keeping every local write that has not been uploaded yet.

pub mod dedup;
pub mod normalize;
mod reconciler;

pub use reconciler::*;

use serde_json::Value;

use crate::errors::ValidationError;
use crate::models::{EntityType, Record};

/// Per-entity normalization and duplicate rules handed to the reconciler.
pub trait RecordRules: Send + Sync {
    /// Coerce a raw record into the canonical shape.
    fn coerce(&self, entity: EntityType, raw: Value) -> Result<Record, ValidationError>;

    /// Re-apply the alias table to a record that is already typed.
    fn normalize(&self, entity: EntityType, record: Record) -> Record;

    /// Whether `candidate` repeats a record already accepted in this batch.
    fn is_duplicate(&self, entity: EntityType, candidate: &Record, accepted: &[Record]) -> bool;

    /// Field names that hold one value, one group per alias row.
    fn alias_groups(&self, entity: EntityType) -> Vec<Vec<&'static str>>;
}

/// The built-in alias tables and matching rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl RecordRules for StandardRules {
    fn coerce(&self, entity: EntityType, raw: Value) -> Result<Record, ValidationError> {
        normalize::coerce(entity, raw)
    }

    fn normalize(&self, entity: EntityType, record: Record) -> Record {
        normalize::normalize(entity, record)
    }

    fn is_duplicate(&self, entity: EntityType, candidate: &Record, accepted: &[Record]) -> bool {
        dedup::is_duplicate(entity, candidate, accepted)
    }

    fn alias_groups(&self, entity: EntityType) -> Vec<Vec<&'static str>> {
        normalize::alias_table(entity)
            .iter()
            .map(|rule| rule.names().collect())
            .collect()
    }
}
