//! Result types handed back to the consuming view after a cycle.

use serde::{Deserialize, Serialize};

use super::{EntityType, Record};

/// Event that started a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Mount,
    Focus,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Mount => "mount",
            Trigger::Focus => "focus",
            Trigger::Manual => "manual",
        }
    }
}

/// Which branch of the state machine produced the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Remote snapshot merged with the unsynced partition.
    Reconciled,
    /// Remote unreachable; local snapshot returned untouched.
    Offline,
    /// Remote reachable but the fetch failed; local snapshot returned untouched.
    Fallback,
}

/// A single local write that did not land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFailure {
    pub id: String,
    pub message: String,
}

/// Counters and diagnostics for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub trigger: Trigger,
    pub remote_count: usize,
    pub accepted_count: usize,
    pub duplicates_skipped: usize,
    pub invalid_dropped: usize,
    pub unsynced_retained: usize,
    pub write_failures: Vec<WriteFailure>,
    /// The cycle's writes were rolled back; the view is the previous cache.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub started_at: String,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn new(outcome: CycleOutcome, trigger: Trigger, started_at: String) -> Self {
        Self {
            outcome,
            trigger,
            remote_count: 0,
            accepted_count: 0,
            duplicates_skipped: 0,
            invalid_dropped: 0,
            unsynced_retained: 0,
            write_failures: Vec::new(),
            degraded: false,
            fallback_reason: None,
            started_at,
            duration_ms: 0,
        }
    }
}

/// Best-available view of one entity collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedView {
    pub entity: EntityType,
    pub records: Vec<Record>,
    pub report: CycleReport,
}

#[cfg(test)]
impl MergedView {
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }
}
