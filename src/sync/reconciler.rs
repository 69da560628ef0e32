//! Reconciliation cycle for one entity collection.
//!
//! `Idle -> CheckingConnectivity -> (Offline | FetchingRemote) -> (Reconciling | Fallback) -> Idle`
//!
//! Two locks per entity type: `cycle` keeps cycles single-flight, `write` covers
//! the read-clear-repopulate section and every local user write, so a user write
//! never lands between `clear_all` and the reinsertion of unsynced records.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::RecordRules;
use crate::db::LocalStore;
use crate::errors::{AppError, RemoteError};
use crate::models::{CycleOutcome, CycleReport, EntityType, MergedView, Record, Trigger, WriteFailure};
use crate::remote::RemoteSource;

/// Fields owned by the cache itself; payload patches may not set them.
const RESERVED_FIELDS: [&str; 5] = ["id", "_id", "isSynced", "createdAt", "updatedAt"];

/// States of one cycle, used for transition logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    CheckingConnectivity,
    Offline,
    FetchingRemote,
    Reconciling,
    Fallback,
}

#[derive(Default)]
struct EntityGuards {
    cycle: Mutex<()>,
    write: Mutex<()>,
}

/// Orchestrates refresh cycles and local cache writes.
pub struct Reconciler {
    store: LocalStore,
    remote: Arc<dyn RemoteSource>,
    rules: Arc<dyn RecordRules>,
    guards: [EntityGuards; 4],
    probe_timeout: Duration,
    cycle_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteSource>,
        rules: Arc<dyn RecordRules>,
        probe_timeout: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            rules,
            guards: Default::default(),
            probe_timeout,
            cycle_timeout,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn guards(&self, entity: EntityType) -> &EntityGuards {
        let slot = match entity {
            EntityType::Product => 0,
            EntityType::Customer => 1,
            EntityType::Order => 2,
            EntityType::PurchaseOrder => 3,
        };
        &self.guards[slot]
    }

    /// Run one cycle, probing connectivity first.
    ///
    /// Only a storage failure is returned as an error; every network failure
    /// degrades to the local view.
    pub async fn reconcile(
        &self,
        entity: EntityType,
        trigger: Trigger,
        identity: Option<&str>,
    ) -> Result<MergedView, AppError> {
        let _cycle = self.guards(entity).cycle.lock().await;

        transition(entity, CycleState::Idle, CycleState::CheckingConnectivity);
        let reachable = self.remote.probe(self.probe_timeout).await;
        self.run_cycle(entity, trigger, reachable, identity).await
    }

    async fn run_cycle(
        &self,
        entity: EntityType,
        trigger: Trigger,
        reachable: bool,
        identity: Option<&str>,
    ) -> Result<MergedView, AppError> {
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339();

        if !reachable {
            transition(entity, CycleState::CheckingConnectivity, CycleState::Offline);
            tracing::info!(entity = %entity, trigger = trigger.as_str(), "Remote unreachable, serving local cache");
            let mut report = CycleReport::new(CycleOutcome::Offline, trigger, started_at);
            let records = self.local_snapshot(entity).await?;
            report.duration_ms = elapsed_ms(started);
            transition(entity, CycleState::Offline, CycleState::Idle);
            return Ok(MergedView {
                entity,
                records,
                report,
            });
        }

        transition(entity, CycleState::CheckingConnectivity, CycleState::FetchingRemote);
        let fetched = match tokio::time::timeout(
            self.cycle_timeout,
            self.remote.fetch_collection(entity, identity),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        let items = match fetched {
            Ok(items) => items,
            Err(e) => {
                transition(entity, CycleState::FetchingRemote, CycleState::Fallback);
                tracing::warn!(entity = %entity, trigger = trigger.as_str(), "Remote fetch failed, serving local cache: {}", e);
                let mut report = CycleReport::new(CycleOutcome::Fallback, trigger, started_at);
                report.fallback_reason = Some(e.to_string());
                let records = self.local_snapshot(entity).await?;
                report.duration_ms = elapsed_ms(started);
                transition(entity, CycleState::Fallback, CycleState::Idle);
                return Ok(MergedView {
                    entity,
                    records,
                    report,
                });
            }
        };

        transition(entity, CycleState::FetchingRemote, CycleState::Reconciling);
        let mut report = CycleReport::new(CycleOutcome::Reconciled, trigger, started_at);
        report.remote_count = items.len();

        let records = self.merge(entity, items, &mut report).await?;
        report.duration_ms = elapsed_ms(started);

        tracing::info!(
            entity = %entity,
            trigger = trigger.as_str(),
            remote = report.remote_count,
            accepted = report.accepted_count,
            duplicates = report.duplicates_skipped,
            invalid = report.invalid_dropped,
            unsynced = report.unsynced_retained,
            failures = report.write_failures.len(),
            "Reconciliation cycle complete"
        );
        if report.degraded {
            tracing::error!(entity = %entity, "Local writes failed, cycle rolled back to the previous cache");
        }

        transition(entity, CycleState::Reconciling, CycleState::Idle);
        Ok(MergedView {
            entity,
            records,
            report,
        })
    }

    /// The `Reconciling` state. Runs entirely under the write lock, and every
    /// store write of the cycle goes through one transaction: a cycle that is
    /// cancelled or fails midway leaves the previous cache in place.
    async fn merge(
        &self,
        entity: EntityType,
        items: Vec<Value>,
        report: &mut CycleReport,
    ) -> Result<Vec<Record>, AppError> {
        // Normalize
        let mut incoming = Vec::with_capacity(items.len());
        for raw in items {
            match self.rules.coerce(entity, raw) {
                Ok(record) => incoming.push(record),
                Err(e) => {
                    report.invalid_dropped += 1;
                    tracing::warn!(entity = %entity, "Dropping remote record: {}", e);
                }
            }
        }

        let _write = self.guards(entity).write.lock().await;

        // Partition the local snapshot
        let snapshot: Vec<Record> = self
            .store
            .get_all_checked(entity)
            .await?
            .into_iter()
            .map(|r| self.rules.normalize(entity, r))
            .collect();
        let unsynced: Vec<Record> = snapshot.iter().filter(|r| !r.is_synced).cloned().collect();
        report.unsynced_retained = unsynced.len();

        // Clear
        let mut tx = self.store.begin().await?;
        let cleared = LocalStore::clear_all(&mut tx, entity).await?;
        tracing::debug!(entity = %entity, previous = snapshot.len(), cleared, "Cleared cached collection");

        // Dedup against the accepted part of the batch
        let mut accepted: Vec<Record> = Vec::with_capacity(incoming.len());
        for mut record in incoming {
            if self.rules.is_duplicate(entity, &record, &accepted) {
                report.duplicates_skipped += 1;
                tracing::debug!(entity = %entity, id = %record.id, "Skipping duplicate remote record");
                continue;
            }
            record.is_synced = true;
            accepted.push(record);
        }
        report.accepted_count = accepted.len();

        // Bulk insert the remote partition
        let bulk = LocalStore::bulk_insert(&mut tx, entity, &accepted, true).await;
        tracing::debug!(entity = %entity, inserted = bulk.inserted.len(), "Bulk insert done");
        let mut failures = bulk.failures;

        // Reinsert unsynced records one by one
        let mut reinserted = HashSet::new();
        for record in &unsynced {
            match LocalStore::upsert_on(&mut tx, entity, record).await {
                Ok(()) => {
                    reinserted.insert(record.id.clone());
                }
                Err(e) => {
                    tracing::warn!(entity = %entity, id = %record.id, "Failed to keep unsynced record: {}", e);
                    failures.push(WriteFailure {
                        id: record.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let attempted = accepted.len() + unsynced.len();
        let all_failed = attempted > 0 && failures.len() >= attempted;
        let unsynced_lost = reinserted.len() < unsynced.len();
        report.write_failures = failures;

        if all_failed || unsynced_lost {
            // Committing now would drop unsynced records or empty the cache.
            tx.rollback().await?;
            report.degraded = true;
            return Ok(snapshot);
        }
        tx.commit().await?;

        // Remote first, then unsynced; an unsynced record that took over a
        // remote id replaces it in the view as it did in the store.
        let mut merged: Vec<Record> = accepted
            .into_iter()
            .filter(|r| !reinserted.contains(&r.id))
            .collect();
        merged.extend(unsynced);
        Ok(merged)
    }

    /// Normalized local snapshot, no remote involvement.
    pub async fn local_snapshot(&self, entity: EntityType) -> Result<Vec<Record>, AppError> {
        let records = self.store.get_all(entity).await?;
        Ok(records
            .into_iter()
            .map(|r| self.rules.normalize(entity, r))
            .collect())
    }

    /// Create a record from user input. It starts unsynced with a fresh local id.
    pub async fn create_local(&self, entity: EntityType, payload: Value) -> Result<Record, AppError> {
        let mut fields = payload_object(payload)?;
        strip_reserved(&mut fields);

        let now = Utc::now().to_rfc3339();
        fields.insert("id".to_string(), Value::String(uuid::Uuid::now_v7().to_string()));
        fields.insert("createdAt".to_string(), Value::String(now.clone()));
        fields.insert("updatedAt".to_string(), Value::String(now));

        let mut record = self.rules.coerce(entity, Value::Object(fields))?;
        record.is_synced = false;

        let _write = self.guards(entity).write.lock().await;
        self.store.upsert(entity, &record).await?;

        tracing::info!(entity = %entity, id = %record.id, "Created local record");
        Ok(record)
    }

    /// Apply a user edit. The record becomes unsynced again.
    pub async fn update_local(
        &self,
        entity: EntityType,
        id: &str,
        patch: Value,
    ) -> Result<Record, AppError> {
        let mut patch = payload_object(patch)?;
        strip_reserved(&mut patch);

        let _write = self.guards(entity).write.lock().await;
        let existing = self
            .store
            .get(entity, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", entity, id)))?;

        let mut fields = existing.fields.clone();
        // A patch that touches any spelling of an aliased field replaces the whole row.
        for names in self.rules.alias_groups(entity) {
            if names.iter().any(|name| patch.contains_key(*name)) {
                for name in names {
                    fields.remove(name);
                }
            }
        }
        fields.extend(patch);

        let mut record = self.rules.normalize(
            entity,
            Record {
                id: existing.id.clone(),
                is_synced: false,
                created_at: existing.created_at.clone(),
                updated_at: Some(Utc::now().to_rfc3339()),
                fields,
            },
        );

        if entity.is_order_like()
            && !existing.is_synced
            && record.fields.get("items") != existing.fields.get("items")
        {
            return Err(AppError::Conflict(format!(
                "line items of unsynced {} {} cannot change",
                entity, id
            )));
        }

        record.is_synced = false;
        self.store.upsert(entity, &record).await?;

        tracing::info!(entity = %entity, id = %record.id, "Updated local record");
        Ok(record)
    }

    /// Explicit local delete.
    pub async fn delete_local(&self, entity: EntityType, id: &str) -> Result<(), AppError> {
        let _write = self.guards(entity).write.lock().await;
        if !self.store.delete(entity, id).await? {
            return Err(AppError::NotFound(format!("{} {} not found", entity, id)));
        }
        tracing::info!(entity = %entity, id = %id, "Deleted local record");
        Ok(())
    }

    /// Upload acknowledgement: mark a record synced, optionally re-keying it
    /// to the id the remote assigned.
    pub async fn mark_synced(
        &self,
        entity: EntityType,
        id: &str,
        remote_id: Option<&str>,
    ) -> Result<Record, AppError> {
        let _write = self.guards(entity).write.lock().await;
        let mut record = self
            .store
            .get(entity, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", entity, id)))?;

        record.is_synced = true;
        let mut tx = self.store.begin().await?;
        if let Some(new_id) = remote_id.map(str::trim).filter(|s| !s.is_empty() && *s != id) {
            LocalStore::delete_on(&mut tx, entity, id).await?;
            record.id = new_id.to_string();
        }
        LocalStore::upsert_on(&mut tx, entity, &record).await?;
        tx.commit().await?;

        tracing::info!(entity = %entity, id = %record.id, "Marked record synced");
        Ok(record)
    }
}

fn payload_object(payload: Value) -> Result<Map<String, Value>, AppError> {
    match payload {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Validation(
            "record payload must be a JSON object".to_string(),
        )),
    }
}

fn strip_reserved(fields: &mut Map<String, Value>) {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
}

fn transition(entity: EntityType, from: CycleState, to: CycleState) {
    tracing::debug!(entity = %entity, "{:?} -> {:?}", from, to);
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
