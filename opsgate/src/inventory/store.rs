//! In-memory [`InventoryStore`] used by tests and local development.
use std::collections::HashMap;

use parking_lot::Mutex;

use opsgate_core::{Error, Result};

use super::{
    ChangeLogEntry, CloudResourceRecord, InventoryStore, SyncCommit, SyncHistoryEntry, SyncOutcome,
};

fn record_not_found(id: i64) -> Error {
    Error::NotFound(format!("inventory record {id}"))
}

fn history_not_found(id: i64) -> Error {
    Error::NotFound(format!("sync history entry {id}"))
}

#[derive(Default)]
struct StoreState {
    records: HashMap<i64, CloudResourceRecord>,
    history: Vec<SyncHistoryEntry>,
    changes: Vec<ChangeLogEntry>,
    next_record_id: i64,
    next_history_id: i64,
}

/// All state behind one mutex, so a commit is trivially atomic.
#[derive(Default)]
pub struct MemoryInventoryStore {
    state: Mutex<StoreState>,
}

impl MemoryInventoryStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn records(&self, cloud_account_id: i64) -> Result<Vec<CloudResourceRecord>> {
        let state = self.state.lock();
        let mut records: Vec<CloudResourceRecord> = state
            .records
            .values()
            .filter(|r| r.cloud_account_id == cloud_account_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(records)
    }

    async fn record(&self, id: i64) -> Result<CloudResourceRecord> {
        self.state
            .lock()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| record_not_found(id))
    }

    async fn commit(&self, commit: SyncCommit) -> Result<SyncOutcome> {
        let SyncCommit {
            mut history,
            mut records,
            changes,
        } = commit;
        let mut state = self.state.lock();

        // Stage everything before touching state so a bad commit leaves the
        // store untouched.
        let mut next_record_id = state.next_record_id;
        for record in &mut records {
            if record.id == 0 {
                next_record_id += 1;
                record.id = next_record_id;
            }
        }
        let mut by_instance: HashMap<&str, i64> = state
            .records
            .values()
            .filter(|r| r.cloud_account_id == history.cloud_account_id)
            .map(|r| (r.instance_id.as_str(), r.id))
            .collect();
        for record in &records {
            by_instance.insert(record.instance_id.as_str(), record.id);
        }
        let history_id = state.next_history_id + 1;
        let mut rows = Vec::with_capacity(changes.len());
        for change in &changes {
            let record_id = by_instance
                .get(change.instance_id.as_str())
                .copied()
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "change log references unknown instance {:?}",
                        change.instance_id
                    ))
                })?;
            rows.push(ChangeLogEntry {
                history_id,
                record_id,
                instance_id: change.instance_id.clone(),
                kind: change.kind,
                at: history.finished_at,
            });
        }

        state.next_record_id = next_record_id;
        state.next_history_id = history_id;
        history.id = history_id;
        for record in &records {
            state.records.insert(record.id, record.clone());
        }
        state.changes.extend(rows);
        state.history.push(history.clone());
        Ok(SyncOutcome { history, records })
    }

    async fn add_warning(&self, history_id: i64, warning: String) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .history
            .iter_mut()
            .find(|h| h.id == history_id)
            .ok_or_else(|| history_not_found(history_id))?;
        entry.warnings.push(warning);
        Ok(())
    }

    async fn add_binding(&self, record_id: i64, node_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(&record_id)
            .ok_or_else(|| record_not_found(record_id))?;
        record.bound_tree_node_ids.insert(node_id);
        Ok(())
    }

    async fn remove_binding(&self, record_id: i64, node_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(&record_id)
            .ok_or_else(|| record_not_found(record_id))?;
        record.bound_tree_node_ids.remove(&node_id);
        Ok(())
    }

    async fn delete_record(&self, id: i64) -> Result<()> {
        self.state
            .lock()
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| record_not_found(id))
    }

    async fn history(&self, cloud_account_id: i64) -> Result<Vec<SyncHistoryEntry>> {
        let state = self.state.lock();
        let mut history: Vec<SyncHistoryEntry> = state
            .history
            .iter()
            .filter(|h| h.cloud_account_id == cloud_account_id)
            .cloned()
            .collect();
        history.sort_by_key(|h| std::cmp::Reverse(h.id));
        Ok(history)
    }

    async fn changes(&self, history_id: i64) -> Result<Vec<ChangeLogEntry>> {
        Ok(self
            .state
            .lock()
            .changes
            .iter()
            .filter(|c| c.history_id == history_id)
            .cloned()
            .collect())
    }
}
