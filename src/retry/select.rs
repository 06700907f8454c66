//! Retry selection over a record store snapshot.
//!
//! Streams the store, folds attempts per logical task, and keeps only the
//! per-task summaries in memory. Output is ordered by logical task id so the
//! same snapshot always yields the same selection.

use std::collections::BTreeMap;

use crate::domain::RunRecord;
use crate::error::Result;
use crate::retry::classify::{Decision, GroupState};
use crate::storage::RecordStore;

/// Classification of every logical task in a store snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    groups: BTreeMap<String, Decision>,
    attempts: BTreeMap<String, usize>,
}

impl Snapshot {
    /// Decision per logical task, ascending by id.
    pub fn decisions(&self) -> impl Iterator<Item = (&str, &Decision)> {
        self.groups.iter().map(|(id, d)| (id.as_str(), d))
    }

    pub fn decision(&self, logical_task_id: &str) -> Option<&Decision> {
        self.groups.get(logical_task_id)
    }

    /// Number of attempts recorded for a logical task.
    pub fn attempts(&self, logical_task_id: &str) -> usize {
        self.attempts.get(logical_task_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, logical_task_id: &str) -> bool {
        self.groups.contains_key(logical_task_id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.ids_where(|d| matches!(d, Decision::Done))
    }

    pub fn pending(&self) -> Vec<String> {
        self.ids_where(|d| matches!(d, Decision::Pending))
    }

    /// Latest failing record of every task that needs a retry.
    pub fn retries(&self) -> Vec<RunRecord> {
        self.groups
            .values()
            .filter_map(|d| match d {
                Decision::Retry(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Keep only the logical tasks the predicate accepts.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.groups.retain(|id, _| keep(id));
        self.attempts.retain(|id, _| keep(id));
    }

    fn ids_where(&self, pred: impl Fn(&Decision) -> bool) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, d)| pred(d))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Classify every logical task in the store.
pub fn snapshot<S: RecordStore + ?Sized>(store: &S) -> Result<Snapshot> {
    let mut states: BTreeMap<String, GroupState> = BTreeMap::new();
    store.scan(&mut |record| {
        states
            .entry(record.logical_task_id.clone())
            .or_default()
            .observe(record)
    })?;

    let mut snapshot = Snapshot::default();
    for (id, state) in states {
        if let Some(decision) = state.decision() {
            snapshot.attempts.insert(id.clone(), state.attempts());
            snapshot.groups.insert(id, decision);
        }
    }
    Ok(snapshot)
}

/// Records that must be re-executed, ascending by logical task id.
///
/// An empty result is the convergence signal.
pub fn select_retries<S: RecordStore + ?Sized>(store: &S) -> Result<Vec<RunRecord>> {
    Ok(snapshot(store)?.retries())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;
    use crate::storage::MemoryRecordStore;
    use chrono::DateTime;

    fn record(task: &str, attempt: &str, status: RunStatus, t: i64) -> RunRecord {
        let mut r = RunRecord::start(task).finalized(status);
        r.attempt_id = attempt.to_string();
        r.created_at = DateTime::from_timestamp(t, 0).unwrap();
        r
    }

    #[test]
    fn test_selects_only_unfinished_tasks() {
        let store = MemoryRecordStore::with_records(vec![
            record("A", "a1", RunStatus::Error, 1),
            record("A", "a2", RunStatus::Success, 2),
            record("B", "b1", RunStatus::Error, 1),
        ]);

        let selected = select_retries(&store).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].attempt_id, "b1");
    }

    #[test]
    fn test_selects_latest_failure() {
        let store = MemoryRecordStore::with_records(vec![
            record("C", "c2", RunStatus::Error, 2),
            record("C", "c1", RunStatus::Error, 1),
        ]);

        let selected = select_retries(&store).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].attempt_id, "c2");
    }

    #[test]
    fn test_output_sorted_by_task_id() {
        let store = MemoryRecordStore::with_records(vec![
            record("zeta", "z1", RunStatus::Error, 1),
            record("alpha", "a1", RunStatus::Error, 1),
            record("mid", "m1", RunStatus::Cancelled, 1),
        ]);

        let ids: Vec<String> = select_retries(&store)
            .unwrap()
            .into_iter()
            .map(|r| r.logical_task_id)
            .collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_selection_is_idempotent() {
        let store = MemoryRecordStore::with_records(vec![
            record("B", "b1", RunStatus::Error, 1),
            record("A", "a1", RunStatus::Cancelled, 3),
            record("A", "a0", RunStatus::Error, 3),
            record("D", "d1", RunStatus::Running, 1),
        ]);

        let first = select_retries(&store).unwrap();
        let second = select_retries(&store).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_store_selects_nothing() {
        let store = MemoryRecordStore::new();
        assert!(select_retries(&store).unwrap().is_empty());
        assert!(snapshot(&store).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_partitions_tasks() {
        let store = MemoryRecordStore::with_records(vec![
            record("done", "x1", RunStatus::Success, 1),
            record("running", "r1", RunStatus::Running, 1),
            record("failed", "f1", RunStatus::Error, 1),
            record("failed", "f2", RunStatus::Error, 2),
        ]);

        let snap = snapshot(&store).unwrap();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.succeeded(), vec!["done"]);
        assert_eq!(snap.pending(), vec!["running"]);
        assert_eq!(snap.retries().len(), 1);
        assert_eq!(snap.attempts("failed"), 2);
        assert_eq!(snap.decision("done"), Some(&Decision::Done));
        assert!(!snap.contains("other"));
    }
}
