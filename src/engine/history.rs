use dashmap::DashMap;
use ulid::Ulid;

use crate::model::HistoryEntry;

/// Append-only audit log of lifecycle transitions, keyed by reservation.
///
/// There is no remove or edit path. Entries outlive the reservation they
/// describe, including admin deletion.
#[derive(Default)]
pub struct HistoryLog {
    entries: DashMap<Ulid, Vec<HistoryEntry>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, entry: HistoryEntry) {
        self.entries
            .entry(entry.reservation_id)
            .or_default()
            .push(entry);
    }

    /// Entries for one reservation, oldest first.
    pub fn entries_for(&self, reservation_id: &Ulid) -> Vec<HistoryEntry> {
        self.entries
            .get(reservation_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything in the log, grouped by reservation in append order.
    pub(crate) fn snapshot(&self) -> Vec<HistoryEntry> {
        let mut ids: Vec<Ulid> = self.entries.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids.iter().flat_map(|id| self.entries_for(id)).collect()
    }
}
