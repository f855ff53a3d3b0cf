use super::request::RepairRequest;
use crate::model::ResourceId;
use std::collections::BTreeMap;
use tracing::error;

/// One queued request and the sequence number it was stored under. The
/// sequence changes whenever the entry is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRepair {
    pub seq: u64,
    pub request: RepairRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
    /// A reindex older than the queued one; nothing changed.
    Kept,
    /// A reindex arriving after a queued delete; dropped.
    Contradiction,
}

/// Pending repairs keyed by resource id, at most one per resource.
#[derive(Debug, Default)]
pub struct RepairQueue {
    entries: BTreeMap<ResourceId, QueuedRepair>,
    next_seq: u64,
}

impl RepairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: RepairRequest) -> InsertOutcome {
        let id = request.resource_id().clone();
        let outcome = match self.entries.get(&id).map(|queued| &queued.request) {
            None => InsertOutcome::Inserted,
            Some(RepairRequest::Delete(queued)) => match &request {
                RepairRequest::Delete(_) => InsertOutcome::Replaced,
                RepairRequest::Reindex(incoming) => {
                    error!(
                        resource = %id,
                        queued_as_of = queued.as_of,
                        reindex_as_of = incoming.as_of,
                        "reindex requested for a resource queued for deletion; dropping reindex"
                    );
                    return InsertOutcome::Contradiction;
                }
            },
            Some(RepairRequest::Reindex(queued)) => match &request {
                RepairRequest::Delete(_) => InsertOutcome::Replaced,
                RepairRequest::Reindex(incoming) if incoming.as_of >= queued.as_of => {
                    InsertOutcome::Replaced
                }
                RepairRequest::Reindex(_) => return InsertOutcome::Kept,
            },
        };
        self.next_seq += 1;
        self.entries.insert(
            id,
            QueuedRepair {
                seq: self.next_seq,
                request,
            },
        );
        outcome
    }

    pub fn get(&self, id: &ResourceId) -> Option<&QueuedRepair> {
        self.entries.get(id)
    }

    /// Entries in arrival order.
    pub fn snapshot(&self) -> Vec<QueuedRepair> {
        let mut entries: Vec<QueuedRepair> = self.entries.values().cloned().collect();
        entries.sort_by_key(|queued| queued.seq);
        entries
    }

    /// Remove the entry for `id` only if it is still the one stored under
    /// `seq`.
    pub fn remove_if_current(&mut self, id: &ResourceId, seq: u64) -> bool {
        if self.entries.get(id).is_some_and(|queued| queued.seq == seq) {
            self.entries.remove(id);
            true
        } else {
            false
        }
    }

    pub fn drain_all(&mut self) -> Vec<RepairRequest> {
        let mut entries: Vec<QueuedRepair> =
            std::mem::take(&mut self.entries).into_values().collect();
        entries.sort_by_key(|queued| queued.seq);
        entries.into_iter().map(|queued| queued.request).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
