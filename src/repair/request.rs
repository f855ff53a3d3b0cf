use crate::model::{ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairTarget {
    pub resource_id: ResourceId,
    pub resource_kind: ResourceKind,
    /// Microsecond timestamp the request refers to: the record's `modified`
    /// stamp for a reindex, the failure time for a delete.
    pub as_of: u64,
}

/// A pending reconciliation of one search index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairRequest {
    Reindex(RepairTarget),
    Delete(RepairTarget),
}

impl RepairRequest {
    pub fn reindex(resource_id: ResourceId, resource_kind: ResourceKind, as_of: u64) -> Self {
        RepairRequest::Reindex(RepairTarget {
            resource_id,
            resource_kind,
            as_of,
        })
    }

    pub fn delete(resource_id: ResourceId, resource_kind: ResourceKind, as_of: u64) -> Self {
        RepairRequest::Delete(RepairTarget {
            resource_id,
            resource_kind,
            as_of,
        })
    }

    pub fn target(&self) -> &RepairTarget {
        match self {
            RepairRequest::Reindex(target) | RepairRequest::Delete(target) => target,
        }
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.target().resource_id
    }

    pub fn as_of(&self) -> u64 {
        self.target().as_of
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RepairRequest::Delete(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RepairRequest::Reindex(_) => "reindex",
            RepairRequest::Delete(_) => "delete",
        }
    }
}
