use crate::error::AssetError;
use crate::model::{Record, ResourceId, ResourceKind};
use crate::principal::Principal;
use crate::repair::{RepairQueueSupervisor, RepairRequest};
use crate::writer::IndexingWriter;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

pub fn block_on_runtime<F, T>(rt: &Handle, f: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

/// Blocking facade over [`IndexingWriter`] for callers without an async
/// context.
pub struct IndexingWriterSync {
    inner: Arc<IndexingWriter>,
    rt: Handle,
}

impl IndexingWriterSync {
    pub fn new(inner: Arc<IndexingWriter>, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn create(&self, records: Vec<Record>, principal: &Principal) -> Result<Vec<Record>, AssetError> {
        block_on_runtime(&self.rt, self.inner.create(records, principal))
    }

    pub fn update(&self, records: Vec<Record>, principal: &Principal) -> Result<Vec<Record>, AssetError> {
        block_on_runtime(&self.rt, self.inner.update(records, principal))
    }

    pub fn delete(&self, records: Vec<Record>, principal: &Principal) -> Result<(), AssetError> {
        block_on_runtime(&self.rt, self.inner.delete(records, principal))
    }

    pub fn read(
        &self,
        kind: ResourceKind,
        ids: Vec<ResourceId>,
        principal: &Principal,
    ) -> Result<Vec<Record>, AssetError> {
        block_on_runtime(&self.rt, self.inner.read(kind, ids, principal))
    }

    pub fn repairs(&self) -> RepairQueueSync {
        RepairQueueSync::new(self.inner.repairs().clone(), self.rt.clone())
    }
}

pub struct RepairQueueSync {
    inner: RepairQueueSupervisor,
    rt: Handle,
}

impl RepairQueueSync {
    pub fn new(inner: RepairQueueSupervisor, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn enqueue(&self, request: RepairRequest) {
        self.inner.enqueue(request);
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub fn stop(&self) -> Result<(), AssetError> {
        block_on_runtime(&self.rt, self.inner.stop())
    }
}
