use crate::config::RepositoryConfig;
use crate::error::AssetError;
use crate::index::{DocumentRegistry, SearchIndex};
use crate::model::{Record, ResourceId, ResourceKind, now_micros};
use crate::principal::Principal;
use crate::repair::{RepairQueueSupervisor, RepairRequest};
use crate::store::StoreOpener;
use crate::transaction::{DedicatedThreadRunner, SecureTransactionRunner, Target, UnitOfWork};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Writes to the primary store first and copies the outcome to the search
/// index afterwards. Index failures never fail the write; they become repair
/// requests.
pub struct IndexingWriter {
    transactions: DedicatedThreadRunner,
    secure: SecureTransactionRunner,
    index: Arc<dyn SearchIndex>,
    registry: Arc<DocumentRegistry>,
    repairs: RepairQueueSupervisor,
}

impl IndexingWriter {
    pub fn new(
        transactions: DedicatedThreadRunner,
        secure: SecureTransactionRunner,
        index: Arc<dyn SearchIndex>,
        registry: Arc<DocumentRegistry>,
        repairs: RepairQueueSupervisor,
    ) -> Self {
        Self {
            transactions,
            secure,
            index,
            registry,
            repairs,
        }
    }

    /// Wire the runners and the repair supervisor for one store and index.
    pub fn from_config(
        config: &RepositoryConfig,
        opener: Arc<dyn StoreOpener>,
        index: Arc<dyn SearchIndex>,
        registry: DocumentRegistry,
        runtime: Handle,
    ) -> Result<Self, AssetError> {
        let registry = Arc::new(registry);
        let repairs = RepairQueueSupervisor::new(
            config.clone(),
            Arc::clone(&index),
            Arc::clone(&opener),
            Arc::clone(&registry),
            runtime,
        )?;
        Ok(Self::new(
            DedicatedThreadRunner::new(opener),
            SecureTransactionRunner::from_config(config),
            index,
            registry,
            repairs,
        ))
    }

    pub fn repairs(&self) -> &RepairQueueSupervisor {
        &self.repairs
    }

    pub async fn create(
        &self,
        records: Vec<Record>,
        principal: &Principal,
    ) -> Result<Vec<Record>, AssetError> {
        let records = stamp(records);
        let targets = records.iter().cloned().map(Target::create).collect();
        let work = UnitOfWork::write(move |tx| {
            for record in &records {
                let mut store = tx.sub_store(record.kind.sub_store());
                if store.get(&record.id)?.is_some() {
                    return Err(AssetError::Validation(format!(
                        "{} {} already exists",
                        record.kind, record.id
                    )));
                }
                store.put(record.clone())?;
            }
            Ok(records)
        });
        let written = self.run_secure(work, targets, principal).await?;
        self.index_records(&written).await;
        Ok(written)
    }

    pub async fn update(
        &self,
        records: Vec<Record>,
        principal: &Principal,
    ) -> Result<Vec<Record>, AssetError> {
        let records = stamp(records);
        let targets = records.iter().cloned().map(Target::update).collect();
        let work = UnitOfWork::write(move |tx| {
            for record in &records {
                let mut store = tx.sub_store(record.kind.sub_store());
                if store.get(&record.id)?.is_none() {
                    return Err(AssetError::not_found(record.kind.as_str(), record.id.as_str()));
                }
                store.put(record.clone())?;
            }
            Ok(records)
        });
        let written = self.run_secure(work, targets, principal).await?;
        self.index_records(&written).await;
        Ok(written)
    }

    pub async fn delete(&self, records: Vec<Record>, principal: &Principal) -> Result<(), AssetError> {
        let removed: Vec<(ResourceId, ResourceKind)> =
            records.iter().map(|r| (r.id.clone(), r.kind)).collect();
        let targets = records.into_iter().map(Target::delete).collect();
        let to_remove = removed.clone();
        let work = UnitOfWork::write(move |tx| {
            for (id, kind) in &to_remove {
                tx.sub_store(kind.sub_store()).remove(id)?;
            }
            Ok(Vec::new())
        });
        self.run_secure(work, targets, principal).await?;

        let mut failed = Vec::new();
        for (id, kind) in removed {
            if !self.registry.supports(kind) {
                continue;
            }
            if let Err(e) = self.index.delete(&id).await {
                warn!(resource = %id, error = %e, "index delete failed; queueing repair");
                failed.push(RepairRequest::delete(id, kind, now_micros()));
            }
        }
        if !failed.is_empty() {
            self.repairs.enqueue_all(failed);
        }
        Ok(())
    }

    /// Load records by id; every returned record is read-checked.
    pub async fn read(
        &self,
        kind: ResourceKind,
        ids: Vec<ResourceId>,
        principal: &Principal,
    ) -> Result<Vec<Record>, AssetError> {
        let work = UnitOfWork::read(move |tx| {
            let store = tx.sub_store(kind.sub_store());
            ids.iter()
                .map(|id| {
                    store
                        .get(id)?
                        .ok_or_else(|| AssetError::not_found(kind.as_str(), id.as_str()))
                })
                .collect()
        });
        self.run_secure(work, Vec::new(), principal).await
    }

    async fn run_secure(
        &self,
        work: UnitOfWork<'static, Record>,
        targets: Vec<Target>,
        principal: &Principal,
    ) -> Result<Vec<Record>, AssetError> {
        let secure = self.secure.clone();
        let principal = principal.clone();
        let result = self
            .transactions
            .run_async(move |handle| secure.run(handle, work, targets, &principal).into_result())
            .await;
        if let Err(e) = &result {
            if e.is_rejection() {
                debug!(code = e.code_str(), error = %e, "secure unit of work rejected");
            } else {
                warn!(code = e.code_str(), error = %e, "secure unit of work failed");
            }
        }
        result
    }

    async fn index_records(&self, records: &[Record]) {
        let mut failed = Vec::new();
        for record in records {
            if !self.registry.supports(record.kind) {
                continue;
            }
            let outcome = match self.registry.build(record) {
                Ok(document) => self.index.write(&record.id, &document).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => debug!(resource = %record.id, version = record.modified, "record indexed"),
                Err(e) => {
                    warn!(resource = %record.id, error = %e, "index write failed; queueing repair");
                    failed.push(RepairRequest::reindex(
                        record.id.clone(),
                        record.kind,
                        record.modified,
                    ));
                }
            }
        }
        if !failed.is_empty() {
            self.repairs.enqueue_all(failed);
        }
    }
}

fn stamp(records: Vec<Record>) -> Vec<Record> {
    let modified = now_micros();
    records
        .into_iter()
        .map(|mut record| {
            record.modified = modified;
            record
        })
        .collect()
}
