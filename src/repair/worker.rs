use super::request::{RepairRequest, RepairTarget};
use super::supervisor::SupervisorShared;
use crate::config::RepositoryConfig;
use crate::error::{AssetError, AssetErrorCode};
use crate::model::Record;
use crate::transaction::{TransactionRunner, UnitOfWork};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Sleep between passes: the configured fixed interval, or a delay doubling
/// from the floor up to the ceiling until a pass makes progress.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    fixed: Option<Duration>,
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn from_config(config: &RepositoryConfig) -> Self {
        Self {
            fixed: config.repair_backoff,
            floor: config.repair_backoff_floor,
            ceiling: config.repair_backoff_ceiling,
            current: config.repair_backoff_floor,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        if let Some(fixed) = self.fixed {
            return fixed;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.floor;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexedVersion {
    Known(Option<u64>),
    Unknown,
}

/// How a request left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Written,
    Deleted,
    /// The index already holds a newer version.
    Stale,
    /// The record no longer exists in the primary store.
    Gone,
    /// Nothing to delete.
    Absent,
    Unbuildable,
}

/// Background task draining the repair queue against the search index.
pub(super) struct RepairWorker {
    shared: Arc<SupervisorShared>,
    generation: u64,
    cancel: watch::Receiver<bool>,
    backoff: Backoff,
}

impl RepairWorker {
    pub(super) fn new(
        shared: Arc<SupervisorShared>,
        generation: u64,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let backoff = Backoff::from_config(&shared.config);
        Self {
            shared,
            generation,
            cancel,
            backoff,
        }
    }

    pub(super) async fn run(mut self) {
        debug!(generation = self.generation, "repair worker running");
        loop {
            if self.cancelled() {
                info!(generation = self.generation, "repair worker cancelled");
                break;
            }
            if !self.index_healthy().await {
                self.pause().await;
                continue;
            }
            let progressed = self.pass().await;
            if self.try_detach() {
                info!(generation = self.generation, "repair queue drained; worker detached");
                break;
            }
            if progressed {
                self.backoff.reset();
            } else {
                self.pause().await;
            }
        }
        self.shared.idle.notify_waiters();
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn pause(&mut self) {
        let delay = self.backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.changed() => {}
        }
    }

    async fn index_healthy(&self) -> bool {
        let probe = self.shared.index.is_healthy();
        match tokio::time::timeout(self.shared.config.probe_timeout, probe).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(generation = self.generation, "search index unhealthy; deferring repairs");
                false
            }
            Err(_) => {
                warn!(
                    generation = self.generation,
                    timeout_ms = self.shared.config.probe_timeout.as_millis() as u64,
                    "search index health probe timed out"
                );
                false
            }
        }
    }

    /// One sweep over a snapshot of the queue. Returns whether any entry left
    /// the queue.
    async fn pass(&mut self) -> bool {
        let entries = {
            let mut state = self.shared.state.lock();
            if state.queue.is_empty() {
                self.shared.reload_spilled(&mut state);
            }
            state.queue.snapshot()
        };

        let mut progressed = false;
        for entry in entries {
            if self.cancelled() {
                break;
            }
            let resource = entry.request.resource_id();
            match self.repair(&entry.request).await {
                Ok(resolution) => {
                    debug!(
                        resource = %resource,
                        request = entry.request.label(),
                        ?resolution,
                        "repair request resolved"
                    );
                    progressed = true;
                    self.shared
                        .state
                        .lock()
                        .queue
                        .remove_if_current(resource, entry.seq);
                }
                Err(e) => warn!(
                    resource = %resource,
                    request = entry.request.label(),
                    error = %e,
                    code = e.code_str(),
                    "repair attempt failed; request stays queued"
                ),
            }
        }
        progressed
    }

    /// Exit only if nothing is pending in memory or on disk, checked under the
    /// same lock `enqueue` spawns under.
    fn try_detach(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.queue.is_empty() || self.shared.has_spilled() {
            return false;
        }
        if state
            .worker
            .as_ref()
            .is_some_and(|slot| slot.generation == self.generation)
        {
            state.worker = None;
        }
        true
    }

    async fn indexed_version(&self, target: &RepairTarget) -> IndexedVersion {
        let lookup = self.shared.index.current_version(&target.resource_id);
        match tokio::time::timeout(self.shared.config.lookup_timeout, lookup).await {
            Ok(Ok(version)) => IndexedVersion::Known(version),
            Ok(Err(e)) => {
                debug!(resource = %target.resource_id, error = %e, "index version lookup failed");
                IndexedVersion::Unknown
            }
            Err(_) => IndexedVersion::Unknown,
        }
    }

    async fn repair(&self, request: &RepairRequest) -> Result<Resolution, AssetError> {
        match request {
            RepairRequest::Reindex(target) => self.reindex(target).await,
            RepairRequest::Delete(target) => self.delete(target).await,
        }
    }

    async fn reindex(&self, target: &RepairTarget) -> Result<Resolution, AssetError> {
        if let IndexedVersion::Known(Some(version)) = self.indexed_version(target).await
            && version > target.as_of
        {
            return Ok(Resolution::Stale);
        }
        if !self.shared.registry.supports(target.resource_kind) {
            error!(
                resource = %target.resource_id,
                kind = %target.resource_kind,
                "no document factory for resource kind; dropping reindex"
            );
            return Ok(Resolution::Unbuildable);
        }
        let Some(record) = self.load_record(target).await? else {
            return Ok(Resolution::Gone);
        };
        let document = match self.shared.registry.build(&record) {
            Ok(document) => document,
            Err(e) => {
                error!(resource = %target.resource_id, error = %e, "index document could not be built");
                return Ok(Resolution::Unbuildable);
            }
        };
        self.shared
            .index
            .write(&target.resource_id, &document)
            .await?;
        Ok(Resolution::Written)
    }

    async fn delete(&self, target: &RepairTarget) -> Result<Resolution, AssetError> {
        if self.indexed_version(target).await == IndexedVersion::Known(None) {
            return Ok(Resolution::Absent);
        }
        match self.shared.index.delete(&target.resource_id).await {
            Ok(()) => Ok(Resolution::Deleted),
            Err(e) if e.code() == AssetErrorCode::NotFound => Ok(Resolution::Deleted),
            Err(e) => Err(e),
        }
    }

    /// Read transaction on a blocking thread with its own store handle.
    async fn load_record(&self, target: &RepairTarget) -> Result<Option<Record>, AssetError> {
        let id = target.resource_id.clone();
        let kind = target.resource_kind;
        let found: Vec<Record> = self
            .shared
            .transactions
            .run_async(move |handle| {
                let work = UnitOfWork::<Record>::read(move |tx| {
                    Ok(tx.sub_store(kind.sub_store()).get(&id)?.into_iter().collect())
                });
                TransactionRunner.run(handle, work).into_result()
            })
            .await?;
        Ok(found.into_iter().find(|record| record.kind == kind))
    }
}
