use super::queue::{InsertOutcome, RepairQueue};
use super::request::RepairRequest;
use super::spill::SpillStore;
use super::worker::RepairWorker;
use crate::config::RepositoryConfig;
use crate::error::AssetError;
use crate::index::{DocumentRegistry, SearchIndex};
use crate::model::ResourceId;
use crate::store::StoreOpener;
use crate::transaction::DedicatedThreadRunner;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(super) struct WorkerSlot {
    pub(super) generation: u64,
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

impl WorkerSlot {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Queue and worker slot live behind one mutex: a worker only detaches after
/// re-checking emptiness under it, and `enqueue` only spawns under it.
pub(super) struct SupervisorState {
    pub(super) queue: RepairQueue,
    pub(super) worker: Option<WorkerSlot>,
    generation: u64,
    workers_started: u64,
    stopped: bool,
}

pub(super) struct SupervisorShared {
    pub(super) state: Mutex<SupervisorState>,
    pub(super) config: RepositoryConfig,
    pub(super) index: Arc<dyn SearchIndex>,
    pub(super) transactions: DedicatedThreadRunner,
    pub(super) registry: Arc<DocumentRegistry>,
    pub(super) spill: Option<SpillStore>,
    pub(super) idle: Notify,
    runtime: Handle,
}

impl SupervisorShared {
    pub(super) fn has_spilled(&self) -> bool {
        self.spill.as_ref().is_some_and(SpillStore::has_files)
    }

    /// Pull the newest spill file back into an empty queue.
    pub(super) fn reload_spilled(&self, state: &mut SupervisorState) {
        let Some(spill) = &self.spill else {
            return;
        };
        match spill.load_latest() {
            Ok(Some(requests)) => {
                for request in requests {
                    state.queue.insert(request);
                }
            }
            Ok(None) => {}
            Err(e) => error!(
                dir = %spill.dir().display(),
                error = %e,
                "failed to reload spilled repair requests"
            ),
        }
    }

    fn spill_if_full(&self, state: &mut SupervisorState) {
        let (Some(max), Some(spill)) = (self.config.max_pending_repairs, &self.spill) else {
            return;
        };
        if state.queue.len() < max {
            return;
        }
        let pending = state.queue.drain_all();
        if let Err(e) = spill.write(&pending) {
            error!(
                error = %e,
                pending = pending.len(),
                "failed to spill repair queue; keeping requests in memory"
            );
            for request in pending {
                state.queue.insert(request);
            }
        }
    }

    fn persist_after_stop(&self, requests: Vec<RepairRequest>) {
        if requests.is_empty() {
            return;
        }
        match &self.spill {
            Some(spill) => {
                if let Err(e) = spill.write(&requests) {
                    error!(
                        error = %e,
                        requests = requests.len(),
                        "failed to spill repair requests after stop"
                    );
                }
            }
            None => warn!(
                requests = requests.len(),
                "repair supervisor stopped; requests discarded"
            ),
        }
    }

    fn ensure_worker(self: &Arc<Self>, state: &mut SupervisorState) {
        if state.stopped || state.worker.as_ref().is_some_and(WorkerSlot::is_alive) {
            return;
        }
        state.generation += 1;
        state.workers_started += 1;
        let generation = state.generation;
        let (cancel, cancelled) = watch::channel(false);
        let worker = RepairWorker::new(Arc::clone(self), generation, cancelled);
        let handle = self.runtime.spawn(worker.run());
        state.worker = Some(WorkerSlot {
            generation,
            handle,
            cancel,
        });
        info!(generation, pending = state.queue.len(), "repair worker started");
    }
}

/// Owns the repair queue and keeps at most one worker alive to drain it.
#[derive(Clone)]
pub struct RepairQueueSupervisor {
    shared: Arc<SupervisorShared>,
}

impl RepairQueueSupervisor {
    pub fn new(
        config: RepositoryConfig,
        index: Arc<dyn SearchIndex>,
        opener: Arc<dyn StoreOpener>,
        registry: Arc<DocumentRegistry>,
        runtime: Handle,
    ) -> Result<Self, AssetError> {
        config.validate()?;
        let spill = config.spill_dir.clone().map(SpillStore::new);
        Ok(Self {
            shared: Arc::new(SupervisorShared {
                state: Mutex::new(SupervisorState {
                    queue: RepairQueue::new(),
                    worker: None,
                    generation: 0,
                    workers_started: 0,
                    stopped: false,
                }),
                config,
                index,
                transactions: DedicatedThreadRunner::new(opener),
                registry,
                spill,
                idle: Notify::new(),
                runtime,
            }),
        })
    }

    pub fn enqueue(&self, request: RepairRequest) {
        self.enqueue_all(std::iter::once(request));
    }

    /// After `stop` no worker runs again: new requests go straight to the
    /// spill directory, or are discarded when none is configured.
    pub fn enqueue_all(&self, requests: impl IntoIterator<Item = RepairRequest>) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            drop(state);
            self.shared.persist_after_stop(requests.into_iter().collect());
            return;
        }
        for request in requests {
            let resource = request.resource_id().clone();
            let kind = request.label();
            match state.queue.insert(request) {
                InsertOutcome::Contradiction => {}
                outcome => debug!(resource = %resource, kind, ?outcome, "repair request queued"),
            }
        }
        self.shared.spill_if_full(&mut state);
        self.shared.ensure_worker(&mut state);
    }

    /// Cancel the worker, give it `stop_grace` to finish, then abort it.
    /// Whatever is still pending goes to the spill directory if one is set.
    pub async fn stop(&self) -> Result<(), AssetError> {
        let slot = {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.worker.take()
        };
        if let Some(mut slot) = slot {
            let _ = slot.cancel.send(true);
            let grace = self.shared.config.stop_grace;
            if tokio::time::timeout(grace, &mut slot.handle).await.is_err() {
                warn!(
                    generation = slot.generation,
                    grace_ms = grace.as_millis() as u64,
                    "repair worker did not stop in time; aborting"
                );
                slot.handle.abort();
            }
        }

        let leftovers = self.shared.state.lock().queue.drain_all();
        if leftovers.is_empty() {
            return Ok(());
        }
        match &self.shared.spill {
            Some(spill) => {
                spill.write(&leftovers)?;
            }
            None => warn!(
                pending = leftovers.len(),
                "repair requests discarded at shutdown; no spill directory configured"
            ),
        }
        Ok(())
    }

    pub fn is_worker_alive(&self) -> bool {
        self.shared
            .state
            .lock()
            .worker
            .as_ref()
            .is_some_and(WorkerSlot::is_alive)
    }

    /// Requests held in memory. Spilled requests are not counted and are not
    /// deduplicated against the in-memory queue; see `has_spilled`.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn queued(&self, id: &ResourceId) -> Option<RepairRequest> {
        self.shared
            .state
            .lock()
            .queue
            .get(id)
            .map(|queued| queued.request.clone())
    }

    /// Whether spill files are still waiting to be reloaded.
    pub fn has_spilled(&self) -> bool {
        self.shared.has_spilled()
    }

    pub fn workers_started(&self) -> u64 {
        self.shared.state.lock().workers_started
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.queue.is_empty() && !state.worker.as_ref().is_some_and(WorkerSlot::is_alive)
    }

    /// Wait until the queue drained and the worker detached.
    pub async fn wait_idle(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_idle();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RepairQueueSupervisor;
    use crate::config::RepositoryConfig;
    use crate::index::{DocumentRegistry, MemoryIndex};
    use crate::model::{Record, ResourceId, ResourceKind};
    use crate::repair::request::RepairRequest;
    use crate::repair::spill::SpillStore;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn supervisor(
        config: RepositoryConfig,
        index: Arc<MemoryIndex>,
        store: &MemoryStore,
    ) -> RepairQueueSupervisor {
        RepairQueueSupervisor::new(
            config,
            index,
            Arc::new(store.clone()),
            Arc::new(DocumentRegistry::with_defaults()),
            tokio::runtime::Handle::current(),
        )
        .expect("supervisor")
    }

    fn item(n: u32) -> Record {
        let mut record = Record::new(ResourceId::for_kind(ResourceKind::Item, n), ResourceKind::Item);
        record.modified = 100;
        record
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_detaches_and_restarts_once_per_burst() {
        let config = RepositoryConfig::development();
        let store = MemoryStore::new("mem://supervisor", &config);
        store.load([item(1), item(2)]).expect("load");
        let index = Arc::new(MemoryIndex::new());
        let sup = supervisor(config, Arc::clone(&index), &store);

        sup.enqueue(RepairRequest::reindex(item(1).id, ResourceKind::Item, 100));
        assert!(sup.wait_idle(Duration::from_secs(5)).await);
        assert!(!sup.is_worker_alive());
        assert_eq!(sup.workers_started(), 1);

        sup.enqueue_all([
            RepairRequest::reindex(item(2).id, ResourceKind::Item, 100),
            RepairRequest::reindex(item(2).id, ResourceKind::Item, 100),
        ]);
        assert!(sup.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(sup.workers_started(), 2);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_spills_and_stop_persists_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RepositoryConfig::development().with_spill(dir.path(), 2);
        let store = MemoryStore::new("mem://supervisor", &config);
        let index = Arc::new(MemoryIndex::new());
        index.set_available(false);
        let sup = supervisor(config, Arc::clone(&index), &store);

        sup.enqueue(RepairRequest::delete(item(1).id, ResourceKind::Item, 1));
        sup.enqueue(RepairRequest::delete(item(2).id, ResourceKind::Item, 1));
        assert_eq!(sup.pending(), 0, "queue spilled at the cap");
        assert!(sup.has_spilled());
        sup.enqueue(RepairRequest::delete(item(3).id, ResourceKind::Item, 1));

        sup.stop().await.expect("stop");
        assert!(!sup.is_worker_alive());
        let spill = SpillStore::new(dir.path());
        let leftovers = spill.load_latest().expect("load").expect("file");
        assert_eq!(leftovers.len(), 1);
        let spilled = spill.load_latest().expect("load").expect("file");
        assert_eq!(spilled.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_after_stop_bypass_the_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RepositoryConfig::development().with_spill(dir.path(), 64);
        let store = MemoryStore::new("mem://supervisor", &config);
        let sup = supervisor(config, Arc::new(MemoryIndex::new()), &store);
        sup.stop().await.expect("stop");

        sup.enqueue(RepairRequest::delete(item(1).id, ResourceKind::Item, 1));
        sup.enqueue(RepairRequest::delete(item(2).id, ResourceKind::Item, 1));
        assert_eq!(sup.pending(), 0);
        assert!(!sup.is_worker_alive());
        assert_eq!(sup.workers_started(), 0);

        let spill = SpillStore::new(dir.path());
        let mut total = 0;
        while let Some(batch) = spill.load_latest().expect("load") {
            total += batch.len();
        }
        assert_eq!(total, 2);

        let config = RepositoryConfig::development();
        let store = MemoryStore::new("mem://supervisor", &config);
        let sup = supervisor(config, Arc::new(MemoryIndex::new()), &store);
        sup.stop().await.expect("stop");
        sup.enqueue(RepairRequest::delete(item(3).id, ResourceKind::Item, 1));
        assert_eq!(sup.pending(), 0, "discarded without a spill dir");
    }
}
