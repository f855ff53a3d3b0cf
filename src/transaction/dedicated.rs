use super::{SecureTransactionRunner, Target, TransactionRunner, UnitOfWork};
use crate::error::{AssetError, panic_message};
use crate::model::Record;
use crate::principal::Principal;
use crate::store::{StoreHandle, StoreOpener};
use std::sync::Arc;
use tracing::{error, warn};

/// Runs work on a freshly spawned thread holding its own store handle, so the
/// work never inherits the lock context of the calling thread.
#[derive(Clone)]
pub struct DedicatedThreadRunner {
    opener: Arc<dyn StoreOpener>,
}

impl DedicatedThreadRunner {
    pub fn new(opener: Arc<dyn StoreOpener>) -> Self {
        Self { opener }
    }

    pub fn location(&self) -> &str {
        self.opener.location()
    }

    /// Blocks until the spawned thread finished. The job's error comes back
    /// unchanged; a panicking thread surfaces as `WorkerPanicked`.
    pub fn run<T, F>(&self, job: F) -> Result<T, AssetError>
    where
        F: FnOnce(&mut dyn StoreHandle) -> Result<T, AssetError> + Send,
        T: Send,
    {
        let opener: &dyn StoreOpener = &*self.opener;
        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name("assetdb-tx".to_string())
                .spawn_scoped(scope, move || run_on_fresh_handle(opener, job))?;
            worker.join().unwrap_or_else(|payload| {
                error!(
                    location = opener.location(),
                    panic = %panic_message(payload.as_ref()),
                    "dedicated transaction thread panicked"
                );
                Err(AssetError::WorkerPanicked)
            })
        })
    }

    /// [`Self::run`] for async callers: the job runs on tokio's blocking pool.
    pub async fn run_async<T, F>(&self, job: F) -> Result<T, AssetError>
    where
        F: FnOnce(&mut dyn StoreHandle) -> Result<T, AssetError> + Send + 'static,
        T: Send + 'static,
    {
        let opener = Arc::clone(&self.opener);
        match tokio::task::spawn_blocking(move || run_on_fresh_handle(opener.as_ref(), job)).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                warn!(location = self.location(), "blocking transaction task panicked");
                Err(AssetError::WorkerPanicked)
            }
            Err(join) => Err(AssetError::Internal(format!(
                "blocking transaction task did not complete: {join}"
            ))),
        }
    }

    pub fn run_unit<T: Send>(
        &self,
        runner: &TransactionRunner,
        work: UnitOfWork<'_, T>,
    ) -> Result<Vec<T>, AssetError> {
        self.run(|handle| runner.run(handle, work).into_result())
    }

    pub fn run_secure(
        &self,
        runner: &SecureTransactionRunner,
        work: UnitOfWork<'_, Record>,
        targets: Vec<Target>,
        principal: &Principal,
    ) -> Result<Vec<Record>, AssetError> {
        self.run(|handle| runner.run(handle, work, targets, principal).into_result())
    }
}

fn run_on_fresh_handle<T, F>(opener: &dyn StoreOpener, job: F) -> Result<T, AssetError>
where
    F: FnOnce(&mut dyn StoreHandle) -> Result<T, AssetError>,
{
    let mut handle = opener.open()?;
    let result = job(handle.as_mut());
    handle.end();
    result
}

#[cfg(test)]
mod tests {
    use super::DedicatedThreadRunner;
    use crate::config::RepositoryConfig;
    use crate::error::AssetErrorCode;
    use crate::model::{Record, ResourceId, ResourceKind};
    use crate::store::{LockMode, MemoryStore, StoreHandle};
    use crate::transaction::{TransactionRunner, UnitOfWork};
    use std::sync::Arc;

    #[test]
    fn dedicated_thread_does_not_inherit_the_callers_lock() {
        let store = MemoryStore::new("mem://dedicated", &RepositoryConfig::development());
        let runner = DedicatedThreadRunner::new(Arc::new(store.clone()));
        let mut outer = store.open_handle();
        outer.begin(LockMode::Read).expect("outer read");

        let id = ResourceId::for_kind(ResourceKind::Item, 1);
        let found = runner
            .run_unit::<Record>(
                &TransactionRunner,
                UnitOfWork::read(|tx| Ok(tx.sub_store("items").get(&id)?.into_iter().collect())),
            )
            .expect("nested read on another thread");
        assert!(found.is_empty());
        outer.end();
    }

    #[test]
    fn job_errors_keep_their_category() {
        let store = MemoryStore::new("mem://dedicated", &RepositoryConfig::development());
        let runner = DedicatedThreadRunner::new(Arc::new(store));
        let err = runner
            .run_unit::<Record>(
                &TransactionRunner,
                UnitOfWork::write(|tx| {
                    tx.sub_store("nowhere").get(&ResourceId::new("asset://x/1"))?;
                    Ok(Vec::new())
                }),
            )
            .expect_err("unknown sub-store");
        assert_eq!(err.code(), AssetErrorCode::Validation);
    }

    #[test]
    fn panicking_job_surfaces_as_worker_panicked() {
        let store = MemoryStore::new("mem://dedicated", &RepositoryConfig::development());
        let runner = DedicatedThreadRunner::new(Arc::new(store.clone()));
        let err = runner
            .run::<(), _>(|_| panic!("thread died"))
            .expect_err("panic");
        assert_eq!(err.code(), AssetErrorCode::WorkerPanicked);

        let mut handle = store.open_handle();
        handle.begin(LockMode::Write).expect("no lock left behind");
        handle.end();
    }
}
