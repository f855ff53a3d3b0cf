//! Lock-scoped execution of units of work against a primary-store handle.

use crate::error::{AssetError, panic_message};
use crate::principal::ResolvedPrincipal;
use crate::store::{LockMode, StoreHandle, SubStore};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::debug;

pub mod dedicated;
pub mod secure;

pub use dedicated::DedicatedThreadRunner;
pub use secure::{SecureTransactionRunner, Target};

type Body<'a, T> =
    Box<dyn FnOnce(&mut TxContext<'_>) -> Result<Vec<T>, AssetError> + Send + 'a>;

/// A body plus the lock mode it needs. Consumed by exactly one run.
pub struct UnitOfWork<'a, T> {
    lock_mode: LockMode,
    body: Body<'a, T>,
}

impl<'a, T> UnitOfWork<'a, T> {
    pub fn new<F>(lock_mode: LockMode, body: F) -> Self
    where
        F: FnOnce(&mut TxContext<'_>) -> Result<Vec<T>, AssetError> + Send + 'a,
    {
        Self {
            lock_mode,
            body: Box::new(body),
        }
    }

    pub fn read<F>(body: F) -> Self
    where
        F: FnOnce(&mut TxContext<'_>) -> Result<Vec<T>, AssetError> + Send + 'a,
    {
        Self::new(LockMode::Read, body)
    }

    pub fn write<F>(body: F) -> Self
    where
        F: FnOnce(&mut TxContext<'_>) -> Result<Vec<T>, AssetError> + Send + 'a,
    {
        Self::new(LockMode::Write, body)
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }
}

/// Store access handed to a unit-of-work body. The transaction is already
/// open; the body never begins, commits or ends it.
pub struct TxContext<'h> {
    handle: &'h mut dyn StoreHandle,
    principal: Option<&'h ResolvedPrincipal>,
}

impl<'h> TxContext<'h> {
    pub(crate) fn new(
        handle: &'h mut dyn StoreHandle,
        principal: Option<&'h ResolvedPrincipal>,
    ) -> Self {
        Self { handle, principal }
    }

    pub fn sub_store<'s>(&'s mut self, name: &'s str) -> SubStore<'s> {
        SubStore::new(&mut *self.handle, name)
    }

    pub fn handle(&mut self) -> &mut dyn StoreHandle {
        &mut *self.handle
    }

    /// The resolved caller, when run through the secure runner.
    pub fn principal(&self) -> Option<&ResolvedPrincipal> {
        self.principal
    }

    pub fn lock_mode(&self) -> Option<LockMode> {
        self.handle.mode()
    }
}

/// Result of one run. A failure never escapes while the handle is open; it is
/// captured here and surfaced by [`ExecutionOutcome::into_result`].
#[derive(Debug)]
pub struct ExecutionOutcome<T> {
    pub committed: bool,
    pub failure: Option<AssetError>,
    pub results: Vec<T>,
}

impl<T> ExecutionOutcome<T> {
    fn committed(results: Vec<T>) -> Self {
        Self {
            committed: true,
            failure: None,
            results,
        }
    }

    fn failed(failure: AssetError) -> Self {
        Self {
            committed: false,
            failure: Some(failure),
            results: Vec::new(),
        }
    }

    pub fn into_result(self) -> Result<Vec<T>, AssetError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionRunner;

impl TransactionRunner {
    pub fn run<T>(&self, handle: &mut dyn StoreHandle, work: UnitOfWork<'_, T>) -> ExecutionOutcome<T> {
        let UnitOfWork { lock_mode, body } = work;
        self.scoped(handle, lock_mode, |handle| {
            body(&mut TxContext::new(handle, None))
        })
    }

    /// One transaction boundary around `work`: begin, run, commit or abort,
    /// and `end` exactly once whatever happened.
    pub(crate) fn scoped<T, F>(
        &self,
        handle: &mut dyn StoreHandle,
        lock_mode: LockMode,
        work: F,
    ) -> ExecutionOutcome<T>
    where
        F: FnOnce(&mut dyn StoreHandle) -> Result<Vec<T>, AssetError>,
    {
        let outcome = match handle.begin(lock_mode) {
            Ok(()) => {
                let ran = catch_unwind(AssertUnwindSafe(|| work(&mut *handle)))
                    .unwrap_or_else(|payload| {
                        Err(AssetError::Internal(panic_message(payload.as_ref())))
                    });
                match ran.and_then(|results| handle.commit().map(|()| results)) {
                    Ok(results) => ExecutionOutcome::committed(results),
                    Err(err) => {
                        handle.abort();
                        debug!(
                            location = handle.location(),
                            mode = %lock_mode,
                            error = %err,
                            code = err.code_str(),
                            "transaction aborted"
                        );
                        ExecutionOutcome::failed(err)
                    }
                }
            }
            Err(err) => ExecutionOutcome::failed(err),
        };
        handle.end();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{TransactionRunner, UnitOfWork};
    use crate::config::RepositoryConfig;
    use crate::error::{AssetError, AssetErrorCode};
    use crate::model::{Record, ResourceId, ResourceKind};
    use crate::store::{LockMode, MemoryStore, StoreHandle};

    fn item(n: u32) -> Record {
        Record::new(ResourceId::for_kind(ResourceKind::Item, n), ResourceKind::Item)
    }

    #[test]
    fn successful_body_commits_once() {
        let store = MemoryStore::new("mem://runner", &RepositoryConfig::development());
        let mut handle = store.open_handle();
        let outcome = TransactionRunner.run(
            &mut handle,
            UnitOfWork::write(|tx| {
                assert_eq!(tx.lock_mode(), Some(LockMode::Write));
                tx.sub_store("items").put(item(1))?;
                Ok(vec![item(1)])
            }),
        );
        assert!(outcome.committed);
        assert_eq!(outcome.into_result().expect("ok").len(), 1);
        let m = store.metrics();
        assert_eq!((m.commits, m.aborts, m.ends), (1, 0, 1));
    }

    #[test]
    fn failing_body_aborts_and_ends_once() {
        let store = MemoryStore::new("mem://runner", &RepositoryConfig::development());
        let mut handle = store.open_handle();
        let outcome = TransactionRunner.run::<Record>(
            &mut handle,
            UnitOfWork::write(|tx| {
                tx.sub_store("items").put(item(1))?;
                Err(AssetError::Validation("rejected".into()))
            }),
        );
        assert!(!outcome.committed);
        let err = outcome.into_result().expect_err("failure surfaces");
        assert_eq!(err.code(), AssetErrorCode::Validation);
        assert_eq!(store.len("items"), 0);
        let m = store.metrics();
        assert_eq!((m.commits, m.aborts, m.ends), (0, 1, 1));
    }

    #[test]
    fn panicking_body_is_captured_as_internal() {
        let store = MemoryStore::new("mem://runner", &RepositoryConfig::development());
        let mut handle = store.open_handle();
        let outcome = TransactionRunner.run::<Record>(
            &mut handle,
            UnitOfWork::read(|_| panic!("body exploded")),
        );
        let err = outcome.into_result().expect_err("panic captured");
        assert_eq!(err.code(), AssetErrorCode::Internal);
        assert!(err.to_string().contains("body exploded"));
        assert_eq!(store.metrics().ends, 1);
        assert_eq!(handle.mode(), None);
    }

    #[test]
    fn begin_failure_is_captured_without_running_the_body() {
        let store = MemoryStore::new("mem://runner", &RepositoryConfig::development());
        let mut holder = store.open_handle();
        holder.begin(LockMode::Write).expect("hold");
        let mut handle = store.open_handle();
        let outcome = TransactionRunner.run::<Record>(
            &mut handle,
            UnitOfWork::read(|_| panic!("body must not run")),
        );
        let err = outcome.into_result().expect_err("lock held");
        assert_eq!(err.code(), AssetErrorCode::LockHeldByThread);
    }
}
