pub mod authorization;
pub mod config;
pub mod error;
pub mod index;
#[cfg(test)]
mod lib_tests;
pub mod model;
pub mod principal;
pub mod repair;
pub mod store;
pub mod sync_bridge;
pub mod transaction;
pub mod writer;

pub use authorization::{Authorizer, GrantAuthorizer, Operation, StatusWorkflow, WorkflowGuard};
pub use config::RepositoryConfig;
pub use error::{AssetError, AssetErrorCode};
pub use index::{DocumentRegistry, IndexDocument, MemoryIndex, SearchIndex};
pub use model::{Record, ResourceId, ResourceKind, Status};
pub use principal::{Grant, Principal, ResolvedPrincipal};
pub use repair::{RepairQueue, RepairQueueSupervisor, RepairRequest, RepairTarget};
pub use store::{LockMode, MemoryStore, StoreHandle, StoreOpener};
pub use transaction::{
    DedicatedThreadRunner, ExecutionOutcome, SecureTransactionRunner, Target, TransactionRunner,
    TxContext, UnitOfWork,
};
pub use writer::IndexingWriter;
