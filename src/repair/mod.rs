//! Out-of-band reconciliation of the search index after failed index writes.

pub mod queue;
pub mod request;
pub mod spill;
pub mod supervisor;
mod worker;

pub use queue::{InsertOutcome, QueuedRepair, RepairQueue};
pub use request::{RepairRequest, RepairTarget};
pub use spill::SpillStore;
pub use supervisor::RepairQueueSupervisor;
