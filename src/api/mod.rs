//! Purpose: Define the public Rust API boundary for krb5-sync.
//! Exports: Queue, replay, delivery, and policy types needed by hosts and the CLI.
//! Role: Stable surface for kadmin plugin shims; hides module layout under `core`.
//! Invariants: Hosts reach the queue only through these types.

mod delivery;
mod sync;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::config::{DeliveryConfig, SyncConfig};
pub use crate::core::delivery::Delivery;
pub use crate::core::entry::QueueEntry;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::key::{ChangeClass, Domain, Operation, QueueKey};
pub use crate::core::principal::Principal;
pub use crate::core::queue::{PendingEntry, Queue};
pub use crate::core::replay::{DrainReport, ReplayOutcome, drain, replay};
pub use delivery::CommandDelivery;
pub use sync::{InstanceLookup, NoInstances, QueueReason, SkipReason, SyncOutcome, SyncPolicy};
