// Core modules implementing the on-disk change queue, replay, and error modeling.
pub mod delivery;
pub mod entry;
pub mod error;
pub mod key;
pub mod lock;
pub mod principal;
pub mod queue;
pub mod replay;
pub mod stamp;
