//! State management.
//!
//! Persists the last applied record of every resource, stack outputs, and
//! a short run history between invocations.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{AppliedRecord, Records, RunHistoryEntry, RunOperation, STATE_VERSION, StateFile};
