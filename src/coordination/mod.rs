//! Coordination store boundary: traits, errors, and the in-memory backend.
//!
//! The release protocol never talks to a distributed store directly; it goes
//! through [`CoordinationStore`], which covers the five operations the
//! protocol needs: exclusive critical sections, topology listing, ownership
//! transfer, committed-position reads, and one-shot change watches.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use traits::{CoordinationStore, ExclusiveGuard, WatchCallback, WatchHandle};
