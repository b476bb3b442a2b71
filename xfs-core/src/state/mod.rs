pub mod connection;
mod pending;
mod queue;

pub use connection::ConnectionPhase;
pub use pending::{PendingTable, RequestKind, RequestState, ResolvedRequest, TrackedRequest};
pub use queue::{AcceptedCommand, CommandQueues};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a table, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
