//! Per-role connection handle and its lifecycle state
//!
//! A `PoolHandle` wraps one role's live driver connection. Handles are
//! replaced wholesale on every successful reconnect (the previous handle is
//! closed before being discarded) and their state is mutated only by the
//! pool manager and the health monitor.

mod handle;
mod state;


pub use handle::PoolHandle;
pub use state::ConnectionState;
