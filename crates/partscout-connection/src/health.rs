//! Health monitoring for the database roles
//!
//! A single recurring task probes both roles on independent cadences and
//! drives reconnection through each role's pool manager, reporting state
//! transitions to the status sink. Repeated identical failures are throttled
//! once a role's reconnect budget is in cooldown.

mod monitor;
mod probe;


pub use monitor::{HealthMonitor, HealthMonitorConfig, WatchedRole};
pub use probe::{PROBE_QUERY, probe_connection};
