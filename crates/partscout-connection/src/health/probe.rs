//! Liveness probing
//!
//! A trivial round-trip query used only to confirm a connection is usable,
//! bounded by the configuration's request timeout.

use std::time::Duration;

use partscout_core::{Connection, PartScoutError, Result};
use tokio::time::Instant;

/// The probe statement; cheap on every supported server.
pub const PROBE_QUERY: &str = "SELECT 1";

/// Run one liveness probe against a connection and measure the round trip.
///
/// A timed-out probe is reported as `Timeout`, any other failure as
/// `ProbeFailed`; both count as connection-class errors.
pub async fn probe_connection(conn: &dyn Connection, timeout: Duration) -> Result<Duration> {
    if conn.is_closed() {
        return Err(PartScoutError::ProbeFailed("connection is closed".into()));
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, conn.query(PROBE_QUERY, &[])).await {
        Ok(Ok(_)) => Ok(start.elapsed()),
        Ok(Err(err)) => Err(PartScoutError::ProbeFailed(err.to_string())),
        Err(_) => Err(PartScoutError::Timeout(format!(
            "liveness probe exceeded {:?}",
            timeout
        ))),
    }
}
