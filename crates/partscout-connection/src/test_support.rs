//! Shared mock driver for the connection tests
//!
//! `MockDriver` implements the core driver trait over an in-memory server
//! model. All knobs live on the shared [`MockState`], so tests can inject
//! connect failures, slow connects or probes, and a catalog of known
//! databases, then assert on open/close/attempt counters afterwards.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use partscout_core::{
    Connection, ConnectionConfig, DatabaseDriver, PartScoutError, QueryResult, Result, Row,
    StatementResult, Value,
};

use crate::status::{StatusEvent, StatusSink};

/// Which taxonomy error an injected connect failure produces.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FailKind {
    Unreachable,
    Auth,
}

impl FailKind {
    fn to_error(self, config: &ConnectionConfig) -> PartScoutError {
        match self {
            FailKind::Unreachable => PartScoutError::Unreachable(format!(
                "{}:{}: connection refused",
                config.server, config.port
            )),
            FailKind::Auth => {
                PartScoutError::AuthFailed(format!("login failed for '{}'", config.username))
            }
        }
    }
}

enum ConnectFailures {
    None,
    Budget { remaining: u32, kind: FailKind },
    Forever(FailKind),
}

enum QueryFailures {
    None,
    /// Succeed the first `skip` queries, fail the next `fail`.
    Window { skip: u32, fail: u32 },
    Forever,
}

/// Counters and failure plans shared between a driver and its connections.
pub(crate) struct MockState {
    connect_attempts: AtomicU32,
    opened: AtomicU32,
    closed: AtomicU32,
    queries: AtomicU32,
    connect_failures: Mutex<ConnectFailures>,
    query_failures: Mutex<QueryFailures>,
    connect_delay: Mutex<Option<Duration>>,
    query_delay: Mutex<Option<Duration>>,
    /// `None` means every database exists on the mock server.
    known_databases: Mutex<Option<HashSet<String>>>,
    created_databases: Mutex<Vec<String>>,
    fail_create_database: AtomicBool,
}

impl MockState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connect_attempts: AtomicU32::new(0),
            opened: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            queries: AtomicU32::new(0),
            connect_failures: Mutex::new(ConnectFailures::None),
            query_failures: Mutex::new(QueryFailures::None),
            connect_delay: Mutex::new(None),
            query_delay: Mutex::new(None),
            known_databases: Mutex::new(None),
            created_databases: Mutex::new(Vec::new()),
            fail_create_database: AtomicBool::new(false),
        })
    }

    /// Every call into `DatabaseDriver::connect`, including failed ones.
    pub(crate) fn connect_attempts_count(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Connections that were actually opened.
    pub(crate) fn opened_count(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections that were closed (each at most once).
    pub(crate) fn closed_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_connects(&self, count: u32, kind: FailKind) {
        *self.connect_failures.lock() = ConnectFailures::Budget {
            remaining: count,
            kind,
        };
    }

    pub(crate) fn fail_connects_forever(&self, kind: FailKind) {
        *self.connect_failures.lock() = ConnectFailures::Forever(kind);
    }

    pub(crate) fn clear_connect_failures(&self) {
        *self.connect_failures.lock() = ConnectFailures::None;
    }

    /// Succeed the next `skip` queries, then fail the `fail` after those.
    pub(crate) fn fail_queries_after(&self, skip: u32, fail: u32) {
        *self.query_failures.lock() = QueryFailures::Window { skip, fail };
    }

    pub(crate) fn fail_queries_forever(&self) {
        *self.query_failures.lock() = QueryFailures::Forever;
    }

    pub(crate) fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock() = delay;
    }

    pub(crate) fn set_query_delay(&self, delay: Option<Duration>) {
        *self.query_delay.lock() = delay;
    }

    /// Restrict the mock server to the given databases; anything else must be
    /// created first. Without this call every database exists.
    pub(crate) fn set_known_databases(&self, names: &[&str]) {
        *self.known_databases.lock() =
            Some(names.iter().map(|name| name.to_string()).collect());
    }

    pub(crate) fn created_databases(&self) -> Vec<String> {
        self.created_databases.lock().clone()
    }

    pub(crate) fn fail_create_database(&self) {
        self.fail_create_database.store(true, Ordering::SeqCst);
    }

    fn database_exists(&self, name: &str) -> bool {
        match self.known_databases.lock().as_ref() {
            Some(known) => known.contains(name),
            None => true,
        }
    }

    fn next_connect_failure(&self) -> Option<FailKind> {
        let mut plan = self.connect_failures.lock();
        match &mut *plan {
            ConnectFailures::None => None,
            ConnectFailures::Forever(kind) => Some(*kind),
            ConnectFailures::Budget { remaining, kind } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Some(*kind)
                } else {
                    None
                }
            }
        }
    }

    fn query_should_fail(&self, number: u32) -> bool {
        match &*self.query_failures.lock() {
            QueryFailures::None => false,
            QueryFailures::Forever => true,
            QueryFailures::Window { skip, fail } => number > *skip && number <= skip + fail,
        }
    }
}

/// Mock implementation of the core driver trait.
pub(crate) struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self {
            state: MockState::new(),
        }
    }

    pub(crate) fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = self.state.next_connect_failure() {
            return Err(kind.to_error(config));
        }
        if !self.state.database_exists(&config.database) {
            return Err(PartScoutError::DatabaseMissing(config.database.clone()));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            state: self.state.clone(),
            config: config.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    config: ConnectionConfig,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        if self.is_closed() {
            return Err(PartScoutError::Unreachable("connection is closed".into()));
        }

        if let Some(name) = sql
            .strip_prefix("CREATE DATABASE [")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            if self.state.fail_create_database.load(Ordering::SeqCst) {
                return Err(PartScoutError::Query(format!(
                    "CREATE DATABASE permission denied in database 'master' for '{}'",
                    name
                )));
            }
            if let Some(known) = self.state.known_databases.lock().as_mut() {
                known.insert(name.to_string());
            }
            self.state.created_databases.lock().push(name.to_string());
        }

        Ok(StatementResult { affected_rows: 1 })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        if self.is_closed() {
            return Err(PartScoutError::Unreachable("connection is closed".into()));
        }

        let delay = *self.state.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let number = self.state.queries.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.query_should_fail(number) {
            return Err(PartScoutError::Query("injected query failure".into()));
        }

        if sql.contains("sys.databases") {
            let name = params
                .first()
                .and_then(Value::as_str)
                .unwrap_or(&self.config.database);
            let columns = vec!["name".to_string()];
            let rows = if self.state.database_exists(name) {
                vec![Row::new(columns.clone(), vec![Value::String(name.to_string())])]
            } else {
                Vec::new()
            };
            return Ok(QueryResult {
                columns,
                rows,
                execution_time_ms: 0,
            });
        }

        // Everything else behaves like the liveness probe.
        Ok(QueryResult {
            columns: vec!["".to_string()],
            rows: vec![Row::new(vec!["".to_string()], vec![Value::Int32(1)])],
            execution_time_ms: 0,
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Status sink that records every event for later assertions.
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }
}

impl StatusSink for RecordingSink {
    fn on_status_changed(&self, event: StatusEvent) {
        self.events.lock().push(event);
    }
}
