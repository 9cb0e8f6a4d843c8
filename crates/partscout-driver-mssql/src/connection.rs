//! MS SQL Server connection implementation using tiberius

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use partscout_core::{
    Connection, ConnectionConfig, PartScoutError, QueryResult, Result, Row, StatementResult, Value,
};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row as TiberiusRow};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// A live SQL Server session.
///
/// Tiberius multiplexes requests over one TDS stream, so the client sits
/// behind an async mutex and the whole connection is shared as a single
/// logical handle. Every request is bounded by the configuration's request
/// timeout; a timed-out request surfaces as a connection-class error.
pub struct MssqlConnection {
    client: Mutex<Client<Compat<TcpStream>>>,
    closed: AtomicBool,
    database: String,
    request_timeout: Duration,
}

impl MssqlConnection {
    #[tracing::instrument(
        skip(config),
        fields(server = %config.server, port = config.port, database = %config.database)
    )]
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let tiberius_config = tiberius_config(config);
        let addr = tiberius_config.get_addr();
        let connect_timeout = config.connect_timeout();

        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                PartScoutError::Timeout(format!(
                    "connecting to {} exceeded {:?}",
                    addr, connect_timeout
                ))
            })?
            .map_err(|err| PartScoutError::Unreachable(format!("{}: {}", addr, err)))?;
        tcp.set_nodelay(true)?;

        let client =
            tokio::time::timeout(connect_timeout, Client::connect(tiberius_config, tcp.compat_write()))
                .await
                .map_err(|_| {
                    PartScoutError::Timeout(format!(
                        "TDS handshake with {} exceeded {:?}",
                        addr, connect_timeout
                    ))
                })?
                .map_err(classify_error)?;

        tracing::debug!("connected to SQL Server");

        Ok(Self {
            client: Mutex::new(client),
            closed: AtomicBool::new(false),
            database: config.database.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PartScoutError::Unreachable("connection is closed".into()));
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = std::result::Result<T, tiberius::error::Error>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, operation).await {
            Ok(result) => result.map_err(classify_error),
            Err(_) => Err(PartScoutError::Timeout(format!(
                "request exceeded {:?}",
                self.request_timeout
            ))),
        }
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn driver_name(&self) -> &str {
        "mssql"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let mut client = self.client.lock().await;
        let tiberius_params = values_to_tiberius_params(params);
        let param_refs: Vec<&dyn tiberius::ToSql> = tiberius_params
            .iter()
            .map(|p| p as &dyn tiberius::ToSql)
            .collect();

        let result = self.bounded(client.execute(sql, &param_refs[..])).await?;
        let affected_rows = result.rows_affected().iter().sum::<u64>();
        tracing::debug!(
            affected_rows,
            duration_ms = start.elapsed().as_millis() as u64,
            "execute completed"
        );

        Ok(StatementResult { affected_rows })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let mut client = self.client.lock().await;
        let tiberius_params = values_to_tiberius_params(params);
        let param_refs: Vec<&dyn tiberius::ToSql> = tiberius_params
            .iter()
            .map(|p| p as &dyn tiberius::ToSql)
            .collect();

        let stream = self.bounded(client.query(sql, &param_refs[..])).await?;
        let tib_rows = self.bounded(stream.into_first_result()).await?;

        let columns: Vec<String> = tib_rows
            .first()
            .map(|row| row.columns().iter().map(|col| col.name().to_string()).collect())
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(tib_rows.len());
        for tib_row in tib_rows {
            rows.push(Row::new(columns.clone(), tiberius_row_to_values(tib_row)));
        }

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = rows.len(),
            duration_ms = execution_time_ms,
            "query completed"
        );

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(database = %self.database, "SQL Server connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Map a PartScout configuration onto a tiberius one.
pub(crate) fn tiberius_config(config: &ConnectionConfig) -> Config {
    let mut tiberius_config = Config::new();
    tiberius_config.host(&config.server);
    tiberius_config.port(config.port);
    tiberius_config.database(&config.database);
    tiberius_config.authentication(AuthMethod::sql_server(&config.username, &config.password));

    if config.encrypt {
        tiberius_config.encryption(EncryptionLevel::Required);
    } else {
        tiberius_config.encryption(EncryptionLevel::NotSupported);
    }
    // Catalog and ledger servers sit on the LAN with self-signed
    // certificates; certificate validation would reject all of them.
    tiberius_config.trust_cert();

    tiberius_config
}

/// Classify a tiberius error into the PartScout taxonomy.
///
/// Server error 18456 is a rejected login, 18452 a login from an untrusted
/// domain; 4060 means the target database could not be opened.
pub(crate) fn classify_error(err: tiberius::error::Error) -> PartScoutError {
    use tiberius::error::Error;

    match &err {
        Error::Server(token) if token.code() == 4060 => {
            PartScoutError::DatabaseMissing(token.message().to_string())
        }
        Error::Server(token) if token.code() == 18456 || token.code() == 18452 => {
            PartScoutError::AuthFailed(token.message().to_string())
        }
        Error::Io { .. } | Error::Routing { .. } | Error::Tls(_) => {
            PartScoutError::Unreachable(err.to_string())
        }
        _ => PartScoutError::Query(err.to_string()),
    }
}

fn tiberius_row_to_values(row: TiberiusRow) -> Vec<Value> {
    row.into_iter().map(column_data_to_value).collect()
}

/// Convert tiberius column data to a PartScout value.
pub(crate) fn column_data_to_value(col_data: ColumnData<'static>) -> Value {
    match col_data {
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::U8(v) => v.map_or(Value::Null, |v| Value::Int32(v as i32)),
        ColumnData::I16(v) => v.map_or(Value::Null, Value::Int16),
        ColumnData::I32(v) => v.map_or(Value::Null, Value::Int32),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::Int64),
        ColumnData::F32(v) => v.map_or(Value::Null, Value::Float32),
        ColumnData::F64(v) => v.map_or(Value::Null, Value::Float64),
        ColumnData::String(v) => v.map_or(Value::Null, |v| Value::String(v.into_owned())),
        ColumnData::Guid(v) => v.map_or(Value::Null, Value::Uuid),
        ColumnData::Binary(v) => v.map_or(Value::Null, |v| Value::Bytes(v.into_owned())),
        ColumnData::Numeric(v) => v.map_or(Value::Null, |v| Value::Decimal(v.to_string())),
        ColumnData::DateTime(v) => v.map_or(Value::Null, |v| {
            let dt = chrono::NaiveDateTime::new(
                chrono::NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()
                    + chrono::Duration::days(v.days() as i64),
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    (v.seconds_fragments() as f64 / 300.0) as u32,
                    0,
                )
                .unwrap_or_default(),
            );
            Value::DateTime(dt)
        }),
        ColumnData::SmallDateTime(v) => v.map_or(Value::Null, |v| {
            let dt = chrono::NaiveDateTime::new(
                chrono::NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()
                    + chrono::Duration::days(v.days() as i64),
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    (v.seconds_fragments() as u32) * 60,
                    0,
                )
                .unwrap_or_default(),
            );
            Value::DateTime(dt)
        }),
        ColumnData::DateTime2(v) => v.map_or(Value::Null, |v| {
            Value::DateTime(datetime2_to_naive(&v))
        }),
        ColumnData::DateTimeOffset(v) => v.map_or(Value::Null, |v| {
            // The offset is discarded; the catalog and ledger schemas store
            // naive local timestamps.
            Value::DateTime(datetime2_to_naive(&v.datetime2()))
        }),
        ColumnData::Date(v) => v.map_or(Value::Null, |v| {
            let date = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
                + chrono::Duration::days(v.days() as i64);
            Value::DateTime(chrono::NaiveDateTime::new(date, chrono::NaiveTime::MIN))
        }),
        ColumnData::Time(v) => v.map_or(Value::Null, |v| {
            let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                (v.increments() / 10_000_000) as u32,
                ((v.increments() % 10_000_000) * 100) as u32,
            )
            .unwrap_or_default();
            Value::String(time.to_string())
        }),
        ColumnData::Xml(v) => v.map_or(Value::Null, |v| {
            Value::String(v.into_owned().into_string())
        }),
    }
}

fn datetime2_to_naive(v: &tiberius::time::DateTime2) -> chrono::NaiveDateTime {
    let date = v.date();
    let time = v.time();
    chrono::NaiveDateTime::new(
        chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
            + chrono::Duration::days(date.days() as i64),
        chrono::NaiveTime::from_num_seconds_from_midnight_opt(
            (time.increments() / 10_000_000) as u32,
            ((time.increments() % 10_000_000) * 100) as u32,
        )
        .unwrap_or_default(),
    )
}

/// Owned parameter values handed to tiberius.
#[derive(Debug)]
pub(crate) enum TiberiusParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
}

impl tiberius::ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TiberiusParam::Null => ColumnData::I32(None),
            TiberiusParam::Bool(v) => ColumnData::Bit(Some(*v)),
            TiberiusParam::I16(v) => ColumnData::I16(Some(*v)),
            TiberiusParam::I32(v) => ColumnData::I32(Some(*v)),
            TiberiusParam::I64(v) => ColumnData::I64(Some(*v)),
            TiberiusParam::F32(v) => ColumnData::F32(Some(*v)),
            TiberiusParam::F64(v) => ColumnData::F64(Some(*v)),
            TiberiusParam::String(v) => {
                ColumnData::String(Some(std::borrow::Cow::Borrowed(v.as_str())))
            }
            TiberiusParam::Bytes(v) => {
                ColumnData::Binary(Some(std::borrow::Cow::Borrowed(v.as_slice())))
            }
            TiberiusParam::Uuid(v) => ColumnData::Guid(Some(*v)),
        }
    }
}

/// Convert PartScout values to tiberius parameters.
pub(crate) fn values_to_tiberius_params(values: &[Value]) -> Vec<TiberiusParam> {
    values
        .iter()
        .map(|value| match value {
            Value::Null => TiberiusParam::Null,
            Value::Bool(v) => TiberiusParam::Bool(*v),
            Value::Int16(v) => TiberiusParam::I16(*v),
            Value::Int32(v) => TiberiusParam::I32(*v),
            Value::Int64(v) => TiberiusParam::I64(*v),
            Value::Float32(v) => TiberiusParam::F32(*v),
            Value::Float64(v) => TiberiusParam::F64(*v),
            Value::Decimal(v) => TiberiusParam::String(v.clone()),
            Value::String(v) => TiberiusParam::String(v.clone()),
            Value::Bytes(v) => TiberiusParam::Bytes(v.clone()),
            Value::Uuid(v) => TiberiusParam::Uuid(*v),
            Value::DateTime(v) => TiberiusParam::String(v.to_string()),
        })
        .collect()
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
