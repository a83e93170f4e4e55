use opentelemetry_sdk::{
    error::OTelSdkResult,
    logs::{LogBatch, LogExporter, SdkLogRecord},
};
use snafu::{ResultExt as _, Snafu};
use sqlx::{Connection as _, SqliteConnection};

use super::{ExportRuntime, record};

type Result<T, E = SqlExportError> = std::result::Result<T, E>;

const INSERT_LOG: &str =
    "INSERT INTO Logs (Timestamp, LogLevel, Message, Exception) VALUES (?, ?, ?, ?)";

#[derive(Debug, Snafu)]
pub enum SqlExportError {
    #[snafu(display("no tokio runtime is available to run exports on"))]
    NoRuntime {
        source: tokio::runtime::TryCurrentError,
    },

    #[snafu(display("failed to open database connection"))]
    Connect { source: sqlx::Error },

    #[snafu(display("failed to insert log row {row} of the batch"))]
    InsertRow { source: sqlx::Error, row: usize },

    #[snafu(display("failed to close database connection"))]
    Close { source: sqlx::Error },
}

/// Writes log records into the `Logs` table of a SQLite database.
///
/// Every export opens a new connection, inserts one row per record and
/// closes the connection again. The first failing insert aborts the rest of
/// the batch; rows inserted before are kept. The table has to exist:
///
/// ```sql
/// CREATE TABLE Logs (Timestamp TEXT, LogLevel TEXT, Message TEXT, Exception TEXT NULL)
/// ```
#[derive(Debug)]
pub struct SqlLogExporter {
    connection_string: String,
    runtime: ExportRuntime,
}

/// One row of the `Logs` table.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LogRow {
    timestamp: String,
    level: String,
    message: String,
    exception: Option<String>,
}

impl From<&SdkLogRecord> for LogRow {
    fn from(record: &SdkLogRecord) -> Self {
        Self {
            timestamp: humantime::format_rfc3339_millis(record::timestamp(record)).to_string(),
            level: record::severity(record),
            message: record::message(record),
            exception: record::exception(record),
        }
    }
}

impl SqlLogExporter {
    /// Creates the exporter for a connection string like
    /// `sqlite://logs.db`. Must be called from within a tokio runtime.
    pub fn new(connection_string: impl Into<String>) -> Result<Self> {
        Ok(Self {
            connection_string: connection_string.into(),
            runtime: ExportRuntime::current().context(NoRuntimeSnafu)?,
        })
    }
}

impl LogExporter for SqlLogExporter {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        let rows: Vec<LogRow> = batch
            .iter()
            .map(|(record, _scope)| LogRow::from(record))
            .collect();

        if rows.is_empty() {
            return Ok(());
        }

        let connection_string = self.connection_string.clone();
        self.runtime
            .run("sql_log", async move { insert_rows(&connection_string, rows).await })
            .await
    }
}

async fn insert_rows(connection_string: &str, rows: Vec<LogRow>) -> Result<()> {
    let mut connection = SqliteConnection::connect(connection_string)
        .await
        .context(ConnectSnafu)?;

    for (index, row) in rows.into_iter().enumerate() {
        sqlx::query(INSERT_LOG)
            .bind(row.timestamp)
            .bind(row.level)
            .bind(row.message)
            .bind(row.exception)
            .execute(&mut connection)
            .await
            .context(InsertRowSnafu { row: index })?;
    }

    connection.close().await.context(CloseSnafu)
}
