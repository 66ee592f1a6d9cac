use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::error::Error;
use super::record::TraceRecord;
use super::sink::{Sink, SinkError};

const SINK_NAME: &str = "SqlSink";

/// Placeholder `traceLevel` value written for every row; reserved for future use by
/// downstream log-scraping queries.
const TRACE_LEVEL_PLACEHOLDER: i32 = 100;

/// Writes batches to the host's relational log table. A connection is checked out of the
/// pool per flush and returned (or dropped) at the end of the call — never held across
/// flushes.
pub struct SqlSink {
    pool: PgPool,
    server_name: String,
    app_name: String,
}

impl SqlSink {
    /// `server_name` is required by the table schema; construction fails if it's blank.
    pub fn new(
        connection_string: &str,
        server_name: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Result<Self, Error> {
        let server_name = server_name.into();
        if server_name.trim().is_empty() {
            return Err(Error::InvalidArgument("server_name must not be blank".into()));
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(connection_string)
            .map_err(|e| Error::SinkConstruction(format!("SqlTracer connection: {e}")))?;
        Ok(Self {
            pool,
            server_name,
            app_name: app_name.into(),
        })
    }

    pub fn with_pool(pool: PgPool, server_name: impl Into<String>, app_name: impl Into<String>) -> Result<Self, Error> {
        let server_name = server_name.into();
        if server_name.trim().is_empty() {
            return Err(Error::InvalidArgument("server_name must not be blank".into()));
        }
        Ok(Self {
            pool,
            server_name,
            app_name: app_name.into(),
        })
    }
}

#[async_trait::async_trait]
impl Sink for SqlSink {
    async fn flush_batch(&self, records: Vec<TraceRecord>) -> Result<(), SinkError> {
        let mut conn = self.pool.acquire().await.map_err(|e| SinkError::Transient {
            sink: SINK_NAME,
            source: Box::new(e),
        })?;

        for record in &records {
            sqlx::query(
                "INSERT INTO function_logs \
                 (timestamp, server_name, app_name, function_name, trace_level, message) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(record.timestamp)
            .bind(&self.server_name)
            .bind(&self.app_name)
            .bind(record.function_name.as_deref())
            .bind(TRACE_LEVEL_PLACEHOLDER)
            .bind(&record.message)
            .execute(&mut *conn)
            .await
            .map_err(|e| SinkError::Transient {
                sink: SINK_NAME,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_server_name() {
        let err = SqlSink::new("postgres://localhost/db", "", "app");
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }
}
