//! PostgreSQL Backend Implementation
//!
//! Compiles frozen queries to SQL, runs them on a sqlx pool and decodes the
//! flat result columns by the kinds the row layout predicts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{PgPool, Postgres, Row as SqlxRow};
use tracing::{info, trace};
use uuid::Uuid;

use crate::config::BackendConfig;
use crate::error::{QueryError, QueryResult};
use crate::hydration::{hydrate, Row, RowLayout};
use crate::query::{CountQuery, QueryState};
use crate::registry::ScalarKind;
use crate::sql::{compile_count, compile_select, SqlStatement};
use crate::value::Value;

use super::{BackendKind, ExecutionBackend};

/// PostgreSQL execution backend over a sqlx connection pool
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create the pool from backend configuration
    pub async fn connect(config: &BackendConfig) -> QueryResult<Self> {
        config.validate()?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }
        if let Some(max_lifetime) = config.max_lifetime {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options.connect(&config.database_url).await?;
        info!(
            "PostgreSQL pool ready (max_connections: {})",
            config.max_connections
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run(&self, statement: &SqlStatement) -> QueryResult<Vec<PgRow>> {
        trace!("Executing SQL: {} ({} params)", statement.sql, statement.params.len());
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_value(query, param)?;
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl ExecutionBackend for PostgresBackend {
    async fn fetch(&self, state: &QueryState) -> QueryResult<Vec<Row>> {
        let layout = RowLayout::for_query(state)?;
        let statement = compile_select(state)?;
        let kinds = layout.column_kinds();

        let flat = self
            .run(&statement)
            .await?
            .iter()
            .map(|row| decode_row(row, &kinds))
            .collect::<QueryResult<Vec<_>>>()?;
        hydrate(&layout, flat)
    }

    async fn count(&self, query: &CountQuery) -> QueryResult<u64> {
        let statement = compile_count(query)?;
        let rows = self.run(&statement).await?;
        let total: i64 = match rows.first() {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        u64::try_from(total).map_err(|e| QueryError::Decode(format!("Invalid count: {}", e)))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::PostgreSQL
    }
}

fn bind_value<'q>(
    query: SqlxQuery<'q, Postgres, PgArguments>,
    value: &Value,
) -> QueryResult<SqlxQuery<'q, Postgres, PgArguments>> {
    match value {
        Value::Null => Ok(query.bind(Option::<String>::None)),
        Value::Bool(b) => Ok(query.bind(*b)),
        Value::Int(i) => Ok(query.bind(*i)),
        Value::Float(f) => Ok(query.bind(*f)),
        Value::Text(s) => Ok(query.bind(s.clone())),
        Value::Uuid(u) => Ok(query.bind(*u)),
        Value::Timestamp(dt) => Ok(query.bind(*dt)),
        Value::Entity(record) => Err(QueryError::TypeMismatch {
            context: "query parameter".to_string(),
            expected: "scalar".to_string(),
            found: format!("entity {}", record.entity()),
        }),
    }
}

fn decode_row(row: &PgRow, kinds: &[Option<ScalarKind>]) -> QueryResult<Vec<Value>> {
    kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| decode_column(row, index, *kind))
        .collect()
}

fn decode_column(row: &PgRow, index: usize, kind: Option<ScalarKind>) -> QueryResult<Value> {
    let value = match kind {
        Some(ScalarKind::Bool) => row.try_get::<Option<bool>, _>(index)?.into(),
        Some(ScalarKind::Int) => row.try_get::<Option<i64>, _>(index)?.into(),
        Some(ScalarKind::Float) => row.try_get::<Option<f64>, _>(index)?.into(),
        Some(ScalarKind::Text) => row.try_get::<Option<String>, _>(index)?.into(),
        Some(ScalarKind::Uuid) => row.try_get::<Option<Uuid>, _>(index)?.into(),
        Some(ScalarKind::Timestamp) => row.try_get::<Option<DateTime<Utc>>, _>(index)?.into(),
        // an untyped column can only hold NULL
        None => Value::Null,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_foreign_url() {
        let config = BackendConfig::new("mysql://localhost/quarry");
        assert!(matches!(
            PostgresBackend::connect(&config).await,
            Err(QueryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_lazy_pool_reports_kind() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/quarry")
            .unwrap();
        let backend = PostgresBackend::from_pool(pool);
        assert_eq!(backend.kind(), BackendKind::PostgreSQL);
    }
}
