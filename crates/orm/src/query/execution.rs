//! Terminal operations: freeze the builder and hand it to a backend

use std::sync::Arc;

use crate::backends::ExecutionBackend;
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::hydration::{FromRow, Row};

use super::builder::Query;
use super::pagination::{CountQuery, QueryResults};
use super::state::QueryState;

fn decode<R: FromRow>(state: &QueryState, rows: Vec<Row>) -> QueryResult<Vec<R>> {
    let selection: Arc<[Expr]> = state.selection.clone().into();
    rows.into_iter()
        .map(|row| R::from_row(row, &selection))
        .collect()
}

impl<R: FromRow> Query<R> {
    /// Every matching row, in order-key order
    pub async fn fetch_list<B>(&self, backend: &B) -> QueryResult<Vec<R>>
    where
        B: ExecutionBackend + ?Sized,
    {
        let state = self.freeze()?;
        tracing::debug!("fetch_list on {} backend", backend.kind());
        let rows = backend.fetch(&state).await?;
        decode(&state, rows)
    }

    /// At most one row; more than one is a `NonUniqueResult`
    pub async fn fetch_one<B>(&self, backend: &B) -> QueryResult<Option<R>>
    where
        B: ExecutionBackend + ?Sized,
    {
        let mut state = self.freeze()?;
        if state.limit.is_none() && self.config.limit_fetch_one && !state.fetches_collection() {
            // two rows are enough to detect multiplicity
            state.limit = Some(2);
        }
        tracing::debug!("fetch_one on {} backend", backend.kind());

        let rows = backend.fetch(&state).await?;
        if rows.len() > 1 {
            tracing::warn!("fetch_one produced {} rows", rows.len());
            return Err(QueryError::NonUniqueResult { rows: rows.len() });
        }
        Ok(decode(&state, rows)?.into_iter().next())
    }

    /// The first row if any; never fails on multiplicity
    pub async fn fetch_first<B>(&self, backend: &B) -> QueryResult<Option<R>>
    where
        B: ExecutionBackend + ?Sized,
    {
        let mut state = self.freeze()?;
        // a fetched collection spans several rows; truncating would drop members
        if !state.fetches_collection() {
            state.limit = Some(state.limit.map_or(1, |limit| limit.min(1)));
        }
        tracing::debug!("fetch_first on {} backend", backend.kind());

        let rows = backend.fetch(&state).await?;
        Ok(decode(&state, rows)?.into_iter().next())
    }

    /// The current page plus the total row count without offset/limit
    pub async fn fetch_page<B>(&self, backend: &B) -> QueryResult<QueryResults<R>>
    where
        B: ExecutionBackend + ?Sized,
    {
        let state = self.freeze()?;
        tracing::debug!("fetch_page on {} backend", backend.kind());

        let rows = backend.fetch(&state).await?;
        let total = backend.count(&CountQuery::derive(&state)).await?;

        Ok(QueryResults {
            results: decode(&state, rows)?,
            total,
            offset: state.offset.unwrap_or(0),
            limit: state.limit,
        })
    }

    /// The count helper on its own
    pub async fn fetch_count<B>(&self, backend: &B) -> QueryResult<u64>
    where
        B: ExecutionBackend + ?Sized,
    {
        let state = self.freeze()?;
        backend.count(&CountQuery::derive(&state)).await
    }
}
