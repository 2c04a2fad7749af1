//! Query Builder pagination operations and the count helper

use crate::expr::Expr;

use super::builder::Query;
use super::state::QueryState;

impl<R> Query<R> {
    /// Add LIMIT clause
    pub fn limit(mut self, count: u64) -> Self {
        self.state.limit = Some(count);
        self
    }

    /// Add OFFSET clause
    pub fn offset(mut self, count: u64) -> Self {
        self.state.offset = Some(count);
        self
    }

    /// Add pagination (LIMIT + OFFSET) for a 1-based page number
    pub fn paginate(mut self, page: u64, per_page: u64) -> Self {
        self.state.limit = Some(per_page);
        self.state.offset = Some(page.saturating_sub(1).saturating_mul(per_page));
        self
    }
}

/// How a count query turns into a number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// The selection is a single `count(*)`; read it
    Rows,
    /// The query yields one row per group or distinct tuple; count the rows
    Groups,
}

/// A count derived from a frozen query: same sources, joins, filter and
/// grouping; no ordering and no offset/limit
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    state: QueryState,
    mode: CountMode,
}

impl CountQuery {
    pub fn derive(source: &QueryState) -> Self {
        let mut state = source.clone();
        state.order_by.clear();
        state.offset = None;
        state.limit = None;
        for join in &mut state.joins {
            join.fetch = false;
        }

        let mode = if state.is_grouped() || state.distinct {
            if !state.distinct && !state.group_by.is_empty() {
                state.selection = state.group_by.clone();
            }
            CountMode::Groups
        } else {
            state.selection = vec![Expr::count_all()];
            CountMode::Rows
        };

        tracing::debug!("Derived {:?} count query", mode);
        Self { state, mode }
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn mode(&self) -> CountMode {
        self.mode
    }
}

/// One page of results together with the total over all pages
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResults<R> {
    pub results: Vec<R>,
    pub total: u64,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl<R> QueryResults<R> {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of pages at the current limit; `None` when unlimited
    pub fn total_pages(&self) -> Option<u64> {
        match self.limit {
            Some(0) => Some(0),
            Some(limit) => Some(self.total / limit + u64::from(self.total % limit != 0)),
            None => None,
        }
    }

    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.results.len() as u64) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AggregateFn;
    use crate::models::member_team;
    use crate::query::builder::QueryFactory;

    #[test]
    fn test_count_strips_order_and_paging() {
        let factory = QueryFactory::new(member_team::registry().unwrap());
        let member = factory.registry().path("Member").unwrap();
        let username = member.attr::<String>("username").unwrap();

        let query = factory
            .select_from(&member)
            .order_by(username.desc())
            .unwrap()
            .offset(1)
            .limit(2);
        let count = CountQuery::derive(&query.freeze().unwrap());

        assert_eq!(count.mode(), CountMode::Rows);
        assert!(count.state().order_by.is_empty());
        assert_eq!(count.state().offset, None);
        assert_eq!(count.state().limit, None);
        assert!(matches!(
            count.state().selection.as_slice(),
            [Expr::Aggregate { func: AggregateFn::Count, arg: None, .. }]
        ));
    }

    #[test]
    fn test_grouped_count_selects_keys() {
        let factory = QueryFactory::new(member_team::registry().unwrap());
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();
        let username = member.attr::<String>("username").unwrap();

        let query = factory
            .select_tuple([username.clone().into_expr(), age.avg().into_expr()])
            .from(&member)
            .unwrap()
            .group_by([username.clone()])
            .unwrap();
        let count = CountQuery::derive(&query.freeze().unwrap());

        assert_eq!(count.mode(), CountMode::Groups);
        assert_eq!(count.state().selection, vec![username.into_expr()]);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let factory = QueryFactory::new(member_team::registry().unwrap());
        let member = factory.registry().path("Member").unwrap();
        let state = factory.select_from(&member).limit(3).freeze().unwrap();
        assert_eq!(CountQuery::derive(&state), CountQuery::derive(&state));
    }

    #[test]
    fn test_paginate_is_one_based() {
        let factory = QueryFactory::new(member_team::registry().unwrap());
        let member = factory.registry().path("Member").unwrap();
        let query = factory.select_from(&member).paginate(3, 10);
        assert_eq!(query.state().offset, Some(20));
        assert_eq!(query.state().limit, Some(10));
    }

    #[test]
    fn test_page_arithmetic() {
        let page = QueryResults {
            results: vec![1, 2],
            total: 5,
            offset: 2,
            limit: Some(2),
        };
        assert_eq!(page.total_pages(), Some(3));
        assert!(page.has_next());
    }

    #[test]
    fn test_paging_arithmetic_saturates() {
        let factory = QueryFactory::new(member_team::registry().unwrap());
        let member = factory.registry().path("Member").unwrap();
        let query = factory.select_from(&member).paginate(u64::MAX, 2);
        assert_eq!(query.state().offset, Some(u64::MAX));
        assert_eq!(query.state().limit, Some(2));

        let page = QueryResults {
            results: vec![1],
            total: u64::MAX,
            offset: u64::MAX,
            limit: Some(2),
        };
        assert_eq!(page.total_pages(), Some(u64::MAX / 2 + 1));
        assert!(!page.has_next());
    }
}
