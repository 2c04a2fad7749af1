//! Query Builder - Core builder implementation

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::QueryConfig;
use crate::error::{Clause, QueryError, QueryResult};
use crate::expr::{EntityPath, Expr, OrderSpecifier, TypedExpr};
use crate::hydration::{EntityRecord, Tuple};
use crate::registry::EntityRegistry;
use crate::sql::generation::{compile_select, SqlStatement};
use crate::value::ScalarType;

use super::state::QueryState;
use super::validation;

/// Entry point for building queries against one registry
#[derive(Debug, Clone)]
pub struct QueryFactory {
    registry: Arc<EntityRegistry>,
    config: QueryConfig,
}

impl QueryFactory {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self::with_config(registry, QueryConfig::default())
    }

    pub fn with_config(registry: Arc<EntityRegistry>, config: QueryConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Select whole entities of the root source: `select entity from entity`
    pub fn select_from(&self, entity: &EntityPath) -> Query<EntityRecord> {
        let mut query = Query::new(self, vec![entity.expr()]);
        query.state.root = Some(entity.clone());
        query
    }

    /// Select a (possibly joined, hence nullable) entity; `from` comes next
    pub fn select_entity(&self, entity: &EntityPath) -> Query<Option<EntityRecord>> {
        Query::new(self, vec![entity.expr()])
    }

    /// Select a single scalar expression
    pub fn select<T: ScalarType>(&self, expr: TypedExpr<T>) -> Query<Option<T>> {
        Query::new(self, vec![expr.into_expr()])
    }

    /// Select several expressions; rows come back as [`Tuple`]s
    pub fn select_tuple<I>(&self, exprs: I) -> Query<Tuple>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        Query::new(self, exprs.into_iter().map(Into::into).collect())
    }
}

/// A query under construction, producing rows of type `R`
#[derive(Debug)]
pub struct Query<R> {
    pub(crate) registry: Arc<EntityRegistry>,
    pub(crate) config: QueryConfig,
    pub(crate) state: QueryState,
    _result: PhantomData<fn() -> R>,
}

impl<R> Clone for Query<R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            _result: PhantomData,
        }
    }
}

impl<R> Query<R> {
    fn new(factory: &QueryFactory, selection: Vec<Expr>) -> Self {
        Self {
            registry: factory.registry.clone(),
            config: factory.config.clone(),
            state: QueryState {
                selection,
                ..Default::default()
            },
            _result: PhantomData,
        }
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub(crate) fn ensure_registered(&self, path: &EntityPath) -> QueryResult<()> {
        let registered = self.registry.describe(&path.entity().name)?;
        if registered.as_ref() != path.entity().as_ref() {
            return Err(QueryError::InvalidModel(format!(
                "entity '{}' does not match the registry this query was built from",
                path.entity().name
            )));
        }
        Ok(())
    }

    /// Set the root source
    pub fn from(mut self, root: &EntityPath) -> QueryResult<Self> {
        if let Some(existing) = &self.state.root {
            return Err(QueryError::invalid_state(
                Clause::From,
                format!("root is already `{}`", existing),
            ));
        }
        self.ensure_registered(root)?;
        self.state.root = Some(root.clone());
        Ok(self)
    }

    pub fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    /// Add a predicate, conjoined with any previous one
    pub fn filter(mut self, predicate: TypedExpr<bool>) -> QueryResult<Self> {
        validation::check_pending_join(&self.state)?;
        let predicate = predicate.into_expr();
        let visible = self.state.sources().count();
        validation::check_references(&self.state, &predicate, Clause::Where, visible)?;
        validation::check_no_aggregate(&predicate, Clause::Where)?;

        self.state.filter = Expr::conjoin(self.state.filter.take(), Some(predicate));
        Ok(self)
    }

    pub fn group_by<I>(mut self, keys: I) -> QueryResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        validation::check_pending_join(&self.state)?;
        let visible = self.state.sources().count();
        for key in keys {
            let key = key.into();
            validation::check_references(&self.state, &key, Clause::GroupBy, visible)?;
            validation::check_no_aggregate(&key, Clause::GroupBy)?;
            self.state.group_by.push(key);
        }
        validation::check_grouping(&self.state)?;
        Ok(self)
    }

    /// Add a group predicate, conjoined with any previous one
    pub fn having(mut self, predicate: TypedExpr<bool>) -> QueryResult<Self> {
        validation::check_pending_join(&self.state)?;
        let predicate = predicate.into_expr();
        let visible = self.state.sources().count();
        validation::check_references(&self.state, &predicate, Clause::Having, visible)?;

        self.state.having = Expr::conjoin(self.state.having.take(), Some(predicate));
        validation::check_grouping(&self.state)?;
        Ok(self)
    }

    /// Append an order key; unspecified null placement takes the configured default
    pub fn order_by(mut self, specifier: OrderSpecifier) -> QueryResult<Self> {
        validation::check_pending_join(&self.state)?;
        let visible = self.state.sources().count();
        validation::check_references(&self.state, specifier.expr(), Clause::OrderBy, visible)?;

        self.state
            .order_by
            .push(specifier.resolve(self.config.default_null_placement));
        validation::check_grouping(&self.state)?;
        validation::check_distinct_order(&self.state)?;
        Ok(self)
    }

    /// Freeze the builder: run every structural check and hand out the state
    pub fn freeze(&self) -> QueryResult<QueryState> {
        validation::validate(&self.state, &self.config)?;
        Ok(self.state.clone())
    }

    /// Render as parameterised PostgreSQL
    pub fn to_sql(&self) -> QueryResult<SqlStatement> {
        compile_select(&self.freeze()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member_team;

    fn factory() -> QueryFactory {
        QueryFactory::new(member_team::registry().unwrap())
    }

    #[test]
    fn test_select_from_sets_root() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let query = factory.select_from(&member);
        assert_eq!(query.state().root.as_ref(), Some(&member));
        assert!(query.freeze().is_ok());
    }

    #[test]
    fn test_second_root_rejected() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let result = factory.select_from(&member).from(&member);
        assert!(matches!(
            result,
            Err(QueryError::InvalidQueryState { clause: Clause::From, .. })
        ));
    }

    #[test]
    fn test_filters_conjoin() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let query = factory
            .select_from(&member)
            .filter(age.goe(10))
            .unwrap()
            .filter(age.lt(30))
            .unwrap();
        assert_eq!(
            query.state().filter.as_ref().unwrap().to_string(),
            "(member.age >= 10 and member.age < 30)"
        );
    }

    #[test]
    fn test_aggregate_in_filter_rejected() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let result = factory.select_from(&member).filter(age.max().gt(10));
        assert!(matches!(
            result,
            Err(QueryError::InvalidQueryState { clause: Clause::Where, .. })
        ));
    }

    #[test]
    fn test_group_by_checks_selection_immediately() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();
        let username = member.attr::<String>("username").unwrap();

        let result = factory
            .select_tuple([username.clone().into_expr(), age.clone().into_expr()])
            .from(&member)
            .unwrap()
            .group_by([username]);
        assert!(matches!(
            result,
            Err(QueryError::InvalidQueryState { clause: Clause::Select, .. })
        ));
    }

    #[test]
    fn test_default_null_placement_applied() {
        let registry = member_team::registry().unwrap();
        let config = QueryConfig::default()
            .with_null_placement(crate::expr::NullPlacement::Last);
        let factory = QueryFactory::with_config(registry, config);
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let query = factory.select_from(&member).order_by(age.desc()).unwrap();
        assert_eq!(
            query.state().order_by[0].nulls,
            crate::expr::NullPlacement::Last
        );
    }

    #[test]
    fn test_builder_clone_is_independent() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let base = factory.select_from(&member);
        let narrowed = base.clone().filter(age.gt(20)).unwrap();
        assert!(base.state().filter.is_none());
        assert!(narrowed.state().filter.is_some());
    }
}
