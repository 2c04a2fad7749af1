//! Structural validation of query state
//!
//! Builders run the checks relevant to each mutation as it happens; `freeze`
//! runs all of them again over the complete state.

use crate::config::QueryConfig;
use crate::error::{Clause, QueryError, QueryResult};
use crate::expr::{EntityPath, Expr};
use crate::registry::Cardinality;

use super::state::{JoinBasis, JoinKind, JoinSpec, QueryState};

/// Every source path an expression refers to
fn referenced_paths<'a>(expr: &'a Expr, out: &mut Vec<&'a EntityPath>) {
    match expr {
        Expr::Attribute { source, .. } | Expr::Source(source) => out.push(source),
        other => {
            for child in other.children() {
                referenced_paths(child, out);
            }
        }
    }
}

/// Every alias used by `expr` must name a source of the same entity among
/// the first `visible` sources
pub(crate) fn check_references(
    state: &QueryState,
    expr: &Expr,
    clause: Clause,
    visible: usize,
) -> QueryResult<()> {
    let mut paths = Vec::new();
    referenced_paths(expr, &mut paths);

    for path in paths {
        match state.sources().take(visible).find(|s| s.alias() == path.alias()) {
            Some(source) if source == path => {}
            Some(source) => {
                return Err(QueryError::invalid_state(
                    clause,
                    format!(
                        "alias `{}` is bound to {}, not {}",
                        path.alias(),
                        source.entity().name,
                        path.entity().name
                    ),
                ))
            }
            None => {
                return Err(QueryError::invalid_state(
                    clause,
                    format!("alias `{}` is not a source of this query", path.alias()),
                ))
            }
        }
    }
    Ok(())
}

pub(crate) fn check_no_aggregate(expr: &Expr, clause: Clause) -> QueryResult<()> {
    if expr.contains_aggregate() {
        return Err(QueryError::invalid_state(
            clause,
            format!("aggregate in `{}` is not allowed here", expr),
        ));
    }
    Ok(())
}

/// An ad-hoc left join must receive its `on` before anything else happens
pub(crate) fn check_pending_join(state: &QueryState) -> QueryResult<()> {
    match state.joins.last() {
        Some(join) if is_unconditioned_outer(join) => Err(unconditioned_outer(join)),
        _ => Ok(()),
    }
}

fn is_unconditioned_outer(join: &JoinSpec) -> bool {
    join.kind == JoinKind::Left && join.basis == JoinBasis::AdHoc && join.on.is_none()
}

fn unconditioned_outer(join: &JoinSpec) -> QueryError {
    QueryError::UnsupportedJoin {
        join: join.to_string(),
        reason: "an outer join without a declared relation needs an explicit `on` predicate"
            .to_string(),
    }
}

/// Whether `expr` is computable per group given the group keys
fn is_group_consistent(expr: &Expr, keys: &[Expr]) -> bool {
    if keys.contains(expr) {
        return true;
    }
    match expr {
        Expr::Aggregate { .. } | Expr::Literal(_) => true,
        // grouping by an entity determines all of its attributes
        Expr::Attribute { source, .. } => keys.contains(&Expr::Source(source.clone())),
        Expr::Source(_) => false,
        other => other
            .children()
            .into_iter()
            .all(|child| is_group_consistent(child, keys)),
    }
}

pub(crate) fn check_grouping(state: &QueryState) -> QueryResult<()> {
    if !state.is_grouped() {
        // an aggregate order key alone does not make a query grouped
        if let Some(key) = state.order_by.iter().find(|k| k.expr.contains_aggregate()) {
            return Err(QueryError::invalid_state(
                Clause::OrderBy,
                format!("aggregate order key `{}` requires a grouped query", key.expr),
            ));
        }
        return Ok(());
    }

    let keys = &state.group_by;
    let explain = |expr: &Expr| {
        if keys.is_empty() {
            format!(
                "`{}` mixes with aggregates but there is no group by",
                expr
            )
        } else {
            format!("`{}` must appear in group by or be used in an aggregate", expr)
        }
    };

    for expr in &state.selection {
        if !is_group_consistent(expr, keys) {
            return Err(QueryError::invalid_state(Clause::Select, explain(expr)));
        }
    }
    if let Some(having) = &state.having {
        if !is_group_consistent(having, keys) {
            return Err(QueryError::invalid_state(Clause::Having, explain(having)));
        }
    }
    for key in &state.order_by {
        if !is_group_consistent(&key.expr, keys) {
            return Err(QueryError::invalid_state(Clause::OrderBy, explain(&key.expr)));
        }
    }
    Ok(())
}

pub(crate) fn check_fetch_joins(state: &QueryState) -> QueryResult<()> {
    for join in state.fetch_joins() {
        let owner = match &join.basis {
            JoinBasis::Association { owner, .. } => owner,
            JoinBasis::AdHoc => {
                return Err(QueryError::InvalidFetchJoin {
                    join: join.to_string(),
                })
            }
        };
        let clause = Clause::Join(join.target.alias().to_string());

        if state.is_grouped() {
            return Err(QueryError::invalid_state(
                clause,
                "fetch joins cannot be combined with grouping or aggregation",
            ));
        }
        let collection = join
            .relation()
            .map(|r| r.cardinality == Cardinality::ToMany)
            .unwrap_or(false);
        if collection && (state.limit.is_some() || state.offset.is_some()) {
            // paging would cut the fetched collection short
            return Err(QueryError::invalid_state(
                Clause::Limit,
                format!("offset/limit cannot be applied to collection fetch join `{}`", join),
            ));
        }
        let projected = state
            .selection
            .iter()
            .any(|e| matches!(e, Expr::Source(p) if p.alias() == owner.as_str()));
        if !projected {
            return Err(QueryError::invalid_state(
                clause,
                format!("fetch join owner `{}` is not selected as an entity", owner),
            ));
        }
    }
    Ok(())
}

/// Under `distinct`, every order key must be part of the projected columns
pub(crate) fn check_distinct_order(state: &QueryState) -> QueryResult<()> {
    if !state.distinct {
        return Ok(());
    }
    for key in &state.order_by {
        let projected = state.selection.contains(&key.expr)
            || matches!(&key.expr, Expr::Attribute { source, .. }
                if state.selection.contains(&Expr::Source(source.clone())));
        if !projected {
            return Err(QueryError::invalid_state(
                Clause::OrderBy,
                format!("`{}` must be selected to order a distinct query by it", key.expr),
            ));
        }
    }
    Ok(())
}

pub(crate) fn check_limit(state: &QueryState, config: &QueryConfig) -> QueryResult<()> {
    match (state.limit, config.max_limit) {
        (Some(limit), Some(max)) if limit > max => Err(QueryError::invalid_state(
            Clause::Limit,
            format!("limit {} exceeds the configured maximum of {}", limit, max),
        )),
        _ => Ok(()),
    }
}

/// Full validation, run when a builder is frozen for execution
pub fn validate(state: &QueryState, config: &QueryConfig) -> QueryResult<()> {
    if state.root.is_none() {
        return Err(QueryError::invalid_state(
            Clause::From,
            "query has no root entity; call `from` first",
        ));
    }
    if state.selection.is_empty() {
        return Err(QueryError::invalid_state(Clause::Select, "nothing is selected"));
    }

    let sources: Vec<&EntityPath> = state.sources().collect();
    for (i, source) in sources.iter().enumerate() {
        if sources[..i].iter().any(|s| s.alias() == source.alias()) {
            return Err(QueryError::invalid_state(
                Clause::From,
                format!("alias `{}` is used by more than one source", source.alias()),
            ));
        }
    }

    let all = sources.len();
    for expr in &state.selection {
        check_references(state, expr, Clause::Select, all)?;
    }

    for (i, join) in state.joins.iter().enumerate() {
        if is_unconditioned_outer(join) {
            return Err(unconditioned_outer(join));
        }
        if let Some(predicate) = join.predicate() {
            let clause = Clause::Join(join.target.alias().to_string());
            // root plus this and every earlier join
            check_references(state, &predicate, clause.clone(), i + 2)?;
            check_no_aggregate(&predicate, clause)?;
        }
    }

    if let Some(filter) = &state.filter {
        check_references(state, filter, Clause::Where, all)?;
        check_no_aggregate(filter, Clause::Where)?;
    }
    for key in &state.group_by {
        check_references(state, key, Clause::GroupBy, all)?;
        check_no_aggregate(key, Clause::GroupBy)?;
    }
    if let Some(having) = &state.having {
        check_references(state, having, Clause::Having, all)?;
    }
    for key in &state.order_by {
        check_references(state, &key.expr, Clause::OrderBy, all)?;
    }

    check_grouping(state)?;
    check_distinct_order(state)?;
    check_fetch_joins(state)?;
    check_limit(state, config)?;

    tracing::debug!(
        "Query validated: {} sources, {} joins, {} selected",
        all,
        state.joins.len(),
        state.selection.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Direction, OrderSpecifier};
    use crate::models::member_team;

    fn grouped_state() -> QueryState {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();
        QueryState {
            selection: vec![member.attribute("username").unwrap(), age.avg().into_expr()],
            root: Some(member.clone()),
            group_by: vec![member.attribute("username").unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn test_grouped_selection_accepted() {
        assert!(check_grouping(&grouped_state()).is_ok());
    }

    #[test]
    fn test_ungrouped_selection_rejected() {
        let mut state = grouped_state();
        let member = state.root.clone().unwrap();
        state.selection.push(member.attribute("age").unwrap());
        assert!(matches!(
            check_grouping(&state),
            Err(QueryError::InvalidQueryState { clause: Clause::Select, .. })
        ));
    }

    #[test]
    fn test_order_key_must_be_grouped() {
        let mut state = grouped_state();
        let member = state.root.clone().unwrap();
        let key = OrderSpecifier::new(member.attribute("age").unwrap(), Direction::Asc)
            .resolve(crate::expr::NullPlacement::First);
        state.order_by.push(key);
        assert!(matches!(
            check_grouping(&state),
            Err(QueryError::InvalidQueryState { clause: Clause::OrderBy, .. })
        ));
    }

    #[test]
    fn test_entity_group_key_covers_attributes() {
        let registry = member_team::registry().unwrap();
        let team = registry.path("Team").unwrap();
        let state = QueryState {
            selection: vec![team.attribute("name").unwrap(), team.count().into_expr()],
            root: Some(team.clone()),
            group_by: vec![team.expr()],
            ..Default::default()
        };
        assert!(check_grouping(&state).is_ok());
    }

    #[test]
    fn test_foreign_alias_rejected() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let team = registry.path("Team").unwrap();
        let state = QueryState {
            selection: vec![member.expr()],
            root: Some(member),
            filter: Some(team.attribute("name").unwrap()),
            ..Default::default()
        };
        assert!(matches!(
            validate(&state, &QueryConfig::default()),
            Err(QueryError::InvalidQueryState { clause: Clause::Where, .. })
        ));
    }

    #[test]
    fn test_missing_root_rejected() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let state = QueryState {
            selection: vec![member.expr()],
            ..Default::default()
        };
        assert!(matches!(
            validate(&state, &QueryConfig::default()),
            Err(QueryError::InvalidQueryState { clause: Clause::From, .. })
        ));
    }

    #[test]
    fn test_limit_above_maximum_rejected() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let state = QueryState {
            selection: vec![member.expr()],
            root: Some(member),
            limit: Some(500),
            ..Default::default()
        };
        let config = QueryConfig::default().with_max_limit(100);
        assert!(matches!(
            validate(&state, &config),
            Err(QueryError::InvalidQueryState { clause: Clause::Limit, .. })
        ));
        assert!(validate(&state, &QueryConfig::default()).is_ok());
    }

    #[test]
    fn test_aggregate_order_key_on_ungrouped_query_rejected() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();
        let state = QueryState {
            selection: vec![member.expr()],
            root: Some(member),
            order_by: vec![age.max().desc().resolve(crate::expr::NullPlacement::First)],
            ..Default::default()
        };
        assert!(!state.is_grouped());
        assert!(matches!(
            validate(&state, &QueryConfig::default()),
            Err(QueryError::InvalidQueryState { clause: Clause::OrderBy, .. })
        ));
    }

    #[test]
    fn test_distinct_order_key_must_be_selected() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();
        let mut state = QueryState {
            selection: vec![member.attribute("username").unwrap()],
            distinct: true,
            root: Some(member.clone()),
            order_by: vec![age.asc().resolve(crate::expr::NullPlacement::First)],
            ..Default::default()
        };
        assert!(matches!(
            validate(&state, &QueryConfig::default()),
            Err(QueryError::InvalidQueryState { clause: Clause::OrderBy, .. })
        ));

        // selecting the whole entity projects every attribute
        state.selection = vec![member.expr()];
        assert!(validate(&state, &QueryConfig::default()).is_ok());
    }
}
