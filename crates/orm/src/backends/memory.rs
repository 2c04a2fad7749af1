//! In-memory execution backend
//!
//! Evaluates frozen queries directly over rows held in memory: nested-loop
//! joins in declaration order, SQL three-valued logic, first-seen grouping and
//! a stable sort. Used by the test suite and for examples that should not
//! need a database.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Clause, QueryError, QueryResult};
use crate::expr::{AggregateFn, BinaryOp, EntityPath, Expr, UnaryOp};
use crate::hydration::{hydrate, Row, RowLayout};
use crate::query::{CountMode, CountQuery, JoinKind, QueryState};
use crate::registry::{EntityRegistry, ScalarKind};
use crate::value::Value;

use super::{BackendKind, ExecutionBackend};

/// Row indices per source; `None` where an outer join found no match
type Binding = Vec<Option<usize>>;

/// Rows stored per entity, values in descriptor attribute order
#[derive(Debug)]
pub struct InMemoryBackend {
    registry: Arc<EntityRegistry>,
    tables: DashMap<String, Vec<Vec<Value>>>,
    next_id: AtomicI64,
}

impl InMemoryBackend {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            registry,
            tables: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Store one entity row. Attributes not given are NULL; an integer
    /// identity left NULL is assigned. Returns the identity value.
    pub fn persist<'a, I>(&self, entity: &str, values: I) -> QueryResult<Value>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let descriptor = self.registry.describe(entity)?;
        let mut row = vec![Value::Null; descriptor.attributes.len()];

        for (name, value) in values {
            let index = descriptor
                .attr_index(name)
                .ok_or_else(|| QueryError::UnknownAttribute {
                    entity: entity.to_string(),
                    attribute: name.to_string(),
                })?;
            let attribute = &descriptor.attributes[index];
            row[index] = match (attribute.kind, value) {
                (ScalarKind::Float, Value::Int(i)) => Value::Float(i as f64),
                (kind, value) => match value.kind() {
                    Some(found) if found != kind => {
                        return Err(QueryError::TypeMismatch {
                            context: format!("{}.{}", entity, name),
                            expected: kind.to_string(),
                            found: found.to_string(),
                        })
                    }
                    _ => value,
                },
            };
        }

        let identity = descriptor.identity_attr()?;
        let id_index = descriptor
            .identity_index()
            .ok_or_else(|| QueryError::InvalidModel(format!("'{}' has no identity", entity)))?;
        if row[id_index].is_null() && identity.kind == ScalarKind::Int {
            row[id_index] = Value::Int(self.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        }

        for (attribute, value) in descriptor.attributes.iter().zip(&row) {
            if !attribute.nullable && value.is_null() {
                return Err(QueryError::UnexpectedNull {
                    column: format!("{}.{}", entity, attribute.name),
                });
            }
        }

        let id = row[id_index].clone();
        tracing::trace!("Persisted {} {}", entity, id);
        self.tables.entry(entity.to_string()).or_default().push(row);
        Ok(id)
    }

    pub fn row_count(&self, entity: &str) -> usize {
        self.tables.get(entity).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Drop every stored row
    pub fn clear(&self) {
        self.tables.clear();
    }

    fn snapshot(&self, entity: &str) -> Vec<Vec<Value>> {
        self.tables
            .get(entity)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Evaluate `state`, producing one flat row of `columns` per result
    fn run(&self, state: &QueryState, columns: &[Expr]) -> QueryResult<Vec<Vec<Value>>> {
        let sources: Vec<&EntityPath> = state.sources().collect();
        if sources.is_empty() {
            return Err(QueryError::invalid_state(Clause::From, "query has no root entity"));
        }
        let tables = sources
            .iter()
            .map(|source| self.snapshot(&source.entity().name))
            .collect();
        let evaluator = Evaluator { sources, tables };

        let bindings = evaluator.join_all(state)?;
        let mut filtered = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let keep = match &state.filter {
                Some(filter) => evaluator.eval(filter, Scope::Row(&binding))?.is_true(),
                None => true,
            };
            if keep {
                filtered.push(binding);
            }
        }

        // (sort values, output row) per result
        let mut produced: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        if state.is_grouped() {
            for group in evaluator.group(state, filtered)? {
                let scope = Scope::Group(&group);
                if let Some(having) = &state.having {
                    if !evaluator.eval(having, scope)?.is_true() {
                        continue;
                    }
                }
                produced.push(evaluator.project(state, columns, scope)?);
            }
        } else {
            for binding in &filtered {
                produced.push(evaluator.project(state, columns, Scope::Row(binding))?);
            }
        }

        produced.sort_by(|(a, _), (b, _)| {
            state
                .order_by
                .iter()
                .zip(a.iter().zip(b))
                .map(|(key, (x, y))| key.compare(x, y))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let mut rows: Vec<Vec<Value>> = produced.into_iter().map(|(_, row)| row).collect();
        if state.distinct {
            let mut unique: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
            for row in rows {
                if !unique.contains(&row) {
                    unique.push(row);
                }
            }
            rows = unique;
        }

        let offset = state.offset.unwrap_or(0) as usize;
        let limit = state.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    async fn fetch(&self, state: &QueryState) -> QueryResult<Vec<Row>> {
        let layout = RowLayout::for_query(state)?;
        let flat = self.run(state, layout.columns())?;
        tracing::debug!("In-memory fetch produced {} rows", flat.len());
        hydrate(&layout, flat)
    }

    async fn count(&self, query: &CountQuery) -> QueryResult<u64> {
        let state = query.state();
        let rows = self.run(state, &state.selection)?;
        let total = match query.mode() {
            CountMode::Groups => rows.len() as u64,
            CountMode::Rows => match rows.first().and_then(|row| row.first()) {
                Some(Value::Int(n)) => *n as u64,
                other => {
                    return Err(QueryError::Decode(format!(
                        "count produced {:?} instead of an integer",
                        other
                    )))
                }
            },
        };
        tracing::debug!("In-memory count: {}", total);
        Ok(total)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}

#[derive(Clone, Copy)]
enum Scope<'b> {
    Row(&'b [Option<usize>]),
    /// All bindings of one group; plain columns read the first
    Group(&'b [Binding]),
}

struct Evaluator<'a> {
    sources: Vec<&'a EntityPath>,
    tables: Vec<Vec<Vec<Value>>>,
}

impl<'a> Evaluator<'a> {
    fn join_all(&self, state: &QueryState) -> QueryResult<Vec<Binding>> {
        let mut bindings: Vec<Binding> = (0..self.tables[0].len()).map(|i| vec![Some(i)]).collect();

        for (j, join) in state.joins.iter().enumerate() {
            let predicate = join.predicate();
            let candidates = self.tables[j + 1].len();
            let mut next = Vec::with_capacity(bindings.len());

            for binding in bindings {
                let mut matched = false;
                for row in 0..candidates {
                    let mut candidate = binding.clone();
                    candidate.push(Some(row));
                    let keep = match &predicate {
                        Some(predicate) => self.eval(predicate, Scope::Row(&candidate))?.is_true(),
                        None => true,
                    };
                    if keep {
                        matched = true;
                        next.push(candidate);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut padded = binding;
                    padded.push(None);
                    next.push(padded);
                }
            }
            bindings = next;
        }
        Ok(bindings)
    }

    /// Groups in first-seen key order; one group when there are no keys
    fn group(&self, state: &QueryState, bindings: Vec<Binding>) -> QueryResult<Vec<Vec<Binding>>> {
        if state.group_by.is_empty() {
            return Ok(vec![bindings]);
        }

        let mut groups: Vec<(Vec<Value>, Vec<Binding>)> = Vec::new();
        for binding in bindings {
            let key = state
                .group_by
                .iter()
                .map(|expr| self.eval(expr, Scope::Row(&binding)))
                .collect::<QueryResult<Vec<_>>>()?;
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(binding),
                None => groups.push((key, vec![binding])),
            }
        }
        Ok(groups.into_iter().map(|(_, members)| members).collect())
    }

    fn project(
        &self,
        state: &QueryState,
        columns: &[Expr],
        scope: Scope<'_>,
    ) -> QueryResult<(Vec<Value>, Vec<Value>)> {
        let sort = state
            .order_by
            .iter()
            .map(|key| self.eval(&key.expr, scope))
            .collect::<QueryResult<Vec<_>>>()?;
        let row = columns
            .iter()
            .map(|column| self.eval(column, scope))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok((sort, row))
    }

    fn lookup(&self, source: &EntityPath, attribute: Option<&str>, scope: Scope<'_>) -> Value {
        let binding: &[Option<usize>] = match scope {
            Scope::Row(binding) => binding,
            Scope::Group(group) => match group.first() {
                Some(binding) => binding,
                None => return Value::Null,
            },
        };
        let Some(index) = self.sources.iter().position(|s| s.alias() == source.alias()) else {
            return Value::Null;
        };
        let column = match attribute {
            Some(name) => source.entity().attr_index(name),
            None => source.entity().identity_index(),
        };

        match (binding.get(index).copied().flatten(), column) {
            (Some(row), Some(column)) => self.tables[index][row][column].clone(),
            _ => Value::Null,
        }
    }

    fn eval(&self, expr: &Expr, scope: Scope<'_>) -> QueryResult<Value> {
        Ok(match expr {
            Expr::Attribute { source, attribute } => {
                self.lookup(source, Some(&attribute.name), scope)
            }
            Expr::Source(source) => self.lookup(source, None, scope),
            Expr::Literal(value) => value.clone(),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                match op {
                    UnaryOp::IsNull => Value::Bool(value.is_null()),
                    UnaryOp::IsNotNull => Value::Bool(!value.is_null()),
                    UnaryOp::Not => match value {
                        Value::Bool(b) => Value::Bool(!b),
                        _ => Value::Null,
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                binary(*op, &left, &right)
            }
            Expr::InList { operand, list } => {
                let value = self.eval(operand, scope)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let mut unknown = false;
                for item in list {
                    let item = self.eval(item, scope)?;
                    match value.compare(&item) {
                        Some(Ordering::Equal) => return Ok(Value::Bool(true)),
                        None => unknown = true,
                        Some(_) => {}
                    }
                }
                if unknown {
                    Value::Null
                } else {
                    Value::Bool(false)
                }
            }
            Expr::Aggregate { func, arg, distinct } => {
                let Scope::Group(group) = scope else {
                    return Err(QueryError::invalid_state(
                        Clause::Select,
                        format!("aggregate `{}` outside of a grouped query", expr),
                    ));
                };
                let Some(arg) = arg else {
                    return Ok(Value::Int(group.len() as i64));
                };

                let mut values = Vec::with_capacity(group.len());
                for binding in group {
                    let value = self.eval(arg, Scope::Row(binding))?;
                    if !value.is_null() && !(*distinct && values.contains(&value)) {
                        values.push(value);
                    }
                }
                aggregate(*func, values)?
            }
        })
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::And => match (left, right) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        BinaryOp::Or => match (left, right) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        BinaryOp::Like => match (left, right) {
            (Value::Text(text), Value::Text(pattern)) => Value::Bool(like(text, pattern)),
            _ => Value::Null,
        },
        comparison => match left.compare(right) {
            Some(ordering) => Value::Bool(match comparison {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::Ne => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }),
            None => Value::Null,
        },
    }
}

/// NULLs are already removed from `values`
fn aggregate(func: AggregateFn, values: Vec<Value>) -> QueryResult<Value> {
    let value = match func {
        AggregateFn::Count => Value::Int(values.len() as i64),
        AggregateFn::Sum | AggregateFn::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let all_int = values.iter().all(|v| matches!(v, Value::Int(_)));
            let float_sum: f64 = values
                .iter()
                .map(|v| match v {
                    Value::Int(n) => *n as f64,
                    Value::Float(x) => *x,
                    _ => 0.0,
                })
                .sum();
            match func {
                AggregateFn::Sum if all_int => {
                    let mut int_sum: i64 = 0;
                    for value in &values {
                        if let Value::Int(n) = value {
                            int_sum = int_sum.checked_add(*n).ok_or_else(|| {
                                QueryError::Decode(format!(
                                    "integer overflow in {}",
                                    func.name()
                                ))
                            })?;
                        }
                    }
                    Value::Int(int_sum)
                }
                AggregateFn::Sum => Value::Float(float_sum),
                _ => Value::Float(float_sum / values.len() as f64),
            }
        }
        AggregateFn::Max | AggregateFn::Min => {
            let wanted = if func == AggregateFn::Max {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            values
                .into_iter()
                .reduce(|best, v| if v.compare(&best) == Some(wanted) { v } else { best })
                .unwrap_or(Value::Null)
        }
    };
    Ok(value)
}

/// SQL LIKE: `%` matches any run, `_` any single character
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matches[j]: pattern prefix so far matches text[..j]
    let mut matches = vec![false; text.len() + 1];
    matches[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut any = false;
                for j in 0..=text.len() {
                    any |= matches[j];
                    next[j] = any;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matches = next;
    }
    matches[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member_team;

    #[test]
    fn test_like_patterns() {
        assert!(like("member1", "member%"));
        assert!(like("member1", "%1"));
        assert!(like("member1", "memb_r_"));
        assert!(!like("member1", "team%"));
        assert!(like("", "%"));
        assert!(!like("ab", "_"));
    }

    #[test]
    fn test_three_valued_logic() {
        let null = Value::Null;
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert_eq!(binary(BinaryOp::And, &null, &f), f);
        assert_eq!(binary(BinaryOp::And, &null, &t), Value::Null);
        assert_eq!(binary(BinaryOp::Or, &null, &t), t);
        assert_eq!(binary(BinaryOp::Eq, &null, &Value::Int(1)), Value::Null);
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let values = vec![Value::Int(10), Value::Int(30)];
        assert_eq!(aggregate(AggregateFn::Sum, values.clone()).unwrap(), Value::Int(40));
        assert_eq!(aggregate(AggregateFn::Avg, values.clone()).unwrap(), Value::Float(20.0));
        assert_eq!(aggregate(AggregateFn::Max, values.clone()).unwrap(), Value::Int(30));
        assert_eq!(aggregate(AggregateFn::Min, values).unwrap(), Value::Int(10));
        assert_eq!(aggregate(AggregateFn::Avg, Vec::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_integer_sum_overflow_is_an_error() {
        let values = vec![Value::Int(i64::MAX), Value::Int(i64::MAX)];
        assert!(matches!(
            aggregate(AggregateFn::Sum, values.clone()),
            Err(QueryError::Decode(_))
        ));
        // averages are computed in floating point and do not overflow
        assert!(matches!(
            aggregate(AggregateFn::Avg, values),
            Ok(Value::Float(_))
        ));
    }

    #[test]
    fn test_persist_validates_attributes() {
        let backend = InMemoryBackend::new(member_team::registry().unwrap());

        let id = backend
            .persist("Team", [("name", Value::from("teamA"))])
            .unwrap();
        assert!(matches!(id, Value::Int(_)));
        assert_eq!(backend.row_count("Team"), 1);

        assert!(matches!(
            backend.persist("Team", [("motto", Value::from("x"))]),
            Err(QueryError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            backend.persist("Team", [("name", Value::Int(3))]),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            backend.persist("Member", [("username", Value::from("m"))]),
            Err(QueryError::UnexpectedNull { .. })
        ));
    }
}
