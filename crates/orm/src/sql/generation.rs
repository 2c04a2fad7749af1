//! SELECT generation for PostgreSQL
//!
//! Scalar kinds map to `BOOLEAN`, `BIGINT`, `DOUBLE PRECISION`, `TEXT`,
//! `UUID` and `TIMESTAMPTZ`. Aggregates are cast so their result types match
//! the kinds the expression algebra assigns them.

use crate::error::{Clause, QueryError, QueryResult};
use crate::expr::{AggregateFn, EntityPath, Expr, UnaryOp};
use crate::hydration::RowLayout;
use crate::query::{CountMode, CountQuery, JoinKind, QueryState};
use crate::registry::ScalarKind;
use crate::value::Value;

use super::{escape_identifier, parameter_placeholder};

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Compile a frozen query; the select list follows its [`RowLayout`]
pub fn compile_select(state: &QueryState) -> QueryResult<SqlStatement> {
    let layout = RowLayout::for_query(state)?;
    let mut writer = SqlWriter::default();
    writer.select(state, layout.columns())?;
    Ok(writer.finish())
}

/// Compile a count query. Grouped and distinct queries are counted as a subquery.
pub fn compile_count(count: &CountQuery) -> QueryResult<SqlStatement> {
    let state = count.state();
    let mut writer = SqlWriter::default();
    match count.mode() {
        CountMode::Rows => writer.select(state, &state.selection)?,
        CountMode::Groups => {
            let layout = RowLayout::for_query(state)?;
            writer.push("SELECT COUNT(*) FROM (");
            writer.select(state, layout.columns())?;
            writer.push(") AS \"counted\"");
        }
    }
    Ok(writer.finish())
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn finish(self) -> SqlStatement {
        tracing::trace!("Generated SQL: {}", self.sql);
        SqlStatement {
            sql: self.sql,
            params: self.params,
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: &Value) -> QueryResult<()> {
        match value {
            Value::Null => self.push("NULL"),
            Value::Entity(record) => {
                return Err(QueryError::TypeMismatch {
                    context: "query parameter".to_string(),
                    expected: "scalar".to_string(),
                    found: format!("entity {}", record.entity()),
                })
            }
            scalar => {
                self.params.push(scalar.clone());
                let placeholder = parameter_placeholder(self.params.len());
                self.push(&placeholder);
            }
        }
        Ok(())
    }

    fn column(&mut self, source: &EntityPath, column: &str) {
        let text = format!(
            "{}.{}",
            escape_identifier(source.alias()),
            escape_identifier(column)
        );
        self.push(&text);
    }

    fn source(&mut self, path: &EntityPath) {
        let text = format!(
            "{} AS {}",
            escape_identifier(&path.entity().table),
            escape_identifier(path.alias())
        );
        self.push(&text);
    }

    fn list(&mut self, exprs: &[Expr]) -> QueryResult<()> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(expr, false)?;
        }
        Ok(())
    }

    fn select(&mut self, state: &QueryState, columns: &[Expr]) -> QueryResult<()> {
        self.push(if state.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        self.list(columns)?;

        let root = state
            .root
            .as_ref()
            .ok_or_else(|| QueryError::invalid_state(Clause::From, "no root entity"))?;
        self.push(" FROM ");
        self.source(root);

        for join in &state.joins {
            match (join.kind, join.predicate()) {
                (JoinKind::Inner, None) => {
                    self.push(" CROSS JOIN ");
                    self.source(&join.target);
                }
                (JoinKind::Left, None) => {
                    return Err(QueryError::UnsupportedJoin {
                        join: join.to_string(),
                        reason: "an outer join needs a predicate".to_string(),
                    })
                }
                (kind, Some(predicate)) => {
                    self.push(&format!(" {} ", kind));
                    self.source(&join.target);
                    self.push(" ON ");
                    self.expr(&predicate, false)?;
                }
            }
        }

        if let Some(filter) = &state.filter {
            self.push(" WHERE ");
            self.expr(filter, false)?;
        }
        if !state.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.list(&state.group_by)?;
        }
        if let Some(having) = &state.having {
            self.push(" HAVING ");
            self.expr(having, false)?;
        }
        if !state.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, key) in state.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&key.expr, false)?;
                self.push(&format!(" {} {}", key.direction, key.nulls));
            }
        }
        if let Some(limit) = state.limit {
            self.push(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = state.offset {
            self.push(&format!(" OFFSET {}", offset));
        }
        Ok(())
    }

    /// `nested` operators are parenthesised
    fn expr(&mut self, expr: &Expr, nested: bool) -> QueryResult<()> {
        match expr {
            Expr::Attribute { source, attribute } => self.column(source, &attribute.column),
            Expr::Source(source) => {
                let identity = source.entity().identity_attr()?;
                self.column(source, &identity.column);
            }
            Expr::Literal(value) => self.bind(value)?,
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    self.push("NOT (");
                    self.expr(operand, false)?;
                    self.push(")");
                }
                UnaryOp::IsNull | UnaryOp::IsNotNull => {
                    self.expr(operand, true)?;
                    self.push(if *op == UnaryOp::IsNull {
                        " IS NULL"
                    } else {
                        " IS NOT NULL"
                    });
                }
            },
            Expr::Binary { op, left, right } => {
                if nested {
                    self.push("(");
                }
                self.expr(left, true)?;
                self.push(&format!(" {} ", op.symbol()));
                self.expr(right, true)?;
                if nested {
                    self.push(")");
                }
            }
            Expr::InList { list, .. } if list.is_empty() => self.push("FALSE"),
            Expr::InList { operand, list } => {
                if nested {
                    self.push("(");
                }
                self.expr(operand, true)?;
                self.push(" IN (");
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(item, true)?;
                }
                self.push(")");
                if nested {
                    self.push(")");
                }
            }
            Expr::Aggregate { func, arg, distinct } => {
                self.push(func.name());
                self.push("(");
                match arg {
                    None => self.push("*"),
                    Some(arg) => {
                        if *distinct {
                            self.push("DISTINCT ");
                        }
                        self.expr(arg, false)?;
                    }
                }
                self.push(")");
                match (func, expr.result_type().scalar()) {
                    (AggregateFn::Avg, _) => self.push("::float8"),
                    (AggregateFn::Sum, Some(ScalarKind::Int)) => self.push("::bigint"),
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member_team;
    use crate::query::QueryFactory;

    fn factory() -> QueryFactory {
        QueryFactory::new(member_team::registry().unwrap())
    }

    #[test]
    fn test_entity_select_with_paging() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let username = member.attr::<String>("username").unwrap();

        let statement = factory
            .select_from(&member)
            .order_by(username.desc())
            .unwrap()
            .offset(1)
            .limit(2)
            .to_sql()
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"member\".\"id\", \"member\".\"username\", \"member\".\"age\", \"member\".\"team_id\" \
             FROM \"member\" AS \"member\" \
             ORDER BY \"member\".\"username\" DESC NULLS FIRST LIMIT 2 OFFSET 1"
        );
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_association_join_and_parameters() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let team = factory.registry().path("Team").unwrap();
        let team_name = team.attr::<String>("name").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let statement = factory
            .select(age.clone())
            .from(&member)
            .unwrap()
            .left_join(&member.relation("team").unwrap(), &team)
            .unwrap()
            .on(team_name.eq("teamA"))
            .unwrap()
            .filter(age.gt(15))
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"member\".\"age\" FROM \"member\" AS \"member\" \
             LEFT JOIN \"team\" AS \"team\" ON (\"member\".\"team_id\" = \"team\".\"id\") AND (\"team\".\"name\" = $1) \
             WHERE \"member\".\"age\" > $2"
        );
        assert_eq!(statement.params, vec![Value::from("teamA"), Value::Int(15)]);
    }

    #[test]
    fn test_theta_join_renders_cross_join() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let team = factory.registry().path("Team").unwrap();
        let username = member.attr::<String>("username").unwrap();
        let team_name = team.attr::<String>("name").unwrap();

        let statement = factory
            .select_from(&member)
            .cross_join(&team)
            .unwrap()
            .filter(username.eq(&team_name))
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(statement.sql.contains(" CROSS JOIN \"team\" AS \"team\" WHERE \"member\".\"username\" = \"team\".\"name\""));
    }

    #[test]
    fn test_aggregate_casts() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let statement = factory
            .select_tuple([
                age.count().into_expr(),
                age.sum().into_expr(),
                age.avg().into_expr(),
                age.max().into_expr(),
            ])
            .from(&member)
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(\"member\".\"age\"), SUM(\"member\".\"age\")::bigint, \
             AVG(\"member\".\"age\")::float8, MAX(\"member\".\"age\") FROM \"member\" AS \"member\""
        );
    }

    #[test]
    fn test_grouped_count_wraps_subquery() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let team = factory.registry().path("Team").unwrap();
        let team_name = team.attr::<String>("name").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let state = factory
            .select_tuple([team_name.clone().into_expr(), age.avg().into_expr()])
            .from(&member)
            .unwrap()
            .join(&member.relation("team").unwrap(), &team)
            .unwrap()
            .group_by([team_name])
            .unwrap()
            .freeze()
            .unwrap();
        let statement = compile_count(&CountQuery::derive(&state)).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM (SELECT \"team\".\"name\" FROM \"member\" AS \"member\" \
             INNER JOIN \"team\" AS \"team\" ON \"member\".\"team_id\" = \"team\".\"id\" \
             GROUP BY \"team\".\"name\") AS \"counted\""
        );
    }

    #[test]
    fn test_empty_in_list_is_false() {
        let factory = factory();
        let member = factory.registry().path("Member").unwrap();
        let age = member.attr::<i64>("age").unwrap();

        let statement = factory
            .select_from(&member)
            .filter(age.in_list(Vec::<i64>::new()))
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(statement.sql.ends_with("WHERE FALSE"));
    }
}
