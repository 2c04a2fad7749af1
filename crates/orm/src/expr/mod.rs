//! Typed Expression Algebra
//!
//! [`Expr`] is the closed set of expression nodes every query is made of. Nodes
//! are immutable values; building one never touches a backend and the same
//! tree can be reused across any number of builders. The checked constructors
//! on `Expr` validate operand types at runtime, while [`TypedExpr`] carries the
//! scalar type in the Rust type system so the same mistakes fail to compile.

pub mod ordering;
pub mod path;
pub mod typed;

use std::fmt;

use crate::error::{Clause, QueryError, QueryResult};
use crate::registry::{AttributeDescriptor, ScalarKind};
use crate::value::Value;

pub use ordering::{Direction, NullPlacement, OrderSpecifier};
pub use path::{EntityPath, RelationPath};
pub use typed::{Operand, TypedExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFn {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Max => "MAX",
            AggregateFn::Min => "MIN",
        }
    }
}

/// Static result type of an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprType {
    Scalar(ScalarKind),
    /// A whole entity of the named type
    Entity(String),
    /// The NULL literal, compatible with every scalar kind
    Null,
}

impl ExprType {
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            ExprType::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    fn compatible_with(&self, other: &ExprType) -> bool {
        match (self, other) {
            (ExprType::Null, ExprType::Scalar(_)) | (ExprType::Scalar(_), ExprType::Null) => true,
            (ExprType::Scalar(a), ExprType::Scalar(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Scalar(kind) => write!(f, "{}", kind),
            ExprType::Entity(name) => write!(f, "entity {}", name),
            ExprType::Null => write!(f, "null"),
        }
    }
}

/// An expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `alias.attribute`
    Attribute {
        source: EntityPath,
        attribute: AttributeDescriptor,
    },
    /// A whole entity source, used for entity projection and entity counts
    Source(EntityPath),
    Literal(Value),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    InList {
        operand: Box<Expr>,
        list: Vec<Expr>,
    },
    /// `arg = None` is `COUNT(*)`
    Aggregate {
        func: AggregateFn,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Row count over the whole source set
    pub fn count_all() -> Self {
        Expr::Aggregate {
            func: AggregateFn::Count,
            arg: None,
            distinct: false,
        }
    }

    pub fn result_type(&self) -> ExprType {
        match self {
            Expr::Attribute { attribute, .. } => ExprType::Scalar(attribute.kind),
            Expr::Source(path) => ExprType::Entity(path.entity().name.clone()),
            Expr::Literal(Value::Entity(record)) => ExprType::Entity(record.entity().to_string()),
            Expr::Literal(value) => value.kind().map(ExprType::Scalar).unwrap_or(ExprType::Null),
            Expr::Unary { .. } | Expr::Binary { .. } | Expr::InList { .. } => {
                ExprType::Scalar(ScalarKind::Bool)
            }
            Expr::Aggregate { func, arg, .. } => match func {
                AggregateFn::Count => ExprType::Scalar(ScalarKind::Int),
                AggregateFn::Avg => ExprType::Scalar(ScalarKind::Float),
                AggregateFn::Sum | AggregateFn::Max | AggregateFn::Min => arg
                    .as_ref()
                    .map(|a| a.result_type())
                    .unwrap_or(ExprType::Null),
            },
        }
    }

    /// Checked binary operator construction
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> QueryResult<Self> {
        let (lt, rt) = (left.result_type(), right.result_type());
        let context = || format!("`{} {} {}`", left, op.symbol(), right);

        let expected = match op {
            BinaryOp::And | BinaryOp::Or => Some(ExprType::Scalar(ScalarKind::Bool)),
            BinaryOp::Like => Some(ExprType::Scalar(ScalarKind::Text)),
            _ => None,
        };

        match expected {
            Some(expected) => {
                for side in [&lt, &rt] {
                    if !side.compatible_with(&expected) {
                        return Err(QueryError::TypeMismatch {
                            context: context(),
                            expected: expected.to_string(),
                            found: side.to_string(),
                        });
                    }
                }
            }
            None => {
                if !lt.compatible_with(&rt) {
                    return Err(QueryError::TypeMismatch {
                        context: context(),
                        expected: lt.to_string(),
                        found: rt.to_string(),
                    });
                }
            }
        }

        Ok(Self::binary_unchecked(op, left, right))
    }

    pub(crate) fn binary_unchecked(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expr) -> QueryResult<Self> {
        Self::binary(BinaryOp::Eq, self, other)
    }

    pub fn and(self, other: Expr) -> QueryResult<Self> {
        Self::binary(BinaryOp::And, self, other)
    }

    /// Conjoin two optional predicates
    pub(crate) fn conjoin(left: Option<Expr>, right: Option<Expr>) -> Option<Expr> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Self::binary_unchecked(BinaryOp::And, l, r)),
            (l, r) => l.or(r),
        }
    }

    /// Checked unary operator construction
    pub fn unary(op: UnaryOp, operand: Expr) -> QueryResult<Self> {
        if op == UnaryOp::Not {
            let found = operand.result_type();
            if !found.compatible_with(&ExprType::Scalar(ScalarKind::Bool)) {
                return Err(QueryError::TypeMismatch {
                    context: format!("`not {}`", operand),
                    expected: ScalarKind::Bool.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Checked `IN (...)` construction
    pub fn in_list(operand: Expr, list: Vec<Expr>) -> QueryResult<Self> {
        let expected = operand.result_type();
        for item in &list {
            if !expected.compatible_with(&item.result_type()) {
                return Err(QueryError::TypeMismatch {
                    context: format!("`{} in (...)`", operand),
                    expected: expected.to_string(),
                    found: item.result_type().to_string(),
                });
            }
        }
        Ok(Expr::InList {
            operand: Box::new(operand),
            list,
        })
    }

    /// Checked aggregate construction
    pub fn aggregate(func: AggregateFn, arg: Expr, distinct: bool) -> QueryResult<Self> {
        if arg.contains_aggregate() {
            return Err(QueryError::invalid_state(
                Clause::Select,
                format!("aggregate `{}` cannot be nested inside {}", arg, func.name()),
            ));
        }

        let found = arg.result_type();
        let accepted = match func {
            AggregateFn::Count => true,
            AggregateFn::Sum | AggregateFn::Avg => {
                found.scalar().map(ScalarKind::is_numeric).unwrap_or(false)
            }
            AggregateFn::Max | AggregateFn::Min => found.scalar().is_some(),
        };
        if !accepted {
            return Err(QueryError::TypeMismatch {
                context: format!("{}({})", func.name(), arg),
                expected: if matches!(func, AggregateFn::Sum | AggregateFn::Avg) {
                    "numeric".to_string()
                } else {
                    "scalar".to_string()
                },
                found: found.to_string(),
            });
        }

        Ok(Self::aggregate_unchecked(func, arg, distinct))
    }

    pub(crate) fn aggregate_unchecked(func: AggregateFn, arg: Expr, distinct: bool) -> Self {
        Expr::Aggregate {
            func,
            arg: Some(Box::new(arg)),
            distinct,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
    }

    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Direct sub-expressions
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Attribute { .. } | Expr::Source(_) | Expr::Literal(_) => Vec::new(),
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::InList { operand, list } => {
                let mut children = vec![operand.as_ref()];
                children.extend(list.iter());
                children
            }
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
        }
    }

    /// Every source alias the expression references
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases = Vec::new();
        self.collect_aliases(&mut aliases);
        aliases
    }

    fn collect_aliases<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Attribute { source, .. } | Expr::Source(source) => {
                if !out.contains(&source.alias()) {
                    out.push(source.alias());
                }
            }
            other => {
                for child in other.children() {
                    child.collect_aliases(out);
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Attribute { source, attribute } => {
                write!(f, "{}.{}", source.alias(), attribute.name)
            }
            Expr::Source(source) => write!(f, "{}", source.alias()),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "not ({})", operand),
                UnaryOp::IsNull => write!(f, "{} is null", operand),
                UnaryOp::IsNotNull => write!(f, "{} is not null", operand),
            },
            Expr::Binary { op, left, right } if op.is_logical() => {
                write!(f, "({} {} {})", left, op.symbol().to_lowercase(), right)
            }
            Expr::Binary { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol().to_lowercase(), right)
            }
            Expr::InList { operand, list } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(f, "{} in ({})", operand, items.join(", "))
            }
            Expr::Aggregate { func, arg, distinct } => {
                let name = func.name().to_lowercase();
                match arg {
                    None => write!(f, "{}(*)", name),
                    Some(arg) if *distinct => write!(f, "{}(distinct {})", name, arg),
                    Some(arg) => write!(f, "{}({})", name, arg),
                }
            }
        }
    }
}

impl From<&EntityPath> for Expr {
    fn from(path: &EntityPath) -> Self {
        Expr::Source(path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member_team;

    #[test]
    fn test_equality_requires_same_kind() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();

        let username = member.attribute("username").unwrap();
        let age = member.attribute("age").unwrap();

        assert!(username.clone().eq(Expr::literal("member1")).is_ok());
        assert!(matches!(
            username.eq(age),
            Err(QueryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_aggregate_typing() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let age = member.attribute("age").unwrap();
        let username = member.attribute("username").unwrap();

        let avg = Expr::aggregate(AggregateFn::Avg, age.clone(), false).unwrap();
        assert_eq!(avg.result_type(), ExprType::Scalar(ScalarKind::Float));
        let sum = Expr::aggregate(AggregateFn::Sum, age.clone(), false).unwrap();
        assert_eq!(sum.result_type(), ExprType::Scalar(ScalarKind::Int));
        let max = Expr::aggregate(AggregateFn::Max, username.clone(), false).unwrap();
        assert_eq!(max.result_type(), ExprType::Scalar(ScalarKind::Text));

        assert!(matches!(
            Expr::aggregate(AggregateFn::Sum, username, false),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(Expr::aggregate(AggregateFn::Max, avg, false).is_err());
    }

    #[test]
    fn test_aliases_and_display() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let team = registry.path("Team").unwrap();

        let predicate = member
            .attribute("username")
            .unwrap()
            .eq(team.attribute("name").unwrap())
            .unwrap()
            .and(member.attribute("age").unwrap().eq(Expr::literal(10)).unwrap())
            .unwrap();

        assert_eq!(predicate.aliases(), vec!["member", "team"]);
        assert_eq!(
            predicate.to_string(),
            "(member.username = team.name and member.age = 10)"
        );
        assert!(!predicate.contains_aggregate());
    }

    #[test]
    fn test_conjoin_optional_predicates() {
        let a = Expr::literal(true);
        assert_eq!(Expr::conjoin(None, Some(a.clone())), Some(a.clone()));
        assert_eq!(Expr::conjoin(None, None), None);
        assert!(matches!(
            Expr::conjoin(Some(a.clone()), Some(a)),
            Some(Expr::Binary { op: BinaryOp::And, .. })
        ));
    }
}
