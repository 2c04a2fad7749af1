//! Statically typed expression facade
//!
//! `TypedExpr<T>` wraps an [`Expr`] whose result kind is known to be `T`'s
//! kind, so comparisons, aggregates and boolean combinators only accept
//! operands of the matching Rust type.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{QueryError, QueryResult};
use crate::value::{Numeric, ScalarType};

use super::ordering::{Direction, OrderSpecifier};
use super::{AggregateFn, BinaryOp, Expr, ExprType, UnaryOp};

/// Anything usable as the right-hand side of an operator on `TypedExpr<T>`
pub trait Operand<T> {
    fn into_operand(self) -> Expr;
}

impl<T: ScalarType> Operand<T> for T {
    fn into_operand(self) -> Expr {
        Expr::Literal(self.into_value())
    }
}

impl Operand<String> for &str {
    fn into_operand(self) -> Expr {
        Expr::literal(self)
    }
}

impl Operand<i64> for i32 {
    fn into_operand(self) -> Expr {
        Expr::literal(self)
    }
}

impl<T> Operand<T> for TypedExpr<T> {
    fn into_operand(self) -> Expr {
        self.expr
    }
}

impl<T> Operand<T> for &TypedExpr<T> {
    fn into_operand(self) -> Expr {
        self.expr.clone()
    }
}

/// An expression statically known to produce values of type `T`
pub struct TypedExpr<T> {
    expr: Expr,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedExpr<T> {
    fn clone(&self) -> Self {
        Self::new_unchecked(self.expr.clone())
    }
}

impl<T> PartialEq for TypedExpr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl<T> fmt::Debug for TypedExpr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedExpr").field(&self.expr).finish()
    }
}

impl<T> fmt::Display for TypedExpr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

impl<T> TypedExpr<T> {
    pub(crate) fn new_unchecked(expr: Expr) -> Self {
        Self {
            expr,
            _type: PhantomData,
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }
}

impl<T: ScalarType> TypedExpr<T> {
    /// Wrap an untyped expression after checking its result kind
    pub fn try_from_expr(expr: Expr) -> QueryResult<Self> {
        match expr.result_type() {
            ExprType::Scalar(kind) if kind == T::KIND => Ok(Self::new_unchecked(expr)),
            ExprType::Null => Ok(Self::new_unchecked(expr)),
            found => Err(QueryError::TypeMismatch {
                context: format!("`{}`", expr),
                expected: T::KIND.to_string(),
                found: found.to_string(),
            }),
        }
    }

    pub fn literal(value: T) -> Self {
        Self::new_unchecked(Expr::Literal(value.into_value()))
    }

    fn compare(&self, op: BinaryOp, rhs: impl Operand<T>) -> TypedExpr<bool> {
        TypedExpr::new_unchecked(Expr::binary_unchecked(
            op,
            self.expr.clone(),
            rhs.into_operand(),
        ))
    }

    pub fn eq(&self, rhs: impl Operand<T>) -> TypedExpr<bool> {
        self.compare(BinaryOp::Eq, rhs)
    }

    pub fn ne(&self, rhs: impl Operand<T>) -> TypedExpr<bool> {
        self.compare(BinaryOp::Ne, rhs)
    }

    pub fn lt(&self, rhs: impl Operand<T>) -> TypedExpr<bool> {
        self.compare(BinaryOp::Lt, rhs)
    }

    pub fn loe(&self, rhs: impl Operand<T>) -> TypedExpr<bool> {
        self.compare(BinaryOp::Le, rhs)
    }

    pub fn gt(&self, rhs: impl Operand<T>) -> TypedExpr<bool> {
        self.compare(BinaryOp::Gt, rhs)
    }

    pub fn goe(&self, rhs: impl Operand<T>) -> TypedExpr<bool> {
        self.compare(BinaryOp::Ge, rhs)
    }

    /// Inclusive range check
    pub fn between(&self, low: impl Operand<T>, high: impl Operand<T>) -> TypedExpr<bool> {
        self.goe(low).and(self.loe(high))
    }

    pub fn in_list<I>(&self, values: I) -> TypedExpr<bool>
    where
        I: IntoIterator,
        I::Item: Operand<T>,
    {
        TypedExpr::new_unchecked(Expr::InList {
            operand: Box::new(self.expr.clone()),
            list: values.into_iter().map(Operand::into_operand).collect(),
        })
    }

    pub fn is_null(&self) -> TypedExpr<bool> {
        TypedExpr::new_unchecked(Expr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self.expr.clone()),
        })
    }

    pub fn is_not_null(&self) -> TypedExpr<bool> {
        TypedExpr::new_unchecked(Expr::Unary {
            op: UnaryOp::IsNotNull,
            operand: Box::new(self.expr.clone()),
        })
    }

    pub fn asc(&self) -> OrderSpecifier {
        OrderSpecifier::new(self.expr.clone(), Direction::Asc)
    }

    pub fn desc(&self) -> OrderSpecifier {
        OrderSpecifier::new(self.expr.clone(), Direction::Desc)
    }

    fn aggregate<R>(&self, func: AggregateFn, distinct: bool) -> TypedExpr<R> {
        TypedExpr::new_unchecked(Expr::aggregate_unchecked(func, self.expr.clone(), distinct))
    }

    /// Number of non-null values
    pub fn count(&self) -> TypedExpr<i64> {
        self.aggregate(AggregateFn::Count, false)
    }

    pub fn count_distinct(&self) -> TypedExpr<i64> {
        self.aggregate(AggregateFn::Count, true)
    }

    pub fn max(&self) -> TypedExpr<T> {
        self.aggregate(AggregateFn::Max, false)
    }

    pub fn min(&self) -> TypedExpr<T> {
        self.aggregate(AggregateFn::Min, false)
    }
}

impl<T: Numeric> TypedExpr<T> {
    pub fn sum(&self) -> TypedExpr<T> {
        self.aggregate(AggregateFn::Sum, false)
    }

    pub fn avg(&self) -> TypedExpr<f64> {
        self.aggregate(AggregateFn::Avg, false)
    }
}

impl TypedExpr<String> {
    /// SQL `LIKE` with `%` and `_` wildcards
    pub fn like(&self, pattern: &str) -> TypedExpr<bool> {
        self.compare(BinaryOp::Like, pattern)
    }

    pub fn contains(&self, fragment: &str) -> TypedExpr<bool> {
        self.like(&format!("%{}%", fragment))
    }

    pub fn starts_with(&self, prefix: &str) -> TypedExpr<bool> {
        self.like(&format!("{}%", prefix))
    }
}

impl TypedExpr<bool> {
    pub fn and(self, rhs: TypedExpr<bool>) -> TypedExpr<bool> {
        TypedExpr::new_unchecked(Expr::binary_unchecked(BinaryOp::And, self.expr, rhs.expr))
    }

    pub fn or(self, rhs: TypedExpr<bool>) -> TypedExpr<bool> {
        TypedExpr::new_unchecked(Expr::binary_unchecked(BinaryOp::Or, self.expr, rhs.expr))
    }

    pub fn not(self) -> TypedExpr<bool> {
        TypedExpr::new_unchecked(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self.expr),
        })
    }
}

impl<T> From<TypedExpr<T>> for Expr {
    fn from(typed: TypedExpr<T>) -> Self {
        typed.expr
    }
}

impl<T> From<&TypedExpr<T>> for Expr {
    fn from(typed: &TypedExpr<T>) -> Self {
        typed.expr.clone()
    }
}
