//! Ordering decorators: direction and null placement

use std::cmp::Ordering;
use std::fmt;

use crate::value::Value;

use super::Expr;

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "ASC"),
            Direction::Desc => write!(f, "DESC"),
        }
    }
}

/// Where NULL sort keys go, independent of direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPlacement {
    First,
    Last,
}

impl fmt::Display for NullPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullPlacement::First => write!(f, "NULLS FIRST"),
            NullPlacement::Last => write!(f, "NULLS LAST"),
        }
    }
}

/// An expression wrapped with a direction and optional null placement.
/// Placement left unspecified is resolved from `QueryConfig` when the key is
/// added to a builder.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpecifier {
    expr: Expr,
    direction: Direction,
    nulls: Option<NullPlacement>,
}

impl OrderSpecifier {
    pub fn new(expr: Expr, direction: Direction) -> Self {
        Self {
            expr,
            direction,
            nulls: None,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = Some(NullPlacement::First);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullPlacement::Last);
        self
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn nulls(&self) -> Option<NullPlacement> {
        self.nulls
    }

    pub(crate) fn resolve(self, default: NullPlacement) -> OrderKey {
        OrderKey {
            expr: self.expr,
            direction: self.direction,
            nulls: self.nulls.unwrap_or(default),
        }
    }
}

/// A fully resolved order key as stored in a frozen query
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: Expr,
    pub direction: Direction,
    pub nulls: NullPlacement,
}

impl OrderKey {
    /// Compare two sort values under this key. Direction only flips the
    /// order of non-null values; nulls stay where the placement puts them.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match self.nulls {
                NullPlacement::First => Ordering::Less,
                NullPlacement::Last => Ordering::Greater,
            },
            (false, true) => match self.nulls {
                NullPlacement::First => Ordering::Greater,
                NullPlacement::Last => Ordering::Less,
            },
            (false, false) => {
                let ordering = a.compare(b).unwrap_or(Ordering::Equal);
                match self.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            }
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.expr, self.direction, self.nulls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(direction: Direction, nulls: NullPlacement) -> OrderKey {
        OrderSpecifier::new(Expr::literal(0), direction).resolve(nulls)
    }

    #[test]
    fn test_nulls_last_survives_descending() {
        let key = key(Direction::Desc, NullPlacement::Last);
        assert_eq!(key.compare(&Value::Null, &Value::Int(1)), Ordering::Greater);
        assert_eq!(key.compare(&Value::Int(2), &Value::Int(1)), Ordering::Less);
    }

    #[test]
    fn test_nulls_first_ascending() {
        let key = key(Direction::Asc, NullPlacement::First);
        assert_eq!(key.compare(&Value::Null, &Value::Text("a".into())), Ordering::Less);
        assert_eq!(key.compare(&Value::Null, &Value::Null), Ordering::Equal);
    }

    #[test]
    fn test_explicit_placement_wins_over_default() {
        let key = OrderSpecifier::new(Expr::literal(0), Direction::Asc)
            .nulls_last()
            .resolve(NullPlacement::First);
        assert_eq!(key.nulls, NullPlacement::Last);
    }
}
