//! Entity and relation paths - the roots every attribute reference hangs off

use std::fmt;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::registry::{EntityDescriptor, RelationDescriptor};
use crate::value::ScalarType;

use super::typed::TypedExpr;
use super::{AggregateFn, Expr};

/// An entity type bound to a query alias
#[derive(Debug, Clone)]
pub struct EntityPath {
    alias: String,
    entity: Arc<EntityDescriptor>,
}

impl PartialEq for EntityPath {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias && self.entity.name == other.entity.name
    }
}

impl EntityPath {
    pub fn new(entity: Arc<EntityDescriptor>, alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            entity,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    /// The same entity under another alias
    pub fn aliased(&self, alias: impl Into<String>) -> Self {
        Self::new(self.entity.clone(), alias)
    }

    /// Untyped attribute reference, failing with `UnknownAttribute`
    pub fn attribute(&self, name: &str) -> QueryResult<Expr> {
        let attribute = self.entity.attr(name)?.clone();
        Ok(Expr::Attribute {
            source: self.clone(),
            attribute,
        })
    }

    /// Typed attribute reference; the declared kind must match `T`
    pub fn attr<T: ScalarType>(&self, name: &str) -> QueryResult<TypedExpr<T>> {
        let attribute = self.entity.attr(name)?;
        if attribute.kind != T::KIND {
            return Err(QueryError::TypeMismatch {
                context: format!("{}.{}", self.alias, name),
                expected: T::KIND.to_string(),
                found: attribute.kind.to_string(),
            });
        }
        Ok(TypedExpr::new_unchecked(self.attribute(name)?))
    }

    /// A declared relation navigable from this alias
    pub fn relation(&self, name: &str) -> QueryResult<RelationPath> {
        Ok(RelationPath {
            owner: self.clone(),
            relation: self.entity.rel(name)?.clone(),
        })
    }

    /// Number of rows in which this source is bound (non-null identity)
    pub fn count(&self) -> TypedExpr<i64> {
        TypedExpr::new_unchecked(Expr::aggregate_unchecked(
            AggregateFn::Count,
            Expr::Source(self.clone()),
            false,
        ))
    }

    pub fn expr(&self) -> Expr {
        Expr::Source(self.clone())
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity.name, self.alias)
    }
}

/// A declared relation, navigated from a specific owner alias
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPath {
    owner: EntityPath,
    relation: RelationDescriptor,
}

impl RelationPath {
    pub fn owner(&self) -> &EntityPath {
        &self.owner
    }

    pub fn relation(&self) -> &RelationDescriptor {
        &self.relation
    }
}

impl fmt::Display for RelationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner.alias, self.relation.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member_team;

    #[test]
    fn test_typed_attribute_kind_checked() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();

        assert!(member.attr::<i64>("age").is_ok());
        assert!(matches!(
            member.attr::<String>("age"),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            member.attr::<i64>("height"),
            Err(QueryError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_relation_lookup() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();

        let team = member.relation("team").unwrap();
        assert_eq!(team.to_string(), "member.team");
        assert_eq!(team.relation().target, "Team");
        assert!(matches!(
            member.relation("club"),
            Err(QueryError::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_aliases_distinguish_paths() {
        let registry = member_team::registry().unwrap();
        let member = registry.path("Member").unwrap();
        let other = member.aliased("m2");
        assert_ne!(member, other);
        assert_eq!(other.entity().name, "Member");
    }
}
