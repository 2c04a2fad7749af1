//! Entity descriptors - static metadata for entity types, attributes and relations

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Scalar kind of an attribute or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
}

impl ScalarKind {
    /// Returns true if arithmetic aggregates (`sum`, `avg`) accept this kind
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Text => "text",
            ScalarKind::Uuid => "uuid",
            ScalarKind::Timestamp => "timestamp",
        };
        write!(f, "{}", name)
    }
}

/// A typed attribute of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    /// Storage column; defaults to the attribute name
    #[serde(default)]
    pub column: String,
    pub kind: ScalarKind,
    #[serde(default)]
    pub nullable: bool,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

/// Whether a relation points at one or many targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// Which side of a relation holds the foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "snake_case")]
pub enum RelationSide {
    /// This entity stores `join_column`, referencing `referenced` on the target
    Owning {
        join_column: String,
        #[serde(default = "default_identity")]
        referenced: String,
    },
    /// Back-reference mapped by an owning relation on the target
    Inverse { mapped_by: String },
}

/// A declared, navigable relation between two entity types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    #[serde(flatten)]
    pub side: RelationSide,
}

impl RelationDescriptor {
    /// Owning to-one relation (e.g. `Member.team` stored in `team_id`)
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToOne,
            side: RelationSide::Owning {
                join_column: join_column.into(),
                referenced: default_identity(),
            },
        }
    }

    /// Inverse to-many back-reference (e.g. `Team.members` mapped by `Member.team`)
    pub fn to_many_inverse(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToMany,
            side: RelationSide::Inverse {
                mapped_by: mapped_by.into(),
            },
        }
    }

    pub fn is_owning(&self) -> bool {
        matches!(self.side, RelationSide::Owning { .. })
    }
}

/// Static description of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    #[serde(default = "default_identity")]
    pub identity: String,
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            identity: default_identity(),
            attributes: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up an attribute, failing with `UnknownAttribute`
    pub fn attr(&self, name: &str) -> QueryResult<&AttributeDescriptor> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| QueryError::UnknownAttribute {
                entity: self.name.clone(),
                attribute: name.to_string(),
            })
    }

    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Look up a relation, failing with `UnknownRelation`
    pub fn rel(&self, name: &str) -> QueryResult<&RelationDescriptor> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| QueryError::UnknownRelation {
                entity: self.name.clone(),
                relation: name.to_string(),
            })
    }

    pub fn identity_attr(&self) -> QueryResult<&AttributeDescriptor> {
        self.attr(&self.identity)
    }

    pub fn identity_index(&self) -> Option<usize> {
        self.attr_index(&self.identity)
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        if self.name.is_empty() || self.table.is_empty() {
            return Err(QueryError::InvalidModel(
                "entity name and table must not be empty".to_string(),
            ));
        }

        for (i, attribute) in self.attributes.iter().enumerate() {
            if self.attributes[..i].iter().any(|a| a.name == attribute.name) {
                return Err(QueryError::InvalidModel(format!(
                    "entity '{}' declares attribute '{}' twice",
                    self.name, attribute.name
                )));
            }
        }

        let identity = self.identity_attr().map_err(|_| {
            QueryError::InvalidModel(format!(
                "entity '{}' has no identity attribute '{}'",
                self.name, self.identity
            ))
        })?;
        if identity.nullable {
            return Err(QueryError::InvalidModel(format!(
                "identity '{}.{}' cannot be nullable",
                self.name, self.identity
            )));
        }

        Ok(())
    }
}

fn default_identity() -> String {
    "id".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> EntityDescriptor {
        EntityDescriptor::new("Member", "member")
            .attribute(AttributeDescriptor::new("id", ScalarKind::Int))
            .attribute(AttributeDescriptor::new("username", ScalarKind::Text).nullable())
            .attribute(AttributeDescriptor::new("team_id", ScalarKind::Int).nullable())
            .relation(RelationDescriptor::to_one("team", "Team", "team_id"))
    }

    #[test]
    fn test_attribute_lookup() {
        let member = member();
        assert_eq!(member.attr("username").unwrap().column, "username");
        assert!(member.attr("username").unwrap().nullable);
        assert!(matches!(
            member.attr("nickname"),
            Err(QueryError::UnknownAttribute { ref attribute, .. }) if attribute == "nickname"
        ));
    }

    #[test]
    fn test_identity_must_exist() {
        let entity = EntityDescriptor::new("Orphan", "orphan")
            .attribute(AttributeDescriptor::new("code", ScalarKind::Text));
        assert!(matches!(entity.validate(), Err(QueryError::InvalidModel(_))));
        assert!(entity.with_identity("code").validate().is_ok());
    }

    #[test]
    fn test_relation_deserializes_flattened_side() {
        let json = r#"{"name":"team","target":"Team","cardinality":"to_one","side":"owning","join_column":"team_id"}"#;
        let relation: RelationDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(relation, RelationDescriptor::to_one("team", "Team", "team_id"));
    }
}
