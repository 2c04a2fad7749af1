//! Entity Model Registry - write-once description of entity types
//!
//! The registry is assembled once at startup, either programmatically through
//! [`RegistryBuilder`] or from a JSON definition, validated as a whole, and
//! then shared read-only (usually behind an `Arc`) by every query.

pub mod descriptor;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{QueryError, QueryResult};
use crate::expr::{EntityPath, Expr};

pub use descriptor::{
    AttributeDescriptor, Cardinality, EntityDescriptor, RelationDescriptor, RelationSide,
    ScalarKind,
};

/// Immutable lookup of entity descriptors by name
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Load a registry from `{"entities": [...]}` JSON
    pub fn from_json(json: &str) -> QueryResult<Self> {
        #[derive(Deserialize)]
        struct Definition {
            entities: Vec<EntityDescriptor>,
        }

        let definition: Definition = serde_json::from_str(json)?;
        definition
            .entities
            .into_iter()
            .fold(RegistryBuilder::default(), RegistryBuilder::entity)
            .build()
    }

    /// Describe an entity type, failing with `UnknownEntity`
    pub fn describe(&self, entity: &str) -> QueryResult<Arc<EntityDescriptor>> {
        self.entities
            .get(entity)
            .cloned()
            .ok_or_else(|| QueryError::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Path for an entity under its default alias (lowercased entity name)
    pub fn path(&self, entity: &str) -> QueryResult<EntityPath> {
        let descriptor = self.describe(entity)?;
        let alias = descriptor.name.to_lowercase();
        Ok(EntityPath::new(descriptor, alias))
    }

    /// Path for an entity under an explicit alias
    pub fn path_as(&self, entity: &str, alias: &str) -> QueryResult<EntityPath> {
        Ok(EntityPath::new(self.describe(entity)?, alias))
    }

    /// Untyped attribute reference on the entity's default alias
    pub fn attribute(&self, entity: &str, attribute: &str) -> QueryResult<Expr> {
        self.path(entity)?.attribute(attribute)
    }

    fn validate_relations(&self, entity: &EntityDescriptor) -> QueryResult<()> {
        for relation in &entity.relations {
            let target = self.describe(&relation.target).map_err(|_| {
                QueryError::InvalidModel(format!(
                    "relation '{}.{}' targets unregistered entity '{}'",
                    entity.name, relation.name, relation.target
                ))
            })?;

            match &relation.side {
                RelationSide::Owning {
                    join_column,
                    referenced,
                } => {
                    let local = entity.attr(join_column).map_err(model_error)?;
                    let remote = target.attr(referenced).map_err(model_error)?;
                    if local.kind != remote.kind {
                        return Err(QueryError::InvalidModel(format!(
                            "relation '{}.{}' joins {} column '{}' to {} column '{}.{}'",
                            entity.name,
                            relation.name,
                            local.kind,
                            join_column,
                            remote.kind,
                            target.name,
                            referenced
                        )));
                    }
                }
                RelationSide::Inverse { mapped_by } => {
                    let owning = target.rel(mapped_by).map_err(model_error)?;
                    if !owning.is_owning()
                        || owning.cardinality != Cardinality::ToOne
                        || owning.target != entity.name
                    {
                        return Err(QueryError::InvalidModel(format!(
                            "relation '{}.{}' must be mapped by an owning to-one relation on '{}' targeting '{}'",
                            entity.name, relation.name, target.name, entity.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn model_error(err: QueryError) -> QueryError {
    QueryError::InvalidModel(err.to_string())
}

/// Collects entity descriptors and validates them together
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDescriptor>,
}

impl RegistryBuilder {
    pub fn entity(mut self, mut entity: EntityDescriptor) -> Self {
        for attribute in &mut entity.attributes {
            if attribute.column.is_empty() {
                attribute.column = attribute.name.clone();
            }
        }
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> QueryResult<EntityRegistry> {
        let mut registry = EntityRegistry::default();

        for entity in self.entities {
            entity.validate()?;
            if registry.entities.contains_key(&entity.name) {
                return Err(QueryError::InvalidModel(format!(
                    "entity '{}' registered twice",
                    entity.name
                )));
            }
            registry
                .entities
                .insert(entity.name.clone(), Arc::new(entity));
        }

        for entity in registry.entities.values() {
            registry.validate_relations(entity)?;
        }

        tracing::debug!(
            "Entity registry built with {} entities",
            registry.entities.len()
        );
        Ok(registry)
    }
}
