//! Result Hydration
//!
//! Backends return flat column rows laid out by [`RowLayout`]. Hydration folds
//! entity columns back into [`EntityRecord`]s, attaches fetch-joined
//! associations and hands typed rows to the caller.

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::error::{Clause, QueryError, QueryResult};
use crate::expr::{EntityPath, Expr, TypedExpr};
use crate::query::state::{JoinBasis, QueryState};
use crate::registry::{Cardinality, EntityDescriptor, RelationDescriptor, RelationSide, ScalarKind};
use crate::value::{ScalarType, Value};

/// Load state of one association on an entity record
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    /// Not materialized by the query that produced the record
    Unloaded,
    One(Option<Box<EntityRecord>>),
    Many(Vec<EntityRecord>),
}

impl Association {
    pub fn is_loaded(&self) -> bool {
        !matches!(self, Association::Unloaded)
    }
}

/// A hydrated entity instance, detached from any backend
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    entity: String,
    identity: String,
    attributes: Vec<(String, Value)>,
    associations: Vec<(String, Association)>,
}

impl EntityRecord {
    /// Build a record from attribute values in descriptor order
    pub fn new(descriptor: &EntityDescriptor, values: Vec<Value>) -> Self {
        let attributes: Vec<(String, Value)> = descriptor
            .attributes
            .iter()
            .map(|a| a.name.clone())
            .zip(values)
            .collect();

        let associations = descriptor
            .relations
            .iter()
            .map(|relation| {
                let state = match &relation.side {
                    // a null foreign key means there is nothing to load
                    RelationSide::Owning { join_column, .. }
                        if relation.cardinality == Cardinality::ToOne
                            && attributes
                                .iter()
                                .any(|(name, value)| name == join_column && value.is_null()) =>
                    {
                        Association::One(None)
                    }
                    _ => Association::Unloaded,
                };
                (relation.name.clone(), state)
            })
            .collect();

        Self {
            entity: descriptor.name.clone(),
            identity: descriptor.identity.clone(),
            attributes,
            associations,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn id(&self) -> &Value {
        self.get(&self.identity).unwrap_or(&Value::Null)
    }

    pub fn get(&self, attribute: &str) -> QueryResult<&Value> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, value)| value)
            .ok_or_else(|| QueryError::UnknownAttribute {
                entity: self.entity.clone(),
                attribute: attribute.to_string(),
            })
    }

    /// Typed attribute access; NULL yields `None`
    pub fn get_as<T: ScalarType>(&self, attribute: &str) -> QueryResult<Option<T>> {
        T::from_value(self.get(attribute)?.clone())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn association(&self, relation: &str) -> Option<&Association> {
        self.associations
            .iter()
            .find(|(name, _)| name == relation)
            .map(|(_, state)| state)
    }

    /// Whether the named association was materialized; unknown relations report false
    pub fn is_loaded(&self, relation: &str) -> bool {
        self.association(relation)
            .map(Association::is_loaded)
            .unwrap_or(false)
    }

    pub(crate) fn set_association(&mut self, relation: &str, state: Association) {
        if let Some((_, slot)) = self.associations.iter_mut().find(|(name, _)| name == relation) {
            *slot = state;
        }
    }

    /// Attributes plus every loaded association
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, value) in &self.attributes {
            map.insert(name.clone(), value.to_json());
        }
        for (name, state) in &self.associations {
            match state {
                Association::Unloaded => {}
                Association::One(None) => {
                    map.insert(name.clone(), JsonValue::Null);
                }
                Association::One(Some(record)) => {
                    map.insert(name.clone(), record.to_json());
                }
                Association::Many(records) => {
                    map.insert(
                        name.clone(),
                        JsonValue::Array(records.iter().map(EntityRecord::to_json).collect()),
                    );
                }
            }
        }
        JsonValue::Object(map)
    }
}

/// One projected item of a result row
#[derive(Debug, Clone)]
pub enum Slot {
    /// A single column; `None` for an untyped NULL literal
    Scalar(Option<ScalarKind>),
    /// Every attribute of the entity, in descriptor order
    Entity(Arc<EntityDescriptor>),
}

#[derive(Debug, Clone)]
struct FetchSlot {
    /// Selection index of the owning entity
    owner: usize,
    relation: RelationDescriptor,
    target: Arc<EntityDescriptor>,
}

/// Column layout shared by every backend: selection slots first, then one
/// block of target columns per fetch join
#[derive(Debug, Clone)]
pub struct RowLayout {
    slots: Vec<Slot>,
    fetches: Vec<FetchSlot>,
    columns: Vec<Expr>,
}

impl RowLayout {
    pub fn for_query(state: &QueryState) -> QueryResult<Self> {
        let mut slots = Vec::with_capacity(state.selection.len());
        let mut columns = Vec::new();

        for expr in &state.selection {
            match expr {
                Expr::Source(path) => {
                    columns.extend(entity_columns(path));
                    slots.push(Slot::Entity(path.entity().clone()));
                }
                other => {
                    columns.push(other.clone());
                    slots.push(Slot::Scalar(other.result_type().scalar()));
                }
            }
        }

        let mut fetches = Vec::new();
        for join in state.fetch_joins() {
            let (owner_alias, relation) = match &join.basis {
                JoinBasis::Association { owner, relation } => (owner, relation),
                JoinBasis::AdHoc => {
                    return Err(QueryError::InvalidFetchJoin {
                        join: join.to_string(),
                    })
                }
            };
            let owner = state
                .selection
                .iter()
                .position(|e| matches!(e, Expr::Source(p) if p.alias() == owner_alias.as_str()))
                .ok_or_else(|| {
                    QueryError::invalid_state(
                        Clause::Join(join.target.alias().to_string()),
                        format!("fetch join owner `{}` is not selected as an entity", owner_alias),
                    )
                })?;

            columns.extend(entity_columns(&join.target));
            fetches.push(FetchSlot {
                owner,
                relation: relation.clone(),
                target: join.target.entity().clone(),
            });
        }

        Ok(Self {
            slots,
            fetches,
            columns,
        })
    }

    /// Flat column expressions, in output order
    pub fn columns(&self) -> &[Expr] {
        &self.columns
    }

    pub fn column_kinds(&self) -> Vec<Option<ScalarKind>> {
        self.columns.iter().map(|c| c.result_type().scalar()).collect()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

fn entity_columns(path: &EntityPath) -> impl Iterator<Item = Expr> + '_ {
    path.entity()
        .attributes
        .iter()
        .map(move |attribute| Expr::Attribute {
            source: path.clone(),
            attribute: attribute.clone(),
        })
}

/// Take one entity's columns; a NULL identity means the source was unbound
fn take_entity(
    descriptor: &EntityDescriptor,
    columns: &mut impl Iterator<Item = Value>,
) -> Option<EntityRecord> {
    let values: Vec<Value> = columns.by_ref().take(descriptor.attributes.len()).collect();
    let bound = descriptor
        .identity_index()
        .and_then(|i| values.get(i))
        .map(|id| !id.is_null())
        .unwrap_or(false);
    bound.then(|| EntityRecord::new(descriptor, values))
}

/// Fold flat backend rows into result rows
pub fn hydrate(layout: &RowLayout, flat_rows: Vec<Vec<Value>>) -> QueryResult<Vec<Row>> {
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(flat_rows.len());
    // per fetch slot: owner identity -> collected targets (to-many only)
    let mut collected: Vec<Vec<(Value, Vec<EntityRecord>)>> = vec![Vec::new(); layout.fetches.len()];

    for flat in flat_rows {
        if flat.len() != layout.width() {
            return Err(QueryError::Decode(format!(
                "backend returned {} columns, expected {}",
                flat.len(),
                layout.width()
            )));
        }

        let mut columns = flat.into_iter();
        let mut values = Vec::with_capacity(layout.slots.len());
        for slot in &layout.slots {
            let value = match slot {
                Slot::Scalar(_) => columns.next().unwrap_or(Value::Null),
                Slot::Entity(descriptor) => take_entity(descriptor, &mut columns)
                    .map(|record| Value::Entity(Box::new(record)))
                    .unwrap_or(Value::Null),
            };
            values.push(value);
        }

        for (fetch, targets_by_owner) in layout.fetches.iter().zip(collected.iter_mut()) {
            let target = take_entity(&fetch.target, &mut columns);
            let Some(Value::Entity(owner)) = values.get_mut(fetch.owner) else {
                continue;
            };

            match fetch.relation.cardinality {
                Cardinality::ToOne => {
                    owner.set_association(
                        &fetch.relation.name,
                        Association::One(target.map(Box::new)),
                    );
                }
                Cardinality::ToMany => {
                    let owner_id = owner.id().clone();
                    let position = match targets_by_owner.iter().position(|(id, _)| *id == owner_id) {
                        Some(position) => position,
                        None => {
                            targets_by_owner.push((owner_id, Vec::new()));
                            targets_by_owner.len() - 1
                        }
                    };
                    let targets = &mut targets_by_owner[position].1;
                    if let Some(target) = target {
                        if !targets.iter().any(|t| t.id() == target.id()) {
                            targets.push(target);
                        }
                    }
                }
            }
        }

        rows.push(values);
    }

    for (fetch, targets_by_owner) in layout.fetches.iter().zip(&collected) {
        if fetch.relation.cardinality != Cardinality::ToMany {
            continue;
        }
        for values in &mut rows {
            if let Some(Value::Entity(owner)) = values.get_mut(fetch.owner) {
                let targets = targets_by_owner
                    .iter()
                    .find(|(id, _)| id == owner.id())
                    .map(|(_, targets)| targets.clone())
                    .unwrap_or_default();
                owner.set_association(&fetch.relation.name, Association::Many(targets));
            }
        }
    }

    Ok(rows.into_iter().map(Row::new).collect())
}

/// One result row, one value per selection item
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A multi-expression result row whose items are looked up by the
/// expression used to select them
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    selection: Arc<[Expr]>,
    values: Vec<Value>,
}

impl Tuple {
    fn position(&self, expr: &Expr) -> QueryResult<usize> {
        self.selection
            .iter()
            .position(|e| e == expr)
            .ok_or_else(|| {
                QueryError::invalid_state(
                    Clause::Select,
                    format!("`{}` is not part of the selection", expr),
                )
            })
    }

    pub fn get<T: ScalarType>(&self, expr: &TypedExpr<T>) -> QueryResult<Option<T>> {
        let index = self.position(expr.expr())?;
        T::from_value(self.values[index].clone())
    }

    /// The entity projected for `path`; `None` when its source was unbound
    pub fn entity(&self, path: &EntityPath) -> QueryResult<Option<&EntityRecord>> {
        let index = self.position(&Expr::Source(path.clone()))?;
        Ok(self.values[index].as_entity())
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Conversion from a hydrated row into a query's result type
pub trait FromRow: Sized {
    fn from_row(row: Row, selection: &Arc<[Expr]>) -> QueryResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: Row, _selection: &Arc<[Expr]>) -> QueryResult<Self> {
        Ok(row)
    }
}

impl FromRow for Tuple {
    fn from_row(row: Row, selection: &Arc<[Expr]>) -> QueryResult<Self> {
        Ok(Tuple {
            selection: selection.clone(),
            values: row.values,
        })
    }
}

fn single(row: Row, selection: &Arc<[Expr]>) -> QueryResult<Value> {
    if row.values.len() != 1 {
        return Err(QueryError::Decode(format!(
            "expected a single-item row, got {} items",
            row.values.len()
        )));
    }
    let column = selection
        .first()
        .map(|e| e.to_string())
        .unwrap_or_default();
    row.values
        .into_iter()
        .next()
        .ok_or(QueryError::UnexpectedNull { column })
}

impl FromRow for EntityRecord {
    fn from_row(row: Row, selection: &Arc<[Expr]>) -> QueryResult<Self> {
        match single(row, selection)? {
            Value::Entity(record) => Ok(*record),
            Value::Null => Err(QueryError::UnexpectedNull {
                column: selection
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            }),
            other => Err(QueryError::Decode(format!(
                "expected an entity, found {}",
                other
            ))),
        }
    }
}

impl FromRow for Option<EntityRecord> {
    fn from_row(row: Row, selection: &Arc<[Expr]>) -> QueryResult<Self> {
        match single(row, selection)? {
            Value::Entity(record) => Ok(Some(*record)),
            Value::Null => Ok(None),
            other => Err(QueryError::Decode(format!(
                "expected an entity, found {}",
                other
            ))),
        }
    }
}

impl<T: ScalarType> FromRow for Option<T> {
    fn from_row(row: Row, selection: &Arc<[Expr]>) -> QueryResult<Self> {
        T::from_value(single(row, selection)?)
    }
}
