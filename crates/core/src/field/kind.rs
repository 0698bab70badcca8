//! Runtime dispatch over the field variants, keyed by a `type` discriminant.
//!
//! Schemas, states, updates, changes and patches for every variant share a
//! single enum each, holding JSON values, so a datastore can keep
//! heterogeneous fields side by side and ship them over the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CoreError;
use crate::field::{
    Field, ListChange, ListField, ListMetadata, ListPatch, ListSplice, MapChange, MapField,
    MapMetadata, MapPatch, ValueChange, ValueField, ValueMetadata, ValuePatch,
};
use crate::ids::StoreId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Value,
    Map,
    List,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Map => "map",
            Self::List => "list",
        }
    }
}

fn mismatch(expected: FieldKind, actual: FieldKind) -> CoreError {
    CoreError::FieldKindMismatch {
        expected: expected.as_str(),
        actual: actual.as_str(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldSchema {
    Value(ValueField<JsonValue>),
    Map(MapField<JsonValue>),
    List(ListField<JsonValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldState {
    Value {
        value: JsonValue,
        metadata: ValueMetadata,
    },
    Map {
        value: BTreeMap<String, JsonValue>,
        metadata: MapMetadata<JsonValue>,
    },
    List {
        value: Vec<JsonValue>,
        metadata: ListMetadata,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "update", rename_all = "lowercase")]
pub enum FieldUpdate {
    Value(JsonValue),
    Map(BTreeMap<String, Option<JsonValue>>),
    List(Vec<ListSplice<JsonValue>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "change", rename_all = "lowercase")]
pub enum FieldChange {
    Value(ValueChange<JsonValue>),
    Map(MapChange<JsonValue>),
    List(ListChange<JsonValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "patch", rename_all = "lowercase")]
pub enum FieldPatch {
    Value(ValuePatch<JsonValue>),
    Map(MapPatch<JsonValue>),
    List(ListPatch<JsonValue>),
}

impl FieldSchema {
    pub fn value(default_value: JsonValue) -> Self {
        Self::Value(ValueField::new(default_value))
    }

    pub fn map() -> Self {
        Self::Map(MapField::new())
    }

    pub fn list() -> Self {
        Self::List(ListField::new())
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Value(_) => FieldKind::Value,
            Self::Map(_) => FieldKind::Map,
            Self::List(_) => FieldKind::List,
        }
    }

    pub fn create_state(&self) -> FieldState {
        match self {
            Self::Value(field) => FieldState::Value {
                value: field.create_value(),
                metadata: field.create_metadata(),
            },
            Self::Map(field) => FieldState::Map {
                value: field.create_value(),
                metadata: field.create_metadata(),
            },
            Self::List(field) => FieldState::List {
                value: field.create_value(),
                metadata: field.create_metadata(),
            },
        }
    }

    /// Apply a local update to `state`. Nothing is modified on error.
    pub fn apply_update(
        &self,
        state: &mut FieldState,
        update: FieldUpdate,
        version: u64,
        store: StoreId,
    ) -> Result<(FieldChange, FieldPatch), CoreError> {
        match (self, state, update) {
            (Self::Value(field), FieldState::Value { value, metadata }, FieldUpdate::Value(u)) => {
                let result = field.apply_update(value, metadata, u, version, store)?;
                *value = result.value;
                Ok((FieldChange::Value(result.change), FieldPatch::Value(result.patch)))
            }
            (Self::Map(field), FieldState::Map { value, metadata }, FieldUpdate::Map(u)) => {
                // JSON null and an absent value both mean delete.
                let u = u
                    .into_iter()
                    .map(|(key, entry)| (key, entry.filter(|v| !v.is_null())))
                    .collect();
                let result = field.apply_update(value, metadata, u, version, store)?;
                *value = result.value;
                Ok((FieldChange::Map(result.change), FieldPatch::Map(result.patch)))
            }
            (Self::List(field), FieldState::List { value, metadata }, FieldUpdate::List(u)) => {
                let result = field.apply_update(value, metadata, u, version, store)?;
                *value = result.value;
                Ok((FieldChange::List(result.change), FieldPatch::List(result.patch)))
            }
            (schema, state, update) => Err(first_mismatch(schema.kind(), state.kind(), update.kind())),
        }
    }

    /// Apply a remote patch to `state`. Nothing is modified on error.
    pub fn apply_patch(
        &self,
        state: &mut FieldState,
        patch: &FieldPatch,
    ) -> Result<FieldChange, CoreError> {
        match (self, state, patch) {
            (Self::Value(field), FieldState::Value { value, metadata }, FieldPatch::Value(p)) => {
                let result = field.apply_patch(value, metadata, p)?;
                *value = result.value;
                Ok(FieldChange::Value(result.change))
            }
            (Self::Map(field), FieldState::Map { value, metadata }, FieldPatch::Map(p)) => {
                let result = field.apply_patch(value, metadata, p)?;
                *value = result.value;
                Ok(FieldChange::Map(result.change))
            }
            (Self::List(field), FieldState::List { value, metadata }, FieldPatch::List(p)) => {
                let result = field.apply_patch(value, metadata, p)?;
                *value = result.value;
                Ok(FieldChange::List(result.change))
            }
            (schema, state, patch) => Err(first_mismatch(schema.kind(), state.kind(), patch.kind())),
        }
    }
}

fn first_mismatch(expected: FieldKind, state: FieldKind, incoming: FieldKind) -> CoreError {
    if state != expected {
        mismatch(expected, state)
    } else {
        mismatch(expected, incoming)
    }
}

impl FieldState {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Value { .. } => FieldKind::Value,
            Self::Map { .. } => FieldKind::Map,
            Self::List { .. } => FieldKind::List,
        }
    }

    /// The consumer-facing value, without metadata.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Value { value, .. } => value.clone(),
            Self::Map { value, .. } => JsonValue::Object(
                value
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Self::List { value, .. } => JsonValue::Array(value.clone()),
        }
    }
}

impl FieldUpdate {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Value(_) => FieldKind::Value,
            Self::Map(_) => FieldKind::Map,
            Self::List(_) => FieldKind::List,
        }
    }
}

impl FieldChange {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Value(_) => FieldKind::Value,
            Self::Map(_) => FieldKind::Map,
            Self::List(_) => FieldKind::List,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Value(c) => c.is_empty(),
            Self::Map(c) => c.is_empty(),
            Self::List(c) => c.is_empty(),
        }
    }

    pub fn merge(first: Self, second: Self) -> Result<Self, CoreError> {
        match (first, second) {
            (Self::Value(a), Self::Value(b)) => Ok(Self::Value(ValueChange::merge(a, b))),
            (Self::Map(a), Self::Map(b)) => Ok(Self::Map(MapChange::merge(a, b))),
            (Self::List(a), Self::List(b)) => Ok(Self::List(ListChange::merge(a, b))),
            (a, b) => Err(mismatch(a.kind(), b.kind())),
        }
    }
}

impl FieldPatch {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Value(_) => FieldKind::Value,
            Self::Map(_) => FieldKind::Map,
            Self::List(_) => FieldKind::List,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Value(_) => false,
            Self::Map(p) => p.is_empty(),
            Self::List(p) => p.is_empty(),
        }
    }

    pub fn merge(first: Self, second: Self) -> Result<Self, CoreError> {
        match (first, second) {
            (Self::Value(a), Self::Value(b)) => Ok(Self::Value(ValuePatch::merge(a, b))),
            (Self::Map(a), Self::Map(b)) => Ok(Self::Map(MapPatch::merge(a, b))),
            (Self::List(a), Self::List(b)) => Ok(Self::List(ListPatch::merge(a, b))),
            (a, b) => Err(mismatch(a.kind(), b.kind())),
        }
    }
}
