use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use concord_core::{FieldSchema, StoreId};

use crate::error::EngineError;

/// A named table layout: every record of the table carries these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: String,
    pub fields: BTreeMap<String, FieldSchema>,
}

impl Schema {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        self.fields.insert(name.into(), field);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreConfig {
    pub store_id: StoreId,
    pub schemas: Vec<Schema>,
}

impl DatastoreConfig {
    pub fn new(store_id: StoreId, schemas: Vec<Schema>) -> Self {
        Self { store_id, schemas }
    }

    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        validate_schemas(&self.schemas)
    }
}

pub(crate) fn validate_schemas(schemas: &[Schema]) -> Result<(), EngineError> {
    let mut seen = BTreeSet::new();
    for schema in schemas {
        if schema.id.is_empty() {
            return Err(EngineError::Config("schema id must not be empty".into()));
        }
        if !seen.insert(schema.id.as_str()) {
            return Err(EngineError::Config(format!(
                "duplicate schema id: {}",
                schema.id
            )));
        }
    }
    Ok(())
}
