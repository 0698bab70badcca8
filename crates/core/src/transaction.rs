use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::{FieldChange, FieldPatch};
use crate::ids::{PatchId, StoreId};

/// field name -> value
pub type RecordMap<V> = BTreeMap<String, V>;
/// record id -> field name -> value
pub type TableMap<V> = BTreeMap<String, RecordMap<V>>;
/// schema id -> record id -> field name -> value
pub type DatastoreMap<V> = BTreeMap<String, TableMap<V>>;

pub type DatastorePatch = DatastoreMap<FieldPatch>;
pub type DatastoreChange = DatastoreMap<FieldChange>;

/// The unit of replication: every field patch produced by one local
/// transaction, stamped with the author's store id and clock version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub patch_id: PatchId,
    pub store_id: StoreId,
    pub version: u64,
    pub patch: DatastorePatch,
}

impl Transaction {
    pub fn new(store_id: StoreId, version: u64) -> Self {
        Self {
            patch_id: PatchId::new(),
            store_id,
            version,
            patch: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_patches().all(|(_, _, _, patch)| patch.is_empty())
    }

    /// Add a field patch, merging it after any patch already present for
    /// the same field.
    pub fn insert_patch(
        &mut self,
        schema: &str,
        record: &str,
        field: &str,
        patch: FieldPatch,
    ) -> Result<(), CoreError> {
        insert_merged(&mut self.patch, schema, record, field, patch, FieldPatch::merge)
    }

    /// Combine with a transaction authored after this one by the same store.
    pub fn merge(self, later: Transaction) -> Result<Transaction, CoreError> {
        if self.store_id != later.store_id {
            return Err(CoreError::StoreMismatch {
                first: self.store_id.get(),
                second: later.store_id.get(),
            });
        }

        let mut merged = Transaction {
            patch_id: later.patch_id,
            store_id: self.store_id,
            version: self.version.max(later.version),
            patch: self.patch,
        };
        for (schema, table) in later.patch {
            for (record, fields) in table {
                for (field, patch) in fields {
                    merged.insert_patch(&schema, &record, &field, patch)?;
                }
            }
        }
        Ok(merged)
    }

    /// Iterate `(schema, record, field, patch)` in key order.
    pub fn field_patches(&self) -> impl Iterator<Item = (&str, &str, &str, &FieldPatch)> {
        self.patch.iter().flat_map(|(schema, table)| {
            table.iter().flat_map(move |(record, fields)| {
                fields.iter().map(move |(field, patch)| {
                    (schema.as_str(), record.as_str(), field.as_str(), patch)
                })
            })
        })
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Add a field change to a datastore change, merging it after any change
/// already recorded for the same field.
pub fn insert_change(
    target: &mut DatastoreChange,
    schema: &str,
    record: &str,
    field: &str,
    change: FieldChange,
) -> Result<(), CoreError> {
    insert_merged(target, schema, record, field, change, FieldChange::merge)
}

fn insert_merged<V: Clone>(
    target: &mut DatastoreMap<V>,
    schema: &str,
    record: &str,
    field: &str,
    value: V,
    merge: fn(V, V) -> Result<V, CoreError>,
) -> Result<(), CoreError> {
    let fields = target
        .entry(schema.to_string())
        .or_default()
        .entry(record.to_string())
        .or_default();
    match fields.entry(field.to_string()) {
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
        Entry::Occupied(mut slot) => {
            // The existing entry survives a failed merge.
            let merged = merge(slot.get().clone(), value)?;
            *slot.get_mut() = merged;
        }
    }
    Ok(())
}
