use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::{Data, Field, PatchResult, UpdateResult};
use crate::ids::{EditId, StoreId};

/// A single cell with last-writer-wins semantics by edit id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueField<T> {
    pub default_value: T,
}

impl<T> ValueField<T> {
    pub fn new(default_value: T) -> Self {
        Self { default_value }
    }
}

/// Id of the edit that produced the current value, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMetadata {
    pub id: Option<EditId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange<T> {
    pub old_value: T,
    pub new_value: T,
}

impl<T: PartialEq> ValueChange<T> {
    pub fn is_empty(&self) -> bool {
        self.old_value == self.new_value
    }

    pub fn merge(first: Self, second: Self) -> Self {
        Self {
            old_value: first.old_value,
            new_value: second.new_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePatch<T> {
    pub id: EditId,
    pub value: T,
}

impl<T> ValuePatch<T> {
    /// Keep the higher-ranked patch. Equal ids come from one transaction, so
    /// the later one wins.
    pub fn merge(first: Self, second: Self) -> Self {
        if second.id >= first.id { second } else { first }
    }
}

impl<T: Data> Field for ValueField<T> {
    type Value = T;
    type Update = T;
    type Metadata = ValueMetadata;
    type Change = ValueChange<T>;
    type Patch = ValuePatch<T>;

    fn create_value(&self) -> T {
        self.default_value.clone()
    }

    fn create_metadata(&self) -> ValueMetadata {
        ValueMetadata::default()
    }

    fn apply_update(
        &self,
        value: &T,
        metadata: &mut ValueMetadata,
        update: T,
        version: u64,
        store: StoreId,
    ) -> Result<UpdateResult<T, ValueChange<T>, ValuePatch<T>>, CoreError> {
        let id = EditId::new(version, store);
        metadata.id = Some(id);
        Ok(UpdateResult {
            value: update.clone(),
            change: ValueChange {
                old_value: value.clone(),
                new_value: update.clone(),
            },
            patch: ValuePatch { id, value: update },
        })
    }

    fn apply_patch(
        &self,
        value: &T,
        metadata: &mut ValueMetadata,
        patch: &ValuePatch<T>,
    ) -> Result<PatchResult<T, ValueChange<T>>, CoreError> {
        if metadata.id.is_some_and(|current| current >= patch.id) {
            tracing::trace!(incoming = %patch.id, "discarding stale value patch");
            return Ok(PatchResult {
                value: value.clone(),
                change: ValueChange {
                    old_value: value.clone(),
                    new_value: value.clone(),
                },
            });
        }

        metadata.id = Some(patch.id);
        Ok(PatchResult {
            value: patch.value.clone(),
            change: ValueChange {
                old_value: value.clone(),
                new_value: patch.value.clone(),
            },
        })
    }

    fn merge_change(&self, first: ValueChange<T>, second: ValueChange<T>) -> ValueChange<T> {
        ValueChange::merge(first, second)
    }

    fn merge_patch(&self, first: ValuePatch<T>, second: ValuePatch<T>) -> ValuePatch<T> {
        ValuePatch::merge(first, second)
    }
}
