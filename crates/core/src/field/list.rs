use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::{Data, Field, PatchResult, UpdateResult};
use crate::ids::{EditId, PositionId, StoreId};

/// An ordered sequence. Every element carries a dense [`PositionId`], so
/// concurrent inserts interleave deterministically and removals address the
/// element rather than an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListField<T> {
    #[serde(skip)]
    marker: PhantomData<T>,
}

impl<T> ListField<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for ListField<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `ids` is ascending and index-aligned with the list value. The cemetery
/// holds every id ever removed, including removals that arrived before the
/// matching insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMetadata {
    pub ids: Vec<PositionId>,
    pub cemetery: BTreeSet<PositionId>,
}

/// Remove `remove` elements at `index`, then insert `values` there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSplice<T> {
    pub index: usize,
    #[serde(default)]
    pub remove: usize,
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListChangeEntry<T> {
    pub index: usize,
    pub removed: Vec<T>,
    pub inserted: Vec<T>,
}

/// Splices that turn the old value into the new one, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListChange<T> {
    pub splices: Vec<ListChangeEntry<T>>,
}

impl<T> Default for ListChange<T> {
    fn default() -> Self {
        Self {
            splices: Vec::new(),
        }
    }
}

impl<T> ListChange<T> {
    pub fn is_empty(&self) -> bool {
        self.splices.is_empty()
    }

    pub fn merge(first: Self, second: Self) -> Self {
        let mut splices = first.splices;
        splices.extend(second.splices);
        Self { splices }
    }

    fn removed(&mut self, index: usize, value: T) {
        self.splices.push(ListChangeEntry {
            index,
            removed: vec![value],
            inserted: Vec::new(),
        });
    }

    fn inserted(&mut self, index: usize, value: T) {
        if let Some(last) = self.splices.last_mut() {
            if last.removed.is_empty() && last.index + last.inserted.len() == index {
                last.inserted.push(value);
                return;
            }
        }
        self.splices.push(ListChangeEntry {
            index,
            removed: Vec::new(),
            inserted: vec![value],
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPatch<T> {
    #[serde(default = "BTreeMap::new")]
    pub inserted: BTreeMap<PositionId, T>,
    #[serde(default)]
    pub removed: BTreeSet<PositionId>,
}

impl<T> Default for ListPatch<T> {
    fn default() -> Self {
        Self {
            inserted: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<T> ListPatch<T> {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    /// Set union. An insert that is also removed never needs to travel.
    pub fn merge(first: Self, second: Self) -> Self {
        let mut removed = first.removed;
        removed.extend(second.removed);
        let mut inserted = first.inserted;
        inserted.extend(second.inserted);
        inserted.retain(|id, _| !removed.contains(id));
        Self { inserted, removed }
    }
}

/// Allocate `count` ascending ids between two neighbours, stepping over any
/// id that is already buried so a removed element can never come back.
fn fresh_ids(
    lower: Option<&PositionId>,
    upper: Option<&PositionId>,
    count: usize,
    edit: EditId,
    cemetery: &BTreeSet<PositionId>,
    buried: &BTreeSet<PositionId>,
) -> Vec<PositionId> {
    let mut ids: Vec<PositionId> = Vec::with_capacity(count);
    while ids.len() < count {
        let mut next = PositionId::between(ids.last().or(lower), upper, edit);
        while cemetery.contains(&next) || buried.contains(&next) {
            next = PositionId::between(Some(&next), upper, edit);
        }
        ids.push(next);
    }
    ids
}

impl<T: Data> Field for ListField<T> {
    type Value = Vec<T>;
    type Update = Vec<ListSplice<T>>;
    type Metadata = ListMetadata;
    type Change = ListChange<T>;
    type Patch = ListPatch<T>;

    fn create_value(&self) -> Vec<T> {
        Vec::new()
    }

    fn create_metadata(&self) -> ListMetadata {
        ListMetadata::default()
    }

    fn apply_update(
        &self,
        value: &Vec<T>,
        metadata: &mut ListMetadata,
        update: Vec<ListSplice<T>>,
        version: u64,
        store: StoreId,
    ) -> Result<UpdateResult<Vec<T>, ListChange<T>, ListPatch<T>>, CoreError> {
        let edit = EditId::new(version, store);
        let mut ids = metadata.ids.clone();
        let mut next = value.clone();
        let mut buried = BTreeSet::new();
        let mut change = ListChange::default();
        let mut patch = ListPatch::default();

        for splice in update {
            let len = next.len();
            if splice.index > len || splice.remove > len - splice.index {
                return Err(CoreError::SpliceOutOfRange {
                    index: splice.index,
                    remove: splice.remove,
                    len,
                });
            }
            if splice.remove == 0 && splice.values.is_empty() {
                continue;
            }

            let end = splice.index + splice.remove;
            let removed: Vec<T> = next.drain(splice.index..end).collect();
            for id in ids.drain(splice.index..end) {
                if patch.inserted.remove(&id).is_none() {
                    patch.removed.insert(id.clone());
                }
                buried.insert(id);
            }

            let lower = splice.index.checked_sub(1).and_then(|i| ids.get(i));
            let new_ids = fresh_ids(
                lower,
                ids.get(splice.index),
                splice.values.len(),
                edit,
                &metadata.cemetery,
                &buried,
            );
            for (id, v) in new_ids.iter().zip(&splice.values) {
                patch.inserted.insert(id.clone(), v.clone());
            }
            ids.splice(splice.index..splice.index, new_ids);
            next.splice(splice.index..splice.index, splice.values.iter().cloned());

            change.splices.push(ListChangeEntry {
                index: splice.index,
                removed,
                inserted: splice.values,
            });
        }

        metadata.ids = ids;
        metadata.cemetery.extend(buried);
        Ok(UpdateResult {
            value: next,
            change,
            patch,
        })
    }

    fn apply_patch(
        &self,
        value: &Vec<T>,
        metadata: &mut ListMetadata,
        patch: &ListPatch<T>,
    ) -> Result<PatchResult<Vec<T>, ListChange<T>>, CoreError> {
        let mut next = value.clone();
        let mut change = ListChange::default();

        for id in &patch.removed {
            if let Ok(i) = metadata.ids.binary_search(id) {
                metadata.ids.remove(i);
                change.removed(i, next.remove(i));
            }
            metadata.cemetery.insert(id.clone());
        }

        for (id, v) in &patch.inserted {
            if metadata.cemetery.contains(id) {
                tracing::trace!(id = %id, "skipping insert of buried list element");
                continue;
            }
            match metadata.ids.binary_search(id) {
                Ok(_) => {}
                Err(i) => {
                    metadata.ids.insert(i, id.clone());
                    next.insert(i, v.clone());
                    change.inserted(i, v.clone());
                }
            }
        }

        Ok(PatchResult {
            value: next,
            change,
        })
    }

    fn merge_change(&self, first: ListChange<T>, second: ListChange<T>) -> ListChange<T> {
        ListChange::merge(first, second)
    }

    fn merge_patch(&self, first: ListPatch<T>, second: ListPatch<T>) -> ListPatch<T> {
        ListPatch::merge(first, second)
    }
}
