use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::{Data, Field, PatchResult, UpdateResult};
use crate::ids::{EditId, StoreId};

/// A string-keyed map where every key resolves independently: the entry with
/// the highest edit id wins, and `None` (a tombstone) takes part in the same
/// ranking as values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapField<T> {
    #[serde(skip)]
    marker: PhantomData<T>,
}

impl<T> MapField<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for MapField<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Edit history of one key. `ids` is strictly ascending and `values[i]` is
/// the value written by `ids[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyHistory<T> {
    pub ids: Vec<EditId>,
    pub values: Vec<Option<T>>,
}

impl<T> Default for KeyHistory<T> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> KeyHistory<T> {
    /// Value of the top-ranked entry, `None` when absent or deleted.
    pub fn current(&self) -> Option<&T> {
        self.values.last().and_then(|v| v.as_ref())
    }

    /// Insert an entry at its ranked position. An entry with the same id is
    /// replaced when `replace` is set and left alone otherwise. Returns
    /// whether the history changed.
    fn record(&mut self, id: EditId, value: Option<T>, replace: bool) -> bool {
        debug_assert_eq!(self.ids.len(), self.values.len());
        match self.ids.binary_search(&id) {
            Ok(i) if replace => {
                self.values[i] = value;
                true
            }
            Ok(_) => false,
            Err(i) => {
                self.ids.insert(i, id);
                self.values.insert(i, value);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMetadata<T> {
    pub keys: BTreeMap<String, KeyHistory<T>>,
}

impl<T> Default for MapMetadata<T> {
    fn default() -> Self {
        Self {
            keys: BTreeMap::new(),
        }
    }
}

/// Old and new effective values of the keys whose effective value changed.
/// `None` means the key was (or became) absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapChange<T> {
    pub previous: BTreeMap<String, Option<T>>,
    pub current: BTreeMap<String, Option<T>>,
}

impl<T> Default for MapChange<T> {
    fn default() -> Self {
        Self {
            previous: BTreeMap::new(),
            current: BTreeMap::new(),
        }
    }
}

impl<T: PartialEq> MapChange<T> {
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty() && self.current.is_empty()
    }

    fn record(&mut self, key: &str, previous: Option<&T>, current: Option<&T>)
    where
        T: Clone,
    {
        if previous != current {
            self.previous.insert(key.to_string(), previous.cloned());
            self.current.insert(key.to_string(), current.cloned());
        }
    }

    /// Earliest previous and latest current per key. Keys that end where they
    /// started drop out.
    pub fn merge(first: Self, second: Self) -> Self {
        let mut previous = second.previous;
        previous.extend(first.previous);
        let mut current = first.current;
        current.extend(second.current);

        let unchanged: Vec<String> = previous
            .iter()
            .filter(|(key, prev)| current.get(*key) == Some(*prev))
            .map(|(key, _)| key.clone())
            .collect();
        for key in unchanged {
            previous.remove(&key);
            current.remove(&key);
        }
        Self { previous, current }
    }
}

/// All keys written by one edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEdit<T> {
    pub id: EditId,
    pub values: BTreeMap<String, Option<T>>,
}

/// A set of edits, ascending by id with no id repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPatch<T> {
    pub edits: Vec<MapEdit<T>>,
}

impl<T> Default for MapPatch<T> {
    fn default() -> Self {
        Self { edits: Vec::new() }
    }
}

impl<T> MapPatch<T> {
    pub fn single(id: EditId, values: BTreeMap<String, Option<T>>) -> Self {
        Self {
            edits: vec![MapEdit { id, values }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.iter().all(|edit| edit.values.is_empty())
    }

    /// History-preserving union. Edits sharing an id belong to one
    /// transaction and fold together, later keys winning.
    pub fn merge(first: Self, second: Self) -> Self {
        let mut by_id: BTreeMap<EditId, BTreeMap<String, Option<T>>> = BTreeMap::new();
        for edit in first.edits.into_iter().chain(second.edits) {
            by_id.entry(edit.id).or_default().extend(edit.values);
        }
        Self {
            edits: by_id
                .into_iter()
                .map(|(id, values)| MapEdit { id, values })
                .collect(),
        }
    }
}

impl<T: Data> Field for MapField<T> {
    type Value = BTreeMap<String, T>;
    type Update = BTreeMap<String, Option<T>>;
    type Metadata = MapMetadata<T>;
    type Change = MapChange<T>;
    type Patch = MapPatch<T>;

    fn create_value(&self) -> Self::Value {
        BTreeMap::new()
    }

    fn create_metadata(&self) -> MapMetadata<T> {
        MapMetadata::default()
    }

    fn apply_update(
        &self,
        value: &Self::Value,
        metadata: &mut MapMetadata<T>,
        update: Self::Update,
        version: u64,
        store: StoreId,
    ) -> Result<UpdateResult<Self::Value, MapChange<T>, MapPatch<T>>, CoreError> {
        let id = EditId::new(version, store);
        let mut next = value.clone();
        let mut change = MapChange::default();

        for (key, entry) in &update {
            let history = metadata.keys.entry(key.clone()).or_default();
            history.record(id, entry.clone(), true);
            let current = history.current().cloned();
            change.record(key, value.get(key), current.as_ref());
            match current {
                Some(v) => {
                    next.insert(key.clone(), v);
                }
                None => {
                    next.remove(key);
                }
            }
        }

        let patch = if update.is_empty() {
            MapPatch::default()
        } else {
            MapPatch::single(id, update)
        };
        Ok(UpdateResult {
            value: next,
            change,
            patch,
        })
    }

    fn apply_patch(
        &self,
        value: &Self::Value,
        metadata: &mut MapMetadata<T>,
        patch: &MapPatch<T>,
    ) -> Result<PatchResult<Self::Value, MapChange<T>>, CoreError> {
        let mut touched: Vec<&str> = Vec::new();
        for edit in &patch.edits {
            for (key, entry) in &edit.values {
                let history = metadata.keys.entry(key.clone()).or_default();
                if history.record(edit.id, entry.clone(), false) {
                    touched.push(key.as_str());
                } else {
                    tracing::trace!(key = %key, id = %edit.id, "map entry already applied");
                }
            }
        }
        touched.sort_unstable();
        touched.dedup();

        let mut next = value.clone();
        let mut change = MapChange::default();
        for key in touched {
            let current = metadata.keys.get(key).and_then(|h| h.current());
            change.record(key, value.get(key), current);
            match current {
                Some(v) => {
                    next.insert(key.to_string(), v.clone());
                }
                None => {
                    next.remove(key);
                }
            }
        }

        Ok(PatchResult {
            value: next,
            change,
        })
    }

    fn merge_change(&self, first: MapChange<T>, second: MapChange<T>) -> MapChange<T> {
        MapChange::merge(first, second)
    }

    fn merge_patch(&self, first: MapPatch<T>, second: MapPatch<T>) -> MapPatch<T> {
        MapPatch::merge(first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type State = (BTreeMap<String, i64>, MapMetadata<i64>);

    fn id(version: u64, store: u32) -> EditId {
        EditId::new(version, StoreId::new(store))
    }

    fn values(pairs: &[(&str, Option<i64>)]) -> BTreeMap<String, Option<i64>> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn plain(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn apply_all(field: &MapField<i64>, patches: &[&MapPatch<i64>]) -> State {
        let mut value = field.create_value();
        let mut meta = field.create_metadata();
        for patch in patches {
            value = field.apply_patch(&value, &mut meta, patch).unwrap().value;
        }
        (value, meta)
    }

    #[test]
    fn update_then_newer_remote_patch() {
        let field = MapField::<i64>::new();
        let mut meta = field.create_metadata();
        let local = field
            .apply_update(
                &field.create_value(),
                &mut meta,
                values(&[("a", Some(1)), ("b", Some(2))]),
                1,
                StoreId::new(1),
            )
            .unwrap();
        assert_eq!(local.value, plain(&[("a", 1), ("b", 2)]));
        assert_eq!(local.patch.edits.len(), 1);
        assert_eq!(local.patch.edits[0].id, id(1, 1));

        let remote = MapPatch::single(id(2, 2), values(&[("a", Some(3))]));
        let result = field.apply_patch(&local.value, &mut meta, &remote).unwrap();
        assert_eq!(result.value, plain(&[("a", 3), ("b", 2)]));
        assert_eq!(result.change.previous, values(&[("a", Some(1))]));
        assert_eq!(result.change.current, values(&[("a", Some(3))]));
    }

    #[test]
    fn late_patch_lands_in_history_without_changing_value() {
        let field = MapField::<i64>::new();
        let newer = MapPatch::single(id(5, 1), values(&[("k", Some(50))]));
        let older = MapPatch::single(id(2, 2), values(&[("k", Some(20))]));
        let (value, mut meta) = apply_all(&field, &[&newer]);
        let result = field.apply_patch(&value, &mut meta, &older).unwrap();
        assert_eq!(result.value, plain(&[("k", 50)]));
        assert!(result.change.is_empty());
        let history = &meta.keys["k"];
        assert_eq!(history.ids, vec![id(2, 2), id(5, 1)]);
        assert_eq!(history.values, vec![Some(20), Some(50)]);
    }

    #[test]
    fn patches_commute() {
        let field = MapField::<i64>::new();
        let p1 = MapPatch::single(id(1, 1), values(&[("a", Some(1)), ("b", Some(1))]));
        let p2 = MapPatch::single(id(1, 2), values(&[("b", Some(2)), ("c", None)]));
        assert_eq!(apply_all(&field, &[&p1, &p2]), apply_all(&field, &[&p2, &p1]));
        assert_eq!(apply_all(&field, &[&p1, &p2]).0, plain(&[("a", 1), ("b", 2)]));
    }

    #[test]
    fn patches_are_idempotent() {
        let field = MapField::<i64>::new();
        let p = MapPatch::single(id(3, 1), values(&[("a", Some(1)), ("b", None)]));
        let once = apply_all(&field, &[&p]);
        let twice = apply_all(&field, &[&p, &p]);
        assert_eq!(once, twice);

        let (value, mut meta) = once;
        let again = field.apply_patch(&value, &mut meta, &p).unwrap();
        assert!(again.change.is_empty());
    }

    #[test]
    fn deletes_rank_like_values() {
        let field = MapField::<i64>::new();
        let store = StoreId::new(1);
        let mut meta = field.create_metadata();
        let value = field
            .apply_update(&field.create_value(), &mut meta, values(&[("k", Some(1))]), 1, store)
            .unwrap()
            .value;
        let value = field
            .apply_update(&value, &mut meta, values(&[("k", None)]), 2, store)
            .unwrap()
            .value;
        assert!(value.is_empty());

        // A concurrent write ranked below the delete stays hidden.
        let lower = MapPatch::single(id(1, 2), values(&[("k", Some(7))]));
        let mut low_meta = meta.clone();
        let low = field.apply_patch(&value, &mut low_meta, &lower).unwrap();
        assert!(!low.value.contains_key("k"));
        assert!(low.change.is_empty());

        // One ranked above it resurrects the key.
        let higher = MapPatch::single(id(3, 2), values(&[("k", Some(9))]));
        let high = field.apply_patch(&value, &mut meta, &higher).unwrap();
        assert_eq!(high.value, plain(&[("k", 9)]));
        assert_eq!(high.change.previous, values(&[("k", None)]));
        assert_eq!(high.change.current, values(&[("k", Some(9))]));
    }

    #[test]
    fn same_edit_id_is_amended_within_a_transaction() {
        let field = MapField::<i64>::new();
        let store = StoreId::new(4);
        let mut meta = field.create_metadata();
        let first = field
            .apply_update(&field.create_value(), &mut meta, values(&[("a", Some(1))]), 7, store)
            .unwrap();
        let second = field
            .apply_update(&first.value, &mut meta, values(&[("a", Some(2))]), 7, store)
            .unwrap();
        assert_eq!(second.value, plain(&[("a", 2)]));
        assert_eq!(meta.keys["a"].ids.len(), 1);

        let merged = field.merge_patch(first.patch, second.patch);
        assert_eq!(merged.edits.len(), 1);
        assert_eq!(merged.edits[0].values, values(&[("a", Some(2))]));
    }

    #[test]
    fn merged_patch_keeps_both_entries() {
        let field = MapField::<i64>::new();
        let p1 = MapPatch::single(id(1, 1), values(&[("k", Some(1))]));
        let p2 = MapPatch::single(id(2, 2), values(&[("k", None)]));
        let merged = field.merge_patch(p1.clone(), p2.clone());
        assert_eq!(merged, field.merge_patch(p2.clone(), p1.clone()));
        assert_eq!(merged.edits.len(), 2);
        assert_eq!(apply_all(&field, &[&merged]), apply_all(&field, &[&p1, &p2]));
    }

    #[test]
    fn merge_change_drops_round_trips() {
        let field = MapField::<i64>::new();
        let a = MapChange {
            previous: values(&[("x", None), ("y", Some(1))]),
            current: values(&[("x", Some(1)), ("y", Some(2))]),
        };
        let b = MapChange {
            previous: values(&[("x", Some(1))]),
            current: values(&[("x", None)]),
        };
        let merged = field.merge_change(a, b);
        assert_eq!(merged.previous, values(&[("y", Some(1))]));
        assert_eq!(merged.current, values(&[("y", Some(2))]));
    }

    #[test]
    fn patch_json_shape() {
        let patch = MapPatch::single(id(1, 1), values(&[("a", Some(1)), ("b", None)]));
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"edits": [{"id": "010100000001", "values": {"a": 1, "b": null}}]})
        );
        let back: MapPatch<i64> = serde_json::from_value(json).unwrap();
        assert_eq!(back, patch);
    }

    fn patch_strategy() -> impl Strategy<Value = MapPatch<i64>> {
        let key = prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")];
        let entry = (key, proptest::option::of(0i64..5));
        (0u64..6, 0u32..3, proptest::collection::vec(entry, 1..4)).prop_map(
            |(version, store, entries)| {
                let values = entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect();
                MapPatch::single(EditId::new(version, StoreId::new(store)), values)
            },
        )
    }

    proptest! {
        #[test]
        fn arrival_order_does_not_matter(
            patches in proptest::collection::vec(patch_strategy(), 1..6),
            seed in any::<u64>(),
        ) {
            // Distinct ids only: equal ids would mean one store reused a version.
            let mut seen = std::collections::BTreeSet::new();
            let patches: Vec<MapPatch<i64>> = patches
                .into_iter()
                .filter(|p| seen.insert(p.edits[0].id))
                .collect();
            let field = MapField::<i64>::new();

            let forward: Vec<&MapPatch<i64>> = patches.iter().collect();
            let mut shuffled = forward.clone();
            let len = shuffled.len();
            for i in 0..len {
                let j = ((seed >> (i % 32)) as usize + i * 7) % len;
                shuffled.swap(i, j);
            }

            let a = apply_all(&field, &forward);
            let b = apply_all(&field, &shuffled);
            prop_assert_eq!(&a, &b);

            let merged = patches
                .iter()
                .cloned()
                .reduce(|x, y| field.merge_patch(x, y))
                .unwrap();
            prop_assert_eq!(apply_all(&field, &[&merged]), a);
        }

        #[test]
        fn merge_patch_is_associative(
            a in patch_strategy(),
            b in patch_strategy(),
            c in patch_strategy(),
        ) {
            let left = MapPatch::merge(MapPatch::merge(a.clone(), b.clone()), c.clone());
            let right = MapPatch::merge(a, MapPatch::merge(b, c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn merge_change_is_associative(
            states in proptest::collection::vec(state_strategy(), 4),
        ) {
            let a = diff(&states[0], &states[1]);
            let b = diff(&states[1], &states[2]);
            let c = diff(&states[2], &states[3]);

            let left = MapChange::merge(MapChange::merge(a.clone(), b.clone()), c.clone());
            let right = MapChange::merge(a, MapChange::merge(b, c));
            prop_assert_eq!(&left, &right);
            prop_assert_eq!(left, diff(&states[0], &states[3]));
        }
    }

    fn state_strategy() -> impl Strategy<Value = BTreeMap<String, i64>> {
        let key = prop_oneof![Just("a"), Just("b"), Just("c")];
        proptest::collection::btree_map(key.prop_map(str::to_string), 0i64..3, 0..4)
    }

    /// The change that takes `before` to `after`.
    fn diff(before: &BTreeMap<String, i64>, after: &BTreeMap<String, i64>) -> MapChange<i64> {
        let mut change = MapChange::default();
        for key in before.keys().chain(after.keys()) {
            change.record(key, before.get(key), after.get(key));
        }
        change
    }
}
