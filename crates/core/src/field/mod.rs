//! Mergeable fields.
//!
//! A field owns no state itself. It describes how a piece of shared state
//! (a value plus the metadata needed to resolve conflicts) is created, how
//! local updates and remote patches are applied to it, and how changes and
//! patches are combined. The datastore owns the state and calls into the
//! field for every mutation.
//!
//! Patches must be commutative and idempotent under [`Field::apply_patch`]:
//! peers receive them in arbitrary order, possibly more than once.

pub mod kind;
pub mod list;
pub mod map;
pub mod value;

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;
use crate::ids::StoreId;

pub use kind::{FieldChange, FieldKind, FieldPatch, FieldSchema, FieldState, FieldUpdate};
pub use list::{ListChange, ListChangeEntry, ListField, ListMetadata, ListPatch, ListSplice};
pub use map::{KeyHistory, MapChange, MapEdit, MapField, MapMetadata, MapPatch};
pub use value::{ValueChange, ValueField, ValueMetadata, ValuePatch};

/// Anything that can live inside a field: cloneable, comparable and
/// JSON-safe.
pub trait Data: Clone + PartialEq + Debug + Serialize + DeserializeOwned {}

impl<T> Data for T where T: Clone + PartialEq + Debug + Serialize + DeserializeOwned {}

/// Outcome of applying a local update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult<V, C, P> {
    pub value: V,
    pub change: C,
    pub patch: P,
}

/// Outcome of applying a remote patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchResult<V, C> {
    pub value: V,
    pub change: C,
}

pub trait Field {
    type Value;
    type Update;
    type Metadata;
    type Change;
    type Patch;

    fn create_value(&self) -> Self::Value;

    fn create_metadata(&self) -> Self::Metadata;

    /// Apply a locally authored update. `version` and `store` form the edit id.
    ///
    /// On error the metadata is left exactly as it was.
    fn apply_update(
        &self,
        value: &Self::Value,
        metadata: &mut Self::Metadata,
        update: Self::Update,
        version: u64,
        store: StoreId,
    ) -> Result<UpdateResult<Self::Value, Self::Change, Self::Patch>, CoreError>;

    /// Apply a patch produced by some peer (possibly this one).
    ///
    /// On error the metadata is left exactly as it was.
    fn apply_patch(
        &self,
        value: &Self::Value,
        metadata: &mut Self::Metadata,
        patch: &Self::Patch,
    ) -> Result<PatchResult<Self::Value, Self::Change>, CoreError>;

    /// Combine two sequential changes into one.
    fn merge_change(&self, first: Self::Change, second: Self::Change) -> Self::Change;

    /// Combine two patches into one with the same effect on any receiver.
    fn merge_patch(&self, first: Self::Patch, second: Self::Patch) -> Self::Patch;
}
