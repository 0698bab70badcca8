use concord_core::{PatchId, StoreId, Transaction};

use crate::error::StorageError;

/// Durable, append-only history of every transaction broadcast through a
/// relay, plus the store id counter.
pub trait PatchStore {
    /// Store a transaction under its patch id. Returns `false` when the same
    /// transaction was already stored.
    fn append_patch(&mut self, transaction: &Transaction) -> Result<bool, StorageError>;

    fn get_patch(&self, patch_id: PatchId) -> Result<Option<Transaction>, StorageError>;

    /// The requested transactions that are known, in request order.
    fn get_patches(&self, patch_ids: &[PatchId]) -> Result<Vec<Transaction>, StorageError>;

    /// Every stored transaction in arrival order.
    fn history(&self) -> Result<Vec<Transaction>, StorageError>;

    fn patch_count(&self) -> Result<u64, StorageError>;

    /// Hand out a store id never returned before by this store.
    fn allocate_store_id(&mut self) -> Result<StoreId, StorageError>;
}
