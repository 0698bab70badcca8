use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("patch id collision: {patch_id} already stored with different content")]
    PatchIdCollision { patch_id: String },

    #[error("store id space exhausted")]
    StoreIdsExhausted,
}
