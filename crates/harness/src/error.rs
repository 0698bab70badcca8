use concord_core::CoreError;
use concord_engine::EngineError;
use concord_storage::StorageError;
use thiserror::Error;

use crate::relay::ConnectionId;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid relay config: {0}")]
    Config(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}
