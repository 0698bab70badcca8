use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use concord_core::{Message, MessageBody};
use concord_storage::{PatchStore, SqlitePatchStore, StorageError};

use crate::error::HarnessError;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// SQLite database for the patch history. In memory when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// A patch relay: hands out store ids, records every broadcast patch and
/// forwards it to the other connections, and replays history on request.
pub struct Relay<S = SqlitePatchStore> {
    store: S,
    connections: BTreeSet<ConnectionId>,
    next_connection: ConnectionId,
}

impl Relay<SqlitePatchStore> {
    pub fn open(config: &RelayConfig) -> Result<Self, HarnessError> {
        let store = match &config.db_path {
            Some(path) => {
                let path = path
                    .to_str()
                    .ok_or_else(|| HarnessError::Config(format!("non-utf8 path: {path:?}")))?;
                SqlitePatchStore::open(path)?
            }
            None => SqlitePatchStore::open_in_memory()?,
        };
        Ok(Self::new(store))
    }
}

impl<S: PatchStore> Relay<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            connections: BTreeSet::new(),
            next_connection: 1,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn connect(&mut self) -> ConnectionId {
        let id = self.next_connection;
        self.next_connection += 1;
        self.connections.insert(id);
        tracing::debug!(connection = id, "connection opened");
        id
    }

    pub fn disconnect(&mut self, id: ConnectionId) {
        if self.connections.remove(&id) {
            tracing::debug!(connection = id, "connection closed");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Handle a raw JSON message. Malformed input is logged and dropped.
    pub fn handle_text(
        &mut self,
        from: ConnectionId,
        text: &str,
    ) -> Result<Vec<(ConnectionId, String)>, HarnessError> {
        let msg = match Message::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(connection = from, error = %e, "malformed message dropped");
                return Ok(Vec::new());
            }
        };
        self.handle(from, msg)?
            .into_iter()
            .map(|(to, msg)| -> Result<(ConnectionId, String), HarnessError> {
                Ok((to, msg.to_json()?))
            })
            .collect()
    }

    /// Handle one message and return the messages to send, by connection.
    pub fn handle(
        &mut self,
        from: ConnectionId,
        msg: Message,
    ) -> Result<Vec<(ConnectionId, Message)>, HarnessError> {
        if !self.connections.contains(&from) {
            return Err(HarnessError::UnknownConnection(from));
        }

        match &msg.body {
            MessageBody::StoreidRequest {} => {
                let store_id = self.store.allocate_store_id()?;
                let reply = msg.reply(MessageBody::StoreidReply { store_id });
                Ok(vec![(from, reply)])
            }
            MessageBody::PatchBroadcast { patch } => match self.store.append_patch(patch) {
                Ok(true) => Ok(self
                    .connections
                    .iter()
                    .filter(|&&id| id != from)
                    .map(|&id| (id, msg.clone()))
                    .collect()),
                Ok(false) => Ok(Vec::new()),
                Err(StorageError::PatchIdCollision { patch_id }) => {
                    tracing::warn!(connection = from, %patch_id, "conflicting patch dropped");
                    Ok(Vec::new())
                }
                Err(e) => Err(e.into()),
            },
            MessageBody::PatchHistoryRequest {} => {
                let patch_history = self.store.history()?;
                tracing::debug!(connection = from, patches = patch_history.len(), "sending history");
                let reply = msg.reply(MessageBody::PatchHistoryReply { patch_history });
                Ok(vec![(from, reply)])
            }
            MessageBody::FetchPatchRequest { patch_ids } => {
                let patches = self.store.get_patches(patch_ids)?;
                let reply = msg.reply(MessageBody::FetchPatchReply { patches });
                Ok(vec![(from, reply)])
            }
            MessageBody::StoreidReply { .. }
            | MessageBody::PatchHistoryReply { .. }
            | MessageBody::FetchPatchReply { .. } => {
                tracing::warn!(connection = from, msg_type = msg.msg_type(), "reply sent to relay ignored");
                Ok(Vec::new())
            }
        }
    }
}
