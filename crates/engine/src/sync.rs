//! Client side of the relay protocol.
//!
//! A `SyncClient` is transport agnostic: it turns incoming messages into
//! datastore mutations and queues the messages it wants sent. The caller
//! moves messages between [`SyncClient::drain_outgoing`] and the relay.

use std::collections::{HashMap, VecDeque};

use concord_core::transaction::insert_change;
use concord_core::{DatastoreChange, Message, MessageBody, MessageId, PatchId, StoreId, Transaction};

use crate::config::{DatastoreConfig, Schema, validate_schemas};
use crate::error::EngineError;
use crate::{Committed, Datastore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    StoreId,
    History,
    Fetch,
}

pub struct SyncClient {
    schemas: Vec<Schema>,
    datastore: Option<Datastore>,
    /// Local transactions not yet broadcast, oldest first.
    outbox: Vec<Transaction>,
    outgoing: VecDeque<Message>,
    pending: HashMap<MessageId, Request>,
}

impl SyncClient {
    pub fn new(schemas: Vec<Schema>) -> Result<Self, EngineError> {
        validate_schemas(&schemas)?;
        Ok(Self {
            schemas,
            datastore: None,
            outbox: Vec::new(),
            outgoing: VecDeque::new(),
            pending: HashMap::new(),
        })
    }

    pub fn datastore(&self) -> Option<&Datastore> {
        self.datastore.as_ref()
    }

    pub fn store_id(&self) -> Option<StoreId> {
        self.datastore.as_ref().map(Datastore::store_id)
    }

    pub fn is_connected(&self) -> bool {
        self.datastore.is_some()
    }

    /// Local transactions waiting for the next [`SyncClient::flush`].
    pub fn unsent(&self) -> usize {
        self.outbox.len()
    }

    fn request(&mut self, kind: Request, body: MessageBody) -> MessageId {
        let msg = Message::new(body);
        let id = msg.msg_id;
        self.pending.insert(id, kind);
        self.outgoing.push_back(msg);
        id
    }

    /// Ask the relay for a store id. The datastore is created once it
    /// arrives.
    pub fn connect(&mut self) -> MessageId {
        self.request(Request::StoreId, MessageBody::StoreidRequest {})
    }

    /// Ask the relay for specific transactions by patch id.
    pub fn fetch_patches(&mut self, patch_ids: Vec<PatchId>) -> MessageId {
        self.request(Request::Fetch, MessageBody::FetchPatchRequest { patch_ids })
    }

    pub fn drain_outgoing(&mut self) -> Vec<Message> {
        self.outgoing.drain(..).collect()
    }

    /// Run a local transaction and queue its patch for broadcast.
    pub fn transact<F>(&mut self, f: F) -> Result<Option<DatastoreChange>, EngineError>
    where
        F: FnOnce(&mut Datastore) -> Result<(), EngineError>,
    {
        let datastore = self.datastore.as_mut().ok_or(EngineError::NotConnected)?;
        match datastore.transact(f)? {
            Some(Committed {
                transaction,
                change,
            }) => {
                self.outbox.push(transaction);
                Ok(Some(change))
            }
            None => Ok(None),
        }
    }

    /// Merge every queued local transaction into one broadcast.
    pub fn flush(&mut self) -> Result<Option<MessageId>, EngineError> {
        let mut queued = std::mem::take(&mut self.outbox).into_iter();
        let Some(first) = queued.next() else {
            return Ok(None);
        };
        let mut merged = first;
        let mut count = 1;
        for later in queued {
            merged = merged.merge(later)?;
            count += 1;
        }
        tracing::debug!(patch_id = %merged.patch_id, merged = count, "broadcasting patch");

        let msg = Message::new(MessageBody::PatchBroadcast { patch: merged });
        let id = msg.msg_id;
        self.outgoing.push_back(msg);
        Ok(Some(id))
    }

    /// Handle one message from the relay. Returns the resulting change to
    /// the datastore, empty when nothing visible changed.
    pub fn handle_message(&mut self, msg: Message) -> Result<DatastoreChange, EngineError> {
        let expected = msg.parent_id.and_then(|id| self.pending.remove(&id));
        let msg_type = msg.msg_type();

        match (msg.body, expected) {
            (MessageBody::StoreidReply { store_id }, Some(Request::StoreId)) => {
                if let Some(existing) = self.store_id() {
                    tracing::warn!(%existing, offered = %store_id, "ignoring second store id");
                    return Ok(DatastoreChange::new());
                }
                let config = DatastoreConfig::new(store_id, self.schemas.clone());
                self.datastore = Some(Datastore::new(config)?);
                tracing::info!(%store_id, "store id assigned");
                self.request(Request::History, MessageBody::PatchHistoryRequest {});
                Ok(DatastoreChange::new())
            }
            (MessageBody::PatchHistoryReply { patch_history }, Some(Request::History)) => {
                tracing::debug!(patches = patch_history.len(), "applying patch history");
                self.apply_all(&patch_history)
            }
            (MessageBody::FetchPatchReply { patches }, Some(Request::Fetch)) => {
                self.apply_all(&patches)
            }
            (MessageBody::PatchBroadcast { patch }, _) => {
                if self.datastore.is_none() {
                    tracing::warn!(patch_id = %patch.patch_id, "broadcast before store id, ignored");
                    return Ok(DatastoreChange::new());
                }
                self.apply_all(std::slice::from_ref(&patch))
            }
            (_, kind) => {
                tracing::warn!(
                    msg_type,
                    msg_id = %msg.msg_id,
                    expected = ?kind,
                    "unexpected message ignored"
                );
                Ok(DatastoreChange::new())
            }
        }
    }

    /// Apply each transaction on its own. One that fails to apply is logged
    /// and skipped so the rest still land.
    fn apply_all(&mut self, transactions: &[Transaction]) -> Result<DatastoreChange, EngineError> {
        let datastore = self.datastore.as_mut().ok_or(EngineError::NotConnected)?;
        let mut merged = DatastoreChange::new();
        for transaction in transactions {
            let change = match datastore.apply_transaction(transaction) {
                Ok(change) => change,
                Err(e) => {
                    tracing::warn!(
                        patch_id = %transaction.patch_id,
                        store = %transaction.store_id,
                        error = %e,
                        "skipping transaction that failed to apply"
                    );
                    continue;
                }
            };
            for (schema, table) in change {
                for (record, fields) in table {
                    for (field, change) in fields {
                        insert_change(&mut merged, &schema, &record, &field, change)?;
                    }
                }
            }
        }
        Ok(merged)
    }
}
