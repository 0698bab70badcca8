use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use concord_core::{DatastoreChange, FieldUpdate, Message, StoreId};
use concord_engine::{Datastore, EngineError, Schema, SyncClient};

use crate::error::HarnessError;
use crate::relay::ConnectionId;

/// One collaborating datastore attached to a relay connection.
pub struct TestPeer {
    client: SyncClient,
    connection: ConnectionId,
    /// Every non-empty change produced by incoming messages, in order.
    remote_changes: Vec<DatastoreChange>,
}

impl TestPeer {
    pub fn new(schemas: Vec<Schema>, connection: ConnectionId) -> Result<Self, HarnessError> {
        let mut client = SyncClient::new(schemas)?;
        client.connect();
        Ok(Self {
            client,
            connection,
            remote_changes: Vec::new(),
        })
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn store_id(&self) -> Option<StoreId> {
        self.client.store_id()
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }

    pub fn datastore(&self) -> Result<&Datastore, HarnessError> {
        self.client
            .datastore()
            .ok_or(HarnessError::Engine(EngineError::NotConnected))
    }

    pub fn remote_changes(&self) -> &[DatastoreChange] {
        &self.remote_changes
    }

    /// Run a transaction. Its patch is queued until [`TestPeer::flush`].
    pub fn transact<F>(&mut self, f: F) -> Result<Option<DatastoreChange>, HarnessError>
    where
        F: FnOnce(&mut Datastore) -> Result<(), EngineError>,
    {
        Ok(self.client.transact(f)?)
    }

    /// Apply a single update in its own transaction.
    pub fn update(
        &mut self,
        schema: &str,
        record: &str,
        field: &str,
        update: FieldUpdate,
    ) -> Result<(), HarnessError> {
        self.transact(|ds| {
            ds.update(schema, record, field, update)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), HarnessError> {
        self.client.flush()?;
        Ok(())
    }

    pub fn field_value(
        &self,
        schema: &str,
        record: &str,
        field: &str,
    ) -> Result<JsonValue, HarnessError> {
        Ok(self.datastore()?.field_value(schema, record, field)?)
    }

    pub fn record(
        &self,
        schema: &str,
        record: &str,
    ) -> Result<Option<BTreeMap<String, JsonValue>>, HarnessError> {
        Ok(self.datastore()?.record(schema, record)?)
    }

    pub(crate) fn outgoing(&mut self) -> Vec<Message> {
        self.client.drain_outgoing()
    }

    pub(crate) fn receive(&mut self, msg: Message) -> Result<(), HarnessError> {
        let change = self.client.handle_message(msg)?;
        if !change.is_empty() {
            self.remote_changes.push(change);
        }
        Ok(())
    }
}
