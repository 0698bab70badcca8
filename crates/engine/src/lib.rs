pub mod config;
pub mod error;
pub mod sync;

pub use config::{DatastoreConfig, Schema};
pub use error::EngineError;
pub use sync::SyncClient;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use concord_core::transaction::{TableMap, insert_change};
use concord_core::{
    DatastoreChange, FieldChange, FieldSchema, FieldState, FieldUpdate, LogicalClock, StoreId,
    Transaction,
};

/// field name -> state
type Record = BTreeMap<String, FieldState>;
/// record id -> record
type Table = BTreeMap<String, Record>;

/// The outcome of a committed local transaction: the patch to broadcast and
/// the change to notify local subscribers with.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub transaction: Transaction,
    pub change: DatastoreChange,
}

struct OpenTransaction {
    transaction: Transaction,
    change: DatastoreChange,
    /// Records as they were before this transaction first touched them.
    originals: BTreeMap<(String, String), Option<Record>>,
}

/// Full persisted form of a datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreSnapshot {
    pub store_id: StoreId,
    pub version: LogicalClock,
    pub schemas: Vec<Schema>,
    pub tables: BTreeMap<String, TableMap<FieldState>>,
}

impl DatastoreSnapshot {
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// Owns every field of every record and serializes local transactions and
/// remote patches into a single apply loop.
pub struct Datastore {
    store_id: StoreId,
    clock: LogicalClock,
    schemas: BTreeMap<String, Schema>,
    tables: BTreeMap<String, Table>,
    open: Option<OpenTransaction>,
}

impl Datastore {
    pub fn new(config: DatastoreConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let tables = config
            .schemas
            .iter()
            .map(|s| (s.id.clone(), Table::new()))
            .collect();
        let schemas = config
            .schemas
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect::<BTreeMap<_, _>>();
        tracing::info!(store_id = %config.store_id, schemas = schemas.len(), "datastore initialized");
        Ok(Self {
            store_id: config.store_id,
            clock: LogicalClock::default(),
            schemas,
            tables,
            open: None,
        })
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Current clock value.
    pub fn version(&self) -> u64 {
        self.clock.value()
    }

    pub fn schema(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    pub fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    fn field_schema(&self, schema: &str, field: &str) -> Result<&FieldSchema, EngineError> {
        let s = self
            .schemas
            .get(schema)
            .ok_or_else(|| EngineError::UnknownSchema(schema.to_string()))?;
        s.fields.get(field).ok_or_else(|| EngineError::UnknownField {
            schema: schema.to_string(),
            field: field.to_string(),
        })
    }

    fn create_record(schema: &Schema) -> Record {
        schema
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.create_state()))
            .collect()
    }

    // ========================================================================
    // Local transactions
    // ========================================================================

    /// Open a transaction. Every update inside it shares one clock version.
    pub fn begin_transaction(&mut self) -> Result<(), EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionInProgress);
        }
        self.clock.increment();
        self.open = Some(OpenTransaction {
            transaction: Transaction::new(self.store_id, self.clock.value()),
            change: DatastoreChange::new(),
            originals: BTreeMap::new(),
        });
        tracing::trace!(version = self.clock.value(), "transaction opened");
        Ok(())
    }

    /// Apply a local update to one field. A failed update changes nothing and
    /// leaves the transaction open.
    pub fn update(
        &mut self,
        schema: &str,
        record: &str,
        field: &str,
        update: FieldUpdate,
    ) -> Result<FieldChange, EngineError> {
        let version = match &self.open {
            Some(open) => open.transaction.version,
            None => return Err(EngineError::NoTransaction),
        };
        let field_schema = self.field_schema(schema, field)?.clone();

        let existing = self.tables.get(schema).and_then(|t| t.get(record));
        let mut state = match existing.and_then(|r| r.get(field)) {
            Some(state) => state.clone(),
            None => field_schema.create_state(),
        };
        let (change, patch) =
            field_schema.apply_update(&mut state, update, version, self.store_id)?;

        let original = existing.cloned();
        let Some(open) = self.open.as_mut() else {
            return Err(EngineError::NoTransaction);
        };
        open.transaction.insert_patch(schema, record, field, patch)?;
        insert_change(&mut open.change, schema, record, field, change.clone())?;
        open.originals
            .entry((schema.to_string(), record.to_string()))
            .or_insert(original);

        self.store_state(schema, record, field, state)?;
        Ok(change)
    }

    fn store_state(
        &mut self,
        schema: &str,
        record: &str,
        field: &str,
        state: FieldState,
    ) -> Result<(), EngineError> {
        let layout = self
            .schemas
            .get(schema)
            .ok_or_else(|| EngineError::UnknownSchema(schema.to_string()))?;
        let table = self.tables.entry(schema.to_string()).or_default();
        let entry = table
            .entry(record.to_string())
            .or_insert_with(|| Self::create_record(layout));
        entry.insert(field.to_string(), state);
        Ok(())
    }

    /// Close the open transaction. Returns `None` when nothing was updated.
    pub fn end_transaction(&mut self) -> Result<Option<Committed>, EngineError> {
        let open = self.open.take().ok_or(EngineError::NoTransaction)?;
        if open.transaction.is_empty() {
            // Records created by no-op updates would exist on this store only.
            self.restore_originals(open.originals);
            tracing::trace!("empty transaction discarded");
            return Ok(None);
        }
        let change = prune_changes(open.change);
        tracing::debug!(
            patch_id = %open.transaction.patch_id,
            version = open.transaction.version,
            fields = open.transaction.field_patches().count(),
            "transaction committed"
        );
        Ok(Some(Committed {
            transaction: open.transaction,
            change,
        }))
    }

    /// Discard the open transaction and restore every record it touched.
    pub fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        let open = self.open.take().ok_or(EngineError::NoTransaction)?;
        self.restore_originals(open.originals);
        tracing::debug!(version = open.transaction.version, "transaction rolled back");
        Ok(())
    }

    fn restore_originals(&mut self, originals: BTreeMap<(String, String), Option<Record>>) {
        for ((schema, record), original) in originals {
            let Some(table) = self.tables.get_mut(&schema) else {
                continue;
            };
            match original {
                Some(r) => {
                    table.insert(record, r);
                }
                None => {
                    table.remove(&record);
                }
            }
        }
    }

    /// Run `f` inside a transaction. The transaction is rolled back if `f`
    /// fails.
    pub fn transact<F>(&mut self, f: F) -> Result<Option<Committed>, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<(), EngineError>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(()) => self.end_transaction(),
            Err(e) => {
                self.rollback_transaction()?;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Remote transactions
    // ========================================================================

    /// Apply a transaction authored by any store, possibly this one, possibly
    /// more than once. Either every field patch applies or none does.
    pub fn apply_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> Result<DatastoreChange, EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionInProgress);
        }

        let mut staged = Vec::new();
        for (schema, record, field, patch) in transaction.field_patches() {
            let field_schema = self.field_schema(schema, field)?;
            let mut state = match self
                .tables
                .get(schema)
                .and_then(|t| t.get(record))
                .and_then(|r| r.get(field))
            {
                Some(state) => state.clone(),
                None => field_schema.create_state(),
            };
            let change = field_schema.apply_patch(&mut state, patch)?;
            staged.push((schema, record, field, state, change));
        }

        self.clock.observe(&LogicalClock::new(transaction.version));

        let mut changes = DatastoreChange::new();
        for (schema, record, field, state, change) in staged {
            self.store_state(schema, record, field, state)?;
            if !change.is_empty() {
                insert_change(&mut changes, schema, record, field, change)?;
            }
        }
        tracing::debug!(
            patch_id = %transaction.patch_id,
            store = %transaction.store_id,
            version = transaction.version,
            changed_records = changes.values().map(|t| t.len()).sum::<usize>(),
            "transaction applied"
        );
        Ok(changes)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Ids of every record of `schema` that has been written.
    pub fn record_ids(&self, schema: &str) -> Result<Vec<&str>, EngineError> {
        let table = self
            .tables
            .get(schema)
            .ok_or_else(|| EngineError::UnknownSchema(schema.to_string()))?;
        Ok(table.keys().map(String::as_str).collect())
    }

    /// Field name -> current value, or `None` if the record was never written.
    pub fn record(
        &self,
        schema: &str,
        record: &str,
    ) -> Result<Option<BTreeMap<String, JsonValue>>, EngineError> {
        let table = self
            .tables
            .get(schema)
            .ok_or_else(|| EngineError::UnknownSchema(schema.to_string()))?;
        Ok(table.get(record).map(|r| {
            r.iter()
                .map(|(name, state)| (name.clone(), state.to_json()))
                .collect()
        }))
    }

    /// Current value of one field. Unwritten records read as initial values.
    pub fn field_value(
        &self,
        schema: &str,
        record: &str,
        field: &str,
    ) -> Result<JsonValue, EngineError> {
        let field_schema = self.field_schema(schema, field)?;
        let state = self
            .tables
            .get(schema)
            .and_then(|t| t.get(record))
            .and_then(|r| r.get(field));
        Ok(match state {
            Some(state) => state.to_json(),
            None => field_schema.create_state().to_json(),
        })
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot(&self) -> Result<DatastoreSnapshot, EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionInProgress);
        }
        Ok(DatastoreSnapshot {
            store_id: self.store_id,
            version: self.clock,
            schemas: self.schemas.values().cloned().collect(),
            tables: self.tables.clone(),
        })
    }

    pub fn restore(snapshot: DatastoreSnapshot) -> Result<Self, EngineError> {
        let mut datastore = Self::new(DatastoreConfig::new(snapshot.store_id, snapshot.schemas))?;
        for (schema, records) in &snapshot.tables {
            for (record, fields) in records {
                for (field, state) in fields {
                    let expected = datastore.field_schema(schema, field)?.kind();
                    if state.kind() != expected {
                        return Err(EngineError::Core(
                            concord_core::CoreError::FieldKindMismatch {
                                expected: expected.as_str(),
                                actual: state.kind().as_str(),
                            },
                        ));
                    }
                }
            }
        }
        for (schema, records) in snapshot.tables {
            for (record, fields) in records {
                for (field, state) in fields {
                    datastore.store_state(&schema, &record, &field, state)?;
                }
            }
        }
        datastore.clock = snapshot.version;
        Ok(datastore)
    }
}

/// Drop field changes that ended where they started, and the empty maps
/// left behind.
fn prune_changes(mut change: DatastoreChange) -> DatastoreChange {
    for table in change.values_mut() {
        for fields in table.values_mut() {
            fields.retain(|_, c| !c.is_empty());
        }
        table.retain(|_, fields| !fields.is_empty());
    }
    change.retain(|_, table| !table.is_empty());
    change
}
