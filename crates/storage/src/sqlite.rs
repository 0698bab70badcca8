use rusqlite::{Connection, OptionalExtension};

use concord_core::{LogicalClock, PatchId, StoreId, Transaction};

use crate::error::StorageError;
use crate::traits::PatchStore;

fn encode(transaction: &Transaction) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec_named(transaction).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode(payload: &[u8]) -> Result<Transaction, StorageError> {
    rmp_serde::from_slice(payload).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub struct SqlitePatchStore {
    conn: Connection,
}

impl SqlitePatchStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn read_payloads(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let payloads = stmt
            .query_map(params, |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads.iter().map(|p| decode(p)).collect()
    }
}

impl PatchStore for SqlitePatchStore {
    fn append_patch(&mut self, transaction: &Transaction) -> Result<bool, StorageError> {
        let payload = encode(transaction)?;
        let checksum = blake3::hash(&payload);
        let patch_id = transaction.patch_id;

        let tx = self.conn.transaction()?;
        let existing: Option<Vec<u8>> = tx
            .query_row(
                "SELECT checksum FROM patches WHERE patch_id = ?1",
                rusqlite::params![patch_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(stored) = existing {
            if stored.as_slice() == checksum.as_bytes().as_slice() {
                tracing::debug!(%patch_id, "patch already stored");
                return Ok(false);
            }
            tracing::warn!(%patch_id, "patch id reused with different content");
            return Err(StorageError::PatchIdCollision {
                patch_id: patch_id.to_string(),
            });
        }

        tx.execute(
            "INSERT INTO patches (patch_id, store_id, version, payload, checksum) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                patch_id.as_bytes().as_slice(),
                transaction.store_id.get(),
                LogicalClock::new(transaction.version).to_bytes(),
                payload,
                checksum.as_bytes().as_slice(),
            ],
        )?;
        tx.commit()?;

        tracing::debug!(%patch_id, store = %transaction.store_id, version = transaction.version, "patch stored");
        Ok(true)
    }

    fn get_patch(&self, patch_id: PatchId) -> Result<Option<Transaction>, StorageError> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM patches WHERE patch_id = ?1",
                rusqlite::params![patch_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| decode(&p)).transpose()
    }

    fn get_patches(&self, patch_ids: &[PatchId]) -> Result<Vec<Transaction>, StorageError> {
        let mut found = Vec::with_capacity(patch_ids.len());
        for &patch_id in patch_ids {
            match self.get_patch(patch_id)? {
                Some(transaction) => found.push(transaction),
                None => tracing::debug!(%patch_id, "requested patch not stored"),
            }
        }
        Ok(found)
    }

    fn history(&self) -> Result<Vec<Transaction>, StorageError> {
        self.read_payloads("SELECT payload FROM patches ORDER BY rowid", [])
    }

    fn patch_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patches", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn allocate_store_id(&mut self) -> Result<StoreId, StorageError> {
        self.conn.execute("INSERT INTO stores DEFAULT VALUES", [])?;
        let raw = self.conn.last_insert_rowid();
        let id = u32::try_from(raw).map_err(|_| StorageError::StoreIdsExhausted)?;
        tracing::info!(store_id = id, "allocated store id");
        Ok(StoreId::new(id))
    }
}
