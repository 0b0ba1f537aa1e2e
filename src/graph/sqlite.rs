//! SQLite-backed graph store adapter.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::schema::{Entity, EntityTier, Signal, TierMetadata};

use super::schema::{initialize_schema, is_initialized};
use super::store::GraphStore;

/// Durable single-node [`GraphStore`].
///
/// Signals are stored as their JSON payload alongside the columns the
/// read path filters on.
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::store_unavailable(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::store_unavailable(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::store_unavailable(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::store_unavailable(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {e}")))?;
        f(&conn).map_err(|e| Error::store_unavailable(e.to_string()))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn get_entity_signals(
        &self,
        entity_id: &str,
        time_horizon_days: i64,
    ) -> Result<Vec<Signal>> {
        let cutoff = (Utc::now() - Duration::days(time_horizon_days)).to_rfc3339();

        let payloads: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM signals
                 WHERE entity_id = ?1 AND first_seen >= ?2
                 ORDER BY first_seen DESC",
            )?;
            let rows = stmt.query_map(params![entity_id, cutoff], |row| row.get(0))?;
            rows.collect()
        })?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(Error::from))
            .collect()
    }

    async fn upsert_signal(&self, signal: &Signal) -> Result<()> {
        signal.schema_check()?;
        let payload = serde_json::to_string(signal)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO signals
                    (id, entity_id, signal_type, confidence, first_seen,
                     validated, validation_pass, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    entity_id = excluded.entity_id,
                    signal_type = excluded.signal_type,
                    confidence = excluded.confidence,
                    first_seen = excluded.first_seen,
                    validated = excluded.validated,
                    validation_pass = excluded.validation_pass,
                    payload = excluded.payload",
                params![
                    signal.id,
                    signal.entity_id,
                    signal.signal_type.to_string(),
                    signal.confidence,
                    signal.first_seen.to_rfc3339(),
                    signal.validated as i32,
                    signal.validation_pass as i32,
                    payload,
                ],
            )?;
            Ok(())
        })
    }

    async fn get_all_entities(&self) -> Result<Vec<Entity>> {
        let rows: Vec<(String, String, String, Option<String>)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_id, entity_name, tier, tier_metadata
                 FROM entities ORDER BY entity_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect()
        })?;

        rows.into_iter()
            .map(|(entity_id, entity_name, tier, metadata)| {
                let tier: EntityTier = tier.parse()?;
                let tier_metadata = metadata
                    .map(|m| serde_json::from_str::<TierMetadata>(&m))
                    .transpose()?;
                Ok(Entity {
                    entity_id,
                    entity_name,
                    tier,
                    tier_metadata,
                })
            })
            .collect()
    }

    async fn update_entity_tier(
        &self,
        entity_id: &str,
        tier: EntityTier,
        metadata: TierMetadata,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(&metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE entities SET tier = ?2, tier_metadata = ?3 WHERE entity_id = ?1",
                params![entity_id, tier.to_string(), metadata_json],
            )?;
            Ok(())
        })
    }
}

impl SqliteGraphStore {
    /// Seed an entity row. Entities are otherwise created by upstream ingest.
    pub fn insert_entity(&self, entity: &Entity) -> Result<()> {
        let metadata = entity
            .tier_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (entity_id, entity_name, tier, tier_metadata)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_id) DO UPDATE SET
                    entity_name = excluded.entity_name",
                params![
                    entity.entity_id,
                    entity.entity_name,
                    entity.tier.to_string(),
                    metadata,
                ],
            )?;
            Ok(())
        })
    }
}
