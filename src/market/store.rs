//! Flat snapshot of market-value records: loaded once on start, written
//! through on every update. Not a queryable database.

use crate::config::StoreSpec;
use crate::models::MarketValueRecord;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

const REDIS_HASH: &str = "motorval:market_values";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(String),
    #[error("store payload invalid: {0}")]
    Serde(String),
    #[error("redis failed: {0}")]
    Redis(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<MarketValueRecord>, StoreError>;
    async fn put(&self, record: &MarketValueRecord) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

pub fn open_store(spec: &StoreSpec) -> Result<Arc<dyn RecordStore>, StoreError> {
    Ok(match spec {
        StoreSpec::Memory => Arc::new(MemoryStore::default()),
        StoreSpec::File(path) => Arc::new(JsonFileStore::new(path)),
        StoreSpec::Redis(url) => Arc::new(RedisStore::open(url)?),
    })
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, MarketValueRecord>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<MarketValueRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn put(&self, record: &MarketValueRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record.key.to_string(), record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().await.clear();
        Ok(())
    }
}

/// One JSON document holding every record, rewritten on each update.
pub struct JsonFileStore {
    path: PathBuf,
    snapshot: Mutex<BTreeMap<String, MarketValueRecord>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Mutex::new(BTreeMap::new()),
        }
    }

    async fn persist(&self, snapshot: &BTreeMap<String, MarketValueRecord>) -> Result<(), StoreError> {
        let records: Vec<&MarketValueRecord> = snapshot.values().collect();
        let body =
            serde_json::to_vec_pretty(&records).map_err(|err| StoreError::Serde(err.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::Io(err.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|err| StoreError::Io(err.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StoreError::Io(err.to_string()))
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<MarketValueRecord>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err.to_string())),
        };
        let records: Vec<MarketValueRecord> =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Serde(err.to_string()))?;
        let mut snapshot = self.snapshot.lock().await;
        for record in &records {
            snapshot.insert(record.key.to_string(), record.clone());
        }
        Ok(records)
    }

    async fn put(&self, record: &MarketValueRecord) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.insert(record.key.to_string(), record.clone());
        self.persist(&snapshot).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.clear();
        self.persist(&snapshot).await
    }
}

/// Records kept as JSON fields of a single Redis hash.
pub struct RedisStore {
    client: redis::Client,
    hash: String,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|err| StoreError::Redis(err.to_string()))?;
        Ok(Self {
            client,
            hash: REDIS_HASH.to_string(),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn load_all(&self) -> Result<Vec<MarketValueRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: HashMap<String, String> = conn
            .hgetall(&self.hash)
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))?;
        Ok(decode_records(raw))
    }

    async fn put(&self, record: &MarketValueRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record).map_err(|err| StoreError::Serde(err.to_string()))?;
        let mut conn = self.connection().await?;
        conn.hset::<_, _, _, ()>(&self.hash, record.key.to_string(), json)
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(&self.hash)
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))
    }
}

/// Skips (and logs) fields that no longer parse instead of failing the load.
fn decode_records(raw: HashMap<String, String>) -> Vec<MarketValueRecord> {
    raw.into_iter()
        .filter_map(|(field, json)| match serde_json::from_str::<MarketValueRecord>(&json) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(target = "motorval.store", field = %field, error = %err, "skipping unreadable record");
                None
            }
        })
        .collect()
}
