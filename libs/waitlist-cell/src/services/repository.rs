use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::WaitlistError;
use crate::models::WaitlistEntry;

/// Storage for waitlist entries. Entries are never deleted.
#[async_trait]
pub trait WaitlistRepository: Send + Sync {
    /// Stores a new entry, assigning its creation sequence.
    async fn insert(&self, entry: WaitlistEntry) -> Result<WaitlistEntry, WaitlistError>;

    async fn get(&self, id: Uuid) -> Result<WaitlistEntry, WaitlistError>;

    /// Overwrites an existing entry.
    async fn update(&self, entry: &WaitlistEntry) -> Result<(), WaitlistError>;

    /// Active entries for `doctor_id` that include `date`, in serving order.
    async fn candidates(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<WaitlistEntry>, WaitlistError>;

    /// Every entry the patient ever created, oldest first.
    async fn list_for_patient(&self, patient_id: &str) -> Result<Vec<WaitlistEntry>, WaitlistError>;

    async fn active(&self) -> Result<Vec<WaitlistEntry>, WaitlistError>;
}

fn select_candidates(
    entries: impl Iterator<Item = WaitlistEntry>,
    doctor_id: Uuid,
    date: NaiveDate,
) -> Vec<WaitlistEntry> {
    let mut candidates: Vec<WaitlistEntry> = entries
        .filter(|entry| entry.is_active() && entry.wants(doctor_id, date))
        .collect();
    candidates.sort_by(WaitlistEntry::queue_order);
    candidates
}

// ==============================================================================
// IN-MEMORY REPOSITORY
// ==============================================================================

#[derive(Default)]
pub struct InMemoryWaitlistRepository {
    entries: RwLock<HashMap<Uuid, WaitlistEntry>>,
    sequence: AtomicU64,
}

impl InMemoryWaitlistRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaitlistRepository for InMemoryWaitlistRepository {
    async fn insert(&self, mut entry: WaitlistEntry) -> Result<WaitlistEntry, WaitlistError> {
        entry.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.write().await.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(WaitlistError::NotFound(id))
    }

    async fn update(&self, entry: &WaitlistEntry) -> Result<(), WaitlistError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(WaitlistError::NotFound(entry.id)),
        }
    }

    async fn candidates(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let entries = self.entries.read().await;
        Ok(select_candidates(entries.values().cloned(), doctor_id, date))
    }

    async fn list_for_patient(&self, patient_id: &str) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let mut found: Vec<WaitlistEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.patient_id == patient_id)
            .cloned()
            .collect();
        found.sort_by_key(|entry| entry.sequence);
        Ok(found)
    }

    async fn active(&self) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_active())
            .cloned()
            .collect())
    }
}

// ==============================================================================
// REDIS REPOSITORY
// ==============================================================================

/// Entries as JSON in one hash keyed by id, with an INCR counter for the
/// creation sequence.
pub struct RedisWaitlistRepository {
    pool: Pool,
    namespace: String,
}

impl RedisWaitlistRepository {
    pub async fn new(config: &AppConfig) -> Result<Self, WaitlistError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| WaitlistError::Persistence(format!("failed to create Redis pool: {}", e)))?;

        let repository = Self::with_pool(pool, "amae");
        let mut conn = repository.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Redis waitlist repository initialized successfully");
        Ok(repository)
    }

    pub fn with_pool(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    async fn get_connection(&self) -> Result<Connection, WaitlistError> {
        Ok(self.pool.get().await?)
    }

    fn entries_key(&self) -> String {
        format!("{}:waitlist:entries", self.namespace)
    }

    fn sequence_key(&self) -> String {
        format!("{}:waitlist:sequence", self.namespace)
    }

    async fn all_entries(&self) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn.hvals(self.entries_key()).await?;

        Ok(raw
            .iter()
            .filter_map(|value| match serde_json::from_str::<WaitlistEntry>(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable waitlist entry: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl WaitlistRepository for RedisWaitlistRepository {
    async fn insert(&self, mut entry: WaitlistEntry) -> Result<WaitlistEntry, WaitlistError> {
        let mut conn = self.get_connection().await?;
        entry.sequence = conn.incr(self.sequence_key(), 1u64).await?;

        let created: bool = conn
            .hset_nx(self.entries_key(), entry.id.to_string(), serde_json::to_string(&entry)?)
            .await?;
        if !created {
            return Err(WaitlistError::Conflict(format!("waitlist entry {} already exists", entry.id)));
        }
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.hget(self.entries_key(), id.to_string()).await?;
        let raw = raw.ok_or(WaitlistError::NotFound(id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn update(&self, entry: &WaitlistEntry) -> Result<(), WaitlistError> {
        let mut conn = self.get_connection().await?;
        let exists: bool = conn.hexists(self.entries_key(), entry.id.to_string()).await?;
        if !exists {
            return Err(WaitlistError::NotFound(entry.id));
        }
        let _: () = conn
            .hset(self.entries_key(), entry.id.to_string(), serde_json::to_string(entry)?)
            .await?;
        Ok(())
    }

    async fn candidates(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let entries = self.all_entries().await?;
        Ok(select_candidates(entries.into_iter(), doctor_id, date))
    }

    async fn list_for_patient(&self, patient_id: &str) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let mut found: Vec<WaitlistEntry> = self
            .all_entries()
            .await?
            .into_iter()
            .filter(|entry| entry.patient_id == patient_id)
            .collect();
        found.sort_by_key(|entry| entry.sequence);
        Ok(found)
    }

    async fn active(&self) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        Ok(self
            .all_entries()
            .await?
            .into_iter()
            .filter(|entry| entry.is_active())
            .collect())
    }
}
