use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::ReservationError;
use crate::models::{
    format_time_label, parse_time_label, ScheduleFilter, Slot, SlotExpectation, SlotKey,
    SlotState, SlotTable,
};
use crate::services::store::{conflict, ReservationStore};

const META_FIELD: &str = "meta";

/// Insert-if-absent for a whole table, plus its index entry.
const PUBLISH_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], 'meta') == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'meta', ARGV[2])
for i = 3, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('SADD', KEYS[2], ARGV[1])
return 1
"#;

/// Swap one slot field only if it still holds the exact value the caller
/// validated, keeping the hold index in step.
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current ~= ARGV[2] then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
if ARGV[5] == '' then
  redis.call('ZREM', KEYS[2], ARGV[4])
else
  redis.call('ZADD', KEYS[2], ARGV[5], ARGV[4])
end
return 1
"#;

#[derive(Debug, Serialize, Deserialize)]
struct TableMeta {
    doctor_id: Uuid,
    date: NaiveDate,
    specialty: Option<String>,
    times: Vec<String>,
}

/// Redis-backed store. Layout, under a namespace prefix:
/// - `{ns}:slot_table:{doctor}:{date}` hash: `meta` plus one JSON slot per `HH:MM` field
/// - `{ns}:slot_tables` set of `{doctor}:{date}`
/// - `{ns}:slot_holds` sorted set of `{doctor}|{date}|{HH:MM}` scored by hold expiry (ms)
pub struct RedisReservationStore {
    pool: Pool,
    namespace: String,
    publish_script: Script,
    transition_script: Script,
}

impl RedisReservationStore {
    pub async fn new(config: &AppConfig) -> Result<Self, ReservationError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ReservationError::Persistence(format!("failed to create Redis pool: {}", e)))?;

        let store = Self::with_pool(pool, "amae");
        store.ping().await?;
        info!("Redis reservation store initialized successfully");
        Ok(store)
    }

    pub fn with_pool(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            publish_script: Script::new(PUBLISH_SCRIPT),
            transition_script: Script::new(TRANSITION_SCRIPT),
        }
    }

    pub async fn ping(&self) -> Result<(), ReservationError> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_connection(&self) -> Result<Connection, ReservationError> {
        Ok(self.pool.get().await?)
    }

    fn table_member(doctor_id: Uuid, date: NaiveDate) -> String {
        format!("{}:{}", doctor_id, date)
    }

    fn table_key(&self, doctor_id: Uuid, date: NaiveDate) -> String {
        format!("{}:slot_table:{}", self.namespace, Self::table_member(doctor_id, date))
    }

    fn index_key(&self) -> String {
        format!("{}:slot_tables", self.namespace)
    }

    fn holds_key(&self) -> String {
        format!("{}:slot_holds", self.namespace)
    }

    fn hold_member(key: &SlotKey) -> String {
        format!("{}|{}|{}", key.doctor_id, key.date, format_time_label(&key.time))
    }

    fn parse_hold_member(member: &str) -> Option<SlotKey> {
        let mut parts = member.split('|');
        let doctor_id = Uuid::parse_str(parts.next()?).ok()?;
        let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let time = parse_time_label(parts.next()?).ok()?;
        Some(SlotKey::new(doctor_id, date, time))
    }

    fn parse_table_member(member: &str) -> Option<(Uuid, NaiveDate)> {
        let (doctor, date) = member.split_once(':')?;
        Some((
            Uuid::parse_str(doctor).ok()?,
            NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
        ))
    }

    async fn read_table(
        &self,
        conn: &mut Connection,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotTable, ReservationError> {
        let fields: HashMap<String, String> = conn.hgetall(self.table_key(doctor_id, date)).await?;

        let meta_raw = fields.get(META_FIELD).ok_or_else(|| {
            ReservationError::NotFound(format!("schedule for doctor {} on {}", doctor_id, date))
        })?;
        let meta: TableMeta = serde_json::from_str(meta_raw)?;

        let slots = meta
            .times
            .iter()
            .map(|label| {
                let raw = fields.get(label).ok_or_else(|| {
                    ReservationError::Persistence(format!("slot {} missing from table record", label))
                })?;
                Ok(serde_json::from_str::<Slot>(raw)?)
            })
            .collect::<Result<Vec<Slot>, ReservationError>>()?;

        Ok(SlotTable {
            doctor_id: meta.doctor_id,
            date: meta.date,
            specialty: meta.specialty,
            slots,
        })
    }

    async fn read_slot_raw(
        &self,
        conn: &mut Connection,
        key: &SlotKey,
    ) -> Result<String, ReservationError> {
        let raw: Option<String> = conn
            .hget(self.table_key(key.doctor_id, key.date), format_time_label(&key.time))
            .await?;
        raw.ok_or_else(|| ReservationError::NotFound(format!("slot {}", key)))
    }
}

#[async_trait]
impl ReservationStore for RedisReservationStore {
    async fn publish(&self, table: SlotTable) -> Result<(), ReservationError> {
        let mut conn = self.get_connection().await?;

        let meta = TableMeta {
            doctor_id: table.doctor_id,
            date: table.date,
            specialty: table.specialty.clone(),
            times: table.slots.iter().map(|slot| format_time_label(&slot.time)).collect(),
        };

        let mut invocation = self.publish_script.key(self.table_key(table.doctor_id, table.date));
        invocation
            .key(self.index_key())
            .arg(Self::table_member(table.doctor_id, table.date))
            .arg(serde_json::to_string(&meta)?);
        for slot in &table.slots {
            invocation
                .arg(format_time_label(&slot.time))
                .arg(serde_json::to_string(slot)?);
        }

        let inserted: i32 = invocation.invoke_async(&mut conn).await?;
        if inserted == 0 {
            return Err(ReservationError::DuplicateSchedule {
                doctor_id: table.doctor_id,
                date: table.date,
            });
        }

        debug!("Published {} slots for doctor {} on {}", table.slots.len(), table.doctor_id, table.date);
        Ok(())
    }

    async fn load_table(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotTable, ReservationError> {
        let mut conn = self.get_connection().await?;
        self.read_table(&mut conn, doctor_id, date).await
    }

    async fn load_slot(&self, key: &SlotKey) -> Result<Slot, ReservationError> {
        let mut conn = self.get_connection().await?;
        let raw = self.read_slot_raw(&mut conn, key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn transition(
        &self,
        key: &SlotKey,
        expected: &SlotExpectation,
        next: SlotState,
        now: DateTime<Utc>,
    ) -> Result<Slot, ReservationError> {
        let mut conn = self.get_connection().await?;

        let observed_raw = self.read_slot_raw(&mut conn, key).await?;
        let observed: Slot = serde_json::from_str(&observed_raw)?;
        if !expected.matches(&observed.state, now) {
            return Err(conflict(key, expected, &observed.state));
        }

        let hold_score = match &next {
            SlotState::Held { hold_expires_at, .. } => hold_expires_at.timestamp_millis().to_string(),
            _ => String::new(),
        };
        let updated = Slot {
            time: key.time,
            state: next,
        };

        let swapped: i32 = self
            .transition_script
            .key(self.table_key(key.doctor_id, key.date))
            .key(self.holds_key())
            .arg(format_time_label(&key.time))
            .arg(&observed_raw)
            .arg(serde_json::to_string(&updated)?)
            .arg(Self::hold_member(key))
            .arg(hold_score)
            .invoke_async(&mut conn)
            .await?;

        if swapped == 0 {
            return Err(ReservationError::Conflict {
                slot: key.clone(),
                expected: expected.to_string(),
                found: "a concurrent update".to_string(),
            });
        }

        Ok(updated)
    }

    async fn list_tables(&self, filter: &ScheduleFilter) -> Result<Vec<SlotTable>, ReservationError> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn.smembers(self.index_key()).await?;

        let mut tables = Vec::new();
        for member in members {
            let Some((doctor_id, date)) = Self::parse_table_member(&member) else {
                warn!("Skipping malformed schedule index entry {}", member);
                continue;
            };
            if filter.doctor_id.is_some_and(|id| id != doctor_id)
                || filter.date.is_some_and(|wanted| wanted != date)
            {
                continue;
            }

            let table = self.read_table(&mut conn, doctor_id, date).await?;
            if table.matches(filter) {
                tables.push(table);
            }
        }

        tables.sort_by(|a, b| (a.date, a.doctor_id).cmp(&(b.date, b.doctor_id)));
        Ok(tables)
    }

    async fn expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SlotKey, String)>, ReservationError> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn
            .zrangebyscore(self.holds_key(), "-inf", now.timestamp_millis())
            .await?;

        let mut expired = Vec::with_capacity(members.len());
        for member in members {
            let Some(key) = Self::parse_hold_member(&member) else {
                warn!("Skipping malformed hold index entry {}", member);
                continue;
            };

            let slot: Slot = match self.read_slot_raw(&mut conn, &key).await {
                Ok(raw) => serde_json::from_str(&raw)?,
                Err(ReservationError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if let SlotState::Held { held_by, hold_expires_at } = slot.state {
                if hold_expires_at <= now {
                    expired.push((key, held_by));
                }
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_hold_member_round_trips_through_parser() {
        let key = SlotKey::new(
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        );
        let member = RedisReservationStore::hold_member(&key);
        assert!(member.ends_with("|2025-03-01|09:30"));
        assert_eq!(RedisReservationStore::parse_hold_member(&member), Some(key));
        assert_eq!(RedisReservationStore::parse_hold_member("garbage"), None);
    }
}
