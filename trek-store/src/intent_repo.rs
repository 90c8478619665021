use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

use trek_core::intent::{BookingIntent, IntentStatus};
use trek_core::repository::IntentStore;
use trek_core::EngineError;

fn redis_err(e: redis::RedisError) -> EngineError {
    EngineError::Store(e.to_string())
}

/// Redis-backed intent store. Keys expire with the hold TTL; a `Confirmed`
/// intent is persisted so the record survives the hold window for audit.
#[derive(Clone)]
pub struct RedisIntentStore {
    client: redis::Client,
}

impl RedisIntentStore {
    pub fn new(connection_string: &str) -> Result<Self, EngineError> {
        let client = redis::Client::open(connection_string).map_err(redis_err)?;
        Ok(Self { client })
    }

    fn key(id: Uuid) -> String {
        format!("intent:{}", id)
    }
}

#[async_trait]
impl IntentStore for RedisIntentStore {
    async fn put(&self, intent: &BookingIntent) -> Result<(), EngineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        let payload = serde_json::to_string(intent)?;
        // Keep the key a little past the logical deadline so a just-expired
        // intent can still be read and reported as expired.
        let ttl = (intent.expires_at - intent.created_at).num_seconds().max(0) as u64 + 60;
        conn.set_ex::<_, _, ()>(Self::key(intent.id), payload, ttl)
            .await
            .map_err(redis_err)?;
        info!(intent_id = %intent.id, "intent hold set");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BookingIntent>, EngineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        let payload: Option<String> = conn.get(Self::key(id)).await.map_err(redis_err)?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn claim(&self, id: Uuid) -> Result<(), EngineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        let key = Self::key(id);
        let ttl: i64 = conn.ttl(&key).await.map_err(redis_err)?;
        if ttl == -2 {
            return Err(EngineError::NotFound(format!("intent {}", id)));
        }
        // SET NX makes the claim single-winner; the marker outlives the hold
        // window slightly so a crash between claim and the status write
        // cannot resurrect the intent.
        let claim_key = format!("{}:claim", key);
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&claim_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.max(0) as u64 + 60)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        if claimed.is_none() {
            return Err(EngineError::conflict(format!(
                "intent {} is already attached to a booking",
                id
            )));
        }
        info!(intent_id = %id, "intent claimed");
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: IntentStatus) -> Result<(), EngineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)?;
        let key = Self::key(id);
        let payload: Option<String> = conn.get(&key).await.map_err(redis_err)?;
        let payload = payload.ok_or_else(|| EngineError::NotFound(format!("intent {}", id)))?;
        let mut intent: BookingIntent = serde_json::from_str(&payload)?;
        intent.status = status;
        let payload = serde_json::to_string(&intent)?;

        if status == IntentStatus::Confirmed {
            conn.set::<_, _, ()>(&key, payload).await.map_err(redis_err)?;
            conn.persist::<_, ()>(&key).await.map_err(redis_err)?;
        } else {
            // KEEPTTL keeps the remaining hold window intact.
            redis::cmd("SET")
                .arg(&key)
                .arg(payload)
                .arg("KEEPTTL")
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_err)?;
        }
        Ok(())
    }
}
