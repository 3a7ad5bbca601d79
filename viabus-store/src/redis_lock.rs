use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::repository::SeatLockStore;

/// Interactive seat locks on Redis. One key per (trip, seat) holding the
/// session id with a native TTL, plus a per-session set so release does
/// not need the seat list. Acquisition is a single Lua script, so the
/// check and the writes for the whole seat set execute atomically on the
/// server; there is no check-then-set window.
pub struct RedisSeatLockStore {
    client: redis::Client,
}

const ACQUIRE_ALL: &str = r#"
local session = ARGV[1]
local ttl = tonumber(ARGV[2])
local n = #KEYS - 1
for i = 1, n do
  local v = redis.call('GET', KEYS[i])
  if v and v ~= session then
    return 0
  end
end
for i = 1, n do
  redis.call('SET', KEYS[i], session, 'PX', ttl)
end
local sess = KEYS[#KEYS]
for i = 3, #ARGV do
  redis.call('SADD', sess, ARGV[i])
end
redis.call('PEXPIRE', sess, ttl)
return 1
"#;

const UNLOCK_IF_HELD: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn redis_err(context: &str, e: redis::RedisError) -> CoreError {
    CoreError::internal(context, e)
}

fn seat_key(trip_id: Uuid, seat_id: Uuid) -> String {
    format!("seatlock:{}:{}", trip_id, seat_id)
}

fn session_key(session_id: &str) -> String {
    format!("seatlock:session:{}", session_id)
}

impl RedisSeatLockStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> CoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("redis connection", e))
    }
}

#[async_trait]
impl SeatLockStore for RedisSeatLockStore {
    async fn try_lock_all(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
        ttl: Duration,
    ) -> CoreResult<bool> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(ACQUIRE_ALL);
        let mut invocation = script.prepare_invoke();
        for seat_id in seat_ids {
            invocation.key(seat_key(trip_id, *seat_id));
        }
        invocation.key(session_key(session_id));
        invocation.arg(session_id).arg(ttl.as_millis() as u64);
        for seat_id in seat_ids {
            invocation.arg(format!("{}:{}", trip_id, seat_id));
        }

        let acquired: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("acquire seat locks", e))?;
        Ok(acquired == 1)
    }

    async fn unlock_session(&self, session_id: &str) -> CoreResult<()> {
        let mut conn = self.conn().await?;
        let sess = session_key(session_id);
        let members: Vec<String> = conn
            .smembers(&sess)
            .await
            .map_err(|e| redis_err("read session locks", e))?;

        let script = redis::Script::new(UNLOCK_IF_HELD);
        for member in members {
            let Some((trip, seat)) = member.split_once(':') else {
                warn!(member, "malformed session lock member");
                continue;
            };
            let key = format!("seatlock:{}:{}", trip, seat);
            let _: i64 = script
                .key(key)
                .arg(session_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_err("release seat lock", e))?;
        }
        let _: i64 = conn
            .del(&sess)
            .await
            .map_err(|e| redis_err("delete session set", e))?;
        Ok(())
    }

    async fn unlock_seats(
        &self,
        trip_id: Uuid,
        seat_ids: &[Uuid],
        session_id: &str,
    ) -> CoreResult<()> {
        let mut conn = self.conn().await?;
        let sess = session_key(session_id);
        let script = redis::Script::new(UNLOCK_IF_HELD);
        for seat_id in seat_ids {
            let _: i64 = script
                .key(seat_key(trip_id, *seat_id))
                .arg(session_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_err("release seat lock", e))?;
            let _: i64 = conn
                .srem(&sess, format!("{}:{}", trip_id, seat_id))
                .await
                .map_err(|e| redis_err("trim session set", e))?;
        }
        Ok(())
    }

    async fn locked_seats(&self, trip_id: Uuid) -> CoreResult<HashSet<Uuid>> {
        let mut conn = self.conn().await?;
        let pattern = format!("seatlock:{}:*", trip_id);
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(pattern)
                .await
                .map_err(|e| redis_err("scan seat locks", e))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut seats = HashSet::new();
        for key in keys {
            if let Some(seat) = key.rsplit(':').next() {
                match seat.parse::<Uuid>() {
                    Ok(id) => {
                        seats.insert(id);
                    }
                    Err(_) => warn!(key, "seat lock key with non-uuid seat segment"),
                }
            }
        }
        Ok(seats)
    }

    async fn holder(&self, trip_id: Uuid, seat_id: Uuid) -> CoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(seat_key(trip_id, seat_id))
            .await
            .map_err(|e| redis_err("read seat lock holder", e))
    }

    async fn purge_expired(&self) -> CoreResult<u64> {
        // Redis expires lock keys natively; nothing to purge.
        Ok(0)
    }
}
