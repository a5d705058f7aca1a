use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promo_core::{CoreError, CoreResult, TransitionQueue};
use promo_shared::{job_key, TransitionJob, TransitionKind};
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};
use uuid::Uuid;

const DUE_KEY: &str = "promo:transitions:due";
const JOBS_KEY: &str = "promo:transitions:jobs";
const INFLIGHT_KEY: &str = "promo:transitions:inflight";
const LEASED_KEY: &str = "promo:transitions:leased";

// KEYS: due, jobs, inflight, leased
// ARGV: now_ms, limit, lease_deadline_ms
const CLAIM_SCRIPT: &str = r#"
local expired = redis.call("ZRANGEBYSCORE", KEYS[3], "-inf", ARGV[1])
for _, id in ipairs(expired) do
    local body = redis.call("HGET", KEYS[4], id)
    redis.call("ZREM", KEYS[3], id)
    redis.call("HDEL", KEYS[4], id)
    if body then
        local job = cjson.decode(body)
        local key = job.offer_id .. ":" .. job.kind
        if redis.call("ZSCORE", KEYS[1], key) == false then
            redis.call("HSET", KEYS[2], key, body)
            redis.call("ZADD", KEYS[1], ARGV[1], key)
        end
    end
end

local keys = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, tonumber(ARGV[2]))
local claimed = {}
for _, key in ipairs(keys) do
    local body = redis.call("HGET", KEYS[2], key)
    redis.call("ZREM", KEYS[1], key)
    redis.call("HDEL", KEYS[2], key)
    if body then
        local job = cjson.decode(body)
        job.attempts = job.attempts + 1
        local leased = cjson.encode(job)
        redis.call("ZADD", KEYS[3], ARGV[3], job.id)
        redis.call("HSET", KEYS[4], job.id, leased)
        table.insert(claimed, leased)
    end
end
return claimed
"#;

// KEYS: due, jobs
// ARGV: job key, job body, version, run_at_ms
const SCHEDULE_SCRIPT: &str = r#"
local current = redis.call("HGET", KEYS[2], ARGV[1])
if current then
    local pending = cjson.decode(current)
    if (tonumber(pending.version) or 0) > tonumber(ARGV[3]) then
        return 0
    end
end
redis.call("HSET", KEYS[2], ARGV[1], ARGV[2])
redis.call("ZADD", KEYS[1], ARGV[4], ARGV[1])
return 1
"#;

// KEYS: due, jobs
// ARGV: job key
const CANCEL_SCRIPT: &str = r#"
if redis.call("ZREM", KEYS[1], ARGV[1]) == 1 then
    redis.call("HDEL", KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

// KEYS: due, jobs, inflight, leased
// ARGV: job id, job key, job body, run_at_ms
const RETRY_SCRIPT: &str = r#"
redis.call("ZREM", KEYS[3], ARGV[1])
redis.call("HDEL", KEYS[4], ARGV[1])
if redis.call("ZSCORE", KEYS[1], ARGV[2]) == false then
    redis.call("HSET", KEYS[2], ARGV[2], ARGV[3])
    redis.call("ZADD", KEYS[1], ARGV[4], ARGV[2])
    return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> CoreResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(queue_error)
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn queue_error(err: redis::RedisError) -> CoreError {
    CoreError::SchedulingFailed(err.to_string())
}

fn encode(job: &TransitionJob) -> CoreResult<String> {
    serde_json::to_string(job).map_err(|e| CoreError::SchedulingFailed(e.to_string()))
}

/// Transition queue on Redis sorted sets, scored by epoch millis.
/// Pending jobs are keyed by `offer_id:kind`, so scheduling the same key
/// again replaces the pending job unless it was planned from a newer
/// offer version.
#[derive(Clone)]
pub struct RedisTransitionQueue {
    redis: RedisClient,
}

impl RedisTransitionQueue {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl TransitionQueue for RedisTransitionQueue {
    async fn schedule(&self, job: &TransitionJob) -> CoreResult<bool> {
        let mut conn = self.redis.connection().await?;

        let stored: i64 = redis::Script::new(SCHEDULE_SCRIPT)
            .key(DUE_KEY)
            .key(JOBS_KEY)
            .arg(job.key())
            .arg(encode(job)?)
            .arg(job.version)
            .arg(job.run_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;

        if stored == 0 {
            debug!("Kept newer pending {} for offer {} over version {}", job.kind, job.offer_id, job.version);
            return Ok(false);
        }
        info!("Queued {} for offer {} at {}", job.kind, job.offer_id, job.run_at);
        Ok(true)
    }

    async fn cancel(&self, offer_id: Uuid, kind: TransitionKind) -> CoreResult<bool> {
        let mut conn = self.redis.connection().await?;
        let removed: i64 = redis::Script::new(CANCEL_SCRIPT)
            .key(DUE_KEY)
            .key(JOBS_KEY)
            .arg(job_key(offer_id, kind))
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;

        Ok(removed == 1)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize, lease: Duration) -> CoreResult<Vec<TransitionJob>> {
        let mut conn = self.redis.connection().await?;
        let now_ms = now.timestamp_millis();
        let deadline_ms = now_ms + lease.as_millis() as i64;

        let bodies: Vec<String> = redis::Script::new(CLAIM_SCRIPT)
            .key(DUE_KEY)
            .key(JOBS_KEY)
            .key(INFLIGHT_KEY)
            .key(LEASED_KEY)
            .arg(now_ms)
            .arg(limit)
            .arg(deadline_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;

        let mut jobs = Vec::with_capacity(bodies.len());
        for body in bodies {
            match serde_json::from_str::<TransitionJob>(&body) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::error!("Dropping undecodable transition job {}: {}", body, e),
            }
        }
        jobs.sort_by_key(|job| job.run_at);

        if !jobs.is_empty() {
            debug!("Claimed {} transition jobs", jobs.len());
        }
        Ok(jobs)
    }

    async fn complete(&self, job: &TransitionJob) -> CoreResult<()> {
        let mut conn = self.redis.connection().await?;
        let id = job.id.to_string();

        let _: () = redis::pipe()
            .atomic()
            .zrem(INFLIGHT_KEY, &id)
            .ignore()
            .hdel(LEASED_KEY, &id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    async fn retry(&self, job: &TransitionJob, at: DateTime<Utc>) -> CoreResult<()> {
        let mut conn = self.redis.connection().await?;
        let mut next = job.clone();
        next.run_at = at;

        let requeued: i64 = redis::Script::new(RETRY_SCRIPT)
            .key(DUE_KEY)
            .key(JOBS_KEY)
            .key(INFLIGHT_KEY)
            .key(LEASED_KEY)
            .arg(job.id.to_string())
            .arg(job.key())
            .arg(encode(&next)?)
            .arg(at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;

        if requeued == 0 {
            debug!("Job {} superseded by a newer {} for offer {}", job.id, job.kind, job.offer_id);
        }
        Ok(())
    }
}
