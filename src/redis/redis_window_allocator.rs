use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use redis::{Script, Value, aio::ConnectionManager};
use tokio::sync::RwLock;

use crate::{
    AllocationRequest, BatchLimitError, WindowAllocator, WindowGrant,
    allocator::{system_seconds, window_id},
};

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Allocation script. `KEYS[1]` is the token key, `ARGV` carries the window length in
/// seconds, the throughput and the batch size. Returns the number of permits granted
/// followed by the server `TIME` (seconds, microseconds) the window was chosen from.
const ALLOCATE_SCRIPT: &str = r#"
    local time_array = redis.call("TIME")
    local seconds = tonumber(time_array[1])
    local micros = tonumber(time_array[2])

    local token_key = KEYS[1]
    local window_size_seconds = tonumber(ARGV[1])
    local throughput = tonumber(ARGV[2])
    local batch_size = tonumber(ARGV[3])

    local window_id = math.ceil(seconds / window_size_seconds)
    local counter_key = token_key .. ":" .. string.format("%d", window_id)

    local granted = tonumber(redis.call("GET", counter_key)) or 0

    if granted >= throughput then
        return {0, seconds, micros}
    end

    local increment = math.min(throughput - granted, batch_size)

    redis.call("INCRBY", counter_key, increment)
    redis.call("EXPIRE", counter_key, window_size_seconds * 3)

    return {increment, seconds, micros}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScriptState {
    Unregistered,
    Ready { sha: String },
}

/// [`WindowAllocator`] backed by a Lua script evaluated atomically by Redis.
///
/// The window id is computed from the Redis server clock (`TIME`), so every caller
/// agrees on window boundaries regardless of local clock drift.
///
/// # Script registration
///
/// The script is registered lazily, once per allocator. The first
/// [`prepare`](WindowAllocator::prepare) checks `SCRIPT EXISTS` for the script's SHA1 and
/// falls back to `SCRIPT LOAD`. Until that succeeds the allocator stays unregistered and
/// every call retries. Later calls use `EVALSHA`. If Redis answers `NOSCRIPT` (script cache
/// flushed, failover to a fresh replica) the error is returned to the caller and the
/// allocator drops back to unregistered, so the next call registers the script again.
///
/// # Server clock
///
/// Every reply carries the server time, so the allocator tracks an estimate of the Redis
/// clock anchored on the moment the request was sent. The estimate never trails the
/// server, which keeps cached permits from outliving their window.
///
/// # Requirements
///
/// - **Redis version:** >= 5.0 (script effects replication)
/// - **Runtime:** Tokio
pub struct RedisWindowAllocator {
    connection_manager: ConnectionManager,
    script: Script,
    state: RwLock<ScriptState>,
    started: Instant,
    /// Server epoch micros minus local micros since `started`; `0` until the first reply.
    server_offset_micros: AtomicU64,
}

impl RedisWindowAllocator {
    /// Create an allocator issuing commands over `connection_manager`.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_manager,
            script: Script::new(ALLOCATE_SCRIPT),
            state: RwLock::new(ScriptState::Unregistered),
            started: Instant::now(),
            server_offset_micros: AtomicU64::new(0),
        }
    }

    /// SHA1 of the allocation script.
    pub fn script_hash(&self) -> &str {
        self.script.get_hash()
    }

    /// `true` once the script is known to be registered with Redis.
    pub async fn is_registered(&self) -> bool {
        matches!(*self.state.read().await, ScriptState::Ready { .. })
    }

    async fn registered_sha(&self) -> Result<String, BatchLimitError> {
        if let ScriptState::Ready { sha } = &*self.state.read().await {
            return Ok(sha.clone());
        }

        let mut state = self.state.write().await;

        // Another caller may have registered while we waited for the write lock.
        if let ScriptState::Ready { sha } = &*state {
            return Ok(sha.clone());
        }

        let sha = self.register().await?;
        *state = ScriptState::Ready { sha: sha.clone() };

        Ok(sha)
    } // end method registered_sha

    async fn register(&self) -> Result<String, BatchLimitError> {
        let mut connection_manager = self.connection_manager.clone();
        let hash = self.script.get_hash();

        let exists: Vec<bool> = redis::cmd("SCRIPT")
            .arg("EXISTS")
            .arg(hash)
            .query_async(&mut connection_manager)
            .await
            .map_err(BatchLimitError::ScriptRegistration)?;

        if exists.first().copied().unwrap_or(false) {
            tracing::debug!(sha = hash, "allocation script already registered");
            return Ok(hash.to_string());
        }

        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(ALLOCATE_SCRIPT)
            .query_async(&mut connection_manager)
            .await
            .map_err(BatchLimitError::ScriptRegistration)?;

        tracing::debug!(sha = sha.as_str(), "allocation script loaded");

        Ok(sha)
    } // end method register

    fn local_micros(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Best guess at the Redis clock, in whole seconds.
    fn server_seconds(&self) -> u64 {
        match self.server_offset_micros.load(Ordering::Relaxed) {
            0 => system_seconds(),
            offset => offset.saturating_add(self.local_micros()) / MICROS_PER_SECOND,
        }
    }

    async fn forget_registration(&self, sha: &str) {
        let mut state = self.state.write().await;

        if matches!(&*state, ScriptState::Ready { sha: current } if current == sha) {
            *state = ScriptState::Unregistered;
        }
    }
}

impl std::fmt::Debug for RedisWindowAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowAllocator")
            .field("script_hash", &self.script.get_hash())
            .finish_non_exhaustive()
    }
}

impl WindowAllocator for RedisWindowAllocator {
    async fn prepare(&self) -> Result<(), BatchLimitError> {
        self.registered_sha().await.map(|_| ())
    }

    async fn allocate(
        &self,
        request: &AllocationRequest<'_>,
    ) -> Result<WindowGrant, BatchLimitError> {
        let sha = self.registered_sha().await?;
        let mut connection_manager = self.connection_manager.clone();
        let sent_micros = self.local_micros();

        let reply: Value = match redis::cmd("EVALSHA")
            .arg(&sha)
            .arg(1)
            .arg(request.key)
            .arg(request.window_size_seconds)
            .arg(request.throughput)
            .arg(request.batch_size)
            .query_async::<Value>(&mut connection_manager)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                if err.code() == Some("NOSCRIPT") {
                    tracing::warn!(
                        sha = sha.as_str(),
                        "allocation script missing from redis, registering again on next call"
                    );
                    self.forget_registration(&sha).await;
                }

                return Err(BatchLimitError::RedisError(err));
            }
        };

        let reply = parse_reply(reply)?;

        // Anchored on the send time, so the estimate can only run ahead of the server.
        let server_micros = reply
            .server_seconds
            .saturating_mul(MICROS_PER_SECOND)
            .saturating_add(reply.server_micros);
        self.server_offset_micros.store(
            server_micros.saturating_sub(sent_micros).max(1),
            Ordering::Relaxed,
        );

        let window_id = window_id(reply.server_seconds, request.window_size_seconds);

        tracing::trace!(
            key = request.key,
            granted = reply.granted,
            window_id,
            "allocated permits from redis window"
        );

        Ok(WindowGrant {
            granted: reply.granted,
            window_id,
        })
    } // end method allocate

    fn current_window_id(&self, window_size_seconds: u64) -> u64 {
        window_id(self.server_seconds(), window_size_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScriptReply {
    pub granted: u64,
    pub server_seconds: u64,
    pub server_micros: u64,
}

/// The script returns a table of three Lua numbers, which Redis converts to an array of
/// integers. Anything else means the script and the client disagree, and must not be
/// read as a grant.
pub(crate) fn parse_reply(reply: Value) -> Result<ScriptReply, BatchLimitError> {
    let items = match reply {
        Value::Array(items) if items.len() == 3 => items,
        other => {
            return Err(BatchLimitError::UnexpectedReply(format!(
                "allocation script returned {other:?}, expected three integers"
            )));
        }
    };

    let mut fields = [0u64; 3];
    for (field, item) in fields.iter_mut().zip(items) {
        *field = match item {
            Value::Int(n) => u64::try_from(n).map_err(|_| {
                BatchLimitError::UnexpectedReply(format!(
                    "allocation script returned negative value {n}"
                ))
            })?,
            other => {
                return Err(BatchLimitError::UnexpectedReply(format!(
                    "allocation script returned {other:?}, expected an integer"
                )));
            }
        };
    }

    let [granted, server_seconds, server_micros] = fields;

    Ok(ScriptReply {
        granted,
        server_seconds,
        server_micros,
    })
}
