//! Bounded cache of reusable HTTP clients keyed by execution mode,
//! streaming mode and timeout.
//!
//! Sync clients carry a total request timeout. Streaming clients carry no
//! total timeout at all; the pool records the requested header timeout and
//! the forwarder bounds `send()` with it, which is the mechanism used to
//! decide a backend is not streaming-capable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::errors::DispatchError;
use crate::types::{ExecutionMode, StreamingMode};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies one pooled client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub mode: ExecutionMode,
    pub streaming: Option<StreamingMode>,
    pub timeout_secs: u64,
}

/// A cached client plus the metadata the pool needs for eviction.
#[derive(Clone, Debug)]
pub struct PooledClient {
    pub client: reqwest::Client,
    pub is_streaming: bool,
    pub streaming_mode: Option<StreamingMode>,
    pub header_timeout: Duration,
    pub created_at: Instant,
}

/// Process-wide pool limits, fixed at construction.
#[derive(Clone, Debug)]
pub struct ClientPoolConfig {
    pub max_clients: usize,
    pub max_timeout: Duration,
    pub default_timeout: Duration,
    pub client_lifetime: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ClientPoolConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            max_timeout: Duration::from_secs(300),
            default_timeout: Duration::from_secs(30),
            client_lifetime: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Owned, injectable client pool. All map access is serialized by a single
/// lock; callers receive a cloned `reqwest::Client`, which is safe for
/// concurrent use across in-flight requests.
pub struct ClientPool {
    config: ClientPoolConfig,
    clients: Mutex<HashMap<ClientKey, PooledClient>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl ClientPool {
    /// Construct the pool and spawn the periodic lifetime cleanup task.
    pub fn start(config: ClientPoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            clients: Mutex::new(HashMap::new()),
            cleanup: Mutex::new(None),
        });

        let worker = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(worker.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                worker.evict_expired();
            }
        });
        *pool.cleanup.lock().expect("client pool lock poisoned") = Some(handle);

        pool
    }

    /// Pool for contexts without a running runtime (tests, one-shot tools).
    /// No cleanup task; eviction still applies on insert.
    pub fn new(config: ClientPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            clients: Mutex::new(HashMap::new()),
            cleanup: Mutex::new(None),
        })
    }

    /// Non-streaming client for the clamped timeout.
    pub fn get_client(&self, timeout: Option<Duration>) -> Result<reqwest::Client, DispatchError> {
        let timeout = self.clamp_timeout(timeout);
        let key = ClientKey {
            mode: ExecutionMode::Sync,
            streaming: None,
            timeout_secs: timeout.as_secs(),
        };

        let mut clients = self.clients.lock().expect("client pool lock poisoned");
        if let Some(entry) = clients.get(&key) {
            return Ok(entry.client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(DispatchError::ClientBuild)?;
        let entry = PooledClient {
            client: client.clone(),
            is_streaming: false,
            streaming_mode: None,
            header_timeout: timeout,
            created_at: Instant::now(),
        };
        Self::insert_with_eviction(&mut clients, self.config.max_clients, key, entry);
        Ok(client)
    }

    /// Streaming client for the requested mode. Returns the client together
    /// with the header timeout the forwarder must enforce on `send()`.
    pub fn get_stream_client(
        &self,
        mode: StreamingMode,
        timeout: Option<Duration>,
    ) -> Result<(reqwest::Client, Duration), DispatchError> {
        let header_timeout = timeout.unwrap_or(self.config.default_timeout);
        let key = ClientKey {
            mode: ExecutionMode::Stream,
            streaming: Some(mode),
            timeout_secs: header_timeout.as_secs(),
        };

        let mut clients = self.clients.lock().expect("client pool lock poisoned");
        if let Some(entry) = clients.get(&key) {
            return Ok((entry.client.clone(), entry.header_timeout));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(DispatchError::ClientBuild)?;
        let entry = PooledClient {
            client: client.clone(),
            is_streaming: true,
            streaming_mode: Some(mode),
            header_timeout,
            created_at: Instant::now(),
        };
        Self::insert_with_eviction(&mut clients, self.config.max_clients, key, entry);
        Ok((client, header_timeout))
    }

    /// Stop the cleanup task. Cached clients are dropped with the pool.
    pub fn close(&self) {
        if let Some(handle) = self
            .cleanup
            .lock()
            .expect("client pool lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.clients.lock().expect("client pool lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clamp_timeout(&self, timeout: Option<Duration>) -> Duration {
        let requested = timeout.unwrap_or(self.config.default_timeout);
        requested.clamp(self.config.default_timeout, self.config.max_timeout)
    }

    /// Insert the entry, evicting exactly one existing entry when the pool
    /// is full: the oldest non-streaming client, falling back to the oldest
    /// of any kind when every entry is streaming.
    fn insert_with_eviction(
        clients: &mut HashMap<ClientKey, PooledClient>,
        max_clients: usize,
        key: ClientKey,
        entry: PooledClient,
    ) {
        if clients.len() >= max_clients {
            let victim = clients
                .iter()
                .filter(|(_, candidate)| !candidate.is_streaming)
                .min_by_key(|(_, candidate)| candidate.created_at)
                .or_else(|| clients.iter().min_by_key(|(_, candidate)| candidate.created_at))
                .map(|(victim_key, _)| victim_key.clone());
            if let Some(victim) = victim {
                tracing::debug!(key = ?victim, "client pool full, evicting oldest entry");
                clients.remove(&victim);
            }
        }
        clients.insert(key, entry);
    }

    /// Drop sync clients older than the configured lifetime. Streaming
    /// clients are exempt from the timer and only leave via insert-eviction.
    fn evict_expired(&self) {
        let mut clients = self.clients.lock().expect("client pool lock poisoned");
        let lifetime = self.config.client_lifetime;
        let before = clients.len();
        clients.retain(|_, entry| entry.is_streaming || entry.created_at.elapsed() < lifetime);
        let evicted = before - clients.len();
        if evicted > 0 {
            tracing::debug!(evicted, "client pool lifetime cleanup");
        }
    }
}
