//! Fixed-slot pool of remote sandbox sessions.
//!
//! Session IDs are drawn from the deterministic space
//! `sess_aoi_0..sess_aoi_<max-1>`, so the pool is an index-based arena:
//! acquiring a new session means finding an untracked index. Allocation is
//! "stacking" (bin-packing): among sessions below the concurrency cap the
//! busiest one wins, which keeps the minority of sessions hot and lets the
//! rest drain to zero and become eligible for idle scale-down.
//!
//! The session map lives behind a single mutex; remote create/query/delete
//! calls always happen outside the lock, so the stacking scan is a
//! best-effort snapshot that may race with concurrent acquisitions. A
//! slight over/under allocation is recovered on the next call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::{JoinHandle, JoinSet};

use crate::control::{SandboxControlPlane, SessionSpec, SessionStatus};
use crate::errors::SandboxError;
use crate::types::{ExecuteCodeReq, ExecuteCodeResp};

/// Prefix of the deterministic session ID space.
pub const SESSION_ID_PREFIX: &str = "sess_aoi_";

/// Process-wide pool parameters, fixed at construction.
#[derive(Clone, Debug)]
pub struct SessionPoolConfig {
    /// Hard cap on concurrently provisioned remote sessions.
    pub max_sessions: usize,
    /// Per-session concurrency cap.
    pub max_concurrent_tasks: u32,
    /// Target number of warm sessions kept ready by maintenance.
    pub active_sessions: usize,
    pub template_id: String,
    pub cpu: f64,
    pub memory_mb: u64,
    pub disk_gb: u64,
    /// Execution timeout passed to the remote session, in seconds.
    pub session_timeout_secs: u64,
    /// Provisioning retry budget per acquisition.
    pub acquire_retries: u32,
    /// Wall-clock budget for a session to reach Running.
    pub create_wait_timeout: Duration,
    /// Status poll cadence during provisioning.
    pub poll_interval: Duration,
    pub maintenance_interval: Duration,
    /// Budget for fire-and-forget remote deletes.
    pub delete_timeout: Duration,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            max_concurrent_tasks: 4,
            active_sessions: 2,
            template_id: "code-runner".to_string(),
            cpu: 1.0,
            memory_mb: 512,
            disk_gb: 1,
            session_timeout_secs: 60,
            acquire_retries: 3,
            create_wait_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            maintenance_interval: Duration::from_secs(30),
            delete_timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle of a tracked slot. A slot is reserved as Provisioning the
/// moment its index is claimed and only becomes Running once the remote
/// session is confirmed up. Provisioning slots are invisible to the
/// stacking scan, the health check and scale-down, so a half-created
/// session can never be handed out, probed as missing or reclaimed while
/// its creator is still waiting on the remote side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Provisioning,
    Running,
}

/// In-memory bookkeeping for one remote session. Exactly one item exists
/// per provisioned remote session; mutations happen under the pool lock.
#[derive(Clone, Debug)]
struct SessionItem {
    state: SlotState,
    running_tasks: u32,
    last_used_at: Instant,
}

impl SessionItem {
    fn provisioning(running_tasks: u32) -> Self {
        Self {
            state: SlotState::Provisioning,
            running_tasks,
            last_used_at: Instant::now(),
        }
    }
}

pub struct SessionPool {
    config: SessionPoolConfig,
    control: Arc<dyn SandboxControlPlane>,
    sessions: Mutex<HashMap<String, SessionItem>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    /// Fire-and-forget remote deletes, joined on close.
    reapers: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl SessionPool {
    /// Pool without background maintenance or startup adoption. Used by
    /// tests and callers that drive `run_maintenance` themselves.
    pub fn new(config: SessionPoolConfig, control: Arc<dyn SandboxControlPlane>) -> Arc<Self> {
        Arc::new(Self {
            config,
            control,
            sessions: Mutex::new(HashMap::new()),
            maintenance: Mutex::new(None),
            reapers: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Full startup: adopt already-running sessions from the deterministic
    /// ID space, pre-warm to the active target and spawn the maintenance
    /// loop.
    pub async fn start(
        config: SessionPoolConfig,
        control: Arc<dyn SandboxControlPlane>,
    ) -> Arc<Self> {
        let pool = Self::new(config, control);
        pool.adopt_existing().await;
        pool.prewarm().await;

        let worker = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(worker.config.maintenance_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; startup already warmed up.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                worker.run_maintenance().await;
            }
        });
        *pool.maintenance.lock().expect("session pool lock poisoned") = Some(handle);

        pool
    }

    /// Deterministic ID for a slot index.
    pub fn slot_id(index: usize) -> String {
        format!("{SESSION_ID_PREFIX}{index}")
    }

    /// Run code on an acquired session. The session is always released,
    /// whatever the execution outcome.
    pub async fn execute_code(
        &self,
        request: &ExecuteCodeReq,
    ) -> Result<ExecuteCodeResp, SandboxError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SandboxError::Closed);
        }

        let session_id = self.acquire_session(self.config.acquire_retries).await?;
        // Guard so the slot is released even when this future is dropped
        // mid-execution (caller timeout or task abort).
        let lease = ReleaseOnDrop {
            pool: self,
            session_id: &session_id,
        };
        let result = self.control.execute_code(&session_id, request).await;
        drop(lease);

        result.map_err(|source| SandboxError::Execute { session_id, source })
    }

    /// Acquire a session slot, provisioning a new one when no tracked
    /// session has spare capacity.
    ///
    /// Exhaustion of the fixed ID space fails immediately; only
    /// provisioning failures consume the retry budget, sleeping
    /// `retries_remaining` seconds before each attempt.
    pub async fn acquire_session(&self, mut retries_remaining: u32) -> Result<String, SandboxError> {
        loop {
            for session_id in self.stacking_candidates() {
                // Probe outside the lock; prune sessions that vanished.
                if let Ok(None) = self.control.query_session(&session_id).await {
                    tracing::warn!(session_id = %session_id, "tracked session gone remotely, pruning");
                    self.remove_local(&session_id);
                    continue;
                }

                let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
                if let Some(item) = sessions.get_mut(&session_id) {
                    if item.running_tasks < self.config.max_concurrent_tasks {
                        item.running_tasks += 1;
                        item.last_used_at = Instant::now();
                        return Ok(session_id);
                    }
                }
            }

            let Some(session_id) = self.reserve_free_slot() else {
                return Err(SandboxError::Exhausted);
            };

            match self.ensure_remote_session(&session_id).await {
                Ok(()) => return Ok(session_id),
                Err(error) => {
                    self.remove_local(&session_id);
                    if retries_remaining == 0 {
                        return Err(SandboxError::Provisioning {
                            session_id,
                            source: Box::new(error),
                        });
                    }
                    tracing::warn!(
                        session_id = %session_id,
                        error = %error,
                        retries_remaining,
                        "session provisioning failed, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(retries_remaining))).await;
                    retries_remaining -= 1;
                }
            }
        }
    }

    /// Make sure the remote session exists and is Running, registering the
    /// local bookkeeping on success.
    async fn ensure_remote_session(&self, session_id: &str) -> Result<(), SandboxError> {
        let existing = self.control.query_session(session_id).await?;
        if existing.is_none() {
            let spec = self.session_spec(session_id);
            self.control.create_session(&spec).await?;
        }

        let wait = async {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            loop {
                ticker.tick().await;
                match self.control.query_session(session_id).await {
                    Ok(Some(detail)) => match detail.status {
                        SessionStatus::Running => return Ok(()),
                        SessionStatus::Failed | SessionStatus::Terminated => {
                            let _ = self.control.delete_session(session_id).await;
                            return Err(SandboxError::CreateFailed {
                                session_id: session_id.to_string(),
                                state: format!("{:?}", detail.status).to_lowercase(),
                            });
                        }
                        SessionStatus::Creating => {}
                    },
                    // A just-created session may not be visible yet.
                    Ok(None) => {}
                    Err(error) => return Err(SandboxError::ControlPlane(error)),
                }
            }
        };

        match tokio::time::timeout(self.config.create_wait_timeout, wait).await {
            Ok(Ok(())) => {
                self.register_local(session_id);
                Ok(())
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(SandboxError::CreateTimeout {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Decrement the task counter, clamped at zero, and refresh last-used.
    pub fn release_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
        if let Some(item) = sessions.get_mut(session_id) {
            item.running_tasks = item.running_tasks.saturating_sub(1);
            item.last_used_at = Instant::now();
        }
    }

    /// Drop local bookkeeping and delete the remote session in the
    /// background with its own bounded timeout.
    pub fn invalidate_session(&self, session_id: &str) {
        self.remove_local(session_id);
        self.spawn_remote_delete(session_id.to_string());
    }

    /// One maintenance pass: prune unhealthy sessions, pre-warm missing
    /// warm slots, scale down surplus idle sessions.
    pub async fn run_maintenance(&self) {
        self.health_check().await;
        self.prewarm().await;
        self.scale_down();
    }

    /// Stop maintenance and wait for in-flight background deletes.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .maintenance
            .lock()
            .expect("session pool lock poisoned")
            .take()
        {
            handle.abort();
        }

        let mut reapers = {
            let mut guard = self.reapers.lock().expect("session pool lock poisoned");
            std::mem::take(&mut *guard)
        };
        while reapers.join_next().await.is_some() {}
    }

    /// Adopt deterministic-ID sessions that are already Running remotely.
    async fn adopt_existing(&self) {
        for index in 0..self.config.max_sessions {
            let session_id = Self::slot_id(index);
            match self.control.query_session(&session_id).await {
                Ok(Some(detail)) if detail.status == SessionStatus::Running => {
                    tracing::info!(session_id = %session_id, "adopting running session");
                    self.register_local(&session_id);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(session_id = %session_id, error = %error, "startup probe failed");
                }
            }
        }
    }

    async fn health_check(&self) {
        // Only probe Running slots; a Provisioning slot is still owned by
        // its creator's poll loop.
        let tracked: Vec<String> = {
            let sessions = self.sessions.lock().expect("session pool lock poisoned");
            sessions
                .iter()
                .filter(|(_, item)| item.state == SlotState::Running)
                .map(|(session_id, _)| session_id.clone())
                .collect()
        };

        for session_id in tracked {
            match self.control.query_session(&session_id).await {
                Ok(Some(detail)) if detail.status.is_healthy() => {}
                Ok(Some(detail)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        status = ?detail.status,
                        "dropping unhealthy session"
                    );
                    self.invalidate_session(&session_id);
                }
                Ok(None) => {
                    tracing::warn!(session_id = %session_id, "session missing remotely, dropping");
                    self.remove_local(&session_id);
                }
                Err(error) => {
                    tracing::warn!(session_id = %session_id, error = %error, "health check failed");
                }
            }
        }
    }

    /// Provision missing warm slots concurrently until `active_sessions`
    /// sessions are tracked.
    async fn prewarm(&self) {
        let reserved: Vec<String> = {
            let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
            let missing = self.config.active_sessions.saturating_sub(sessions.len());
            let mut reserved = Vec::new();
            for index in 0..self.config.max_sessions {
                if reserved.len() == missing {
                    break;
                }
                let session_id = Self::slot_id(index);
                if !sessions.contains_key(&session_id) {
                    sessions.insert(session_id.clone(), SessionItem::provisioning(0));
                    reserved.push(session_id);
                }
            }
            reserved
        };
        if reserved.is_empty() {
            return;
        }

        let results = futures::future::join_all(
            reserved
                .iter()
                .map(|session_id| self.ensure_remote_session(session_id)),
        )
        .await;

        for (session_id, result) in reserved.iter().zip(results) {
            if let Err(error) = result {
                tracing::warn!(session_id = %session_id, error = %error, "prewarm failed");
                self.remove_local(session_id);
            }
        }
    }

    /// Remove idle sessions beyond the warm target, keeping the most
    /// recently used ones.
    fn scale_down(&self) {
        let victims: Vec<String> = {
            let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
            let mut idle: Vec<(String, Instant)> = sessions
                .iter()
                .filter(|(_, item)| item.state == SlotState::Running && item.running_tasks == 0)
                .map(|(session_id, item)| (session_id.clone(), item.last_used_at))
                .collect();
            if idle.len() <= self.config.active_sessions {
                return;
            }
            idle.sort_by(|a, b| b.1.cmp(&a.1));
            let victims: Vec<String> = idle
                .split_off(self.config.active_sessions)
                .into_iter()
                .map(|(session_id, _)| session_id)
                .collect();
            for session_id in &victims {
                sessions.remove(session_id);
            }
            victims
        };

        for session_id in victims {
            tracing::info!(session_id = %session_id, "scaling down idle session");
            self.spawn_remote_delete(session_id);
        }
    }

    /// Running sessions below the concurrency cap, busiest first. Slots
    /// still provisioning are not candidates.
    fn stacking_candidates(&self) -> Vec<String> {
        let sessions = self.sessions.lock().expect("session pool lock poisoned");
        let mut candidates: Vec<(String, u32)> = sessions
            .iter()
            .filter(|(_, item)| {
                item.state == SlotState::Running
                    && item.running_tasks < self.config.max_concurrent_tasks
            })
            .map(|(session_id, item)| (session_id.clone(), item.running_tasks))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates
            .into_iter()
            .map(|(session_id, _)| session_id)
            .collect()
    }

    /// Reserve the first untracked index as a placeholder with the
    /// acquiring task already counted. The lock around the scan plus insert
    /// is what prevents two callers from being handed the same fresh slot.
    fn reserve_free_slot(&self) -> Option<String> {
        let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
        for index in 0..self.config.max_sessions {
            let session_id = Self::slot_id(index);
            if !sessions.contains_key(&session_id) {
                sessions.insert(session_id.clone(), SessionItem::provisioning(1));
                return Some(session_id);
            }
        }
        None
    }

    /// Mark the slot Running, making it visible to stacking and
    /// maintenance.
    fn register_local(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
        let item = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionItem::provisioning(0));
        item.state = SlotState::Running;
        item.last_used_at = Instant::now();
    }

    fn remove_local(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session pool lock poisoned");
        sessions.remove(session_id);
    }

    fn spawn_remote_delete(&self, session_id: String) {
        let control = Arc::clone(&self.control);
        let delete_timeout = self.config.delete_timeout;
        let mut reapers = self.reapers.lock().expect("session pool lock poisoned");
        while reapers.try_join_next().is_some() {}
        reapers.spawn(async move {
            match tokio::time::timeout(delete_timeout, control.delete_session(&session_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(session_id = %session_id, error = %error, "remote delete failed");
                }
                Err(_) => {
                    tracing::warn!(session_id = %session_id, "remote delete timed out");
                }
            }
        });
    }

    fn session_spec(&self, session_id: &str) -> SessionSpec {
        SessionSpec {
            session_id: session_id.to_string(),
            template_id: self.config.template_id.clone(),
            cpu: self.config.cpu,
            memory_mb: self.config.memory_mb,
            disk_gb: self.config.disk_gb,
            timeout_secs: self.config.session_timeout_secs,
        }
    }

    #[cfg(test)]
    fn running_tasks(&self, session_id: &str) -> Option<u32> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(session_id).map(|item| item.running_tasks)
    }

    #[cfg(test)]
    fn tracked_ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap();
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Releases the acquired slot on drop, so a caller future that is dropped
/// mid-execution still hands its task count back.
struct ReleaseOnDrop<'a> {
    pool: &'a SessionPool,
    session_id: &'a str,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.pool.release_session(self.session_id);
    }
}
