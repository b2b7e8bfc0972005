//! Process-wide, refcounted session sharing per workspace.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::session::{SessionOptions, UpstreamSession};
use crate::UpstreamResult;

struct PoolEntry {
    session: Arc<UpstreamSession>,
    refcount: usize,
}

/// Per-workspace cache of live upstream sessions.
///
/// Multiple agents and conversations in one workspace share a single
/// upstream subprocess instead of each spawning their own. A session is
/// alive iff its refcount is positive; it leaves the pool exactly when the
/// refcount reaches zero.
pub struct SessionPool {
    entries: Mutex<HashMap<PathBuf, PoolEntry>>,
}

static POOL: OnceLock<SessionPool> = OnceLock::new();

impl SessionPool {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide pool.
    pub fn global() -> &'static Self {
        POOL.get_or_init(Self::new)
    }

    /// Acquire a session for the options' workspace, starting one on first
    /// use.
    ///
    /// A cached session has its refcount incremented; when the new caller
    /// wants agent mode and the session was started without it, agent-mode
    /// preparation is escalated in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a fresh session fails to start.
    pub async fn acquire(&self, options: SessionOptions) -> UpstreamResult<Arc<UpstreamSession>> {
        let agent_mode = options.agent_mode;
        let key = Self::key_for(&options.workspace);
        self.acquire_with(key, agent_mode, || UpstreamSession::start(options))
            .await
    }

    /// Acquire with an explicit startup factory (tests inject scripted
    /// sessions here).
    ///
    /// The factory runs outside the pool lock; when two callers race, the
    /// loser's session is stopped and the winner's is shared.
    ///
    /// # Errors
    ///
    /// Returns the factory's error on startup failure.
    pub async fn acquire_with<F, Fut>(
        &self,
        key: PathBuf,
        agent_mode: bool,
        factory: F,
    ) -> UpstreamResult<Arc<UpstreamSession>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = UpstreamResult<Arc<UpstreamSession>>>,
    {
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                entry.refcount = entry.refcount.saturating_add(1);
                let session = entry.session.clone();
                drop(entries);
                // Escalation holds no pool state; concurrent escalations
                // are serialised inside the session itself.
                if agent_mode && !session.is_agent_prepared() {
                    session.prepare_agent().await?;
                }
                debug!(workspace = %key.display(), "reusing pooled session");
                return Ok(session);
            }
        }

        // First acquisition: full startup outside the lock.
        let session = factory().await?;

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            // Another caller won the race; ours is redundant.
            entry.refcount = entry.refcount.saturating_add(1);
            let winner = entry.session.clone();
            drop(entries);
            debug!(workspace = %key.display(), "lost pool race, stopping duplicate session");
            session.stop().await;
            if agent_mode && !winner.is_agent_prepared() {
                winner.prepare_agent().await?;
            }
            return Ok(winner);
        }
        entries.insert(
            key.clone(),
            PoolEntry {
                session: session.clone(),
                refcount: 1,
            },
        );
        info!(workspace = %key.display(), "session pooled");
        Ok(session)
    }

    /// Release a session obtained from [`SessionPool::acquire`].
    ///
    /// Decrements the refcount and tears the session down when it reaches
    /// zero. A session that is not pooled (or already fully released) is
    /// stopped directly, which is a no-op for an already-stopped session.
    pub async fn release(&self, session: &Arc<UpstreamSession>) {
        let key = Self::key_for(session.workspace_root());
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&key) {
            Some(entry) if Arc::ptr_eq(&entry.session, session) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                if entry.refcount == 0 {
                    entries.remove(&key);
                    drop(entries);
                    session.stop().await;
                }
            },
            _ => {
                drop(entries);
                session.stop().await;
            },
        }
    }

    /// Stop every pooled session and clear the pool (for tests).
    pub async fn reset(&self) {
        let drained: Vec<PoolEntry> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.session.stop().await;
        }
    }

    /// Current refcount for a workspace (for tests and diagnostics).
    pub async fn refcount(&self, workspace: &Path) -> usize {
        let entries = self.entries.lock().await;
        entries
            .get(&Self::key_for(workspace))
            .map_or(0, |entry| entry.refcount)
    }

    /// Canonical pool key for a workspace path.
    fn key_for(workspace: &Path) -> PathBuf {
        workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf())
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool").finish_non_exhaustive()
    }
}
