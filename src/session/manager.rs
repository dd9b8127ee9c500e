use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::config::SessionConfig;
use super::session::Session;
use super::stats::SessionStats;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::transport::PeerLink;

struct SessionHandle {
    stats: Arc<RwLock<SessionStats>>,
    close_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Registry of live sessions (session_id → running session task)
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionManager {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a session on `link`. The session removes itself from the
    /// registry when it ends.
    pub async fn create(&self, link: PeerLink) -> Result<String> {
        let session_config = SessionConfig::from_config(&self.config);
        if let Some(dir) = session_config.reply_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create replies directory {}", dir.display()))?;
        }

        let session = Session::new(
            session_config,
            Arc::clone(&link.channel),
            Arc::clone(&self.dispatcher),
        );
        let session_id = session.id().to_string();
        let stats = session.stats_handle();
        let (close_tx, close_rx) = mpsc::channel(1);

        // Held across spawn so the session cannot remove itself before it is inserted
        let mut sessions = self.sessions.write().await;

        let registry = Arc::clone(&self.sessions);
        let id = session_id.clone();
        let task = tokio::spawn(async move {
            session.run(link, close_rx).await;
            registry.write().await.remove(&id);
        });

        sessions.insert(
            session_id.clone(),
            SessionHandle {
                stats,
                close_tx,
                task,
            },
        );
        drop(sessions);

        info!("Session {} registered", session_id);
        Ok(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionStats> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id)?;
        let stats = handle.stats.read().await.clone();
        Some(stats)
    }

    pub async fn list(&self) -> Vec<SessionStats> {
        let sessions = self.sessions.read().await;
        let mut stats = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            stats.push(handle.stats.read().await.clone());
        }
        stats.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stats
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close one session and wait for it to finish. Returns `false` if no
    /// such session exists.
    pub async fn close(&self, session_id: &str) -> bool {
        let handle = self.sessions.write().await.remove(session_id);
        let Some(handle) = handle else {
            return false;
        };

        info!("Closing session {}", session_id);
        let _ = handle.close_tx.send(()).await;
        if let Err(e) = handle.task.await {
            error!("Session {} task failed: {}", session_id, e);
        }
        true
    }

    /// Close every live session.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, SessionHandle)> = self.sessions.write().await.drain().collect();
        if handles.is_empty() {
            return;
        }

        info!("Shutting down {} sessions", handles.len());

        let mut tasks = Vec::with_capacity(handles.len());
        for (session_id, handle) in handles {
            let _ = handle.close_tx.send(()).await;
            tasks.push(async move { (session_id, handle.task.await) });
        }

        for (session_id, result) in join_all(tasks).await {
            if let Err(e) = result {
                error!("Session {} task failed: {}", session_id, e);
            }
        }
    }
}
