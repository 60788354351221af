//! Concurrent recordings keyed by session id.

use std::collections::HashMap;
use std::sync::Arc;

use meetrec_common::{AppConfig, MeetrecError, MeetrecResult};
use meetrec_encoder::EncoderBackend;
use meetrec_media_model::RecordingOutcome;
use meetrec_storage::ObjectStore;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::intake::CaptureSender;
use crate::session::{CompletionCallback, RecordingSession, SessionConfig, SessionStatus};

type Sessions = Arc<Mutex<HashMap<String, Arc<RecordingSession>>>>;

/// Starts, stops and looks up recordings. One lock guards the map; each
/// session keeps its own state.
pub struct SessionRegistry {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn EncoderBackend>,
    config: AppConfig,
    callback: Option<CompletionCallback>,
    sessions: Sessions,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ObjectStore>, backend: Arc<dyn EncoderBackend>, config: AppConfig) -> Self {
        Self {
            store,
            backend,
            config,
            callback: None,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Report every outcome to `callback`.
    pub fn with_callback(mut self, callback: CompletionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start recording `session_id` and return the handle the transport feeds.
    pub fn start(&self, session_id: &str) -> MeetrecResult<CaptureSender> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session_id) {
            return Err(MeetrecError::AlreadyActive {
                session_id: session_id.to_string(),
            });
        }
        let session = RecordingSession::start(
            SessionConfig::from_app_config(session_id, &self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            self.callback.clone(),
        )?;
        let sender = session.sender();
        sessions.insert(session_id.to_string(), session);
        Ok(sender)
    }

    /// Stop `session_id`. Finalization runs in the background; the session
    /// leaves the registry once it is done.
    pub fn stop(&self, session_id: &str) -> MeetrecResult<JoinHandle<RecordingOutcome>> {
        let session = self
            .session(session_id)
            .ok_or_else(|| MeetrecError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        tracing::info!(session_id, "Stopping recording");

        let sessions = Arc::clone(&self.sessions);
        Ok(tokio::spawn(async move {
            let outcome = session.stop_and_finalize().await;
            let mut sessions = sessions.lock();
            if sessions
                .get(session.id())
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                sessions.remove(session.id());
            }
            outcome
        }))
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<RecordingSession>> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.session(session_id).map(|s| s.status())
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Status of every session still in the registry, by id.
    pub fn list_active(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<RecordingSession>> = self.sessions.lock().values().cloned().collect();
        let mut statuses: Vec<SessionStatus> = sessions.iter().map(|s| s.status()).collect();
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        statuses
    }

    /// Stop every session and wait for all of them to finish.
    pub async fn shutdown(&self) -> Vec<RecordingOutcome> {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        tracing::info!(sessions = ids.len(), "Shutting down recordings");

        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(handle) = self.stop(&id) {
                handles.push((id, handle));
            }
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(session_id = %id, error = %e, "Finalization task failed"),
            }
        }
        outcomes
    }
}
