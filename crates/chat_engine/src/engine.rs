//! The conversation engine. One instance owns one conversation surface.
//!
//! All mutation funnels through a single state lock held only for short
//! synchronous sections. Generations and saves run on background tasks that
//! re-acquire the lock per update, so the UI-facing accessors never wait on
//! the network.

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conversation_core::{
    Branch, BranchState, ConversationMetadata, GenerationRecoveryInfo, Message, Role,
};
use generation_client::{GenerationBackend, GenerationRequest};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, ErrorInfo};
use crate::ingest::{run_stream, FailureAction, StreamJob};
use crate::persist::{invalidate_saves, schedule_save, teardown, SaveScheduler};
use crate::reauth::ReauthHandler;
use crate::recovery::apply_record;
use crate::store::{ConversationStore, StoreError};

/// Mutable state behind the engine lock.
pub(crate) struct EngineState {
    pub(crate) forest: BranchState,
    pub(crate) conversation_id: Option<Uuid>,
    pub(crate) mode_state: Map<String, Value>,
    pub(crate) error: Option<ErrorInfo>,
    pub(crate) is_loading: bool,
    pub(crate) recovery: Option<GenerationRecoveryInfo>,
    pub(crate) active_stream: Option<CancellationToken>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            forest: BranchState::new(),
            conversation_id: None,
            mode_state: Map::new(),
            error: None,
            is_loading: false,
            recovery: None,
            active_stream: None,
        }
    }

    pub(crate) fn metadata_snapshot(&self, config: &EngineConfig) -> ConversationMetadata {
        ConversationMetadata::snapshot(
            self.mode_state.clone(),
            config.mode_options.clone(),
            &self.forest,
        )
    }

    fn can_regenerate(&self) -> bool {
        let messages = self.forest.active_messages();
        !self.is_loading
            && messages.len() >= 2
            && messages.last().map(|m| m.role) == Some(Role::Assistant)
            && messages.iter().any(|m| m.role == Role::User)
    }
}

/// Shared between the facade and its background tasks.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) backend: Arc<dyn GenerationBackend>,
    pub(crate) store: Arc<dyn ConversationStore>,
    pub(crate) reauth: Arc<dyn ReauthHandler>,
    pub(crate) events: mpsc::UnboundedSender<EngineEvent>,
    pub(crate) saves: SaveScheduler,
    pub(crate) shutdown: CancellationToken,
}

impl EngineInner {
    /// Best-effort event delivery; a dropped receiver is not an error.
    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// Point-in-time view of the observable engine state.
#[derive(Clone, Debug)]
pub struct EngineSnapshot {
    /// Messages of the active branch, oldest first.
    pub messages: Vec<Message>,
    /// True while a generation is streaming.
    pub is_loading: bool,
    pub error: Option<ErrorInfo>,
    /// Assigned by the first successful save.
    pub conversation_id: Option<Uuid>,
    pub branches: Vec<Branch>,
    pub current_branch_id: Uuid,
    pub can_regenerate: bool,
    pub generation_recovery: Option<GenerationRecoveryInfo>,
}

/// Handle to one conversation engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<EngineInner>,
}

impl ChatEngine {
    /// Build an engine together with the receiving end of its event stream.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn ConversationStore>,
        reauth: Arc<dyn ReauthHandler>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(EngineInner {
            config,
            state: RwLock::new(EngineState::new()),
            backend,
            store,
            reauth,
            events,
            saves: SaveScheduler::new(),
            shutdown: CancellationToken::new(),
        });
        (Self { inner }, receiver)
    }

    /// Append a user turn and stream the assistant response into a fresh
    /// placeholder on the active branch.
    ///
    /// Rejected with [`EngineError::Busy`] while another generation is in
    /// flight; a conversation never streams two responses at once.
    pub fn send_message(&self, text: impl Into<String>) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Terminated);
        }
        let job = {
            let mut state = self.inner.state.write().unwrap();
            if state.is_loading {
                return Err(EngineError::Busy);
            }
            state.error = None;
            state.recovery = None;
            state.forest.append_message(Message::user(text));
            // The request captures history through the new user turn; the
            // placeholder appended next is never sent.
            let request = GenerationRequest::new(
                &self.inner.config.mode,
                state.forest.active_messages(),
                self.inner.config.mode_options.clone(),
            );
            let branch_id = state.forest.current_branch_id;
            let message_id = state.forest.append_message(Message::placeholder());
            let cancel = self.inner.shutdown.child_token();
            state.is_loading = true;
            state.active_stream = Some(cancel.clone());
            StreamJob {
                branch_id,
                message_id,
                request,
                cancel,
                on_failure: FailureAction::RemovePlaceholder,
            }
        };
        tracing::info!(
            branch_id = %job.branch_id,
            message_id = %job.message_id,
            "ChatEngine: starting generation"
        );
        self.start_stream(job);
        Ok(())
    }

    /// Ask the in-flight generation to stop. The partial draft already
    /// applied stays in place; no error is recorded. No-op when idle.
    pub fn stop_generation(&self) {
        let token = self.inner.state.read().unwrap().active_stream.clone();
        if let Some(token) = token {
            tracing::info!("ChatEngine: stop requested");
            token.cancel();
        }
    }

    /// Replace the last assistant response with a fresh generation for the
    /// most recent user turn.
    ///
    /// Does nothing unless the active branch ends with an assistant message
    /// preceded by at least one other turn and no stream is in flight. If the
    /// attempt fails, the branch is restored to its exact prior message list.
    pub fn regenerate_last_message(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Terminated);
        }
        let job = {
            let mut state = self.inner.state.write().unwrap();
            if state.is_loading {
                tracing::debug!("ChatEngine: regenerate ignored, stream in flight");
                return Ok(());
            }
            let messages = state.forest.active_messages();
            if messages.len() < 2 || messages.last().map(|m| m.role) != Some(Role::Assistant) {
                tracing::debug!("ChatEngine: regenerate ignored, nothing to regenerate");
                return Ok(());
            }
            let Some(last_user_index) = messages.iter().rposition(|m| m.role == Role::User)
            else {
                tracing::debug!("ChatEngine: regenerate ignored, no user turn found");
                return Ok(());
            };
            let rollback = messages.to_vec();
            state.error = None;
            state.recovery = None;
            state.forest.truncate_active(last_user_index);
            let request = GenerationRequest::new(
                &self.inner.config.mode,
                state.forest.active_messages(),
                self.inner.config.mode_options.clone(),
            );
            let branch_id = state.forest.current_branch_id;
            let message_id = state.forest.append_message(Message::placeholder());
            let cancel = self.inner.shutdown.child_token();
            state.is_loading = true;
            state.active_stream = Some(cancel.clone());
            StreamJob {
                branch_id,
                message_id,
                request,
                cancel,
                on_failure: FailureAction::RestoreMessages(rollback),
            }
        };
        tracing::info!(
            branch_id = %job.branch_id,
            message_id = %job.message_id,
            "ChatEngine: regenerating last response"
        );
        self.start_stream(job);
        Ok(())
    }

    /// Whether the active branch can fork at `index`.
    pub fn can_fork(&self, index: usize) -> bool {
        self.inner.state.read().unwrap().forest.can_fork(index)
    }

    /// Fork the active branch at `index` (inclusive) and make the fork
    /// active. Out-of-range indexes are ignored.
    pub fn fork_from_message(&self, index: usize) -> Option<Uuid> {
        let forked = {
            let mut state = self.inner.state.write().unwrap();
            state.forest.fork_from_message(index)
        };
        if forked.is_some() {
            schedule_save(&self.inner);
        }
        forked
    }

    /// Make `branch_id` the active branch. Returns false for unknown ids.
    ///
    /// Switching never cancels an in-flight generation; a stream keeps
    /// writing to the branch it started on.
    pub fn switch_branch(&self, branch_id: Uuid) -> bool {
        let switched = {
            let mut state = self.inner.state.write().unwrap();
            state.forest.switch_branch(branch_id)
        };
        if switched {
            schedule_save(&self.inner);
        }
        switched
    }

    /// Fetch a persisted conversation and make it the live state.
    ///
    /// Restores the branch forest when one was persisted, synthesizes a
    /// single main branch for legacy flat histories, and derives recovery
    /// info when the stored generation status shows an interrupted run.
    pub async fn load_conversation(&self, id: Uuid) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Terminated);
        }
        if self.inner.state.read().unwrap().is_loading {
            return Err(EngineError::Busy);
        }

        tracing::info!(conversation_id = %id, "ChatEngine: loading conversation");
        let record = match self.inner.store.fetch_by_id(id).await {
            Ok(record) => record,
            Err(StoreError::AuthExpired) => {
                tracing::warn!(conversation_id = %id, "ChatEngine: load hit expired session");
                self.inner.reauth.session_expired().await;
                return Err(EngineError::AuthExpired);
            }
            Err(e) => {
                let info = ErrorInfo {
                    code: "load_failed".to_string(),
                    message: e.to_string(),
                    details: None,
                };
                self.inner.state.write().unwrap().error = Some(info.clone());
                self.inner.emit(EngineEvent::Error(info));
                return Err(EngineError::Store(e));
            }
        };

        let recovery = {
            let mut state = self.inner.state.write().unwrap();
            // A send may have raced the fetch; the stream it started owns
            // the state now.
            if state.is_loading {
                return Err(EngineError::Busy);
            }
            // Pending saves belong to the conversation being replaced.
            // Invalidated under the lock so no save snapshots in between.
            invalidate_saves(&self.inner);
            apply_record(&mut state, id, record)
        };
        if let Some(info) = recovery {
            self.inner.emit(EngineEvent::RecoveryDetected(info));
        }
        Ok(())
    }

    /// Drop the live conversation: fresh forest, no id, no error. The next
    /// send starts a brand-new conversation. Mode state set by the host is
    /// kept. Rejected while a generation is streaming.
    pub fn clear_messages(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().unwrap();
            if state.is_loading {
                return Err(EngineError::Busy);
            }
            // Any queued save would either persist the old conversation or
            // create an empty one; neither is wanted. Invalidated under the
            // lock so no save snapshots in between.
            invalidate_saves(&self.inner);
            state.forest = BranchState::new();
            state.conversation_id = None;
            state.error = None;
            state.recovery = None;
        }
        tracing::info!("ChatEngine: conversation cleared");
        Ok(())
    }

    /// Shallow-merge mode-specific keys into the auxiliary state persisted
    /// with the conversation. Later values for the same key win whole.
    pub fn set_external_metadata(&self, partial: Map<String, Value>) {
        if partial.is_empty() {
            return;
        }
        {
            let mut state = self.inner.state.write().unwrap();
            for (key, value) in partial {
                state.mode_state.insert(key, value);
            }
        }
        schedule_save(&self.inner);
    }

    /// The combined metadata document a save would persist right now.
    pub fn metadata_snapshot(&self) -> ConversationMetadata {
        self.inner
            .state
            .read()
            .unwrap()
            .metadata_snapshot(&self.inner.config)
    }

    /// Coherent snapshot of the observable state.
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.inner.state.read().unwrap();
        EngineSnapshot {
            messages: state.forest.active_messages().to_vec(),
            is_loading: state.is_loading,
            error: state.error.clone(),
            conversation_id: state.conversation_id,
            branches: state.forest.branches.clone(),
            current_branch_id: state.forest.current_branch_id,
            can_regenerate: state.can_regenerate(),
            generation_recovery: state.recovery.clone(),
        }
    }

    /// Tear the engine down: silently cancel any in-flight generation and
    /// outstanding saves. Idempotent; further operations return
    /// [`EngineError::Terminated`].
    pub fn shutdown(&self) {
        tracing::info!("ChatEngine: shutting down");
        self.inner.shutdown.cancel();
        teardown(&self.inner);
    }

    fn start_stream(&self, job: StreamJob) {
        self.inner.emit(EngineEvent::StreamStarted {
            branch_id: job.branch_id,
            message_id: job.message_id,
        });
        // Records the user-turn mutation; with the stream now flagged as in
        // flight this defers to the post-stream flush.
        schedule_save(&self.inner);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_stream(inner, job).await;
        });
    }
}
