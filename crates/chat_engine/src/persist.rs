//! Debounced conversation persistence.
//!
//! Every mutation schedules a save; rapid mutation collapses to one write
//! after a quiet window. While a generation streams, saves are deferred
//! entirely and a single flush runs once the stream settles. A save still in
//! flight when a newer one starts is cancelled and its result discarded, so
//! a stale snapshot can never land over a newer one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conversation_core::{ConversationMetadata, Message};

use crate::engine::EngineInner;
use crate::events::EngineEvent;
use crate::store::StoreError;

pub(crate) struct SaveScheduler {
    /// Bumped by every schedule; a timer only runs its save if it still
    /// owns the latest generation when the window closes.
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<Option<CancellationToken>>,
    pending_flush: AtomicBool,
}

impl SaveScheduler {
    pub(crate) fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            timer: Mutex::new(None),
            in_flight: Mutex::new(None),
            pending_flush: AtomicBool::new(false),
        }
    }
}

/// Record a mutation: (re)arm the debounce window, or defer entirely while
/// a generation is streaming.
pub(crate) fn schedule_save(inner: &Arc<EngineInner>) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    if inner.state.read().unwrap().is_loading {
        inner.saves.pending_flush.store(true, Ordering::SeqCst);
        return;
    }

    let generation = inner.saves.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let window = Duration::from_millis(inner.config.debounce_window_ms);
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = task_inner.shutdown.cancelled() => return,
            _ = tokio::time::sleep(window) => {}
        }
        // A newer mutation re-armed the window; that timer owns the save.
        if task_inner.saves.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        // A stream may have started while the window ran.
        if task_inner.state.read().unwrap().is_loading {
            task_inner.saves.pending_flush.store(true, Ordering::SeqCst);
            return;
        }
        run_save(&task_inner, generation).await;
    });
    if let Some(previous) = inner.saves.timer.lock().unwrap().replace(handle) {
        previous.abort();
    }
}

/// Run the save deferred during a stream. Exactly one flush per stream end;
/// without a deferred save this does nothing.
pub(crate) async fn flush_after_stream(inner: &Arc<EngineInner>) {
    if !inner.saves.pending_flush.swap(false, Ordering::SeqCst) {
        return;
    }
    if inner.shutdown.is_cancelled() {
        return;
    }
    // A new generation may have started since this stream settled; its own
    // flush covers the deferred work then.
    if inner.state.read().unwrap().is_loading {
        inner.saves.pending_flush.store(true, Ordering::SeqCst);
        return;
    }
    // Kill any window armed before the stream started; this flush is the
    // one write.
    let generation = inner.saves.generation.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::debug!("SaveScheduler: flushing save deferred during stream");
    run_save(inner, generation).await;
}

/// Forget all queued and in-flight persistence work. Used when the live
/// conversation is replaced, cleared, or torn down.
pub(crate) fn invalidate_saves(inner: &Arc<EngineInner>) {
    inner.saves.generation.fetch_add(1, Ordering::SeqCst);
    inner.saves.pending_flush.store(false, Ordering::SeqCst);
    if let Some(timer) = inner.saves.timer.lock().unwrap().take() {
        timer.abort();
    }
    if let Some(token) = inner.saves.in_flight.lock().unwrap().take() {
        token.cancel();
    }
}

pub(crate) fn teardown(inner: &Arc<EngineInner>) {
    tracing::debug!("SaveScheduler: tearing down");
    invalidate_saves(inner);
}

/// Snapshot current state and write it, superseding any save still in
/// flight. The first successful write of a new conversation assigns its id.
pub(crate) async fn run_save(inner: &Arc<EngineInner>, generation: u64) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    // Snapshot and token installation happen under one read guard so a
    // concurrent save cannot install a newer token with older state, and a
    // clear or load holding the write lock cannot slip in between the
    // generation check and the snapshot.
    let (conversation_id, messages, metadata, token) = {
        let state = inner.state.read().unwrap();
        if inner.saves.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("SaveScheduler: save invalidated before snapshot");
            return;
        }
        let token = inner.shutdown.child_token();
        if let Some(previous) = inner.saves.in_flight.lock().unwrap().replace(token.clone()) {
            // Cancelling an already-finished save is a no-op.
            previous.cancel();
        }
        (
            state.conversation_id,
            state.forest.active_messages().to_vec(),
            state.metadata_snapshot(&inner.config),
            token,
        )
    };

    let outcome = tokio::select! {
        _ = token.cancelled() => None,
        result = write_snapshot(inner, conversation_id, &messages, &metadata) => Some(result),
    };

    match outcome {
        None => {
            tracing::debug!("SaveScheduler: save superseded, result discarded");
        }
        Some(Ok(Some(new_id))) => {
            let assigned = {
                let mut state = inner.state.write().unwrap();
                // A cancelled token here means a clear or load replaced the
                // conversation while the write was in flight; the id belongs
                // to the replaced one.
                if state.conversation_id.is_none() && !token.is_cancelled() {
                    state.conversation_id = Some(new_id);
                    true
                } else {
                    false
                }
            };
            if assigned {
                tracing::info!(
                    conversation_id = %new_id,
                    "SaveScheduler: conversation created"
                );
                inner.emit(EngineEvent::ConversationCreated {
                    conversation_id: new_id,
                });
            }
        }
        Some(Ok(None)) => {}
        Some(Err(StoreError::AuthExpired)) => {
            tracing::warn!("SaveScheduler: save hit expired session");
            inner.reauth.session_expired().await;
        }
        Some(Err(e)) => {
            // Absorbed: the next mutation schedules another attempt.
            tracing::warn!(error = %e, "SaveScheduler: save failed");
        }
    }
}

async fn write_snapshot(
    inner: &Arc<EngineInner>,
    conversation_id: Option<Uuid>,
    messages: &[Message],
    metadata: &ConversationMetadata,
) -> Result<Option<Uuid>, StoreError> {
    match conversation_id {
        Some(id) => {
            inner.store.update(id, messages, metadata).await?;
            tracing::debug!(
                conversation_id = %id,
                message_count = messages.len(),
                "SaveScheduler: conversation updated"
            );
            Ok(None)
        }
        None => {
            let id = inner
                .store
                .create(
                    &inner.config.mode,
                    messages,
                    metadata,
                    inner.config.grouping_id.as_deref(),
                )
                .await?;
            Ok(Some(id))
        }
    }
}
