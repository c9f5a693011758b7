//! Stream ingestion: drives one generation attempt end to end, applying
//! decoded frames to the owning branch in arrival order.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conversation_core::Message;
use generation_client::{
    FrameDecoder, FrameEvent, GenerationError, GenerationRequest, StreamFrame,
};

use crate::engine::EngineInner;
use crate::events::{EngineEvent, ErrorInfo, FinishReason};
use crate::persist::{flush_after_stream, schedule_save};

/// One generation attempt. The branch and message ids pin every update to
/// the draft the attempt started on, even if the user switches branches
/// while it streams.
pub(crate) struct StreamJob {
    pub(crate) branch_id: Uuid,
    pub(crate) message_id: Uuid,
    pub(crate) request: GenerationRequest,
    pub(crate) cancel: CancellationToken,
    pub(crate) on_failure: FailureAction,
}

/// Branch cleanup when an attempt fails hard.
pub(crate) enum FailureAction {
    /// Drop the dangling placeholder (plain sends).
    RemovePlaceholder,
    /// Restore the exact pre-attempt message list (regeneration).
    RestoreMessages(Vec<Message>),
}

pub(crate) async fn run_stream(inner: Arc<EngineInner>, job: StreamJob) {
    tracing::debug!(
        branch_id = %job.branch_id,
        message_id = %job.message_id,
        "Ingest: opening generation stream"
    );

    let opened = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => {
            finish_cancelled(&inner, &job).await;
            return;
        }
        result = inner.backend.start_generation(&job.request) => result,
    };
    let mut chunks = match opened {
        Ok(stream) => stream,
        Err(e) => {
            finish_failed(&inner, &job, e).await;
            return;
        }
    };

    let mut decoder = FrameDecoder::new();
    let mut draft = String::new();
    let mut consumed_units = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => {
                finish_cancelled(&inner, &job).await;
                return;
            }
            next = chunks.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                let events = match decoder.feed(&bytes) {
                    Ok(events) => events,
                    Err(e) => {
                        finish_failed(&inner, &job, e).await;
                        return;
                    }
                };
                for event in events {
                    match event {
                        FrameEvent::Data(frame) => {
                            apply_frame(&inner, &job, frame, &mut draft, &mut consumed_units);
                        }
                        FrameEvent::Done => {
                            finish_completed(&inner, &job, consumed_units).await;
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                finish_failed(&inner, &job, e).await;
                return;
            }
            // EOF without the end marker counts as a clean completion.
            None => {
                finish_completed(&inner, &job, consumed_units).await;
                return;
            }
        }
    }
}

/// Apply one data frame to the draft. Content fragments extend a local
/// accumulator and the full accumulated text replaces the message content,
/// so a snapshot taken mid-stream always sees a consistent prefix.
fn apply_frame(
    inner: &Arc<EngineInner>,
    job: &StreamJob,
    frame: StreamFrame,
    draft: &mut String,
    consumed_units: &mut Option<u64>,
) {
    if frame.is_empty() {
        return;
    }
    if let Some(units) = frame.consumed_units {
        *consumed_units = Some(units);
    }
    let delta = frame.content.unwrap_or_default();
    let applied = {
        let mut state = inner.state.write().unwrap();
        match state.forest.message_mut(job.branch_id, job.message_id) {
            Some(message) => {
                if !delta.is_empty() {
                    draft.push_str(&delta);
                    message.content = draft.clone();
                }
                if let Some(fragment) = &frame.metadata {
                    message.metadata_mut().merge(fragment);
                }
                true
            }
            None => false,
        }
    };
    if !applied {
        tracing::warn!(
            branch_id = %job.branch_id,
            message_id = %job.message_id,
            "Ingest: draft message is gone, dropping frame"
        );
        return;
    }
    if !delta.is_empty() {
        inner.emit(EngineEvent::ContentDelta {
            branch_id: job.branch_id,
            message_id: job.message_id,
            delta,
            accumulated: draft.clone(),
        });
    }
    schedule_save(inner);
}

async fn finish_completed(inner: &Arc<EngineInner>, job: &StreamJob, consumed_units: Option<u64>) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    {
        let mut state = inner.state.write().unwrap();
        if let Some(units) = consumed_units {
            if let Some(message) = state.forest.message_mut(job.branch_id, job.message_id) {
                message.metadata_mut().set_consumed_units(units);
            }
        }
        state.is_loading = false;
        state.active_stream = None;
    }
    tracing::info!(
        branch_id = %job.branch_id,
        message_id = %job.message_id,
        consumed_units = ?consumed_units,
        "Ingest: stream completed"
    );
    inner.emit(EngineEvent::StreamFinished {
        branch_id: job.branch_id,
        message_id: job.message_id,
        reason: FinishReason::Completed,
        consumed_units,
    });
    flush_after_stream(inner).await;
}

async fn finish_cancelled(inner: &Arc<EngineInner>, job: &StreamJob) {
    // Engine teardown cancels this same token; then nothing may touch
    // state anymore.
    if inner.shutdown.is_cancelled() {
        tracing::debug!(branch_id = %job.branch_id, "Ingest: stream ended by shutdown");
        return;
    }
    {
        let mut state = inner.state.write().unwrap();
        state.is_loading = false;
        state.active_stream = None;
    }
    tracing::info!(
        branch_id = %job.branch_id,
        message_id = %job.message_id,
        "Ingest: stream cancelled, partial draft kept"
    );
    inner.emit(EngineEvent::StreamFinished {
        branch_id: job.branch_id,
        message_id: job.message_id,
        reason: FinishReason::Cancelled,
        consumed_units: None,
    });
    flush_after_stream(inner).await;
}

async fn finish_failed(inner: &Arc<EngineInner>, job: &StreamJob, error: GenerationError) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    let auth_expired = matches!(error, GenerationError::AuthExpired);
    // Session expiry is handed to the re-auth flow instead of becoming an
    // in-conversation error.
    let info = if auth_expired {
        None
    } else {
        Some(ErrorInfo::from(&error))
    };
    {
        let mut state = inner.state.write().unwrap();
        match &job.on_failure {
            FailureAction::RemovePlaceholder => {
                state.forest.remove_message(job.branch_id, job.message_id);
            }
            FailureAction::RestoreMessages(saved) => {
                state.forest.replace_messages(job.branch_id, saved.clone());
            }
        }
        state.is_loading = false;
        state.active_stream = None;
        state.error = info.clone();
    }
    tracing::warn!(
        branch_id = %job.branch_id,
        message_id = %job.message_id,
        error = %error,
        "Ingest: stream failed"
    );
    if let Some(info) = info {
        inner.emit(EngineEvent::Error(info));
    }
    inner.emit(EngineEvent::StreamFinished {
        branch_id: job.branch_id,
        message_id: job.message_id,
        reason: FinishReason::Failed,
        consumed_units: None,
    });
    if auth_expired {
        inner.reauth.session_expired().await;
    }
    flush_after_stream(inner).await;
}
