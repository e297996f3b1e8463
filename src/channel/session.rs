use super::protocol::{parse_message, ProtocolError};
use super::{
    ChannelEvent, ChannelEventKind, ConnectionStatus, FrameStream, ReconnectPolicy, Transport,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Tags everything a connection task publishes with its job id and epoch
pub(crate) struct Emitter {
    pub job_id: String,
    pub epoch: u64,
    pub tx: broadcast::Sender<ChannelEvent>,
}

impl Emitter {
    pub fn emit(&self, kind: ChannelEventKind) {
        // No subscribers is fine; delivery is best effort.
        let _ = self.tx.send(ChannelEvent {
            job_id: self.job_id.clone(),
            epoch: self.epoch,
            kind,
        });
    }

    fn status(&self, status: ConnectionStatus) {
        self.emit(ChannelEventKind::Status(status));
    }
}

/// Keeps one job's channel open until the retry budget runs out.
///
/// Runs until aborted by `ConnectionManager::disconnect` or until it gives up,
/// in which case the last thing it publishes is `Disconnected`.
pub(crate) async fn run_connection(
    emitter: Emitter,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    heartbeat_timeout: Duration,
) {
    let job_id = emitter.job_id.clone();
    let mut attempt: u32 = 0;

    emitter.status(ConnectionStatus::Connecting);

    loop {
        let failure = match transport.open(&job_id).await {
            Ok(frames) => {
                attempt = 0;
                let session_id = Uuid::new_v4().to_string();
                tracing::info!(
                    "Channel live for job {} (session {}, epoch {})",
                    job_id,
                    session_id,
                    emitter.epoch
                );
                emitter.status(ConnectionStatus::Live {
                    session_id,
                    greeting: format!("Connected to live updates for job {}", job_id),
                });

                let reason = pump_frames(&emitter, frames, heartbeat_timeout).await;
                tracing::warn!("Channel for job {} dropped: {}", job_id, reason);
                reason
            }
            Err(e) => {
                tracing::warn!("Channel for job {} failed to open: {}", job_id, e);
                e
            }
        };

        attempt += 1;
        if !policy.should_retry(attempt, &failure) {
            tracing::error!(
                "Giving up on channel for job {} after {} attempts: {}",
                job_id,
                attempt,
                failure
            );
            emitter.status(ConnectionStatus::Disconnected {
                reason: failure.to_string(),
            });
            return;
        }

        let delay = policy.delay_for(attempt);
        emitter.status(ConnectionStatus::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        policy.wait_before_retry(attempt).await;
        emitter.status(ConnectionStatus::Connecting);
    }
}

/// Forwards parsed frames until the session ends, returning why it ended.
async fn pump_frames(
    emitter: &Emitter,
    mut frames: Box<dyn FrameStream>,
    heartbeat_timeout: Duration,
) -> TransportError {
    loop {
        let next = match tokio::time::timeout(heartbeat_timeout, frames.next_text()).await {
            Ok(next) => next,
            Err(_) => return TransportError::InactivityTimeout(heartbeat_timeout.as_secs()),
        };

        let text = match next {
            Ok(Some(text)) => text,
            Ok(None) => return TransportError::Closed("closed by server".to_string()),
            Err(e) => return e,
        };

        match parse_message(&text) {
            Ok(message) => {
                tracing::debug!(
                    "Job {} <- {} (epoch {})",
                    emitter.job_id,
                    message.kind(),
                    emitter.epoch
                );
                emitter.emit(ChannelEventKind::Message(message));
            }
            Err(ProtocolError::UnknownType(kind)) => {
                tracing::debug!("Ignoring unknown message type '{}'", kind);
            }
            Err(e) => {
                tracing::warn!("Ignoring frame for job {}: {}", emitter.job_id, e);
            }
        }
    }
}
