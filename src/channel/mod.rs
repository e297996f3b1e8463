// src/channel/mod.rs
// Connection Manager - one self-healing duplex channel per job

mod protocol;
mod retry;
mod session;
mod transport;

pub use protocol::{parse_message, ProgressUpdate, ProtocolError, ServerMessage};
pub use retry::ReconnectPolicy;
pub use transport::{FrameStream, Transport, TransportError, WebSocketTransport};

use self::session::{run_connection, Emitter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 256;

/// Connectivity as seen by subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Live { session_id: String, greeting: String },
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Terminal: the retry budget is spent or the server refused the job
    Disconnected { reason: String },
    /// Torn down by `ConnectionManager::disconnect`
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Status(ConnectionStatus),
    Message(ServerMessage),
}

/// Everything published on a job's channel, tagged with the connection epoch
/// so a consumer can drop events from a connection it already tore down.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub job_id: String,
    pub epoch: u64,
    pub kind: ChannelEventKind,
}

/// Subscription returned by `connect`
pub struct ConnectionHandle {
    pub job_id: String,
    pub epoch: u64,
    pub events: broadcast::Receiver<ChannelEvent>,
}

impl ConnectionHandle {
    /// Waits for the next event. Lagged receivers skip ahead, which is
    /// consistent with the channel's at-most-once delivery.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscriber for job {} lagged, {} events dropped",
                        self.job_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct LiveConnection {
    epoch: u64,
    events: broadcast::Sender<ChannelEvent>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    heartbeat_timeout: Duration,
    connections: HashMap<String, LiveConnection>,
    next_epoch: u64,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            policy,
            heartbeat_timeout,
            connections: HashMap::new(),
            next_epoch: 1,
        }
    }

    /// Opens (or joins) the channel for `job_id`.
    ///
    /// A second call while the first connection is still running returns a
    /// new subscription to the same connection instead of opening another.
    pub fn connect(&mut self, job_id: &str) -> ConnectionHandle {
        if let Some(live) = self.connections.get(job_id) {
            if !live.task.is_finished() {
                tracing::debug!("Joining existing channel for job {}", job_id);
                return ConnectionHandle {
                    job_id: job_id.to_string(),
                    epoch: live.epoch,
                    events: live.events.subscribe(),
                };
            }
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let (tx, rx) = broadcast::channel(EVENT_BUFFER);
        let emitter = Emitter {
            job_id: job_id.to_string(),
            epoch,
            tx: tx.clone(),
        };
        let task = tokio::spawn(run_connection(
            emitter,
            self.transport.clone(),
            self.policy.clone(),
            self.heartbeat_timeout,
        ));

        tracing::info!("Connecting channel for job {} (epoch {})", job_id, epoch);
        self.connections.insert(
            job_id.to_string(),
            LiveConnection {
                epoch,
                events: tx,
                task,
            },
        );

        ConnectionHandle {
            job_id: job_id.to_string(),
            epoch,
            events: rx,
        }
    }

    /// Tears the channel down, cancelling any pending reconnect timer.
    pub fn disconnect(&mut self, job_id: &str) -> bool {
        let Some(live) = self.connections.remove(job_id) else {
            return false;
        };

        live.task.abort();
        let _ = live.events.send(ChannelEvent {
            job_id: job_id.to_string(),
            epoch: live.epoch,
            kind: ChannelEventKind::Status(ConnectionStatus::Closed),
        });
        tracing::info!("Disconnected channel for job {} (epoch {})", job_id, live.epoch);
        true
    }

    pub fn is_connected(&self, job_id: &str) -> bool {
        self.connections
            .get(job_id)
            .map(|live| !live.task.is_finished())
            .unwrap_or(false)
    }

    pub fn current_epoch(&self, job_id: &str) -> Option<u64> {
        self.connections.get(job_id).map(|live| live.epoch)
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|(_, live)| !live.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for live in self.connections.values() {
            live.task.abort();
        }
    }
}
