// src/progress/mod.rs
// Progress Reducer - folds channel traffic into one progress snapshot

mod log;

pub use log::{LogEntry, LogLevel, LOG_CAPACITY};

use crate::channel::{ConnectionStatus, ProgressUpdate, ServerMessage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Connecting,
    Processing,
    Completed,
    Error,
}

/// Connectivity indicator shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Offline,
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
    Disconnected { reason: String },
    Closed,
}

/// Final tally from `generation_complete`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_chunks: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub channel: ChannelState,
    pub current: u32,
    pub total_chunks: u32,
    pub percentage: f64,
    pub eta_seconds: Option<f64>,
    pub current_chunk_id: Option<String>,
    pub completed_chunk_ids: BTreeSet<String>,
    pub failed_chunk_ids: BTreeSet<String>,
    pub chunk_durations: BTreeMap<String, f64>,
    pub summary: Option<BatchSummary>,
    pub last_error: Option<String>,
    pub log: Vec<LogEntry>,
}

impl ProgressSnapshot {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Idle,
            channel: ChannelState::Offline,
            current: 0,
            total_chunks: 0,
            percentage: 0.0,
            eta_seconds: None,
            current_chunk_id: None,
            completed_chunk_ids: BTreeSet::new(),
            failed_chunk_ids: BTreeSet::new(),
            chunk_durations: BTreeMap::new(),
            summary: None,
            last_error: None,
            log: Vec::new(),
        }
    }

    /// Completed chunk count; the batch summary wins once it has arrived.
    pub fn completed_count(&self) -> u32 {
        match &self.summary {
            Some(summary) => summary.succeeded,
            None => self.completed_chunk_ids.len() as u32,
        }
    }

    pub fn failed_count(&self) -> u32 {
        match &self.summary {
            Some(summary) => summary.failed,
            None => self.failed_chunk_ids.len() as u32,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Resets per-batch fields when a new generation run starts.
pub fn begin_batch(mut snapshot: ProgressSnapshot, total_chunks: u32) -> ProgressSnapshot {
    snapshot.status = JobStatus::Processing;
    snapshot.current = 0;
    snapshot.total_chunks = total_chunks;
    snapshot.percentage = 0.0;
    snapshot.eta_seconds = None;
    snapshot.current_chunk_id = None;
    snapshot.completed_chunk_ids.clear();
    snapshot.failed_chunk_ids.clear();
    snapshot.summary = None;
    snapshot.last_error = None;
    let message = format!("Generation started for {} chunks", total_chunks);
    log::push_entry(&mut snapshot.log, Utc::now(), LogLevel::Info, message);
    snapshot
}

pub fn reduce(snapshot: ProgressSnapshot, message: &ServerMessage) -> ProgressSnapshot {
    reduce_at(snapshot, message, Utc::now())
}

/// Pure transition `(snapshot, message) -> snapshot'` with an explicit clock.
pub fn reduce_at(
    mut snapshot: ProgressSnapshot,
    message: &ServerMessage,
    at: DateTime<Utc>,
) -> ProgressSnapshot {
    match message {
        ServerMessage::Connected { message } => {
            snapshot.channel = ChannelState::Live;
            let text = message
                .clone()
                .unwrap_or_else(|| format!("Connected to job {}", snapshot.job_id));
            log::push_entry(&mut snapshot.log, at, LogLevel::Info, text);
        }
        ServerMessage::Progress(update) => apply_progress(&mut snapshot, update, at),
        ServerMessage::ChunkCompleted { chunk_id, duration } => {
            let newly_completed = snapshot.completed_chunk_ids.insert(chunk_id.clone());
            snapshot.failed_chunk_ids.remove(chunk_id);
            if let Some(duration) = duration.filter(|d| d.is_finite() && *d >= 0.0) {
                snapshot.chunk_durations.insert(chunk_id.clone(), duration);
            }
            if newly_completed {
                let text = match duration {
                    Some(d) => format!("Chunk {} completed ({:.1}s)", chunk_id, d),
                    None => format!("Chunk {} completed", chunk_id),
                };
                log::push_entry(&mut snapshot.log, at, LogLevel::Success, text);
            }
        }
        ServerMessage::GenerationComplete {
            total_chunks,
            succeeded,
            failed,
            success_rate,
        } => {
            snapshot.status = JobStatus::Completed;
            snapshot.percentage = 100.0;
            snapshot.eta_seconds = None;
            snapshot.current_chunk_id = None;
            snapshot.total_chunks = *total_chunks;
            snapshot.current = *total_chunks;
            snapshot.summary = Some(BatchSummary {
                total_chunks: *total_chunks,
                succeeded: *succeeded,
                failed: *failed,
                success_rate: *success_rate,
            });
            let level = if *failed > 0 {
                LogLevel::Warning
            } else {
                LogLevel::Success
            };
            let text = format!(
                "Generation complete: {}/{} succeeded, {} failed",
                succeeded, total_chunks, failed
            );
            log::push_entry(&mut snapshot.log, at, level, text);
        }
        ServerMessage::Error {
            error_type,
            error_message,
        } => {
            snapshot.status = JobStatus::Error;
            let text = if error_type.is_empty() {
                error_message.clone()
            } else {
                format!("{}: {}", error_type, error_message)
            };
            snapshot.last_error = Some(text.clone());
            log::push_entry(&mut snapshot.log, at, LogLevel::Error, text);
        }
        ServerMessage::Heartbeat => {}
    }

    snapshot
}

fn apply_progress(snapshot: &mut ProgressSnapshot, update: &ProgressUpdate, at: DateTime<Utc>) {
    // generation_complete is final for the batch; a late progress frame
    // must not walk it back.
    if snapshot.status == JobStatus::Completed {
        return;
    }

    snapshot.current = update.current;
    snapshot.total_chunks = update.total;
    snapshot.eta_seconds = update.eta_seconds.filter(|eta| eta.is_finite() && *eta >= 0.0);
    snapshot.current_chunk_id = update.chunk_id.clone();

    snapshot.percentage = derive_percentage(update);
    snapshot.status = status_from_wire(&update.status);

    if let Some(error) = update.error.as_ref().filter(|e| !e.is_empty()) {
        snapshot.last_error = Some(error.clone());
        if let Some(chunk_id) = update.chunk_id.as_ref() {
            snapshot.failed_chunk_ids.insert(chunk_id.clone());
            snapshot.completed_chunk_ids.remove(chunk_id);
        }
        log::push_entry(&mut snapshot.log, at, LogLevel::Warning, error.clone());
    }
}

fn derive_percentage(update: &ProgressUpdate) -> f64 {
    let reported = if update.percentage > 0.0 || update.total == 0 {
        update.percentage
    } else {
        update.current as f64 / update.total as f64 * 100.0
    };
    if reported.is_finite() {
        reported.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn status_from_wire(status: &str) -> JobStatus {
    match status.trim().to_lowercase().as_str() {
        "completed" | "complete" | "done" => JobStatus::Completed,
        "error" | "failed" => JobStatus::Error,
        "idle" => JobStatus::Idle,
        _ => JobStatus::Processing,
    }
}

/// Mirrors connection status into the snapshot's connectivity indicator.
pub fn apply_channel_status(
    mut snapshot: ProgressSnapshot,
    status: &ConnectionStatus,
) -> ProgressSnapshot {
    let at = Utc::now();
    match status {
        ConnectionStatus::Connecting => {
            snapshot.channel = ChannelState::Connecting;
            if snapshot.status == JobStatus::Idle {
                snapshot.status = JobStatus::Connecting;
            }
        }
        ConnectionStatus::Live { greeting, .. } => {
            snapshot.channel = ChannelState::Live;
            if snapshot.status == JobStatus::Connecting {
                snapshot.status = JobStatus::Idle;
            }
            log::push_entry(&mut snapshot.log, at, LogLevel::Info, greeting.clone());
        }
        ConnectionStatus::Reconnecting { attempt, delay_ms } => {
            snapshot.channel = ChannelState::Reconnecting { attempt: *attempt };
            let text = format!("Connection lost, retrying in {}ms (attempt {})", delay_ms, attempt);
            log::push_entry(&mut snapshot.log, at, LogLevel::Warning, text);
        }
        ConnectionStatus::Disconnected { reason } => {
            snapshot.channel = ChannelState::Disconnected {
                reason: reason.clone(),
            };
            if snapshot.status == JobStatus::Connecting {
                snapshot.status = JobStatus::Idle;
            }
            let text = format!("Disconnected: {}", reason);
            log::push_entry(&mut snapshot.log, at, LogLevel::Error, text);
        }
        ConnectionStatus::Closed => {
            snapshot.channel = ChannelState::Closed;
            if snapshot.status == JobStatus::Connecting {
                snapshot.status = JobStatus::Idle;
            }
            log::push_entry(&mut snapshot.log, at, LogLevel::Info, "Channel closed".to_string());
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(chunk_id: &str) -> ServerMessage {
        ServerMessage::ChunkCompleted {
            chunk_id: chunk_id.to_string(),
            duration: Some(2.0),
        }
    }

    fn progress(current: u32, total: u32, status: &str) -> ServerMessage {
        ServerMessage::Progress(ProgressUpdate {
            current,
            total,
            percentage: 0.0,
            status: status.to_string(),
            ..ProgressUpdate::default()
        })
    }

    fn fold(messages: &[ServerMessage]) -> ProgressSnapshot {
        messages
            .iter()
            .fold(ProgressSnapshot::new("job"), |s, m| reduce(s, m))
    }

    #[test]
    fn duplicate_chunk_completed_counts_once() {
        let once = fold(&[completed("a"), completed("b")]);
        let twice = fold(&[completed("a"), completed("b"), completed("a"), completed("b")]);

        assert_eq!(once.completed_chunk_ids, twice.completed_chunk_ids);
        assert_eq!(twice.completed_count(), 2);
        assert_eq!(once.log.len(), twice.log.len());
    }

    #[test]
    fn generation_complete_is_authoritative() {
        let snapshot = fold(&[
            progress(1, 5, "processing"),
            completed("1"),
            completed("2"),
            completed("3"),
            completed("4"),
            ServerMessage::GenerationComplete {
                total_chunks: 5,
                succeeded: 5,
                failed: 0,
                success_rate: 100.0,
            },
        ]);

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.percentage, 100.0);
        assert_eq!(snapshot.completed_count(), 5);
        assert_eq!(snapshot.completed_chunk_ids.len(), 4);
    }

    #[test]
    fn late_progress_does_not_reopen_a_finished_batch() {
        let snapshot = fold(&[
            ServerMessage::GenerationComplete {
                total_chunks: 2,
                succeeded: 2,
                failed: 0,
                success_rate: 100.0,
            },
            ServerMessage::Progress(ProgressUpdate {
                current: 1,
                total: 2,
                status: "processing".to_string(),
                chunk_id: Some("c1".to_string()),
                ..ProgressUpdate::default()
            }),
        ]);
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.percentage, 100.0);
        assert_eq!((snapshot.current, snapshot.total_chunks), (2, 2));
        assert_eq!(snapshot.current_chunk_id, None);
    }

    #[test]
    fn errors_are_recorded_and_processing_resumes() {
        let snapshot = fold(&[
            progress(1, 4, "processing"),
            ServerMessage::Error {
                error_type: "chunk_failed".to_string(),
                error_message: "voice model busy".to_string(),
            },
        ]);
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("chunk_failed: voice model busy")
        );

        let resumed = reduce(snapshot, &progress(2, 4, "processing"));
        assert_eq!(resumed.status, JobStatus::Processing);
        assert_eq!(resumed.percentage, 50.0);
    }

    #[test]
    fn progress_with_error_marks_chunk_failed() {
        let snapshot = fold(&[ServerMessage::Progress(ProgressUpdate {
            current: 1,
            total: 3,
            percentage: 33.3,
            status: "processing".to_string(),
            chunk_id: Some("c1".to_string()),
            eta_seconds: Some(12.0),
            error: Some("synthesis failed".to_string()),
        })]);

        assert_eq!(snapshot.failed_count(), 1);
        assert!(snapshot.failed_chunk_ids.contains("c1"));
        assert_eq!(snapshot.eta_seconds, Some(12.0));
        assert_eq!(snapshot.status, JobStatus::Processing);
    }

    #[test]
    fn heartbeat_changes_nothing() {
        let before = fold(&[progress(3, 10, "processing")]);
        let after = reduce(before.clone(), &ServerMessage::Heartbeat);
        assert_eq!(before, after);
    }

    #[test]
    fn percentage_is_clamped() {
        let snapshot = fold(&[ServerMessage::Progress(ProgressUpdate {
            current: 3,
            total: 2,
            percentage: 180.0,
            status: "processing".to_string(),
            ..ProgressUpdate::default()
        })]);
        assert_eq!(snapshot.percentage, 100.0);
    }

    #[test]
    fn log_is_bounded() {
        let messages: Vec<ServerMessage> =
            (0..LOG_CAPACITY + 25).map(|i| completed(&i.to_string())).collect();
        let snapshot = fold(&messages);
        assert_eq!(snapshot.log.len(), LOG_CAPACITY);
        assert_eq!(snapshot.log.last().unwrap().message, format!("Chunk {} completed (2.0s)", LOG_CAPACITY + 24));
    }

    #[test]
    fn begin_batch_clears_previous_run() {
        let finished = fold(&[
            completed("a"),
            ServerMessage::GenerationComplete {
                total_chunks: 1,
                succeeded: 1,
                failed: 0,
                success_rate: 100.0,
            },
        ]);
        let fresh = begin_batch(finished, 3);
        assert_eq!(fresh.status, JobStatus::Processing);
        assert_eq!(fresh.completed_count(), 0);
        assert_eq!(fresh.total_chunks, 3);
        assert!(fresh.summary.is_none());
    }

    #[test]
    fn channel_status_drives_indicator() {
        let s = ProgressSnapshot::new("job");
        let s = apply_channel_status(s, &ConnectionStatus::Connecting);
        assert_eq!(s.status, JobStatus::Connecting);
        let s = apply_channel_status(
            s,
            &ConnectionStatus::Live {
                session_id: "x".to_string(),
                greeting: "hello".to_string(),
            },
        );
        assert_eq!(s.channel, ChannelState::Live);
        assert_eq!(s.status, JobStatus::Idle);
        let s = apply_channel_status(
            s,
            &ConnectionStatus::Reconnecting {
                attempt: 2,
                delay_ms: 400,
            },
        );
        assert_eq!(s.channel, ChannelState::Reconnecting { attempt: 2 });
    }
}
