// src/merge/mod.rs
// Auto-Merge Policy - decides when the merged narration should be requested

use crate::api::{Chunk, ChunkStatus};
use crate::ledger::ChunkLedger;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoChunks,
    Incomplete,
    StillProcessing,
    Generating,
    AlreadyMerged,
    InconsistentLedger,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Fire,
    Skip(SkipReason),
}

/// The bare predicate: every chunk completed, nothing processing, no merged
/// audio yet and no batch running. An empty chunk list never qualifies.
pub fn should_merge(chunks: &[Chunk], audio_ref: Option<&str>, is_generating: bool) -> bool {
    skip_reason(chunks, audio_ref, is_generating).is_none()
}

fn skip_reason(chunks: &[Chunk], audio_ref: Option<&str>, is_generating: bool) -> Option<SkipReason> {
    if audio_ref.is_some() {
        return Some(SkipReason::AlreadyMerged);
    }
    if is_generating {
        return Some(SkipReason::Generating);
    }
    if chunks.is_empty() {
        return Some(SkipReason::NoChunks);
    }
    if chunks.iter().any(|c| c.status == ChunkStatus::Processing) {
        return Some(SkipReason::StillProcessing);
    }
    if !chunks.iter().all(|c| c.status == ChunkStatus::Completed) {
        return Some(SkipReason::Incomplete);
    }
    None
}

/// Single-flight latch per job id.
///
/// Once a merge fires the job stays latched until merged audio is observed
/// (`evaluate` sees an `audio_ref`) or the caller resets it because a new
/// batch started. A failed merge stays latched so repeated evaluations do
/// not hammer the server; a manual merge or a new batch clears it.
#[derive(Debug, Default)]
pub struct AutoMergeGuard {
    latched: HashSet<String>,
}

impl AutoMergeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides and, on `Fire`, latches before returning so a second
    /// evaluation before the merge call resolves is suppressed.
    pub fn evaluate(
        &mut self,
        job_id: &str,
        ledger: &ChunkLedger,
        audio_ref: Option<&str>,
        is_generating: bool,
    ) -> MergeDecision {
        if audio_ref.is_some() && self.latched.remove(job_id) {
            tracing::debug!("Merge epoch closed for job {}", job_id);
        }

        if let Some(reason) = skip_reason(ledger.chunks(), audio_ref, is_generating) {
            return MergeDecision::Skip(reason);
        }
        if !ledger.is_consistent() {
            return MergeDecision::Skip(SkipReason::InconsistentLedger);
        }
        if !self.latched.insert(job_id.to_string()) {
            return MergeDecision::Skip(SkipReason::InFlight);
        }

        tracing::info!(
            "Auto-merge firing for job {} ({} chunks)",
            job_id,
            ledger.chunks().len()
        );
        MergeDecision::Fire
    }

    /// Latches without evaluating, for a merge the user asked for.
    /// Returns false when one was already latched.
    pub fn latch(&mut self, job_id: &str) -> bool {
        self.latched.insert(job_id.to_string())
    }

    pub fn is_latched(&self, job_id: &str) -> bool {
        self.latched.contains(job_id)
    }

    /// Opens a new epoch for the job, e.g. when a generation batch starts.
    pub fn reset(&mut self, job_id: &str) {
        self.latched.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(statuses: &[ChunkStatus]) -> ChunkLedger {
        let mut ledger = ChunkLedger::new("job");
        ledger.replace_all(
            statuses
                .iter()
                .enumerate()
                .map(|(i, s)| Chunk {
                    status: *s,
                    ..Chunk::new(format!("c{}", i), i as u32, "line")
                })
                .collect(),
        );
        ledger
    }

    use ChunkStatus::*;

    #[test]
    fn predicate_requires_every_condition() {
        let done = ledger(&[Completed, Completed]);
        assert!(should_merge(done.chunks(), None, false));
        assert!(!should_merge(done.chunks(), Some("merged.mp3"), false));
        assert!(!should_merge(done.chunks(), None, true));
        assert!(!should_merge(ledger(&[Completed, Processing]).chunks(), None, false));
        assert!(!should_merge(ledger(&[Completed, Failed]).chunks(), None, false));
        assert!(!should_merge(ledger(&[Completed, Pending]).chunks(), None, false));
    }

    #[test]
    fn zero_chunks_never_merge() {
        let empty = ledger(&[]);
        assert!(!should_merge(empty.chunks(), None, false));
        let mut guard = AutoMergeGuard::new();
        assert_eq!(
            guard.evaluate("job", &empty, None, false),
            MergeDecision::Skip(SkipReason::NoChunks)
        );
    }

    #[test]
    fn fires_once_per_epoch() {
        let done = ledger(&[Completed, Completed, Completed]);
        let mut guard = AutoMergeGuard::new();

        assert_eq!(guard.evaluate("job", &done, None, false), MergeDecision::Fire);
        assert_eq!(
            guard.evaluate("job", &done, None, false),
            MergeDecision::Skip(SkipReason::InFlight)
        );

        // merged audio shows up: epoch closes
        assert_eq!(
            guard.evaluate("job", &done, Some("merged.mp3"), false),
            MergeDecision::Skip(SkipReason::AlreadyMerged)
        );
        assert!(!guard.is_latched("job"));

        // audio removed again (e.g. regenerated): new epoch may fire once
        assert_eq!(guard.evaluate("job", &done, None, false), MergeDecision::Fire);
    }

    #[test]
    fn latch_is_per_job() {
        let done = ledger(&[Completed]);
        let mut guard = AutoMergeGuard::new();
        assert_eq!(guard.evaluate("a", &done, None, false), MergeDecision::Fire);
        assert_eq!(guard.evaluate("b", &done, None, false), MergeDecision::Fire);
    }

    #[test]
    fn reset_opens_a_new_epoch() {
        let done = ledger(&[Completed]);
        let mut guard = AutoMergeGuard::new();
        assert_eq!(guard.evaluate("job", &done, None, false), MergeDecision::Fire);
        guard.reset("job");
        assert_eq!(guard.evaluate("job", &done, None, false), MergeDecision::Fire);
    }

    #[test]
    fn inconsistent_ledger_blocks_merge() {
        let mut broken = ChunkLedger::new("job");
        broken.replace_all(vec![
            Chunk {
                status: Completed,
                ..Chunk::new("a", 0, "x")
            },
            Chunk {
                status: Completed,
                ..Chunk::new("b", 3, "y")
            },
        ]);
        let mut guard = AutoMergeGuard::new();
        assert_eq!(
            guard.evaluate("job", &broken, None, false),
            MergeDecision::Skip(SkipReason::InconsistentLedger)
        );
        assert!(!guard.is_latched("job"));
    }

    #[test]
    fn firing_implies_predicate_over_many_shapes() {
        let statuses = [Pending, Processing, Completed, Failed];
        let mut guard = AutoMergeGuard::new();
        for a in statuses {
            for b in statuses {
                for generating in [false, true] {
                    let l = ledger(&[a, b]);
                    guard.reset("job");
                    if guard.evaluate("job", &l, None, generating) == MergeDecision::Fire {
                        assert!(l.chunks().iter().all(|c| c.status == Completed));
                        assert!(!generating);
                    }
                }
            }
        }
    }
}
