// src/workflow/mod.rs
// Workflow Gate - linear upload-to-export pipeline permissions

mod registry;

pub use registry::WorkflowRegistry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Pipeline steps; declaration order is the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Upload,
    CreateProject,
    GenerateScript,
    ReviewScript,
    ConfigureVoice,
    CreateChunks,
    GenerateAudio,
    MergeAudio,
    ExportAudio,
    Completed,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 10] = [
        WorkflowStep::Upload,
        WorkflowStep::CreateProject,
        WorkflowStep::GenerateScript,
        WorkflowStep::ReviewScript,
        WorkflowStep::ConfigureVoice,
        WorkflowStep::CreateChunks,
        WorkflowStep::GenerateAudio,
        WorkflowStep::MergeAudio,
        WorkflowStep::ExportAudio,
        WorkflowStep::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Upload => "upload",
            WorkflowStep::CreateProject => "create_project",
            WorkflowStep::GenerateScript => "generate_script",
            WorkflowStep::ReviewScript => "review_script",
            WorkflowStep::ConfigureVoice => "configure_voice",
            WorkflowStep::CreateChunks => "create_chunks",
            WorkflowStep::GenerateAudio => "generate_audio",
            WorkflowStep::MergeAudio => "merge_audio",
            WorkflowStep::ExportAudio => "export_audio",
            WorkflowStep::Completed => "completed",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let wanted = input.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }

    /// Steps strictly before this one
    pub fn prerequisites(&self) -> &'static [WorkflowStep] {
        let idx = Self::ALL.iter().position(|s| s == self).unwrap_or(0);
        &Self::ALL[..idx]
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Cannot enter {step}: missing {}", format_steps(.missing))]
    OutOfOrderStep {
        step: WorkflowStep,
        missing: Vec<WorkflowStep>,
    },

    #[error("Workflow already completed; reset to start over")]
    Terminal,

    #[error("Failed to persist workflow state: {0}")]
    Persist(String),
}

fn format_steps(steps: &[WorkflowStep]) -> String {
    steps
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub current_step: WorkflowStep,
    pub completed_steps: BTreeSet<WorkflowStep>,
    pub step_history: Vec<WorkflowStep>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            current_step: WorkflowStep::Upload,
            completed_steps: BTreeSet::new(),
            step_history: vec![WorkflowStep::Upload],
        }
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff every step before `step` is complete.
    pub fn can_proceed(&self, step: WorkflowStep) -> bool {
        step.prerequisites()
            .iter()
            .all(|s| self.completed_steps.contains(s))
    }

    pub fn missing_for(&self, step: WorkflowStep) -> Vec<WorkflowStep> {
        step.prerequisites()
            .iter()
            .copied()
            .filter(|s| !self.completed_steps.contains(s))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.current_step == WorkflowStep::Completed
    }

    /// Navigation, not a completion claim: prerequisites are not checked.
    /// Returns false only when the workflow is already terminal.
    pub fn advance(&mut self, step: WorkflowStep) -> bool {
        if self.is_terminal() && step != WorkflowStep::Completed {
            tracing::debug!("Ignoring advance to {} from terminal state", step);
            return false;
        }
        if !self.can_proceed(step) {
            tracing::debug!(
                "Advancing to {} with unmet prerequisites: {}",
                step,
                format_steps(&self.missing_for(step))
            );
        }
        self.current_step = step;
        self.step_history.push(step);
        true
    }

    /// `advance` that refuses out-of-order steps.
    pub fn try_advance(&mut self, step: WorkflowStep) -> Result<(), WorkflowError> {
        if self.is_terminal() && step != WorkflowStep::Completed {
            return Err(WorkflowError::Terminal);
        }
        let missing = self.missing_for(step);
        if !missing.is_empty() {
            return Err(WorkflowError::OutOfOrderStep { step, missing });
        }
        self.advance(step);
        Ok(())
    }

    /// Idempotent; returns whether the step was newly completed.
    pub fn mark_complete(&mut self, step: WorkflowStep) -> bool {
        self.completed_steps.insert(step)
    }

    /// First step in pipeline order not yet complete
    pub fn next_step(&self) -> Option<WorkflowStep> {
        WorkflowStep::ALL
            .into_iter()
            .find(|s| !self.completed_steps.contains(s))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
