use super::{WorkflowError, WorkflowState, WorkflowStep};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Workflow state per project id, persisted as one JSON file so a session
/// can resume where it left off after switching jobs or restarting.
pub struct WorkflowRegistry {
    path: Option<PathBuf>,
    states: BTreeMap<String, WorkflowState>,
}

impl WorkflowRegistry {
    /// Registry that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            states: BTreeMap::new(),
        }
    }

    /// Loads `path`; a missing file starts empty and an unreadable one is
    /// kept as `*.json.bak` before starting empty.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let mut registry = Self {
            path: Some(path.to_path_buf()),
            states: BTreeMap::new(),
        };
        if !path.exists() {
            return Ok(registry);
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| WorkflowError::Persist(format!("{}: {}", path.display(), e)))?;
        match serde_json::from_str::<BTreeMap<String, WorkflowState>>(&raw) {
            Ok(states) => {
                tracing::info!(
                    "Loaded workflow state for {} projects from {}",
                    states.len(),
                    path.display()
                );
                registry.states = states;
            }
            Err(e) => {
                tracing::warn!("Workflow store {} is invalid ({}), starting fresh", path.display(), e);
                let _ = fs::copy(path, path.with_extension("json.bak"));
            }
        }
        Ok(registry)
    }

    pub fn state(&self, project_id: &str) -> WorkflowState {
        self.states.get(project_id).cloned().unwrap_or_default()
    }

    pub fn can_proceed(&self, project_id: &str, step: WorkflowStep) -> bool {
        self.states
            .get(project_id)
            .map(|s| s.can_proceed(step))
            .unwrap_or_else(|| WorkflowState::default().can_proceed(step))
    }

    pub fn advance(&mut self, project_id: &str, step: WorkflowStep) -> Result<bool, WorkflowError> {
        self.update(project_id, |state| state.advance(step))
    }

    pub fn try_advance(&mut self, project_id: &str, step: WorkflowStep) -> Result<(), WorkflowError> {
        self.update(project_id, |state| state.try_advance(step))?
    }

    pub fn mark_complete(
        &mut self,
        project_id: &str,
        step: WorkflowStep,
    ) -> Result<bool, WorkflowError> {
        let newly = self.update(project_id, |state| state.mark_complete(step))?;
        if newly {
            tracing::info!("Project {}: step {} complete", project_id, step);
        }
        Ok(newly)
    }

    pub fn reset(&mut self, project_id: &str) -> Result<(), WorkflowError> {
        self.update(project_id, |state| state.reset())
    }

    pub fn forget(&mut self, project_id: &str) -> Result<(), WorkflowError> {
        if self.states.remove(project_id).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn update<R>(
        &mut self,
        project_id: &str,
        apply: impl FnOnce(&mut WorkflowState) -> R,
    ) -> Result<R, WorkflowError> {
        let state = self.states.entry(project_id.to_string()).or_default();
        let before = state.clone();
        let result = apply(state);
        if *state != before {
            self.save()?;
        }
        Ok(result)
    }

    fn save(&self) -> Result<(), WorkflowError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.states)
            .map_err(|e| WorkflowError::Persist(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| WorkflowError::Persist(format!("{}: {}", path.display(), e)))
    }
}
