//! Run lifecycle state machine.
//!
//! One instance per run. Each completed stage moves the state forward by
//! exactly one step; there is no retry and no rollback.

use serde::{Deserialize, Serialize};

use crate::core::types::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    DirectoryReady,
    InputsWritten,
    Executed,
    Parsed,
    ConvergenceChecked,
    Cleaned,
    ArchivedOrSkipped,
    RemovedOrSkipped,
    Done,
}

impl PipelineState {
    /// The stage allowed to run from this state, or `None` once all stages ran.
    pub fn next_stage(self) -> Option<StageKind> {
        match self {
            PipelineState::Pending => Some(StageKind::EnsureDirectory),
            PipelineState::DirectoryReady => Some(StageKind::WriteInputs),
            PipelineState::InputsWritten => Some(StageKind::RunProcess),
            PipelineState::Executed => Some(StageKind::ParseOutput),
            PipelineState::Parsed => Some(StageKind::DetectConvergence),
            PipelineState::ConvergenceChecked => Some(StageKind::DeleteNamedFiles),
            PipelineState::Cleaned => Some(StageKind::Archive),
            PipelineState::ArchivedOrSkipped => Some(StageKind::RemoveDirectory),
            PipelineState::RemovedOrSkipped | PipelineState::Done => None,
        }
    }

    /// Transition after `stage` completed (or was absorbed).
    pub fn advance(self, stage: StageKind) -> Result<PipelineState, String> {
        if self.next_stage() != Some(stage) {
            return Err(format!("stage {stage} cannot run from state {self:?}"));
        }
        Ok(match stage {
            StageKind::EnsureDirectory => PipelineState::DirectoryReady,
            StageKind::WriteInputs => PipelineState::InputsWritten,
            StageKind::RunProcess => PipelineState::Executed,
            StageKind::ParseOutput => PipelineState::Parsed,
            StageKind::DetectConvergence => PipelineState::ConvergenceChecked,
            StageKind::DeleteNamedFiles => PipelineState::Cleaned,
            StageKind::Archive => PipelineState::ArchivedOrSkipped,
            StageKind::RemoveDirectory => PipelineState::RemovedOrSkipped,
        })
    }

    /// Close the run. Only legal once every stage has run.
    pub fn finish(self) -> Result<PipelineState, String> {
        match self {
            PipelineState::RemovedOrSkipped => Ok(PipelineState::Done),
            other => Err(format!("cannot finish run from state {other:?}")),
        }
    }
}

/// Check that `stages` is exactly the fixed stage order.
///
/// Returns a list of human-readable violations (empty when valid).
pub fn validate_stage_order(stages: &[StageKind]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut state = PipelineState::Pending;
    for stage in stages {
        match state.advance(*stage) {
            Ok(next) => state = next,
            Err(err) => {
                errors.push(err);
                return errors;
            }
        }
    }
    if let Some(missing) = state.next_stage() {
        errors.push(format!("missing stage {missing}"));
    }
    errors
}
