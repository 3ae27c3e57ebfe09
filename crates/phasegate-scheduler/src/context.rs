//! Execution context policy

use phasegate_core::WorkflowState;

/// Whether the executor must start this phase with no carried-over history.
///
/// Holds exactly for the UI, code and QA reviews, so a reviewer never sees
/// the reasoning that produced the change under review.
pub fn needs_fresh_context(state: WorkflowState) -> bool {
    matches!(
        state,
        WorkflowState::UiReview | WorkflowState::CodeReview | WorkflowState::QaReview
    )
}
