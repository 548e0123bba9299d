//! Structured lifecycle events for orchestration runs.
//!
//! This module provides:
//! - the run-scoped tracing span, attached to a run's future with `Instrument`
//! - one emit function per lifecycle event, each carrying a stable
//!   `event = "..."` field
//!
//! Events are emitted at `info!` level, except failures which use `warn!`.

use tracing::{info, warn};

use crate::domain::{RunStatus, Stage};

/// The span used for a run; attach it to futures with `Instrument`.
pub fn span(run_id: &str) -> tracing::Span {
    tracing::info_span!("synapse.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, requirements: &str) {
    info!(event = "run.started", run_id = %run_id, requirements = %requirements);
}

pub fn emit_stage_entered(run_id: &str, stage: Stage) {
    info!(event = "run.stage_entered", run_id = %run_id, stage = %stage);
}

/// Emit event: one subtask reached its terminal outcome.
pub fn emit_subtask_finished(run_id: &str, path: &str, outcome: &str, attempts: u32) {
    info!(
        event = "subtask.finished",
        run_id = %run_id,
        path = %path,
        outcome = %outcome,
        attempts = attempts,
    );
}

pub fn emit_run_finished(run_id: &str, status: RunStatus, duration_ms: u64, modules: usize) {
    match status {
        RunStatus::Done => info!(
            event = "run.finished",
            run_id = %run_id,
            status = %status,
            duration_ms = duration_ms,
            modules = modules,
        ),
        RunStatus::Failed | RunStatus::Cancelled => warn!(
            event = "run.finished",
            run_id = %run_id,
            status = %status,
            duration_ms = duration_ms,
            modules = modules,
        ),
    }
}

pub fn emit_materialize_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.materialize_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_carries_run_id() {
        let span = span("test-run-id");
        let _guard = span.enter();
        emit_stage_entered("test-run-id", Stage::Building);
        emit_run_finished("test-run-id", RunStatus::Cancelled, 12, 0);
    }
}
