//! Structured observability hooks for pipeline runs.
//!
//! This module provides:
//! - A pipeline-scoped tracing span for instrumenting whole runs
//! - Emission functions for phase transitions, Ralph iterations and gate decisions
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::info;

/// Span carrying `pipeline` and `run_id` for every event of one run.
///
/// # Example
///
/// ```ignore
/// use tracing::Instrument;
/// runner.run_phases(steps, engine).instrument(run_span("mobile-app", "3f6c...")).await
/// ```
pub fn run_span(pipeline: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!("appfactory.run", pipeline = %pipeline, run_id = %run_id)
}

/// Emit event: a phase changed status.
pub fn emit_phase_transition(pipeline: &str, phase: &str, status: &str) {
    info!(event = "phase.transition", pipeline = %pipeline, phase = %phase, status = %status);
}

/// Emit event: a Ralph iteration is starting.
pub fn emit_iteration_started(pipeline: &str, iteration: u32) {
    info!(event = "ralph.iteration_started", pipeline = %pipeline, iteration = iteration);
}

/// Emit event: a Ralph iteration produced a score and verdict.
pub fn emit_iteration_completed(
    pipeline: &str,
    iteration: u32,
    score: u8,
    verdict: &str,
    issues: usize,
) {
    info!(
        event = "ralph.iteration_completed",
        pipeline = %pipeline,
        iteration = iteration,
        score = score,
        verdict = %verdict,
        issues = issues,
    );
}

/// Emit event: the Ralph loop exited with a final verdict.
pub fn emit_ralph_finished(pipeline: &str, verdict: &str, score: u8, iterations: u32) {
    info!(
        event = "ralph.finished",
        pipeline = %pipeline,
        verdict = %verdict,
        score = score,
        iterations = iterations,
    );
}

/// Emit event: certificate gate evaluated.
pub fn emit_gate_evaluated(path: &str, ok: bool, error: Option<&str>) {
    info!(event = "gate.evaluated", path = %path, ok = ok, error = error.unwrap_or(""));
}

/// Emit event: an audit line could not be written (warning level).
pub fn emit_audit_append_failed(pipeline: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "audit.append_failed", pipeline = %pipeline, error = %error);
}
