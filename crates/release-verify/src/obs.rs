//! Structured observability hooks for the verification lifecycle.
//!
//! This module provides:
//! - A release-scoped span, attached to run futures with
//!   [`tracing::Instrument`] so it follows the run across `.await` points
//! - Emission functions for run start, stage completion, run finish,
//!   scanner degradation and notification failures
//!
//! Events are emitted at `info!` level, degradations at `warn!`.

use tracing::{info, warn};

/// Span tagging everything a run logs with its release id.
///
/// ```ignore
/// pipeline_future.instrument(verification_span(release_id.as_str())).await
/// ```
pub fn verification_span(release_id: &str) -> tracing::Span {
    tracing::info_span!("releasegate.verification", release_id = %release_id)
}

/// Emit event: run claimed and started.
pub fn emit_run_started(release_id: &str, extension: &str) {
    info!(event = "verification.started", release_id = %release_id, extension = %extension);
}

/// Emit event: a stage completed and progress advanced.
pub fn emit_stage_completed(release_id: &str, stage: &str, progress: u8) {
    info!(
        event = "verification.stage_completed",
        release_id = %release_id,
        stage = %stage,
        progress = progress,
    );
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(release_id: &str, duration_ms: u64, status: &str, reason: Option<&str>) {
    info!(
        event = "verification.finished",
        release_id = %release_id,
        duration_ms = duration_ms,
        status = %status,
        reason = reason.unwrap_or(""),
    );
}

/// Emit event: the malware scan was skipped or inconclusive (warning level).
pub fn emit_scanner_degraded(release_id: &str, detail: &str) {
    warn!(event = "verification.scanner_degraded", release_id = %release_id, detail = %detail);
}

/// Emit event: a notification could not be delivered (warning level).
pub fn emit_notification_failed(release_id: &str, channel: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "verification.notification_failed",
        release_id = %release_id,
        channel = %channel,
        error = %error,
    );
}
