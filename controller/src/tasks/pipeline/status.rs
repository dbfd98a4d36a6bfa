//! Status written back to the pipeline after each pass.

use super::render::RenderedConfig;
use crate::crds::{BenthosPipeline, BenthosPipelineStatus, PipelinePhase};
use serde_json::{json, Value as JsonValue};

/// Status describing the pass that just ran.
///
/// A degraded render overrides `Ready`; a freshly created child keeps the
/// pipeline `Progressing` regardless.
#[must_use]
pub fn observed_status(
    pipeline: &BenthosPipeline,
    rendered: &RenderedConfig,
    phase: PipelinePhase,
) -> BenthosPipelineStatus {
    let (phase, message) = match (phase, rendered.degradation()) {
        (PipelinePhase::Ready, Some(err)) => (PipelinePhase::Degraded, Some(err.to_string())),
        (PipelinePhase::Progressing, _) => (
            PipelinePhase::Progressing,
            Some("Waiting for child resources to be created".to_string()),
        ),
        (phase, _) => (phase, None),
    };

    BenthosPipelineStatus {
        phase: Some(phase),
        config_hash: Some(rendered.fingerprint.clone()),
        observed_generation: pipeline.metadata.generation,
        message,
        last_reconciled: Some(chrono::Utc::now().to_rfc3339()),
    }
}

/// Whether `next` differs from the live status in anything but its timestamp
#[must_use]
pub fn needs_update(current: Option<&BenthosPipelineStatus>, next: &BenthosPipelineStatus) -> bool {
    let Some(current) = current else {
        return true;
    };

    current.phase != next.phase
        || current.config_hash != next.config_hash
        || current.observed_generation != next.observed_generation
        || current.message != next.message
}

/// Merge-patch body for `status`.
///
/// Every field is present and cleared ones are `null`; a merge patch leaves
/// keys it does not mention untouched.
#[must_use]
pub fn status_patch(status: &BenthosPipelineStatus) -> JsonValue {
    json!({
        "phase": status.phase,
        "configHash": status.config_hash,
        "observedGeneration": status.observed_generation,
        "message": status.message,
        "lastReconciled": status.last_reconciled,
    })
}
