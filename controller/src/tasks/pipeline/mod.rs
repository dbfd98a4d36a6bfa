//! `BenthosPipeline` reconciliation: render the configuration, build the
//! desired children, converge them one phase at a time.

pub mod controller;
pub mod labels;
pub mod phase;
pub mod render;
pub mod resources;
pub mod status;

pub use controller::{
    reconcile_pipeline, PipelineReconciler, PipelineStores, ReconcileDecision, ReconcileSettings,
};
pub use labels::labels;
pub use phase::{PhaseOutcome, ReconcilePhase};
pub use render::{render, RenderSource, RenderedConfig};
pub use resources::{build_config_map, build_deployment};
