use super::phase::{PhaseOutcome, ReconcilePhase};
use super::render::{render, RenderedConfig};
use super::resources::{config_map_for, deployment_for};
use super::status::{needs_update, observed_status, status_patch};
use crate::crds::{BenthosPipeline, PipelinePhase};
use crate::tasks::config::ControllerConfig;
use crate::tasks::store::ResourceStore;
use crate::tasks::types::{Context, Error, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What the runtime should do with the pipeline after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Converged; wait for the next change event
    Done,
    /// The ConfigMap was just created; run the next step straight away
    RequeueNow,
    /// The Deployment was just created; look again after the delay
    RequeueAfter(Duration),
}

impl ReconcileDecision {
    #[must_use]
    pub fn into_action(self) -> Action {
        match self {
            ReconcileDecision::Done => Action::await_change(),
            ReconcileDecision::RequeueNow => Action::requeue(Duration::ZERO),
            ReconcileDecision::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Stores for the pipeline and its two children, all in the pipeline's namespace
pub struct PipelineStores<'a> {
    pub pipelines: &'a dyn ResourceStore<BenthosPipeline>,
    pub config_maps: &'a dyn ResourceStore<ConfigMap>,
    pub deployments: &'a dyn ResourceStore<Deployment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub deployment_created_delay: Duration,
    pub report_status: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ReconcileSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            deployment_created_delay: config.requeue.deployment_created_delay(),
            report_status: config.status.enabled,
        }
    }
}

/// One reconciliation pass over a single pipeline.
///
/// The ConfigMap is always converged before the Deployment is looked at, and
/// creating either child ends the pass so the next one sees the new object.
pub struct PipelineReconciler<'a> {
    stores: PipelineStores<'a>,
    settings: ReconcileSettings,
}

impl<'a> PipelineReconciler<'a> {
    pub fn new(stores: PipelineStores<'a>, settings: ReconcileSettings) -> Self {
        Self { stores, settings }
    }

    /// Load the pipeline `name` and drive its children toward the declared state
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileDecision> {
        let Some(pipeline) = self.stores.pipelines.get(name).await? else {
            info!("BenthosPipeline {} not found, nothing to do", name);
            return Ok(ReconcileDecision::Done);
        };

        self.converge(&pipeline).await
    }

    async fn converge(&self, pipeline: &BenthosPipeline) -> Result<ReconcileDecision> {
        let rendered = render(pipeline);
        if let Some(err) = rendered.degradation() {
            warn!(
                "BenthosPipeline {} has an unusable configuration: {}",
                pipeline.name_any(),
                err
            );
        }

        let config_map = config_map_for(pipeline, &rendered)?;
        let deployment = deployment_for(pipeline, &rendered)?;

        let outcome = ReconcilePhase::<ConfigMap>::new(self.stores.config_maps)
            .reconcile(pipeline, config_map)
            .await?;
        if outcome == PhaseOutcome::Created {
            self.report(pipeline, &rendered, PipelinePhase::Progressing)
                .await;
            return Ok(ReconcileDecision::RequeueNow);
        }

        let outcome = ReconcilePhase::<Deployment>::new(self.stores.deployments)
            .reconcile(pipeline, deployment)
            .await?;
        if outcome == PhaseOutcome::Created {
            self.report(pipeline, &rendered, PipelinePhase::Progressing)
                .await;
            return Ok(ReconcileDecision::RequeueAfter(
                self.settings.deployment_created_delay,
            ));
        }

        self.report(pipeline, &rendered, PipelinePhase::Ready).await;
        info!("Nothing to do for BenthosPipeline {}", pipeline.name_any());
        Ok(ReconcileDecision::Done)
    }

    /// Children are already converged when this runs, so a failed status
    /// write only costs the report.
    async fn report(
        &self,
        pipeline: &BenthosPipeline,
        rendered: &RenderedConfig,
        phase: PipelinePhase,
    ) {
        if !self.settings.report_status {
            return;
        }

        let name = pipeline.name_any();
        let next = observed_status(pipeline, rendered, phase);
        if !needs_update(pipeline.status.as_ref(), &next) {
            debug!("BenthosPipeline {} status is current", name);
            return;
        }

        match self
            .stores
            .pipelines
            .update_status(&name, &status_patch(&next))
            .await
        {
            Ok(()) => debug!("BenthosPipeline {} status set to {:?}", name, next.phase),
            Err(e) => warn!("Updating status of BenthosPipeline {} failed: {}", name, e),
        }
    }
}

/// Controller entry point for one `BenthosPipeline` event
#[instrument(skip(pipeline, ctx), fields(pipeline = %pipeline.name_any(), namespace = ?pipeline.namespace()))]
pub async fn reconcile_pipeline(
    pipeline: Arc<BenthosPipeline>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let namespace = pipeline
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = pipeline.name_any();
    debug!("Reconciling BenthosPipeline {}/{}", namespace, name);

    let pipelines: Api<BenthosPipeline> = Api::namespaced(ctx.client.clone(), &namespace);
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);

    let reconciler = PipelineReconciler::new(
        PipelineStores {
            pipelines: &pipelines,
            config_maps: &config_maps,
            deployments: &deployments,
        },
        ReconcileSettings::from(ctx.config.as_ref()),
    );

    let decision = reconciler.reconcile(&name).await?;
    debug!("BenthosPipeline {} pass finished: {:?}", name, decision);
    Ok(decision.into_action())
}
