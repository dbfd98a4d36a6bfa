use crate::crds::BenthosPipeline;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ListParams;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{error, info, instrument, warn, Instrument};

pub mod config;
pub mod pipeline;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use pipeline::reconcile_pipeline;
pub use types::{Error, Result};

use types::Context;

/// Api handle scoped to the watched namespace, or cluster-wide when none is set
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Run the `BenthosPipeline` controller until its watch stream ends
#[instrument(skip(client, config), fields(namespace = ?config.watch_namespace))]
pub async fn run_pipeline_controller(client: Client, config: Arc<ControllerConfig>) -> Result<()> {
    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }

    let namespace = config.watch_namespace.as_deref();
    match namespace {
        Some(namespace) => info!("Starting BenthosPipeline controller in namespace {}", namespace),
        None => info!("Starting BenthosPipeline controller for all namespaces"),
    }

    let context = Arc::new(Context {
        client: client.clone(),
        config: config.clone(),
    });

    let pipelines: Api<BenthosPipeline> = scoped_api(&client, namespace);
    let config_maps: Api<ConfigMap> = scoped_api(&client, namespace);
    let deployments: Api<Deployment> = scoped_api(&client, namespace);

    // Startup visibility: list what the controller is about to observe
    match pipelines.list(&ListParams::default()).await {
        Ok(list) => {
            info!(
                "Controller startup: found {} BenthosPipeline(s)",
                list.items.len()
            );
            for pipeline in list.items {
                let phase = pipeline
                    .status
                    .as_ref()
                    .and_then(|s| s.phase)
                    .map_or_else(|| "(none)".to_string(), |p| format!("{p:?}"));
                info!(
                    "Existing BenthosPipeline: name={}, namespace={}, image={}, phase={}",
                    pipeline.name_any(),
                    pipeline.namespace().unwrap_or_default(),
                    pipeline.spec.image,
                    phase
                );
            }
        }
        Err(e) => {
            error!("Failed to list BenthosPipelines at startup: {}", e);
        }
    }

    let watcher_config = Config::default().any_semantic();

    Controller::new(pipelines, watcher_config.clone())
        .owns(config_maps, watcher_config.clone())
        .owns(deployments, watcher_config)
        .run(reconcile_pipeline, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("pipeline_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(pipeline_ref) => {
                        info!(resource = ?pipeline_ref, "BenthosPipeline reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "BenthosPipeline reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("BenthosPipeline controller shutting down");
    Ok(())
}

/// Failed passes are retried after a fixed delay; conflicts are routine.
fn error_policy(pipeline: Arc<BenthosPipeline>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_conflict() {
        warn!(
            error = %err,
            namespace = ?pipeline.namespace(),
            "BenthosPipeline {} changed during reconciliation, retrying",
            pipeline.name_any()
        );
    } else {
        error!(
            error = %err,
            namespace = ?pipeline.namespace(),
            "BenthosPipeline {} reconciliation failed",
            pipeline.name_any()
        );
    }
    retry_action(&ctx.config)
}

fn retry_action(config: &ControllerConfig) -> Action {
    Action::requeue(config.requeue.error_delay())
}
