//! Desired shape of a pipeline's children.
//!
//! Everything here is a pure function of the pipeline; no API calls.

use super::labels::labels;
use super::render::{render, RenderedConfig};
use crate::crds::BenthosPipeline;
use crate::tasks::types::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

/// ConfigMap key holding the rendered configuration
pub const CONFIG_FILE_NAME: &str = "benthos.yaml";
pub const CONFIG_HASH_ANNOTATION: &str = "ingtra.net/benthos-config-hash";
pub const CONFIG_VOLUME_NAME: &str = "config";
pub const CONFIG_MOUNT_PATH: &str = "/config";
pub const CONTAINER_NAME: &str = "benthos";

/// Desired ConfigMap, rendering the pipeline's configuration
pub fn build_config_map(pipeline: &BenthosPipeline) -> Result<ConfigMap> {
    config_map_for(pipeline, &render(pipeline))
}

/// Desired Deployment, rendering the pipeline's configuration
pub fn build_deployment(pipeline: &BenthosPipeline) -> Result<Deployment> {
    deployment_for(pipeline, &render(pipeline))
}

pub fn config_map_for(pipeline: &BenthosPipeline, rendered: &RenderedConfig) -> Result<ConfigMap> {
    Ok(ConfigMap {
        metadata: child_metadata(pipeline, rendered)?,
        data: Some(BTreeMap::from([(
            CONFIG_FILE_NAME.to_string(),
            rendered.text.clone(),
        )])),
        ..Default::default()
    })
}

pub fn deployment_for(pipeline: &BenthosPipeline, rendered: &RenderedConfig) -> Result<Deployment> {
    let metadata = child_metadata(pipeline, rendered)?;
    let config_map_name = metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let labels = labels(pipeline);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(pipeline.spec.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        args: Some(vec![
            "-c".to_string(),
            format!("{CONFIG_MOUNT_PATH}/{CONFIG_FILE_NAME}"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let volume = Volume {
        name: CONFIG_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name,
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(pipeline.spec.replicas),
            revision_history_limit: Some(0),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                // The hash on the pod template forces a rollout when only the
                // configuration changed.
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(hash_annotation(rendered)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![volume]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn child_metadata(pipeline: &BenthosPipeline, rendered: &RenderedConfig) -> Result<ObjectMeta> {
    let name = pipeline
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = pipeline
        .metadata
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(namespace),
        labels: Some(labels(pipeline)),
        annotations: Some(hash_annotation(rendered)),
        ..Default::default()
    })
}

fn hash_annotation(rendered: &RenderedConfig) -> BTreeMap<String, String> {
    BTreeMap::from([(
        CONFIG_HASH_ANNOTATION.to_string(),
        rendered.fingerprint.clone(),
    )])
}
