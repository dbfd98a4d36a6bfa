//! `BenthosPipeline` Custom Resource Definition

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Image used when a pipeline does not name one
pub const DEFAULT_BENTHOS_IMAGE: &str = "jeffail/benthos:edge-cgo";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(group = "ingtra.net", version = "v1alpha1", kind = "BenthosPipeline")]
#[kube(namespaced)]
#[kube(status = "BenthosPipelineStatus")]
#[kube(shortname = "bp")]
#[kube(printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#)]
#[kube(printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct BenthosPipelineSpec {
    /// Container image running the Benthos binary
    #[serde(default = "default_image")]
    pub image: String,

    /// Desired number of Benthos pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Raw Benthos YAML. Takes precedence over `configInline` when non-empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config: String,

    /// Structured Benthos configuration, re-encoded as YAML by the operator
    #[serde(rename = "configInline", default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub config_inline: Option<JsonValue>,
}

impl Default for BenthosPipelineSpec {
    fn default() -> Self {
        Self {
            image: default_image(),
            replicas: default_replicas(),
            config: String::new(),
            config_inline: None,
        }
    }
}

fn default_image() -> String {
    DEFAULT_BENTHOS_IMAGE.to_string()
}

fn default_replicas() -> i32 {
    1
}

/// `configInline` accepts any object; the API server must not prune it.
fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        JsonValue::Bool(true),
    );
    Schema::Object(schema)
}

/// Observed state written back by the operator after each pass
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BenthosPipelineStatus {
    /// Coarse state of the pipeline's children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PipelinePhase>,

    /// Fingerprint of the configuration last written to the children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// `metadata.generation` of the pipeline the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable detail for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the status last changed (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,
}

/// Phase of a `BenthosPipeline`
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum PipelinePhase {
    /// A child resource was just created and is still settling
    Progressing,
    /// Both children match the declared spec
    Ready,
    /// Children are converged but the configuration could not be rendered
    Degraded,
}
