use crate::crds::BenthosPipeline;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const APP_NAME: &str = "benthos";
pub const INSTANCE_PREFIX: &str = "benthos-pipeline-";

/// Identity labels for a pipeline's children.
///
/// The same map labels the children, selects the Deployment's pods and labels
/// the pod template; the three must never diverge.
#[must_use]
pub fn labels(pipeline: &BenthosPipeline) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME_LABEL.to_string(), APP_NAME.to_string()),
        (
            INSTANCE_LABEL.to_string(),
            format!("{INSTANCE_PREFIX}{}", pipeline.name_any()),
        ),
    ])
}
