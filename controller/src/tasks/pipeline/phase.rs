//! Fetch / compare / create-or-update for one child resource.
//!
//! Only the payload each kind manages is compared: `data` for the ConfigMap
//! and `spec` for the Deployment, plus the config-hash annotation on both.
//! Everything else on the live object (uid, resourceVersion, status, fields
//! defaulted by the API server, annotations set by other actors) is left as
//! it was.

use super::resources::CONFIG_HASH_ANNOTATION;
use crate::tasks::store::ResourceStore;
use crate::tasks::types::{Error, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde_json::Value as JsonValue;
use std::fmt::Debug;
use tracing::{debug, error, info};

/// What a phase did to its child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Created,
    Updated,
    Unchanged,
}

/// A child kind whose managed payload can be compared and overwritten
pub trait ManagedResource: Resource<DynamicType = ()> + Clone + Debug + Send + Sync {
    /// Whether the live object (`self`) already carries the desired payload
    fn payload_matches(&self, desired: &Self) -> bool;

    /// Overwrite the managed payload on the live object, keeping everything else
    fn adopt_payload(&mut self, desired: &Self);
}

impl ManagedResource for ConfigMap {
    fn payload_matches(&self, desired: &Self) -> bool {
        self.data == desired.data && hash_matches(&self.metadata, &desired.metadata)
    }

    fn adopt_payload(&mut self, desired: &Self) {
        self.data.clone_from(&desired.data);
        adopt_hash(&mut self.metadata, &desired.metadata);
    }
}

impl ManagedResource for Deployment {
    fn payload_matches(&self, desired: &Self) -> bool {
        if !hash_matches(&self.metadata, &desired.metadata) {
            return false;
        }
        match (
            serde_json::to_value(&self.spec),
            serde_json::to_value(&desired.spec),
        ) {
            (Ok(live), Ok(desired)) => contains_desired(&live, &desired),
            _ => false,
        }
    }

    fn adopt_payload(&mut self, desired: &Self) {
        self.spec.clone_from(&desired.spec);
        adopt_hash(&mut self.metadata, &desired.metadata);
    }
}

fn config_hash(meta: &ObjectMeta) -> Option<&String> {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(CONFIG_HASH_ANNOTATION))
}

fn hash_matches(live: &ObjectMeta, desired: &ObjectMeta) -> bool {
    config_hash(live) == config_hash(desired)
}

fn adopt_hash(live: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(hash) = config_hash(desired) {
        live.annotations
            .get_or_insert_with(Default::default)
            .insert(CONFIG_HASH_ANNOTATION.to_string(), hash.clone());
    }
}

/// Structural comparison that tolerates extra fields on the live side.
///
/// Every field present in `desired` must be present and equal in `live`.
/// Arrays must have the same length and match element-wise. Fields the API
/// server adds (defaults, status) are ignored.
pub fn contains_desired(live: &JsonValue, desired: &JsonValue) -> bool {
    match (live, desired) {
        (JsonValue::Object(live), JsonValue::Object(desired)) => {
            desired.iter().all(|(key, desired_value)| {
                live.get(key)
                    .is_some_and(|live_value| contains_desired(live_value, desired_value))
            })
        }
        (JsonValue::Array(live), JsonValue::Array(desired)) => {
            live.len() == desired.len()
                && live
                    .iter()
                    .zip(desired)
                    .all(|(live_item, desired_item)| contains_desired(live_item, desired_item))
        }
        _ => live == desired,
    }
}

/// Drives one child kind toward its desired state
pub struct ReconcilePhase<'a, K> {
    store: &'a dyn ResourceStore<K>,
}

impl<'a, K: ManagedResource> ReconcilePhase<'a, K> {
    pub fn new(store: &'a dyn ResourceStore<K>) -> Self {
        Self { store }
    }

    /// Make the live child match `desired`, creating it owned by `owner` when absent.
    pub async fn reconcile<O>(&self, owner: &O, mut desired: K) -> Result<PhaseOutcome>
    where
        O: Resource<DynamicType = ()> + Sync,
    {
        let kind = K::kind(&());
        let name = desired
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;

        let existing = match self.store.get(&name).await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Finding {} {} failed: {}", kind, name, e);
                return Err(e);
            }
        };

        let Some(mut live) = existing else {
            info!("Creating new {} {}", kind, name);
            let owner_ref = owner
                .controller_owner_ref(&())
                .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
            desired.meta_mut().owner_references = Some(vec![owner_ref]);

            if let Err(e) = self.store.create(&desired).await {
                error!("Creating {} {} failed: {}", kind, name, e);
                return Err(e);
            }
            info!("{} {} creation succeeded", kind, name);
            return Ok(PhaseOutcome::Created);
        };

        debug!("Found {} {}. Now checking", kind, name);
        if live.payload_matches(&desired) {
            info!("{} {} update not required", kind, name);
            return Ok(PhaseOutcome::Unchanged);
        }

        info!("Updating {} {}", kind, name);
        live.adopt_payload(&desired);
        if let Err(e) = self.store.update(&live).await {
            error!("Updating {} {} failed: {}", kind, name, e);
            return Err(e);
        }
        Ok(PhaseOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{BenthosPipeline, BenthosPipelineSpec};
    use crate::tasks::pipeline::resources::{build_config_map, build_deployment};
    use crate::tasks::store::memory::{api_error, MemoryStore, WriteOp};
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub ConfigMapStore {}

        #[async_trait]
        impl ResourceStore<ConfigMap> for ConfigMapStore {
            async fn get(&self, name: &str) -> Result<Option<ConfigMap>>;
            async fn create(&self, object: &ConfigMap) -> Result<()>;
            async fn update(&self, object: &ConfigMap) -> Result<()>;
            async fn update_status(&self, name: &str, status: &JsonValue) -> Result<()>;
        }
    }

    fn pipeline() -> BenthosPipeline {
        let mut pipeline = BenthosPipeline::new(
            "p1",
            BenthosPipelineSpec {
                image: "img:v1".to_string(),
                replicas: 2,
                config: "x: 1\n".to_string(),
                config_inline: None,
            },
        );
        pipeline.metadata.namespace = Some("streams".to_string());
        pipeline.metadata.uid = Some("pipeline-uid".to_string());
        pipeline
    }

    #[tokio::test]
    async fn absent_child_is_created_with_owner_reference() {
        let owner = pipeline();
        let store: MemoryStore<ConfigMap> = MemoryStore::new();

        let outcome = ReconcilePhase::<ConfigMap>::new(&store)
            .reconcile(&owner, build_config_map(&owner).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, PhaseOutcome::Created);
        let created = store.object("p1").unwrap();
        let owners = created.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "BenthosPipeline");
        assert_eq!(owners[0].api_version, "ingtra.net/v1alpha1");
        assert_eq!(owners[0].name, "p1");
        assert_eq!(owners[0].uid, "pipeline-uid");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[tokio::test]
    async fn owner_without_uid_cannot_own_children() {
        let mut owner = pipeline();
        owner.metadata.uid = None;
        let store: MemoryStore<ConfigMap> = MemoryStore::new();

        let err = ReconcilePhase::<ConfigMap>::new(&store)
            .reconcile(&owner, build_config_map(&owner).unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingObjectKey(".metadata.uid")));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn matching_child_is_left_alone() {
        let owner = pipeline();
        let store: MemoryStore<ConfigMap> = MemoryStore::new();
        store.insert(build_config_map(&owner).unwrap());

        let outcome = ReconcilePhase::<ConfigMap>::new(&store)
            .reconcile(&owner, build_config_map(&owner).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, PhaseOutcome::Unchanged);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn drifted_config_map_gets_data_and_hash_back() {
        let owner = pipeline();
        let store: MemoryStore<ConfigMap> = MemoryStore::new();
        let mut stale = build_config_map(&owner).unwrap();
        stale.data = Some([("benthos.yaml".to_string(), "old".to_string())].into());
        stale
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("team".to_string(), "streaming".to_string());
        store.insert(stale);
        let uid_before = store.object("p1").unwrap().metadata.uid;

        let desired = build_config_map(&owner).unwrap();
        let outcome = ReconcilePhase::<ConfigMap>::new(&store)
            .reconcile(&owner, desired.clone())
            .await
            .unwrap();

        assert_eq!(outcome, PhaseOutcome::Updated);
        let live = store.object("p1").unwrap();
        assert_eq!(live.data, desired.data);
        assert_eq!(live.metadata.uid, uid_before);
        let annotations = live.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get(CONFIG_HASH_ANNOTATION),
            desired
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(CONFIG_HASH_ANNOTATION)
        );
        assert_eq!(annotations["team"], "streaming");
        assert_eq!(store.writes().len(), 1);
        assert_eq!(store.writes()[0].op, WriteOp::Update);
    }

    #[tokio::test]
    async fn deployment_update_touches_only_spec() {
        let owner = pipeline();
        let store: MemoryStore<Deployment> = MemoryStore::new();
        let mut live = build_deployment(&owner).unwrap();
        if let Some(spec) = live.spec.as_mut() {
            spec.replicas = Some(5);
        }
        live.status = Some(DeploymentStatus {
            ready_replicas: Some(5),
            ..Default::default()
        });
        store.insert(live);
        let uid_before = store.object("p1").unwrap().metadata.uid;

        let outcome = ReconcilePhase::<Deployment>::new(&store)
            .reconcile(&owner, build_deployment(&owner).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, PhaseOutcome::Updated);
        let live = store.object("p1").unwrap();
        assert_eq!(live.spec.unwrap().replicas, Some(2));
        assert_eq!(live.status.unwrap().ready_replicas, Some(5));
        assert_eq!(live.metadata.uid, uid_before);
    }

    #[tokio::test]
    async fn server_defaulted_fields_are_not_drift() {
        let owner = pipeline();
        let store: MemoryStore<Deployment> = MemoryStore::new();
        let mut live = build_deployment(&owner).unwrap();
        if let Some(spec) = live.spec.as_mut() {
            spec.progress_deadline_seconds = Some(600);
            if let Some(pod) = spec.template.spec.as_mut() {
                pod.restart_policy = Some("Always".to_string());
                pod.containers[0].termination_message_path =
                    Some("/dev/termination-log".to_string());
            }
        }
        store.insert(live);

        let outcome = ReconcilePhase::<Deployment>::new(&store)
            .reconcile(&owner, build_deployment(&owner).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, PhaseOutcome::Unchanged);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_is_propagated_without_writes() {
        let owner = pipeline();
        let mut store = MockConfigMapStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|_| Err(api_error(500, "InternalError", "etcd unavailable")));
        store.expect_create().never();
        store.expect_update().never();

        let err = ReconcilePhase::<ConfigMap>::new(&store)
            .reconcile(&owner, build_config_map(&owner).unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.api_code(), Some(500));
    }

    #[tokio::test]
    async fn update_conflict_is_returned_as_retryable() {
        let owner = pipeline();
        let mut stale = build_config_map(&owner).unwrap();
        stale.data = None;
        stale.metadata.resource_version = Some("41".to_string());

        let mut store = MockConfigMapStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(stale.clone())));
        store
            .expect_update()
            .withf(|cm| cm.metadata.resource_version.as_deref() == Some("41"))
            .times(1)
            .returning(|_| Err(api_error(409, "Conflict", "the object has been modified")));

        let err = ReconcilePhase::<ConfigMap>::new(&store)
            .reconcile(&owner, build_config_map(&owner).unwrap())
            .await
            .unwrap_err();

        assert!(err.is_conflict());
    }

    #[test]
    fn contains_desired_ignores_extra_live_fields() {
        let live = json!({"replicas": 2, "strategy": {"type": "RollingUpdate"}, "list": [{"a": 1, "b": 2}]});

        assert!(contains_desired(&live, &json!({"replicas": 2, "list": [{"a": 1}]})));
        assert!(!contains_desired(&live, &json!({"replicas": 3})));
        assert!(!contains_desired(&live, &json!({"missing": true})));
        assert!(!contains_desired(&live, &json!({"list": [{"a": 1}, {"a": 2}]})));
    }
}
