//! Access to cluster objects for the reconcile passes.
//!
//! Reconciliation only ever talks to the cluster through [`ResourceStore`]. The
//! controller runtime passes in `kube::Api` handles; tests use
//! [`memory::MemoryStore`].

use crate::tasks::types::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::fmt::Debug;

/// Namespaced get/create/update for one object kind
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Fetch an object by name. A missing object is `Ok(None)`, not an error.
    async fn get(&self, name: &str) -> Result<Option<K>>;

    async fn create(&self, object: &K) -> Result<()>;

    /// Replace the object. Fails with a 409 conflict when `object` carries a
    /// stale `resourceVersion`.
    async fn update(&self, object: &K) -> Result<()>;

    /// Merge `status` into the object's status subresource
    async fn update_status(&self, name: &str, status: &JsonValue) -> Result<()>;
}

fn object_name<K: Resource>(object: &K) -> Result<&str> {
    object
        .meta()
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))
}

#[async_trait]
impl<K> ResourceStore<K> for Api<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.get_opt(name).await?)
    }

    async fn create(&self, object: &K) -> Result<()> {
        Api::create(self, &PostParams::default(), object).await?;
        Ok(())
    }

    async fn update(&self, object: &K) -> Result<()> {
        let name = object_name(object)?;
        self.replace(name, &PostParams::default(), object).await?;
        Ok(())
    }

    async fn update_status(&self, name: &str, status: &JsonValue) -> Result<()> {
        let patch = json!({ "status": status });
        self.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

pub mod memory {
    //! In-memory [`ResourceStore`] that behaves like a tiny API server: it
    //! assigns `uid` and `resourceVersion`, rejects stale updates and records
    //! every write so callers can assert on them.

    use super::{object_name, ResourceStore};
    use crate::tasks::types::{Error, Result};
    use async_trait::async_trait;
    use kube::error::ErrorResponse;
    use kube::Resource;
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use serde_json::{Map, Value as JsonValue};
    use std::collections::BTreeMap;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum WriteOp {
        Create,
        Update,
        UpdateStatus,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct WriteRecord {
        pub op: WriteOp,
        pub name: String,
    }

    struct State<K> {
        objects: BTreeMap<String, K>,
        writes: Vec<WriteRecord>,
        revision: u64,
    }

    impl<K: Resource> State<K> {
        fn stamp(&mut self, object: &mut K) {
            self.revision += 1;
            let meta = object.meta_mut();
            if meta.uid.is_none() {
                meta.uid = Some(format!("uid-{}", self.revision));
            }
            meta.resource_version = Some(self.revision.to_string());
        }
    }

    pub struct MemoryStore<K> {
        state: Mutex<State<K>>,
    }

    impl<K: Resource + Clone> Default for MemoryStore<K> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<K: Resource + Clone> MemoryStore<K> {
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State {
                    objects: BTreeMap::new(),
                    writes: Vec::new(),
                    revision: 0,
                }),
            }
        }

        fn lock(&self) -> MutexGuard<'_, State<K>> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Place an object in the store as an external actor would. Not recorded
        /// as a write.
        pub fn insert(&self, mut object: K) {
            let mut state = self.lock();
            state.stamp(&mut object);
            if let Some(name) = object.meta().name.clone() {
                state.objects.insert(name, object);
            }
        }

        /// Remove an object as an external actor would
        pub fn remove(&self, name: &str) -> Option<K> {
            self.lock().objects.remove(name)
        }

        #[must_use]
        pub fn object(&self, name: &str) -> Option<K> {
            self.lock().objects.get(name).cloned()
        }

        #[must_use]
        pub fn len(&self) -> usize {
            self.lock().objects.len()
        }

        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.lock().objects.is_empty()
        }

        /// Writes performed through the [`ResourceStore`] interface, oldest first
        #[must_use]
        pub fn writes(&self) -> Vec<WriteRecord> {
            self.lock().writes.clone()
        }

        pub fn clear_writes(&self) {
            self.lock().writes.clear();
        }
    }

    /// Build an API error the way the API server reports it
    #[must_use]
    pub fn api_error(code: u16, reason: &str, message: &str) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    /// JSON merge patch (RFC 7386): `null` removes a key, objects merge
    /// recursively, anything else replaces the target.
    fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
        let JsonValue::Object(patch) = patch else {
            *target = patch.clone();
            return;
        };
        if !target.is_object() {
            *target = JsonValue::Object(Map::new());
        }
        if let JsonValue::Object(target) = target {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_patch(
                        target.entry(key.clone()).or_insert(JsonValue::Null),
                        value,
                    );
                }
            }
        }
    }

    fn not_found(name: &str) -> Error {
        api_error(404, "NotFound", &format!("\"{name}\" not found"))
    }

    #[async_trait]
    impl<K> ResourceStore<K> for MemoryStore<K>
    where
        K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        async fn get(&self, name: &str) -> Result<Option<K>> {
            Ok(self.object(name))
        }

        async fn create(&self, object: &K) -> Result<()> {
            let name = object_name(object)?.to_string();
            let mut state = self.lock();
            if state.objects.contains_key(&name) {
                return Err(api_error(
                    409,
                    "AlreadyExists",
                    &format!("\"{name}\" already exists"),
                ));
            }

            let mut stored = object.clone();
            stored.meta_mut().uid = None;
            state.stamp(&mut stored);
            state.objects.insert(name.clone(), stored);
            state.writes.push(WriteRecord {
                op: WriteOp::Create,
                name,
            });
            Ok(())
        }

        async fn update(&self, object: &K) -> Result<()> {
            let name = object_name(object)?.to_string();
            let mut state = self.lock();
            let current_version = match state.objects.get(&name) {
                Some(current) => current.meta().resource_version.clone(),
                None => return Err(not_found(&name)),
            };

            if object.meta().resource_version.is_some()
                && object.meta().resource_version != current_version
            {
                return Err(api_error(
                    409,
                    "Conflict",
                    &format!(
                        "Operation cannot be fulfilled on \"{name}\": the object has been modified"
                    ),
                ));
            }

            let mut stored = object.clone();
            state.stamp(&mut stored);
            state.objects.insert(name.clone(), stored);
            state.writes.push(WriteRecord {
                op: WriteOp::Update,
                name,
            });
            Ok(())
        }

        async fn update_status(&self, name: &str, status: &JsonValue) -> Result<()> {
            let mut state = self.lock();
            let Some(current) = state.objects.get(name) else {
                return Err(not_found(name));
            };

            let mut raw = serde_json::to_value(current)?;
            merge_patch(&mut raw["status"], status);
            let mut stored: K = serde_json::from_value(raw)?;
            state.stamp(&mut stored);
            state.objects.insert(name.to_string(), stored);
            state.writes.push(WriteRecord {
                op: WriteOp::UpdateStatus,
                name: name.to_string(),
            });
            Ok(())
        }
    }
}
