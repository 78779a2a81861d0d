/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/kube_client.rs
*
* The seam between the reconcilers and the Kubernetes API.
*
* Architecture:
* - `KubeClient` covers the built-in objects the builders read and write:
*   workloads, pods, Roles and RoleBindings.
* - `ResourceStore<K>` covers the Oz custom resources: non-cached reads,
*   status writes, owner-reference writes and deletion. Status and owner
*   reference writes are merge patches pinned to the object's
*   `resourceVersion`, so a stale writer gets a 409 and retries.
* - Both traits are implemented on top of `kube::Api` here and mocked with
*   `mockall` in the unit tests of every module that consumes them.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{TargetKind, TargetRef};
use crate::error::{Error, Result};
use crate::resolver::{api_version_of, Workload};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::{Client, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_workload(&self, namespace: &str, target: &TargetRef) -> Result<Option<Workload>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Lists pods by label and field selector. Empty selectors are omitted.
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>>;
    async fn create_role(&self, namespace: &str, role: &Role) -> Result<Role>;
    async fn replace_role(&self, namespace: &str, role: &Role) -> Result<Role>;

    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>>;
    async fn create_role_binding(&self, namespace: &str, binding: &RoleBinding) -> Result<RoleBinding>;
    async fn replace_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding>;
}

/// Reads and writes of one Oz custom resource kind.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore<K: Send + Sync + 'static>: Send + Sync {
    /// Non-cached read. `None` when the object does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Writes `obj.status` guarded by `obj`'s resourceVersion.
    async fn patch_status(&self, obj: &K) -> Result<()>;

    /// Replaces `metadata.ownerReferences` guarded by `obj`'s resourceVersion.
    async fn patch_owner_references(&self, obj: &K, owners: Vec<OwnerReference>) -> Result<()>;

    /// Deletes the object. Already gone counts as success.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// `KubeClient` backed by a live API server connection.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeApiClient {
    async fn get_workload(&self, namespace: &str, target: &TargetRef) -> Result<Option<Workload>> {
        let name = target.name.as_str();
        let workload = match target.kind {
            TargetKind::Deployment => self
                .api::<Deployment>(namespace)
                .get_opt(name)
                .await?
                .map(Workload::Deployment),
            TargetKind::StatefulSet => self
                .api::<StatefulSet>(namespace)
                .get_opt(name)
                .await?
                .map(Workload::StatefulSet),
            TargetKind::DaemonSet => self
                .api::<DaemonSet>(namespace)
                .get_opt(name)
                .await?
                .map(Workload::DaemonSet),
            TargetKind::Rollout => {
                let gvk = GroupVersionKind::gvk(
                    TargetKind::Rollout.group(),
                    api_version_of(target),
                    "Rollout",
                );
                let ar = ApiResource::from_gvk(&gvk);
                Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, &ar)
                    .get_opt(name)
                    .await?
                    .map(Workload::Rollout)
            }
        };
        Ok(workload)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.api::<Pod>(namespace).get_opt(name).await?)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<Pod>> {
        let mut lp = ListParams::default();
        if !label_selector.is_empty() {
            lp = lp.labels(label_selector);
        }
        if !field_selector.is_empty() {
            lp = lp.fields(field_selector);
        }
        debug!(namespace, label_selector, field_selector, "Listing pods");
        Ok(self.api::<Pod>(namespace).list(&lp).await?.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        Ok(self
            .api::<Pod>(namespace)
            .create(&PostParams::default(), pod)
            .await?)
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>> {
        Ok(self.api::<Role>(namespace).get_opt(name).await?)
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<Role> {
        Ok(self
            .api::<Role>(namespace)
            .create(&PostParams::default(), role)
            .await?)
    }

    async fn replace_role(&self, namespace: &str, role: &Role) -> Result<Role> {
        Ok(self
            .api::<Role>(namespace)
            .replace(&role.name_any(), &PostParams::default(), role)
            .await?)
    }

    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>> {
        Ok(self.api::<RoleBinding>(namespace).get_opt(name).await?)
    }

    async fn create_role_binding(&self, namespace: &str, binding: &RoleBinding) -> Result<RoleBinding> {
        Ok(self
            .api::<RoleBinding>(namespace)
            .create(&PostParams::default(), binding)
            .await?)
    }

    async fn replace_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding> {
        Ok(self
            .api::<RoleBinding>(namespace)
            .replace(&binding.name_any(), &PostParams::default(), binding)
            .await?)
    }
}

/// `ResourceStore` for any namespaced custom resource.
pub struct ApiStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> ApiStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))
}

#[async_trait]
impl<K> ResourceStore<K> for ApiStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(&self, obj: &K) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace_of(obj)?);
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        api.patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_owner_references(&self, obj: &K, owners: Vec<OwnerReference>) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace_of(obj)?);
        let patch = json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "ownerReferences": owners,
            }
        });
        api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}
