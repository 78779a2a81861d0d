/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/builders.rs
*
* The `Builder` trait is the variant policy behind the request reconciler.
* One reconciler implementation drives both access modes; what differs
* between "exec into a live pod" and "launch a debug copy" is which template
* kind is loaded, what gets materialized, and when it counts as ready.
*
* Architecture:
* - `BuilderBase` carries the API seams and the behavior every variant shares:
*   template lookup, the effective-duration decision, the request-to-template
*   owner reference, and pinning `status.podName`.
* - `exec_builder` pins a grant to one running pod of the workload.
* - `pod_copy_builder` derives a standalone pod from the workload's pod
*   template through the mutator and pins the grant to it.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod exec_builder;
pub mod pod_copy_builder;

pub use exec_builder::ExecAccessBuilder;
pub use pod_copy_builder::PodAccessBuilder;

use crate::crds::{AccessRequest, AccessTemplate};
use crate::duration::{effective_access_duration, DurationDecision};
use crate::error::{Error, Result};
use crate::kube_client::{KubeClient, ResourceStore};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info};

/// What a developer receives once resources are materialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    pub pod_name: String,
    pub access_message: String,
}

pub(crate) fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.meta()
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))
}

pub struct BuilderBase<R, T> {
    pub kube: Arc<dyn KubeClient>,
    pub templates: Arc<dyn ResourceStore<T>>,
    pub requests: Arc<dyn ResourceStore<R>>,
}

impl<R: AccessRequest, T: AccessTemplate> BuilderBase<R, T> {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        templates: Arc<dyn ResourceStore<T>>,
        requests: Arc<dyn ResourceStore<R>>,
    ) -> Self {
        Self {
            kube,
            templates,
            requests,
        }
    }

    pub async fn get_template(&self, req: &R) -> Result<T> {
        let ns = namespace_of(req)?;
        self.templates
            .get(&ns, req.template_name())
            .await?
            .ok_or_else(|| Error::TemplateNotFound(req.template_name().to_string()))
    }

    pub fn get_access_duration(&self, req: &R, tmpl: &T) -> Result<DurationDecision> {
        let cfg = tmpl.access_config();
        effective_access_duration(
            req.requested_duration(),
            &cfg.default_duration,
            &cfg.max_duration,
        )
    }

    /// Adds an owner reference from the request to its template.
    ///
    /// Returns `false` without writing when the reference already exists.
    pub async fn set_owner_ref(&self, req: &R, tmpl: &T) -> Result<bool> {
        let owner = tmpl
            .owner_ref(&())
            .ok_or(Error::MissingObjectKey("metadata.uid"))?;
        let mut owners = req.owner_references().to_vec();
        if owners.iter().any(|o| o.uid == owner.uid) {
            return Ok(false);
        }
        info!(request = %req.name_any(), template = %tmpl.name_any(), "Setting template owner reference");
        owners.push(owner);
        self.requests.patch_owner_references(req, owners).await?;
        Ok(true)
    }

    /// Non-cached re-read of the request.
    pub async fn refetch(&self, req: &R) -> Result<R> {
        let ns = namespace_of(req)?;
        self.requests
            .get(&ns, &req.name_any())
            .await?
            .ok_or_else(|| Error::RequestNotFound(req.name_any()))
    }

    /// Records `pod_name` on `status.podName` and refreshes `req` in place.
    ///
    /// A pod name already recorded is never replaced.
    pub async fn record_pod_name(&self, req: &mut R, pod_name: &str) -> Result<()> {
        if let Some(existing) = req.pod_name() {
            if existing != pod_name {
                debug!(recorded = existing, candidate = pod_name, "Keeping recorded pod name");
            }
            return Ok(());
        }
        req.access_status_mut().pod_name = Some(pod_name.to_string());
        self.requests.patch_status(req).await?;
        *req = self.refetch(req).await?;
        Ok(())
    }
}

/// Variant policy for one access mode.
#[async_trait]
pub trait Builder: Send + Sync + 'static {
    type Request: AccessRequest;
    type Template: AccessTemplate;

    /// Short label for logs and metrics, e.g. `exec`.
    fn kind(&self) -> &'static str;

    fn base(&self) -> &BuilderBase<Self::Request, Self::Template>;

    async fn get_template(&self, req: &Self::Request) -> Result<Self::Template> {
        self.base().get_template(req).await
    }

    fn get_access_duration(
        &self,
        req: &Self::Request,
        tmpl: &Self::Template,
    ) -> Result<DurationDecision> {
        self.base().get_access_duration(req, tmpl)
    }

    async fn set_owner_ref(&self, req: &Self::Request, tmpl: &Self::Template) -> Result<bool> {
        self.base().set_owner_ref(req, tmpl).await
    }

    /// Materializes the grant. May write `status.podName` (and refresh `req`)
    /// before any RBAC object is created.
    async fn create_access_resources(
        &self,
        req: &mut Self::Request,
        tmpl: &Self::Template,
    ) -> Result<AccessGrant>;

    async fn access_resources_are_ready(
        &self,
        req: &Self::Request,
        tmpl: &Self::Template,
    ) -> Result<bool>;
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::crds::{ExecAccessRequest, ExecAccessTemplate};
    use crate::duration::DecisionKind;
    use crate::kube_client::{MockKubeClient, MockResourceStore};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn base(
        templates: MockResourceStore<ExecAccessTemplate>,
        requests: MockResourceStore<ExecAccessRequest>,
    ) -> BuilderBase<ExecAccessRequest, ExecAccessTemplate> {
        BuilderBase::new(
            Arc::new(MockKubeClient::new()),
            Arc::new(templates),
            Arc::new(requests),
        )
    }

    #[tokio::test]
    async fn test_get_template_not_found() {
        let mut templates = MockResourceStore::new();
        templates.expect_get().returning(|_, _| Ok(None));
        let b = base(templates, MockResourceStore::new());
        let err = b.get_template(&exec_request(None, None)).await.unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(name) if name == "t"));
    }

    #[test]
    fn test_get_access_duration_uses_template_bounds() {
        let b = base(MockResourceStore::new(), MockResourceStore::new());
        let d = b
            .get_access_duration(&exec_request(Some("24h"), None), &exec_template("1h", "2h"))
            .unwrap();
        assert_eq!(d.kind, DecisionKind::Clamped);
        let d = b
            .get_access_duration(&exec_request(None, None), &exec_template("1h", "2h"))
            .unwrap();
        assert_eq!(d.kind, DecisionKind::Defaulted);
    }

    #[tokio::test]
    async fn test_set_owner_ref_only_once() {
        let mut requests = MockResourceStore::new();
        requests
            .expect_patch_owner_references()
            .withf(|_, owners: &Vec<OwnerReference>| {
                owners.len() == 1 && owners[0].uid == TEMPLATE_UID && owners[0].kind == "ExecAccessTemplate"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let b = base(MockResourceStore::new(), requests);
        let tmpl = exec_template("1h", "2h");

        let mut req = exec_request(None, None);
        assert!(b.set_owner_ref(&req, &tmpl).await.unwrap());

        req.metadata.owner_references = Some(vec![tmpl.owner_ref(&()).unwrap()]);
        assert!(!b.set_owner_ref(&req, &tmpl).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_pod_name_writes_then_refetches() {
        let mut requests = MockResourceStore::new();
        requests
            .expect_patch_status()
            .withf(|r: &ExecAccessRequest| r.pod_name() == Some("web-1"))
            .times(1)
            .returning(|_| Ok(()));
        requests.expect_get().times(1).returning(|_, _| {
            let mut r = exec_request(None, None);
            r.access_status_mut().pod_name = Some("web-1".into());
            r.metadata.resource_version = Some("2".into());
            Ok(Some(r))
        });
        let b = base(MockResourceStore::new(), requests);

        let mut req = exec_request(None, None);
        b.record_pod_name(&mut req, "web-1").await.unwrap();
        assert_eq!(req.resource_version().as_deref(), Some("2"));

        // Immutable once set.
        b.record_pod_name(&mut req, "web-2").await.unwrap();
        assert_eq!(req.pod_name(), Some("web-1"));
    }
}
