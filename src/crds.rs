/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the Rust data structures that correspond to the Oz Custom
* Resource Definitions in the `crds.wizardofoz.co/v1alpha1` API group.
*
* Architecture:
* - `templates` holds ExecAccessTemplate and PodAccessTemplate, written by
*   cluster operators to describe which workload may be accessed and how.
* - `requests` holds ExecAccessRequest and PodAccessRequest, written by
*   developers to ask for time-bounded access through a template.
* - `mutation` holds the pod-copy mutation plan carried by PodAccessTemplate.
* - `conditions` holds the condition record shared by all four statuses.
* - The `AccessTemplate` and `AccessRequest` traits expose the fields the
*   generic reconcilers and builders need, so one reconciler implementation
*   serves both access modes.
* - `serde` attributes map idiomatic Rust `snake_case` to Kubernetes
*   `camelCase`, and `schemars` generates the OpenAPI v3 schema embedded in the
*   CRD manifests printed by `oz_operator --crd`.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod conditions;
pub mod mutation;
pub mod requests;
pub mod templates;

pub use conditions::{Condition, ConditionStatus, ConditionType};
pub use mutation::PodTemplateSpecMutationConfig;
pub use requests::{
    AccessRequestStatus, ExecAccessRequest, ExecAccessRequestSpec, PodAccessRequest,
    PodAccessRequestSpec,
};
pub use templates::{
    AccessConfig, AccessTemplateStatus, ExecAccessTemplate, ExecAccessTemplateSpec,
    PodAccessTemplate, PodAccessTemplateSpec, TargetKind, TargetRef,
};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResourceExt, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

pub const API_GROUP: &str = "crds.wizardofoz.co";

/// Annotation the mutating webhook stamps with the creating user's name.
pub const REQUESTOR_ANNOTATION: &str = "crds.wizardofoz.co/requestor";

/// Label placed on every Role and RoleBinding the operator creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "oz-operator";

/// Fields the generic reconcilers need from either template kind.
pub trait AccessTemplate:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn target_ref(&self) -> &TargetRef;
    fn access_config(&self) -> &AccessConfig;
    fn template_status(&self) -> Option<&AccessTemplateStatus>;
    fn template_status_mut(&mut self) -> &mut AccessTemplateStatus;
}

/// Fields the generic reconcilers need from either request kind.
pub trait AccessRequest:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn template_name(&self) -> &str;
    fn requested_duration(&self) -> Option<&str>;
    fn access_status(&self) -> Option<&AccessRequestStatus>;
    fn access_status_mut(&mut self) -> &mut AccessRequestStatus;

    fn pod_name(&self) -> Option<&str> {
        self.access_status().and_then(|s| s.pod_name.as_deref())
    }
}

macro_rules! impl_access_template {
    ($kind:ty) => {
        impl AccessTemplate for $kind {
            fn target_ref(&self) -> &TargetRef {
                &self.spec.target_ref
            }
            fn access_config(&self) -> &AccessConfig {
                &self.spec.access_config
            }
            fn template_status(&self) -> Option<&AccessTemplateStatus> {
                self.status.as_ref()
            }
            fn template_status_mut(&mut self) -> &mut AccessTemplateStatus {
                self.status.get_or_insert_with(Default::default)
            }
        }
    };
}

macro_rules! impl_access_request {
    ($kind:ty) => {
        impl AccessRequest for $kind {
            fn template_name(&self) -> &str {
                &self.spec.template_name
            }
            fn requested_duration(&self) -> Option<&str> {
                self.spec.duration.as_deref()
            }
            fn access_status(&self) -> Option<&AccessRequestStatus> {
                self.status.as_ref()
            }
            fn access_status_mut(&mut self) -> &mut AccessRequestStatus {
                self.status.get_or_insert_with(Default::default)
            }
        }
    };
}

impl_access_template!(ExecAccessTemplate);
impl_access_template!(PodAccessTemplate);
impl_access_request!(ExecAccessRequest);
impl_access_request!(PodAccessRequest);

/// First eight characters of the object's UID.
pub fn short_uid<K: Resource>(obj: &K) -> Result<String> {
    let uid = obj
        .meta()
        .uid
        .as_deref()
        .ok_or(Error::MissingObjectKey("metadata.uid"))?;
    Ok(uid.chars().take(8).collect())
}

/// Name shared by every resource materialized for a request: `<name>-<uid8>`.
pub fn access_resource_name<K: Resource>(obj: &K) -> Result<String> {
    Ok(format!("{}-{}", obj.name_any(), short_uid(obj)?))
}

/// The object's `metadata.creationTimestamp` as a chrono timestamp.
pub fn creation_time<K: Resource>(obj: &K) -> Result<DateTime<Utc>> {
    let ts = obj
        .meta()
        .creation_timestamp
        .as_ref()
        .ok_or(Error::MissingObjectKey("metadata.creationTimestamp"))?;
    let raw = serde_json::to_value(ts)?;
    raw.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or(Error::MissingObjectKey("metadata.creationTimestamp"))
}

/// Every CRD this operator serves, in installation order.
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        ExecAccessTemplate::crd(),
        PodAccessTemplate::crd(),
        ExecAccessRequest::crd(),
        PodAccessRequest::crd(),
    ]
}
