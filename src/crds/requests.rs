/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds/requests.rs
*
* ExecAccessRequest and PodAccessRequest, the objects developers create to
* ask for access through a template.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestStatus {
    #[serde(default)]
    pub ready: bool,
    /// Pod the grant is pinned to. Never changes once written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    /// Rendered access command handed back to the developer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    kind = "ExecAccessRequest",
    namespaced,
    status = "AccessRequestStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Template", "type":"string", "jsonPath":".spec.templateName"}"#,
    printcolumn = r#"{"name":"Pod", "type":"string", "jsonPath":".status.podName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "execaccessreq"
)]
#[serde(rename_all = "camelCase")]
pub struct ExecAccessRequestSpec {
    pub template_name: String,
    /// Specific pod to exec into. Must be a Running member of the workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    kind = "PodAccessRequest",
    namespaced,
    status = "AccessRequestStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Template", "type":"string", "jsonPath":".spec.templateName"}"#,
    printcolumn = r#"{"name":"Pod", "type":"string", "jsonPath":".status.podName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "podaccessreq"
)]
#[serde(rename_all = "camelCase")]
pub struct PodAccessRequestSpec {
    pub template_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}
