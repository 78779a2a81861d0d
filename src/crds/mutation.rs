/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds/mutation.rs
*
* The mutation plan a PodAccessTemplate carries. It describes how the
* workload's pod template is turned into a standalone debug pod: which
* scheduling and health-check settings survive, which container fields are
* overridden, and a trailing list of RFC 6902 operations applied to the pod spec.
*
* Kubernetes-typed fields (env, resources, securityContext) and the raw patch
* operations are published in the CRD schema as opaque objects; the API
* server keeps them verbatim and the operator decodes them with serde.
*
* SPDX-License-Identifier: Apache-2.0
*/

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, SecurityContext};
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) fn opaque_object(_: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

pub(crate) fn opaque_object_list(_: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpecMutationConfig {
    /// Container the overrides apply to. Falls back to the
    /// `kubectl.kubernetes.io/default-container` annotation, then the first container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "opaque_object_list")]
    pub env: Option<Vec<EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "opaque_object")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "opaque_object")]
    pub security_context: Option<SecurityContext>,

    /// Merged into the pod's node selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,

    /// Labels for the copy. The workload's own labels are always dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_labels: Option<BTreeMap<String, String>>,

    /// Drop the workload's pod annotations before `podAnnotations` is applied.
    #[serde(default)]
    pub purge_annotations: bool,

    #[serde(default)]
    pub keep_termination_grace_period: bool,
    #[serde(default)]
    pub keep_liveness_probe: bool,
    #[serde(default)]
    pub keep_readiness_probe: bool,
    #[serde(default)]
    pub keep_startup_probe: bool,
    #[serde(default)]
    pub keep_topology_spread_constraints: bool,

    /// RFC 6902 operations applied, in order, to the pod spec.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "opaque_object_list")]
    pub patch_spec_operations: Vec<serde_json::Value>,
}
