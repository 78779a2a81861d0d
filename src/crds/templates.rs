/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds/templates.rs
*
* ExecAccessTemplate and PodAccessTemplate. A template is written by a cluster
* operator and pins down which workload developers may reach, which groups
* may ask, and how long a grant may last.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::conditions::Condition;
use super::mutation::PodTemplateSpecMutationConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_ACCESS_COMMAND: &str =
    "kubectl exec -it -n {{ .Metadata.Namespace }} {{ .Metadata.Name }} -- /bin/sh";

fn default_access_command() -> String {
    DEFAULT_ACCESS_COMMAND.to_string()
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum TargetKind {
    Deployment,
    DaemonSet,
    StatefulSet,
    Rollout,
}

impl TargetKind {
    /// The API group a workload of this kind lives in.
    pub fn group(&self) -> &'static str {
        match self {
            TargetKind::Rollout => "argoproj.io",
            _ => "apps",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reference to the workload controller whose pods are being accessed.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub api_version: String,
    pub kind: TargetKind,
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Groups bound to the generated Role.
    pub allowed_groups: Vec<String>,
    /// Go duration used when a request does not ask for one.
    pub default_duration: String,
    /// Upper bound for any request's duration.
    pub max_duration: String,
    /// Template rendered with the granted pod's metadata and returned to the developer.
    #[serde(default = "default_access_command")]
    pub access_command: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessTemplateStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    kind = "ExecAccessTemplate",
    namespaced,
    status = "AccessTemplateStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "execaccesstmpl"
)]
#[serde(rename_all = "camelCase")]
pub struct ExecAccessTemplateSpec {
    pub target_ref: TargetRef,
    pub access_config: AccessConfig,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    kind = "PodAccessTemplate",
    namespaced,
    status = "AccessTemplateStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "podaccesstmpl"
)]
#[serde(rename_all = "camelCase")]
pub struct PodAccessTemplateSpec {
    pub target_ref: TargetRef,
    pub access_config: AccessConfig,
    #[serde(default)]
    pub mutation_config: PodTemplateSpecMutationConfig,
    /// Upper bound for CPU requests and limits of the copied container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_storage: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_access_command_defaults() {
        let spec: ExecAccessTemplateSpec = serde_json::from_value(json!({
            "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
            "accessConfig": {
                "allowedGroups": ["admins"],
                "defaultDuration": "1h",
                "maxDuration": "24h"
            }
        }))
        .unwrap();
        assert_eq!(spec.access_config.access_command, DEFAULT_ACCESS_COMMAND);
        assert_eq!(spec.target_ref.kind, TargetKind::Deployment);
    }

    #[test]
    fn test_unknown_target_kind_is_rejected() {
        let res: Result<TargetRef, _> = serde_json::from_value(json!({
            "apiVersion": "batch/v1", "kind": "CronJob", "name": "nightly"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_pod_template_spec_parses_mutation_config() {
        let spec: PodAccessTemplateSpec = serde_json::from_value(json!({
            "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "api"},
            "accessConfig": {
                "allowedGroups": ["devs"],
                "defaultDuration": "1h",
                "maxDuration": "2h"
            },
            "mutationConfig": {
                "command": ["/bin/sleep"],
                "args": ["100"],
                "env": [{"name": "DEBUG", "value": "1"}],
                "patchSpecOperations": [
                    {"op": "replace", "path": "/restartPolicy", "value": "Never"}
                ]
            },
            "maxCpu": "2"
        }))
        .unwrap();
        let plan = spec.mutation_config;
        assert_eq!(plan.command.as_deref(), Some(&["/bin/sleep".to_string()][..]));
        assert_eq!(plan.env.unwrap()[0].name, "DEBUG");
        assert_eq!(plan.patch_spec_operations.len(), 1);
        assert!(!plan.keep_liveness_probe);
        assert_eq!(spec.max_cpu.as_deref(), Some("2"));
    }
}
