/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/access_resources.rs
*
* Materializes the objects that make up a grant: a Role pinned to one pod, a
* RoleBinding for the template's allowed groups and, for pod-copy grants, the
* debug pod itself. Also renders the access command returned to developers.
*
* Role and RoleBinding are get-or-create; when an existing one has drifted,
* its rules, subjects and owner references are replaced under the existing
* resourceVersion. Pods are get-or-create and never updated.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::error::{Error, Result};
use crate::kube_client::KubeClient;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Controller owner reference pointing at `obj`.
pub fn owner_reference<K: Resource<DynamicType = ()>>(obj: &K) -> Result<OwnerReference> {
    obj.controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("metadata.uid"))
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

fn rule(resource: &str, pod_name: &str, verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec![resource.to_string()]),
        resource_names: Some(vec![pod_name.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Role allowing `exec` into exactly one pod.
pub fn build_role(name: &str, namespace: &str, pod_name: &str, owner: OwnerReference) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        rules: Some(vec![
            rule("pods", pod_name, &["get", "list", "watch"]),
            rule("pods/exec", pod_name, &["create", "update", "delete", "get", "list"]),
        ]),
    }
}

/// RoleBinding from the Role `name` to every group in `groups`.
pub fn build_role_binding(
    name: &str,
    namespace: &str,
    groups: &[String],
    owner: OwnerReference,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(
            groups
                .iter()
                .map(|g| Subject {
                    kind: "Group".to_string(),
                    api_group: Some(RBAC_API_GROUP.to_string()),
                    name: g.clone(),
                    namespace: None,
                })
                .collect(),
        ),
    }
}

/// Standalone pod built from a (mutated) pod template.
pub fn build_pod(
    name: &str,
    namespace: &str,
    template: PodTemplateSpec,
    owner: OwnerReference,
) -> Result<Pod> {
    let meta = template.metadata.unwrap_or_default();
    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: meta.labels,
            annotations: meta.annotations,
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(
            template
                .spec
                .ok_or(Error::MissingObjectKey("spec.template.spec"))?,
        ),
        status: None,
    })
}

pub async fn ensure_role(kube: &dyn KubeClient, desired: Role) -> Result<Role> {
    let ns = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match kube.get_role(&ns, &name).await? {
        None => {
            info!(role = %name, namespace = %ns, "Creating Role");
            kube.create_role(&ns, &desired).await
        }
        Some(existing)
            if existing.rules == desired.rules
                && existing.metadata.owner_references == desired.metadata.owner_references =>
        {
            Ok(existing)
        }
        Some(existing) => {
            info!(role = %name, namespace = %ns, "Role drifted, replacing rules");
            let mut updated = existing;
            updated.rules = desired.rules;
            updated.metadata.owner_references = desired.metadata.owner_references;
            kube.replace_role(&ns, &updated).await
        }
    }
}

pub async fn ensure_role_binding(kube: &dyn KubeClient, desired: RoleBinding) -> Result<RoleBinding> {
    let ns = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match kube.get_role_binding(&ns, &name).await? {
        None => {
            info!(role_binding = %name, namespace = %ns, "Creating RoleBinding");
            kube.create_role_binding(&ns, &desired).await
        }
        Some(existing)
            if existing.subjects == desired.subjects
                && existing.metadata.owner_references == desired.metadata.owner_references =>
        {
            Ok(existing)
        }
        Some(existing) => {
            info!(role_binding = %name, namespace = %ns, "RoleBinding drifted, replacing subjects");
            let mut updated = existing;
            updated.subjects = desired.subjects;
            updated.metadata.owner_references = desired.metadata.owner_references;
            kube.replace_role_binding(&ns, &updated).await
        }
    }
}

pub async fn ensure_pod(kube: &dyn KubeClient, desired: Pod) -> Result<Pod> {
    let ns = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match kube.get_pod(&ns, &name).await? {
        Some(existing) => Ok(existing),
        None => {
            info!(pod = %name, namespace = %ns, "Creating access pod");
            kube.create_pod(&ns, &desired).await
        }
    }
}

/// Drops the leading dot of every Go field reference in one template action.
/// String literals and chained selectors (`A.B`, `1.5`) are left alone.
fn strip_field_dots(action: &str) -> String {
    let mut out = String::with_capacity(action.len());
    let mut chars = action.chars().peekable();
    let mut prev: Option<char> = None;
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            prev = Some(c);
            continue;
        }
        let field_start = c == '.'
            && chars.peek().is_some_and(|n| n.is_alphabetic() || *n == '_')
            && !prev.is_some_and(|p| p.is_alphanumeric() || matches!(p, '_' | ')' | ']'));
        if !field_start {
            out.push(c);
        }
        in_string = c == '"';
        prev = Some(c);
    }
    out
}

/// Rewrites Go-style field references inside `{{ }}` to minijinja variables,
/// so `{{ .Metadata.Name | upper }}` renders as `{{ Metadata.Name | upper }}`.
/// Go actions such as `if` and `range` are not translated; write those with
/// minijinja's `{% %}` tags.
fn normalize_go_template(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(open) = rest.find("{{") {
        let (head, tail) = rest.split_at(open + 2);
        out.push_str(head);
        let close = tail.find("}}").unwrap_or(tail.len());
        let (action, after) = tail.split_at(close);
        out.push_str(&strip_field_dots(action));
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Renders an access command template for the granted pod.
pub fn render_access_command(template: &str, namespace: &str, pod_name: &str) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let ctx = json!({ "Metadata": { "Namespace": namespace, "Name": pod_name } });
    env.render_str(&normalize_go_template(template), ctx)
        .map_err(|e| Error::AccessResourcesCreationFailed(format!("rendering accessCommand: {e}")))
}
