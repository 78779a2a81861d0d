/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resolver.rs
*
* Resolves a template's `targetRef` into the workload it names and extracts
* the two things the builders need from it: a deep copy of its pod template
* and its pod label selector. Argo Rollouts are read as dynamic objects so the
* operator does not depend on the Argo API types.
*
* Also hosts the label selector helpers: rendering a selector as a list-call
* selector string and matching a selector against a concrete label set.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{TargetKind, TargetRef};
use crate::error::{Error, Result};
use crate::kube_client::KubeClient;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::api::DynamicObject;
use std::collections::BTreeMap;
use tracing::debug;

/// A workload controller a template may point at.
#[derive(Clone, Debug)]
pub enum Workload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    Rollout(DynamicObject),
}

impl Workload {
    /// A deep copy of the workload's pod template.
    pub fn pod_template(&self) -> Result<PodTemplateSpec> {
        match self {
            Workload::Deployment(d) => d.spec.as_ref().map(|s| s.template.clone()),
            Workload::StatefulSet(s) => s.spec.as_ref().map(|s| s.template.clone()),
            Workload::DaemonSet(d) => d.spec.as_ref().map(|s| s.template.clone()),
            Workload::Rollout(r) => r
                .data
                .pointer("/spec/template")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?,
        }
        .ok_or(Error::MissingObjectKey("spec.template"))
    }

    pub fn label_selector(&self) -> Result<LabelSelector> {
        match self {
            Workload::Deployment(d) => d.spec.as_ref().map(|s| s.selector.clone()),
            Workload::StatefulSet(s) => s.spec.as_ref().map(|s| s.selector.clone()),
            Workload::DaemonSet(d) => d.spec.as_ref().map(|s| s.selector.clone()),
            Workload::Rollout(r) => r
                .data
                .pointer("/spec/selector")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?,
        }
        .ok_or(Error::MissingObjectKey("spec.selector"))
    }
}

/// Rejects a `targetRef` whose apiVersion is outside the kind's API group.
pub fn check_api_version(target: &TargetRef) -> Result<()> {
    let group = target
        .api_version
        .rsplit_once('/')
        .map(|(group, _)| group)
        .unwrap_or("");
    if group != target.kind.group() {
        return Err(Error::TargetNotFound {
            kind: target.kind.to_string(),
            name: target.name.clone(),
            reason: format!(
                "apiVersion {:?} does not belong to API group {:?}",
                target.api_version,
                target.kind.group()
            ),
        });
    }
    Ok(())
}

/// Loads the workload `target` names in `namespace`.
pub async fn resolve(kube: &dyn KubeClient, namespace: &str, target: &TargetRef) -> Result<Workload> {
    check_api_version(target)?;
    debug!(kind = %target.kind, name = %target.name, namespace, "Resolving target workload");
    kube.get_workload(namespace, target)
        .await?
        .ok_or_else(|| Error::TargetNotFound {
            kind: target.kind.to_string(),
            name: target.name.clone(),
            reason: format!("no {} named {:?} in namespace {:?}", target.kind, target.name, namespace),
        })
}

/// Version half of `apiVersion`, falling back to the kind's usual version.
pub fn api_version_of(target: &TargetRef) -> &str {
    match target.api_version.rsplit_once('/') {
        Some((_, version)) if !version.is_empty() => version,
        _ => match target.kind {
            TargetKind::Rollout => "v1alpha1",
            _ => "v1",
        },
    }
}

fn requirement_to_string(req: &LabelSelectorRequirement) -> Result<String> {
    let values = || req.values.clone().unwrap_or_default().join(",");
    let rendered = match req.operator.as_str() {
        "In" => format!("{} in ({})", req.key, values()),
        "NotIn" => format!("{} notin ({})", req.key, values()),
        "Exists" => req.key.clone(),
        "DoesNotExist" => format!("!{}", req.key),
        other => {
            return Err(Error::InvalidMutation(format!(
                "unsupported label selector operator {other:?}"
            )))
        }
    };
    Ok(rendered)
}

/// Renders `selector` in the syntax accepted by `labelSelector=` list queries.
pub fn selector_to_string(selector: &LabelSelector) -> Result<String> {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    for req in selector.match_expressions.iter().flatten() {
        parts.push(requirement_to_string(req)?);
    }
    Ok(parts.join(","))
}

/// Whether a pod carrying `labels` would be selected by `selector`.
///
/// An empty selector selects everything.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_ok = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v));

    let expressions_ok = selector.match_expressions.iter().flatten().all(|req| {
        let values = req.values.as_deref().unwrap_or_default();
        let current = labels.get(&req.key);
        match req.operator.as_str() {
            "In" => current.is_some_and(|v| values.contains(v)),
            "NotIn" => current.map_or(true, |v| !values.contains(v)),
            "Exists" => current.is_some(),
            "DoesNotExist" => current.is_none(),
            _ => false,
        }
    });

    labels_ok && expressions_ok
}
