/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/mutator.rs
*
* Turns a workload's pod template into the template of a standalone debug pod.
*
* Architecture:
* The mutation runs in three phases over a private copy of the template:
* 1.  **Defaults**: termination grace period, topology spread constraints and
*     the default container's probes are dropped unless the plan keeps them.
*     The template's labels are always dropped so the copy is never adopted
*     by the workload's ReplicaSet or counted by its Service.
* 2.  **Overrides**: command, args, env, resources and securityContext replace
*     the default container's values; nodeSelector is merged; annotations and
*     labels from the plan are overlaid.
* 3.  **Patches**: the plan's RFC 6902 operations are applied in order to the
*     pod spec.
* Two checks then guard the result: the copy's labels must not be selected by
* the workload selector, and a resources override must stay inside the
* template's declared maximums.
*
* The mutator is a pure function of its inputs.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::PodTemplateSpecMutationConfig;
use crate::error::{Error, Result};
use crate::quantity::check_within;
use crate::resolver::selector_matches;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// Annotation kubectl reads to pick the container for `exec`/`logs`.
pub const DEFAULT_CONTAINER_ANNOTATION: &str = "kubectl.kubernetes.io/default-container";

/// Optional resource ceilings from a PodAccessTemplate.
#[derive(Clone, Debug, Default)]
pub struct ResourceBounds {
    pub max_cpu: Option<String>,
    pub max_memory: Option<String>,
    pub max_storage: Option<String>,
}

/// Index of the container the plan's overrides target.
pub fn default_container_index(
    template: &PodTemplateSpec,
    plan: &PodTemplateSpecMutationConfig,
) -> Result<usize> {
    let containers = template
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or_default();
    if containers.is_empty() {
        return Err(Error::MissingObjectKey("spec.template.spec.containers"));
    }

    let annotated = template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(DEFAULT_CONTAINER_ANNOTATION));

    match plan.default_container_name.as_ref().or(annotated) {
        Some(name) => containers
            .iter()
            .position(|c| &c.name == name)
            .ok_or_else(|| Error::InvalidContainerName(name.clone())),
        None => Ok(0),
    }
}

fn apply_defaults(
    spec: &mut PodSpec,
    idx: usize,
    plan: &PodTemplateSpecMutationConfig,
) {
    if !plan.keep_termination_grace_period {
        spec.termination_grace_period_seconds = None;
    }
    if !plan.keep_topology_spread_constraints {
        spec.topology_spread_constraints = None;
    }
    let container = &mut spec.containers[idx];
    if !plan.keep_liveness_probe {
        container.liveness_probe = None;
    }
    if !plan.keep_readiness_probe {
        container.readiness_probe = None;
    }
    if !plan.keep_startup_probe {
        container.startup_probe = None;
    }
}

fn apply_container_overrides(container: &mut Container, plan: &PodTemplateSpecMutationConfig) {
    if let Some(command) = &plan.command {
        container.command = Some(command.clone());
    }
    if let Some(args) = &plan.args {
        container.args = Some(args.clone());
    }
    if let Some(env) = &plan.env {
        container.env = Some(env.clone());
    }
    if let Some(resources) = &plan.resources {
        container.resources = Some(resources.clone());
    }
    if let Some(sc) = &plan.security_context {
        container.security_context = Some(sc.clone());
    }
}

fn overlay(target: &mut Option<BTreeMap<String, String>>, extra: &Option<BTreeMap<String, String>>) {
    if let Some(extra) = extra {
        target
            .get_or_insert_with(BTreeMap::new)
            .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

fn apply_spec_patches(spec: PodSpec, plan: &PodTemplateSpecMutationConfig) -> Result<PodSpec> {
    if plan.patch_spec_operations.is_empty() {
        return Ok(spec);
    }
    let ops = serde_json::Value::Array(plan.patch_spec_operations.clone());
    let patch: json_patch::Patch = serde_json::from_value(ops)
        .map_err(|e| Error::InvalidMutation(format!("malformed patchSpecOperations: {e}")))?;
    let mut doc = serde_json::to_value(&spec)?;
    json_patch::patch(&mut doc, &patch)
        .map_err(|e| Error::InvalidMutation(format!("patchSpecOperations failed: {e}")))?;
    serde_json::from_value(doc)
        .map_err(|e| Error::InvalidMutation(format!("patched pod spec is invalid: {e}")))
}

fn check_resource_bounds(resources: &ResourceRequirements, bounds: &ResourceBounds) -> Result<()> {
    let checks = [
        ("cpu", bounds.max_cpu.as_deref()),
        ("memory", bounds.max_memory.as_deref()),
        ("ephemeral-storage", bounds.max_storage.as_deref()),
    ];
    for set in [&resources.requests, &resources.limits].into_iter().flatten() {
        for (resource, bound) in checks {
            if let (Some(bound), Some(requested)) = (bound, set.get(resource)) {
                check_within(resource, &requested.0, bound)?;
            }
        }
    }
    Ok(())
}

/// Applies `plan` to a copy of `template`.
///
/// `selector` is the source workload's selector; the result is rejected if
/// the copy would be selected by it.
pub fn mutate_pod_template(
    template: &PodTemplateSpec,
    plan: &PodTemplateSpecMutationConfig,
    selector: &LabelSelector,
    bounds: &ResourceBounds,
) -> Result<PodTemplateSpec> {
    let idx = default_container_index(template, plan)?;
    let mut out = template.clone();
    let mut metadata = out.metadata.take().unwrap_or_default();
    let mut spec = out
        .spec
        .take()
        .ok_or(Error::MissingObjectKey("spec.template.spec"))?;

    // Phase A
    apply_defaults(&mut spec, idx, plan);
    metadata.labels = None;

    // Phase B
    apply_container_overrides(&mut spec.containers[idx], plan);
    overlay(&mut spec.node_selector, &plan.node_selector);
    if plan.purge_annotations {
        metadata.annotations = None;
    }
    overlay(&mut metadata.annotations, &plan.pod_annotations);
    overlay(&mut metadata.labels, &plan.pod_labels);

    // Phase C
    let spec = apply_spec_patches(spec, plan)?;

    let labels = metadata.labels.clone().unwrap_or_default();
    if selector_matches(selector, &labels) {
        return Err(Error::InvalidMutation(
            "podLabels would make the copy selectable by the workload's selector".to_string(),
        ));
    }
    if let Some(resources) = &plan.resources {
        check_resource_bounds(resources, bounds)?;
    }

    out.metadata = Some(metadata);
    out.spec = Some(spec);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> PodTemplateSpec {
        serde_json::from_value(json!({
            "metadata": {
                "labels": {"app": "api", "tier": "backend"},
                "annotations": {"prometheus.io/scrape": "true"}
            },
            "spec": {
                "terminationGracePeriodSeconds": 300,
                "topologySpreadConstraints": [
                    {"maxSkew": 1, "topologyKey": "zone", "whenUnsatisfiable": "DoNotSchedule"}
                ],
                "nodeSelector": {"disk": "ssd"},
                "containers": [
                    {
                        "name": "api",
                        "image": "api:1.0",
                        "command": ["/api"],
                        "livenessProbe": {"httpGet": {"path": "/live", "port": 8080}},
                        "readinessProbe": {"httpGet": {"path": "/ready", "port": 8080}},
                        "startupProbe": {"httpGet": {"path": "/start", "port": 8080}}
                    },
                    {
                        "name": "sidecar",
                        "image": "proxy:1.0",
                        "livenessProbe": {"tcpSocket": {"port": 15000}}
                    }
                ]
            }
        }))
        .unwrap()
    }

    fn selector() -> LabelSelector {
        serde_json::from_value(json!({"matchLabels": {"app": "api"}})).unwrap()
    }

    fn plan(v: serde_json::Value) -> PodTemplateSpecMutationConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_defaults_strip_probes_grace_topology_and_labels() {
        let out = mutate_pod_template(&template(), &plan(json!({})), &selector(), &Default::default())
            .unwrap();
        let spec = out.spec.unwrap();
        assert!(spec.termination_grace_period_seconds.is_none());
        assert!(spec.topology_spread_constraints.is_none());
        let api = &spec.containers[0];
        assert!(api.liveness_probe.is_none());
        assert!(api.readiness_probe.is_none());
        assert!(api.startup_probe.is_none());
        // Only the default container is touched.
        assert!(spec.containers[1].liveness_probe.is_some());
        assert!(out.metadata.unwrap().labels.is_none());
    }

    #[test]
    fn test_keep_flags_retain_settings() {
        let p = plan(json!({
            "keepTerminationGracePeriod": true,
            "keepLivenessProbe": true,
            "keepTopologySpreadConstraints": true
        }));
        let out = mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap();
        let spec = out.spec.unwrap();
        assert_eq!(spec.termination_grace_period_seconds, Some(300));
        assert!(spec.topology_spread_constraints.is_some());
        assert!(spec.containers[0].liveness_probe.is_some());
        assert!(spec.containers[0].readiness_probe.is_none());
    }

    #[test]
    fn test_overrides_replace_and_merge() {
        let p = plan(json!({
            "command": ["/bin/sleep"],
            "args": ["100"],
            "env": [{"name": "DEBUG", "value": "1"}],
            "nodeSelector": {"pool": "debug"},
            "podAnnotations": {"oz/debug": "yes"},
            "podLabels": {"oz-copy": "true"}
        }));
        let out = mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap();
        let meta = out.metadata.unwrap();
        let spec = out.spec.unwrap();
        let api = &spec.containers[0];
        assert_eq!(api.command.as_deref(), Some(&["/bin/sleep".to_string()][..]));
        assert_eq!(api.args.as_deref(), Some(&["100".to_string()][..]));
        assert_eq!(api.env.as_ref().unwrap()[0].name, "DEBUG");
        let ns = spec.node_selector.unwrap();
        assert_eq!(ns.get("disk").map(String::as_str), Some("ssd"));
        assert_eq!(ns.get("pool").map(String::as_str), Some("debug"));
        let annotations = meta.annotations.unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(
            meta.labels.unwrap(),
            BTreeMap::from([("oz-copy".to_string(), "true".to_string())])
        );
    }

    #[test]
    fn test_purge_annotations() {
        let p = plan(json!({"purgeAnnotations": true, "podAnnotations": {"a": "b"}}));
        let out = mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap();
        let annotations = out.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations, BTreeMap::from([("a".to_string(), "b".to_string())]));
    }

    #[test]
    fn test_default_container_resolution() {
        let mut tmpl = template();
        tmpl.metadata
            .as_mut()
            .unwrap()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(DEFAULT_CONTAINER_ANNOTATION.into(), "sidecar".into());
        assert_eq!(default_container_index(&tmpl, &plan(json!({}))).unwrap(), 1);
        assert_eq!(
            default_container_index(&tmpl, &plan(json!({"defaultContainerName": "api"}))).unwrap(),
            0
        );
        assert!(matches!(
            default_container_index(&tmpl, &plan(json!({"defaultContainerName": "nope"}))),
            Err(Error::InvalidContainerName(name)) if name == "nope"
        ));
        assert_eq!(default_container_index(&template(), &plan(json!({}))).unwrap(), 0);
    }

    #[test]
    fn test_spec_patches_apply_in_order() {
        let p = plan(json!({
            "patchSpecOperations": [
                {"op": "add", "path": "/restartPolicy", "value": "Never"},
                {"op": "remove", "path": "/containers/1"},
                {"op": "replace", "path": "/containers/0/image", "value": "api:debug"}
            ]
        }));
        let out = mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap();
        let spec = out.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].image.as_deref(), Some("api:debug"));
    }

    #[test]
    fn test_failing_patch_is_invalid_mutation() {
        let p = plan(json!({
            "patchSpecOperations": [{"op": "remove", "path": "/doesNotExist"}]
        }));
        let err = mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidMutation(_)));
    }

    #[test]
    fn test_labels_matching_workload_selector_are_rejected() {
        let p = plan(json!({"podLabels": {"app": "api"}}));
        let err = mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidMutation(_)));
    }

    #[test]
    fn test_resource_override_bounds() {
        let bounds = ResourceBounds {
            max_cpu: Some("1".into()),
            max_memory: Some("1Gi".into()),
            max_storage: None,
        };
        let ok = plan(json!({"resources": {"limits": {"cpu": "500m", "memory": "512Mi"}}}));
        assert!(mutate_pod_template(&template(), &ok, &selector(), &bounds).is_ok());

        let too_big = plan(json!({"resources": {"requests": {"cpu": "2"}}}));
        let err = mutate_pod_template(&template(), &too_big, &selector(), &bounds).unwrap_err();
        assert!(matches!(err, Error::InvalidMutation(msg) if msg.contains("cpu")));
    }

    #[test]
    fn test_mutation_is_deterministic() {
        let p = plan(json!({
            "command": ["/bin/sleep"],
            "podLabels": {"b": "2", "a": "1"},
            "podAnnotations": {"z": "last", "m": "mid"},
            "patchSpecOperations": [{"op": "add", "path": "/hostname", "value": "debug"}]
        }));
        let first = serde_json::to_string(
            &mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap(),
        )
        .unwrap();
        for _ in 0..5 {
            let again = serde_json::to_string(
                &mutate_pod_template(&template(), &p, &selector(), &Default::default()).unwrap(),
            )
            .unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_source_template_is_not_modified() {
        let tmpl = template();
        let before = serde_json::to_value(&tmpl).unwrap();
        mutate_pod_template(&tmpl, &plan(json!({"command": ["sh"]})), &selector(), &Default::default())
            .unwrap();
        assert_eq!(serde_json::to_value(&tmpl).unwrap(), before);
    }
}
