/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/pod_selector.rs
*
* Picks the pod an exec grant is pinned to. A pod already recorded on the
* request wins; otherwise an explicitly requested pod must be a Running member
* of the workload; otherwise one Running member is picked at random.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::{Error, Result};
use crate::kube_client::KubeClient;
use crate::resolver::selector_to_string;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use rand::seq::SliceRandom;
use tracing::debug;

const RUNNING: &str = "status.phase=Running";

pub async fn select_pod(
    kube: &dyn KubeClient,
    namespace: &str,
    selector: &LabelSelector,
    recorded: Option<&str>,
    target_pod: Option<&str>,
) -> Result<Pod> {
    if let Some(name) = recorded {
        debug!(pod = name, "Reusing pod recorded on the request");
        return kube
            .get_pod(namespace, name)
            .await?
            .ok_or_else(|| Error::PodNotFound(name.to_string()));
    }

    let label_selector = selector_to_string(selector)?;

    if let Some(name) = target_pod {
        let fields = format!("metadata.name={name},{RUNNING}");
        let mut pods = kube.list_pods(namespace, &label_selector, &fields).await?;
        if pods.len() != 1 {
            return Err(Error::TargetPodMismatch {
                pod: name.to_string(),
                matches: pods.len(),
            });
        }
        return pods.pop().ok_or_else(|| Error::PodNotFound(name.to_string()));
    }

    let pods: Vec<Pod> = kube
        .list_pods(namespace, &label_selector, RUNNING)
        .await?
        .into_iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .collect();
    let chosen = pods
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or(Error::NoRunningPods(label_selector))?;
    debug!(pod = %chosen.name_any(), candidates = pods.len(), "Picked random running pod");
    Ok(chosen)
}
