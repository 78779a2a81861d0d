/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/webhooks/pod_exec_auditor.rs
*
* Audits `kubectl exec` and `kubectl attach`. The API server sends a CONNECT
* review for `pods/exec` and `pods/attach`; each one is recorded as an Event
* on the pod and always allowed.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::WebhookState;
use crate::events::{actions, reasons, EventPublisher};
use k8s_openapi::api::authentication::v1::UserInfo;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Deserialize, Debug)]
pub struct ConnectReview {
    pub request: ConnectRequest,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub operation: String,
    #[serde(default)]
    pub sub_resource: Option<String>,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default)]
    pub object: Option<ConnectOptions>,
}

/// The fields PodExecOptions and PodAttachOptions have in common.
#[derive(Deserialize, Debug, Default)]
pub struct ConnectOptions {
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub tty: bool,
}

/// Event reason and note for an exec or attach; `None` for anything else.
pub fn audit_note(req: &ConnectRequest) -> Option<(&'static str, String)> {
    let sub_resource = req.sub_resource.as_deref()?;
    let reason = match sub_resource {
        "exec" => reasons::POD_EXEC,
        "attach" => reasons::POD_ATTACH,
        _ => return None,
    };
    let options = req.object.as_ref();
    let container = options
        .and_then(|o| o.container.as_deref())
        .unwrap_or("<default>");
    let user = req.user_info.username.as_deref().unwrap_or("<unknown>");
    let tty = options.map(|o| o.tty).unwrap_or(false);
    Some((
        reason,
        format!(
            "{}/{} on Pod {} (container: {}) by {} (interactive: {})",
            req.operation, sub_resource, req.name, container, user, tty
        ),
    ))
}

async fn record(events: &dyn EventPublisher, req: &ConnectRequest) {
    let Some((reason, note)) = audit_note(req) else {
        debug!(uid = %req.uid, operation = %req.operation, "Ignoring non exec/attach review");
        return;
    };
    info!(uid = %req.uid, pod = %req.name, "{}", note);
    let pod = ObjectReference {
        api_version: Some("v1".into()),
        kind: Some("Pod".into()),
        name: Some(req.name.clone()),
        namespace: req.namespace.clone(),
        ..Default::default()
    };
    events
        .publish(&pod, EventType::Normal, reason, actions::AUDIT, Some(note))
        .await;
}

pub async fn handle(
    review: ConnectReview,
    state: Arc<WebhookState>,
) -> Result<warp::reply::Json, warp::Rejection> {
    record(state.events.as_ref(), &review.request).await;
    Ok(warp::reply::json(&json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": {
            "uid": review.request.uid,
            "allowed": true
        }
    })))
}
