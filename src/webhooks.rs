/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/webhooks.rs
*
* Embedded HTTPS server for the admission webhooks registered with the API
* server. Each handler decides Allowed, Denied or Patch; this module turns that
* decision into an AdmissionReview response.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod defaulter;
pub mod pod_exec_auditor;
pub mod validator;

use crate::events::EventPublisher;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use warp::Filter;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS {0} not found at {1}")]
    MissingCertificate(&'static str, PathBuf),
}

/// Outcome of a single admission handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed,
    Denied(String),
    Patch(json_patch::Patch),
}

impl Decision {
    fn into_response(self, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let res = AdmissionResponse::from(req);
        match self {
            Decision::Allowed => res,
            Decision::Denied(reason) => res.deny(reason),
            Decision::Patch(patch) => match AdmissionResponse::from(req).with_patch(patch) {
                Ok(patched) => patched,
                Err(e) => {
                    error!(uid = %req.uid, error = %e, "Failed to serialize admission patch");
                    res.deny(format!("patch serialization error: {e}"))
                }
            },
        }
    }
}

pub struct WebhookState {
    pub events: Arc<dyn EventPublisher>,
}

fn with_state(
    state: Arc<WebhookState>,
) -> impl Filter<Extract = (Arc<WebhookState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Runs `decide` over a typed review and replies with the resulting review.
fn review(
    body: AdmissionReview<DynamicObject>,
    decide: fn(&AdmissionRequest<DynamicObject>) -> Decision,
) -> warp::reply::Json {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return warp::reply::json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = decide(&req).into_response(&req);
    warp::reply::json(&response.into_review())
}

fn admission(
    path: &'static str,
    decide: fn(&AdmissionRequest<DynamicObject>) -> Decision,
) -> impl Filter<Extract = (warp::reply::Json,), Error = warp::Rejection> + Clone {
    warp::path(path)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .map(move |body: AdmissionReview<DynamicObject>| review(body, decide))
}

pub fn routes(
    state: Arc<WebhookState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let healthz = warp::path("healthz")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "ok");

    let audit = warp::path("watch-v1-pod")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state))
        .and_then(pod_exec_auditor::handle);

    admission("mutate-v1alpha1-execaccessrequest", defaulter::default_request)
        .or(admission("mutate-v1alpha1-podaccessrequest", defaulter::default_request))
        .unify()
        .or(admission("validate-v1alpha1-execaccessrequest", validator::validate_request))
        .unify()
        .or(admission("validate-v1alpha1-podaccessrequest", validator::validate_request))
        .unify()
        .map(|reply: warp::reply::Json| Box::new(reply) as Box<dyn warp::Reply>)
        .or(audit.map(|reply: warp::reply::Json| Box::new(reply) as Box<dyn warp::Reply>))
        .unify()
        .or(healthz.map(|reply: &'static str| Box::new(reply) as Box<dyn warp::Reply>))
        .unify()
}

fn require(kind: &'static str, path: PathBuf) -> Result<PathBuf, WebhookError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(WebhookError::MissingCertificate(kind, path))
    }
}

/// Serves the webhooks over TLS until the process exits.
pub async fn serve(addr: SocketAddr, cert_dir: &Path, state: Arc<WebhookState>) -> Result<(), WebhookError> {
    let cert = require("certificate", cert_dir.join("tls.crt"))?;
    let key = require("key", cert_dir.join("tls.key"))?;

    info!(%addr, cert_dir = %cert_dir.display(), "Starting admission webhook server");
    warp::serve(routes(state))
        .tls()
        .cert_path(cert)
        .key_path(key)
        .run(addr)
        .await;
    Ok(())
}

/// Serves the webhooks when `cert_dir` holds a certificate pair. Without one
/// the webhooks stay off and the future never completes, so the controllers
/// keep running.
pub async fn serve_when_configured(addr: SocketAddr, cert_dir: &Path, state: Arc<WebhookState>) {
    match serve(addr, cert_dir, state).await {
        Ok(()) => warn!("Webhook server exited"),
        Err(e) => warn!(error = %e, "Admission webhooks not served"),
    }
    futures::future::pending::<()>().await;
}

#[cfg(test)]
pub(crate) mod test_support {
    use kube::api::DynamicObject;
    use kube::core::admission::{AdmissionRequest, AdmissionReview};
    use serde_json::{json, Value};

    /// Builds an AdmissionRequest for an ExecAccessRequest.
    pub fn request(operation: &str, object: Value, old_object: Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "0df28fbd-5f5f-11e8-bc74-36e6bb280816",
                "kind": {"group": "crds.wizardofoz.co", "version": "v1alpha1", "kind": "ExecAccessRequest"},
                "resource": {"group": "crds.wizardofoz.co", "version": "v1alpha1", "resource": "execaccessrequests"},
                "name": "r",
                "namespace": "dev",
                "operation": operation,
                "userInfo": {"username": "alice@example.com", "groups": ["admins"]},
                "object": object,
                "oldObject": old_object,
                "dryRun": false
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    pub fn access_request(annotations: Option<Value>, duration: &str) -> Value {
        let mut metadata = json!({"name": "r", "namespace": "dev"});
        if let Some(a) = annotations {
            metadata["annotations"] = a;
        }
        json!({
            "apiVersion": "crds.wizardofoz.co/v1alpha1",
            "kind": "ExecAccessRequest",
            "metadata": metadata,
            "spec": {"templateName": "t", "duration": duration}
        })
    }
}
