/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/webhooks/defaulter.rs
*
* Mutating webhook for access requests: stamps the creating user onto the
* request as an annotation.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::Decision;
use crate::crds::REQUESTOR_ANNOTATION;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use serde_json::json;
use tracing::{debug, info, warn};

/// Escapes a map key for use as a JSON pointer segment.
fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

pub fn default_request(req: &AdmissionRequest<DynamicObject>) -> Decision {
    if !matches!(req.operation, Operation::Create) {
        return Decision::Allowed;
    }
    let Some(obj) = req.object.as_ref() else {
        debug!(uid = %req.uid, "No object in admission request");
        return Decision::Allowed;
    };
    let requestor = req.user_info.username.clone().unwrap_or_default();

    let ops = match obj.metadata.annotations {
        None => json!([{
            "op": "add",
            "path": "/metadata/annotations",
            "value": { REQUESTOR_ANNOTATION: requestor }
        }]),
        Some(_) => json!([{
            "op": "add",
            "path": format!("/metadata/annotations/{}", pointer_segment(REQUESTOR_ANNOTATION)),
            "value": requestor
        }]),
    };
    match serde_json::from_value(ops) {
        Ok(patch) => {
            info!(uid = %req.uid, name = %req.name, %requestor, "Recording requestor");
            Decision::Patch(patch)
        }
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "Failed to build requestor patch");
            Decision::Denied(format!("failed to build requestor patch: {e}"))
        }
    }
}
