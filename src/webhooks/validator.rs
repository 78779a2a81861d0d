/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/webhooks/validator.rs
*
* Validating webhook for access requests. A request is immutable once created:
* its spec and its requestor annotation may not change.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::Decision;
use crate::crds::REQUESTOR_ANNOTATION;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use tracing::info;

fn requestor(obj: &DynamicObject) -> Option<&str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REQUESTOR_ANNOTATION))
        .map(String::as_str)
}

pub fn validate_request(req: &AdmissionRequest<DynamicObject>) -> Decision {
    if !matches!(req.operation, Operation::Update) {
        return Decision::Allowed;
    }
    let (Some(new), Some(old)) = (req.object.as_ref(), req.old_object.as_ref()) else {
        return Decision::Allowed;
    };

    if new.data.get("spec") != old.data.get("spec") {
        info!(uid = %req.uid, name = %req.name, "Denied spec change on access request");
        return Decision::Denied("access request spec is immutable".to_string());
    }
    if requestor(new) != requestor(old) {
        info!(uid = %req.uid, name = %req.name, "Denied requestor change on access request");
        return Decision::Denied(format!("annotation {REQUESTOR_ANNOTATION} is immutable"));
    }
    Decision::Allowed
}
