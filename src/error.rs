/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/error.rs
*
* This file defines the crate-wide error type shared by the reconcilers, the
* builders and the derivation pipeline. Each variant corresponds to one kind
* in the operator's error taxonomy; the reconcilers translate a kind into the
* condition reason surfaced on the resource status and into a requeue policy.
*
* SPDX-License-Identifier: Apache-2.0
*/

use thiserror::Error;

/// Condition reasons written alongside a failing (or pending) condition.
pub mod reasons {
    pub const SUCCESS: &str = "Success";
    pub const NOT_FOUND: &str = "NotFound";
    pub const BAD_REQUEST: &str = "BadRequest";
    pub const TIMEOUT: &str = "Timeout";
    pub const FAILURE: &str = "Failure";
    pub const NOT_YET_READY: &str = "NotYetReady";
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key '{0}' in resource")]
    MissingObjectKey(&'static str),

    #[error("Access request '{0}' no longer exists")]
    RequestNotFound(String),

    #[error("Access template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Target {kind} '{name}' not found: {reason}")]
    TargetNotFound {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Invalid access duration: {0}")]
    RequestDurationInvalid(String),

    /// Reserved for a strict duration mode. The active policy clamps instead.
    #[error("Requested access duration {requested} exceeds the maximum of {max}")]
    RequestDurationTooLong { requested: String, max: String },

    #[error("Access request expired: {0}")]
    RequestExpired(String),

    #[error("Failed to create access resources: {0}")]
    AccessResourcesCreationFailed(String),

    #[error("Access resources are not ready: {0}")]
    AccessResourcesNotReady(String),

    #[error("Container '{0}' does not exist in the pod template")]
    InvalidContainerName(String),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("No running pods match selector '{0}'")]
    NoRunningPods(String),

    #[error("Pod '{pod}' is not a running member of the target workload ({matches} matches)")]
    TargetPodMismatch { pod: String, matches: usize },

    #[error("Pod '{0}' not found")]
    PodNotFound(String),
}

impl Error {
    /// The condition reason a failure of this kind is reported with.
    pub fn condition_reason(&self) -> &'static str {
        match self {
            Error::TemplateNotFound(_) | Error::TargetNotFound { .. } | Error::PodNotFound(_) => {
                reasons::NOT_FOUND
            }
            Error::RequestDurationInvalid(_) | Error::RequestDurationTooLong { .. } => {
                reasons::BAD_REQUEST
            }
            Error::RequestExpired(_) => reasons::TIMEOUT,
            Error::AccessResourcesNotReady(_) => reasons::NOT_YET_READY,
            _ => reasons::FAILURE,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
