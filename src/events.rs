/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/events.rs
*
* Kubernetes Event recording for the Oz controllers and webhooks.
*
* Events are fire-and-forget: a failed publish is logged as a warning and
* never fails a reconciliation or an admission review.
*
* SPDX-License-Identifier: Apache-2.0
*/

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events on a resource.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// `EventPublisher` backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` is reported as the event's reporting component.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons, shown under REASON in `kubectl get events`.
pub mod reasons {
    pub const TEMPLATE_READY: &str = "TemplateReady";
    pub const TEMPLATE_NOT_READY: &str = "TemplateNotReady";
    pub const ACCESS_GRANTED: &str = "AccessGranted";
    pub const ACCESS_EXPIRED: &str = "AccessExpired";
    pub const POD_EXEC: &str = "PodExec";
    pub const POD_ATTACH: &str = "PodAttach";
}

/// Event actions, shown under ACTION in `kubectl get events`.
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const DELETE: &str = "Delete";
    pub const AUDIT: &str = "Audit";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KubeEventPublisher>();
    }
}
