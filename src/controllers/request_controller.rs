/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/request_controller.rs
*
* This file implements the reconciler shared by ExecAccessRequest and
* PodAccessRequest.
*
* Architecture:
* Each reconciliation runs a fixed sequence of stages and stops at the first
* one that cannot complete:
* 1.  **Fetch**: a non-cached read; a request that is gone ends the pass.
* 2.  **Template**: the referenced template must exist (`TargetTemplateExists`)
*     and the request gains an owner reference to it.
* 3.  **Duration**: the effective access duration is decided
*     (`RequestDurationsValid`). Unparsable input is terminal until the
*     request changes.
* 4.  **Expiry**: once the window has elapsed (`AccessStillValid=False`) the
*     request is deleted and garbage collection removes everything it owns.
* 5.  **Create**: the builder materializes the grant (`AccessResourcesCreated`).
* 6.  **Readiness**: the builder reports readiness (`AccessResourcesReady`);
*     not-ready requeues on a short timer.
* 7.  **Finalize**: `ready` is the conjunction of all five conditions.
*
* Every condition change is a single status write followed by a non-cached
* re-read, so later stages always work from the stored object. Writes that
* would not change the stored status are skipped, which makes reconciling a
* ready request a no-op.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::scoped_api;
use crate::builders::Builder;
use crate::config::Settings;
use crate::crds::conditions::{
    all_true, find_condition, is_condition_true, set_condition, Condition, ConditionStatus,
    ConditionType, REQUEST_CONDITIONS,
};
use crate::crds::{creation_time, AccessRequest, AccessRequestStatus, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::duration::format_duration;
use crate::error::{reasons, Error, Result};
use crate::events::{actions, reasons as event_reasons, EventPublisher};
use crate::metrics;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::controller::{self, Action, Controller};
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

pub struct RequestContext<B> {
    pub builder: B,
    pub events: Arc<dyn EventPublisher>,
    pub settings: Settings,
}

impl<B: Builder> RequestContext<B> {
    pub fn new(builder: B, events: Arc<dyn EventPublisher>, settings: Settings) -> Self {
        Self {
            builder,
            events,
            settings,
        }
    }

    /// Applies `f` to the status, recomputes `ready`, and persists the result
    /// if anything changed.
    async fn update_status<F>(&self, req: &mut B::Request, f: F) -> Result<()>
    where
        F: FnOnce(&mut AccessRequestStatus) + Send,
    {
        let before = req.access_status().cloned();
        let status = req.access_status_mut();
        f(status);
        status.ready = all_true(&status.conditions, REQUEST_CONDITIONS);
        if before.as_ref() == req.access_status() {
            return Ok(());
        }
        self.builder.base().requests.patch_status(req).await?;
        *req = self.builder.base().refetch(req).await?;
        Ok(())
    }

    async fn set_condition(
        &self,
        req: &mut B::Request,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Result<()> {
        let cond = Condition::new(type_, status, reason, message, req.meta().generation);
        self.update_status(req, move |s| {
            set_condition(&mut s.conditions, cond);
        })
        .await
    }

    /// Records a failed stage on its condition and hands the error back.
    async fn fail(&self, req: &mut B::Request, type_: ConditionType, err: Error) -> Error {
        if matches!(err, Error::RequestNotFound(_)) {
            return err;
        }
        let reason = err.condition_reason();
        match self
            .set_condition(req, type_, ConditionStatus::False, reason, err.to_string())
            .await
        {
            Ok(()) => err,
            Err(write_err) => {
                warn!(error = %err, write_error = %write_err, condition = %type_, "Failed to record condition");
                write_err
            }
        }
    }
}

fn kind_of<B: Builder>() -> String {
    <B::Request as Resource>::kind(&()).to_string()
}

#[instrument(skip(obj, ctx), fields(kind = %kind_of::<B>(), mode = ctx.builder.kind(), request = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default()))]
pub async fn reconcile<B: Builder>(
    obj: Arc<B::Request>,
    ctx: Arc<RequestContext<B>>,
) -> Result<Action> {
    let started = Instant::now();
    let result = match reconcile_request::<B>(&obj, &ctx).await {
        Err(Error::RequestNotFound(name)) => {
            debug!(request = %name, "Access request no longer exists");
            Ok(Action::await_change())
        }
        other => other,
    };
    metrics::observe_reconcile(&kind_of::<B>(), result.is_ok(), started);
    result
}

async fn reconcile_request<B: Builder>(obj: &B::Request, ctx: &RequestContext<B>) -> Result<Action> {
    let builder = &ctx.builder;
    let kind = kind_of::<B>();

    // Fetch
    let mut req = builder.base().refetch(obj).await?;
    if req.meta().deletion_timestamp.is_some() {
        debug!("Access request is being deleted");
        return Ok(Action::await_change());
    }

    // Template
    let tmpl = match builder.get_template(&req).await {
        Ok(tmpl) => tmpl,
        Err(e) => return Err(ctx.fail(&mut req, ConditionType::TargetTemplateExists, e).await),
    };
    ctx.set_condition(
        &mut req,
        ConditionType::TargetTemplateExists,
        ConditionStatus::True,
        reasons::SUCCESS,
        format!(
            "Found {} {:?}",
            <B::Template as Resource>::kind(&()),
            tmpl.name_any()
        ),
    )
    .await?;
    if builder.set_owner_ref(&req, &tmpl).await? {
        req = builder.base().refetch(&req).await?;
    }

    // Duration
    let decision = match builder.get_access_duration(&req, &tmpl) {
        Ok(decision) => decision,
        Err(e) => {
            warn!(error = %e, "Access request has an invalid duration");
            let err = ctx.fail(&mut req, ConditionType::RequestDurationsValid, e).await;
            return match err {
                Error::RequestDurationInvalid(_) => Ok(Action::await_change()),
                other => Err(other),
            };
        }
    };
    ctx.set_condition(
        &mut req,
        ConditionType::RequestDurationsValid,
        ConditionStatus::True,
        decision.kind.as_str(),
        decision.message.clone(),
    )
    .await?;

    // Expiry
    let created = creation_time(&req)?;
    let window = chrono::Duration::from_std(decision.duration)
        .map_err(|e| Error::RequestDurationInvalid(e.to_string()))?;
    let expires_at = created
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if Utc::now() > expires_at {
        let err = Error::RequestExpired(format!(
            "access window of {} ended at {}",
            format_duration(decision.duration),
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        let note = err.to_string();
        let err = ctx.fail(&mut req, ConditionType::AccessStillValid, err).await;
        if !matches!(err, Error::RequestExpired(_)) {
            return Err(err);
        }
        info!(expired_at = %expires_at, "Access expired, deleting request");
        ctx.events
            .publish(
                &req.object_ref(&()),
                EventType::Normal,
                event_reasons::ACCESS_EXPIRED,
                actions::DELETE,
                Some(note),
            )
            .await;
        let ns = req.namespace().unwrap_or_default();
        builder.base().requests.delete(&ns, &req.name_any()).await?;
        metrics::ACCESS_REQUESTS_EXPIRED_TOTAL
            .with_label_values(&[&kind])
            .inc();
        return Ok(Action::await_change());
    }
    ctx.set_condition(
        &mut req,
        ConditionType::AccessStillValid,
        ConditionStatus::True,
        reasons::SUCCESS,
        format!(
            "Access valid until {}",
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
    )
    .await?;

    // Create
    let grant = match builder.create_access_resources(&mut req, &tmpl).await {
        Ok(grant) => grant,
        Err(e) => {
            warn!(error = %e, "Failed to create access resources");
            return Err(ctx.fail(&mut req, ConditionType::AccessResourcesCreated, e).await);
        }
    };
    let access_status = req.access_status();
    let newly_created = !access_status
        .map(|s| is_condition_true(&s.conditions, ConditionType::AccessResourcesCreated))
        .unwrap_or(false);
    let created_cond = Condition::new(
        ConditionType::AccessResourcesCreated,
        ConditionStatus::True,
        reasons::SUCCESS,
        format!("Access resources for pod {} are in place", grant.pod_name),
        req.meta().generation,
    );
    let access_message = grant.access_message.clone();
    ctx.update_status(&mut req, move |s| {
        s.access_message = Some(access_message);
        set_condition(&mut s.conditions, created_cond);
    })
    .await?;
    if newly_created {
        metrics::ACCESS_RESOURCES_CREATED_TOTAL
            .with_label_values(&[&kind])
            .inc();
        ctx.events
            .publish(
                &req.object_ref(&()),
                EventType::Normal,
                event_reasons::ACCESS_GRANTED,
                actions::RECONCILE,
                Some(format!("Access granted to pod {}", grant.pod_name)),
            )
            .await;
    }

    // Readiness
    match builder.access_resources_are_ready(&req, &tmpl).await {
        Ok(true) => {
            ctx.set_condition(
                &mut req,
                ConditionType::AccessResourcesReady,
                ConditionStatus::True,
                reasons::SUCCESS,
                "Access resources are ready",
            )
            .await?
        }
        Ok(false) => {
            let first_observation = req
                .access_status()
                .and_then(|s| find_condition(&s.conditions, ConditionType::AccessResourcesReady))
                .map_or(true, |c| c.reason != reasons::NOT_YET_READY);
            ctx.set_condition(
                &mut req,
                ConditionType::AccessResourcesReady,
                ConditionStatus::False,
                reasons::NOT_YET_READY,
                "Waiting for access resources to become ready",
            )
            .await?;
            let delay = if first_observation {
                ctx.settings.ready_initial_delay
            } else {
                ctx.settings.ready_poll_interval
            };
            debug!(delay = %format_duration(delay), "Access resources not ready yet");
            return Ok(Action::requeue(delay));
        }
        Err(e) => {
            warn!(error = %e, "Failed to check access resource readiness");
            return Err(ctx.fail(&mut req, ConditionType::AccessResourcesReady, e).await);
        }
    }

    // Finalize
    ctx.update_status(&mut req, |_| {}).await?;
    let remaining = (expires_at - Utc::now()).to_std().unwrap_or_default();
    let requeue = ctx
        .settings
        .reconcile_interval
        .min(remaining + Duration::from_secs(1));
    info!(pod = %grant.pod_name, requeue = %format_duration(requeue), "Access request is ready");
    Ok(Action::requeue(requeue))
}

pub fn error_policy<B: Builder>(
    obj: Arc<B::Request>,
    error: &Error,
    ctx: Arc<RequestContext<B>>,
) -> Action {
    warn!(
        kind = %kind_of::<B>(),
        request = %obj.name_any(),
        namespace = %obj.namespace().unwrap_or_default(),
        error = %error,
        "Access request reconciliation failed"
    );
    Action::requeue(ctx.settings.error_backoff)
}

/// Runs the controller for `B::Request` until a shutdown signal arrives.
pub async fn run<B: Builder>(
    client: Client,
    ctx: Arc<RequestContext<B>>,
    namespace: Option<&str>,
    workers: u16,
) {
    let requests = scoped_api::<B::Request>(&client, namespace);
    let roles = scoped_api::<Role>(&client, namespace);
    let bindings = scoped_api::<RoleBinding>(&client, namespace);
    let managed = watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}"));

    info!(kind = %kind_of::<B>(), "Starting access request controller");
    Controller::new(requests, watcher::Config::default())
        .owns(roles, managed.clone())
        .owns(bindings, managed)
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile::<B>, error_policy::<B>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj.name, "Reconciled access request"),
                Err(e) => debug!(error = %e, "Access request reconcile error"),
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::*;
    use crate::builders::{BuilderBase, ExecAccessBuilder, PodAccessBuilder};
    use crate::crds::conditions::find_condition;
    use crate::crds::{ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate};
    use crate::events::MockEventPublisher;
    use crate::kube_client::{KubeClient, MockKubeClient, MockResourceStore};
    use serde_json::json;
    use std::sync::Mutex;

    /// The persisted copy of one request, shared with the mocked store.
    struct Stored<R> {
        current: Arc<Mutex<Option<R>>>,
        status_writes: Arc<Mutex<usize>>,
        deleted: Arc<Mutex<bool>>,
    }

    impl<R: AccessRequest> Stored<R> {
        fn get(&self) -> R {
            self.current.lock().unwrap().clone().unwrap()
        }
        fn writes(&self) -> usize {
            *self.status_writes.lock().unwrap()
        }
        fn condition(&self, t: ConditionType) -> Condition {
            let r = self.get();
            find_condition(&r.access_status().unwrap().conditions, t)
                .cloned()
                .unwrap_or_else(|| panic!("condition {t} missing"))
        }
    }

    fn request_store<R: AccessRequest>(initial: R) -> (MockResourceStore<R>, Stored<R>) {
        let current = Arc::new(Mutex::new(Some(initial)));
        let status_writes = Arc::new(Mutex::new(0usize));
        let deleted = Arc::new(Mutex::new(false));
        let mut store = MockResourceStore::new();

        let c = current.clone();
        store.expect_get().returning(move |_, _| Ok(c.lock().unwrap().clone()));

        let (c, w) = (current.clone(), status_writes.clone());
        store.expect_patch_status().returning(move |obj: &R| {
            let mut cur = c.lock().unwrap();
            let stored = cur.as_mut().ok_or(Error::RequestNotFound("r".into()))?;
            *stored.access_status_mut() = obj.access_status().cloned().unwrap_or_default();
            let mut n = w.lock().unwrap();
            *n += 1;
            stored.meta_mut().resource_version = Some(format!("{}", 1 + *n));
            Ok(())
        });

        let c = current.clone();
        store
            .expect_patch_owner_references()
            .returning(move |_, owners| {
                if let Some(stored) = c.lock().unwrap().as_mut() {
                    stored.meta_mut().owner_references = Some(owners);
                }
                Ok(())
            });

        let (c, d) = (current.clone(), deleted.clone());
        store.expect_delete().returning(move |_, _| {
            *c.lock().unwrap() = None;
            *d.lock().unwrap() = true;
            Ok(())
        });

        (
            store,
            Stored {
                current,
                status_writes,
                deleted,
            },
        )
    }

    fn template_store<T: crate::crds::AccessTemplate>(tmpl: Option<T>) -> MockResourceStore<T> {
        let mut store = MockResourceStore::new();
        store.expect_get().returning(move |_, _| Ok(tmpl.clone()));
        store
    }

    fn events() -> Arc<MockEventPublisher> {
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, _, _, _| ());
        Arc::new(events)
    }

    fn settings() -> Settings {
        Settings {
            ready_initial_delay: Duration::from_secs(7),
            ready_poll_interval: Duration::from_secs(3),
            ..Settings::default()
        }
    }

    /// Exec cluster: deployment `web` with the given running pods. Roles and
    /// bindings are stored so a second pass sees them.
    fn exec_cluster(pods: Vec<&'static str>) -> (MockKubeClient, Arc<Mutex<Option<Role>>>, Arc<Mutex<Option<RoleBinding>>>) {
        let role = Arc::new(Mutex::new(None::<Role>));
        let binding = Arc::new(Mutex::new(None::<RoleBinding>));
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(|_, _| Ok(Some(deployment("web", json!({"containers": [{"name": "web"}]})))));
        kube.expect_list_pods().returning(move |_, _, fields| {
            Ok(pods
                .iter()
                .filter(|p| !fields.contains("metadata.name=") || fields.contains(&format!("metadata.name={p},")))
                .map(|p| running_pod(p, "Running"))
                .collect())
        });
        kube.expect_get_pod()
            .returning(|_, name| Ok(Some(running_pod(name, "Running"))));
        let r = role.clone();
        kube.expect_get_role().returning(move |_, _| Ok(r.lock().unwrap().clone()));
        let r = role.clone();
        kube.expect_create_role().returning(move |_, new| {
            *r.lock().unwrap() = Some(new.clone());
            Ok(new.clone())
        });
        let b = binding.clone();
        kube.expect_get_role_binding()
            .returning(move |_, _| Ok(b.lock().unwrap().clone()));
        let b = binding.clone();
        kube.expect_create_role_binding().returning(move |_, new| {
            *b.lock().unwrap() = Some(new.clone());
            Ok(new.clone())
        });
        (kube, role, binding)
    }

    fn exec_ctx(
        kube: MockKubeClient,
        tmpl: Option<ExecAccessTemplate>,
        requests: MockResourceStore<ExecAccessRequest>,
    ) -> Arc<RequestContext<ExecAccessBuilder>> {
        let kube: Arc<dyn KubeClient> = Arc::new(kube);
        let builder = ExecAccessBuilder::new(BuilderBase::new(
            kube,
            Arc::new(template_store(tmpl)),
            Arc::new(requests),
        ));
        Arc::new(RequestContext::new(builder, events(), settings()))
    }

    fn created_minutes_ago<R: AccessRequest>(req: &mut R, minutes: i64) {
        let ts = (Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339();
        req.meta_mut().creation_timestamp = serde_json::from_value(json!(ts)).ok();
    }

    #[tokio::test]
    async fn test_exec_random_pod_happy_path() {
        let (kube, role, binding) = exec_cluster(vec!["web-1"]);
        let (requests, stored) = request_store(exec_request(Some(""), None));
        let ctx = exec_ctx(kube, Some(exec_template("1h", "24h")), requests);
        let req = Arc::new(stored.get());

        let action = reconcile(req.clone(), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let r = stored.get();
        let status = r.access_status().unwrap();
        assert!(status.ready);
        assert!(all_true(&status.conditions, REQUEST_CONDITIONS));
        assert_eq!(status.pod_name.as_deref(), Some("web-1"));
        assert_eq!(
            status.access_message.as_deref(),
            Some("kubectl exec -it -n dev web-1 -- /bin/sh")
        );
        assert_eq!(
            stored.condition(ConditionType::RequestDurationsValid).reason,
            "Defaulted"
        );
        assert_eq!(r.owner_references()[0].uid, TEMPLATE_UID);

        let role = role.lock().unwrap().clone().unwrap();
        assert_eq!(role.metadata.name.as_deref(), Some("r-a1b2c3d4"));
        assert_eq!(role.metadata.owner_references.as_ref().unwrap()[0].uid, REQUEST_UID);
        for rule in role.rules.unwrap() {
            assert_eq!(rule.resource_names, Some(vec!["web-1".to_string()]));
        }
        let binding = binding.lock().unwrap().clone().unwrap();
        assert_eq!(binding.subjects.unwrap()[0].name, "admins");

        // A second pass over a ready request changes nothing.
        let writes = stored.writes();
        let action = reconcile(Arc::new(stored.get()), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(stored.writes(), writes);
    }

    #[tokio::test]
    async fn test_exec_target_pod_mismatch() {
        let (kube, role, _) = exec_cluster(vec!["web-1"]);
        let (requests, stored) = request_store(exec_request(None, Some("some-unrelated-pod")));
        let ctx = exec_ctx(kube, Some(exec_template("1h", "24h")), requests);

        let err = reconcile(Arc::new(stored.get()), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, Error::TargetPodMismatch { matches: 0, .. }));
        assert_eq!(
            error_policy(Arc::new(stored.get()), &err, ctx),
            Action::requeue(Duration::from_secs(30))
        );

        let created = stored.condition(ConditionType::AccessResourcesCreated);
        assert_eq!(created.status, ConditionStatus::False);
        assert_eq!(created.reason, reasons::FAILURE);
        let r = stored.get();
        assert!(!r.access_status().unwrap().ready);
        assert!(r.pod_name().is_none());
        assert!(role.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duration_clamped_to_template_max() {
        let (kube, _, _) = exec_cluster(vec!["web-1"]);
        let (requests, stored) = request_store(exec_request(Some("24h"), None));
        let ctx = exec_ctx(kube, Some(exec_template("1h", "2h")), requests);

        reconcile(Arc::new(stored.get()), ctx).await.unwrap();
        let cond = stored.condition(ConditionType::RequestDurationsValid);
        assert_eq!(cond.status, ConditionStatus::True);
        assert_eq!(cond.reason, "Clamped");
        assert_eq!(
            cond.message,
            "Access requested duration (24h0m0s) larger than template maximum duration (2h0m0s)"
        );
    }

    #[tokio::test]
    async fn test_invalid_duration_is_terminal() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload().never();
        kube.expect_create_role().never();
        let (requests, stored) = request_store(exec_request(Some("30minutes"), None));
        let ctx = exec_ctx(kube, Some(exec_template("1h", "24h")), requests);

        let action = reconcile(Arc::new(stored.get()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        let cond = stored.condition(ConditionType::RequestDurationsValid);
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, reasons::BAD_REQUEST);
        assert!(!stored.get().access_status().unwrap().ready);
    }

    #[tokio::test]
    async fn test_expired_request_is_deleted() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload().never();
        let mut req = exec_request(Some("1m"), None);
        created_minutes_ago(&mut req, 5);
        let (requests, stored) = request_store(req);
        let snapshot = stored.current.clone();
        let ctx = exec_ctx(kube, Some(exec_template("1h", "24h")), requests);

        let before = Arc::new(stored.get());
        let action = reconcile(before, ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(*stored.deleted.lock().unwrap());
        assert!(snapshot.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_condition_written_before_delete() {
        let mut req = exec_request(Some("1m"), None);
        created_minutes_ago(&mut req, 5);
        let current = Arc::new(Mutex::new(req.clone()));
        let deleted = Arc::new(Mutex::new(false));

        let mut requests = MockResourceStore::<ExecAccessRequest>::new();
        let c = current.clone();
        requests
            .expect_get()
            .returning(move |_, _| Ok(Some(c.lock().unwrap().clone())));
        requests.expect_patch_owner_references().returning(|_, _| Ok(()));
        let (c, d) = (current.clone(), deleted.clone());
        requests.expect_patch_status().returning(move |obj| {
            assert!(!*d.lock().unwrap(), "status written after delete");
            c.lock().unwrap().status = obj.status.clone();
            Ok(())
        });
        let d = deleted.clone();
        requests.expect_delete().times(1).returning(move |_, _| {
            *d.lock().unwrap() = true;
            Ok(())
        });
        let ctx = exec_ctx(MockKubeClient::new(), Some(exec_template("1h", "24h")), requests);

        reconcile(Arc::new(req), ctx).await.unwrap();
        assert!(*deleted.lock().unwrap());
        let written = current.lock().unwrap().clone();
        let cond = find_condition(
            &written.access_status().unwrap().conditions,
            ConditionType::AccessStillValid,
        )
        .cloned()
        .unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, reasons::TIMEOUT);
    }

    #[tokio::test]
    async fn test_missing_template() {
        let (requests, stored) = request_store(exec_request(None, None));
        let ctx = exec_ctx(MockKubeClient::new(), None, requests);

        let err = reconcile(Arc::new(stored.get()), ctx).await.unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));
        let cond = stored.condition(ConditionType::TargetTemplateExists);
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, reasons::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_request_is_not_requeued() {
        let mut requests = MockResourceStore::<ExecAccessRequest>::new();
        requests.expect_get().returning(|_, _| Ok(None));
        requests.expect_patch_status().never();
        let ctx = exec_ctx(MockKubeClient::new(), Some(exec_template("1h", "2h")), requests);

        let action = reconcile(Arc::new(exec_request(None, None)), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    fn pod_ctx(
        kube: MockKubeClient,
        requests: MockResourceStore<PodAccessRequest>,
        tmpl: PodAccessTemplate,
    ) -> Arc<RequestContext<PodAccessBuilder>> {
        let builder = PodAccessBuilder::new(BuilderBase::new(
            Arc::new(kube),
            Arc::new(template_store(Some(tmpl))),
            Arc::new(requests),
        ));
        Arc::new(RequestContext::new(builder, events(), settings()))
    }

    #[tokio::test]
    async fn test_pod_copy_waits_for_running_pod() {
        let phase = Arc::new(Mutex::new("Pending"));
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload().returning(|_, _| {
            Ok(Some(deployment(
                "api",
                json!({
                    "terminationGracePeriodSeconds": 300,
                    "containers": [{
                        "name": "api",
                        "livenessProbe": {"exec": {"command": ["true"]}}
                    }]
                }),
            )))
        });
        let created = Arc::new(Mutex::new(false));
        let (p, c) = (phase.clone(), created.clone());
        kube.expect_get_pod().returning(move |_, name| {
            if *c.lock().unwrap() {
                Ok(Some(running_pod(name, *p.lock().unwrap())))
            } else {
                Ok(None)
            }
        });
        let c = created.clone();
        kube.expect_create_pod().times(1).returning(move |_, pod| {
            *c.lock().unwrap() = true;
            Ok(pod.clone())
        });
        kube.expect_get_role().returning(|_, _| Ok(None));
        kube.expect_create_role().returning(|_, r| Ok(r.clone()));
        kube.expect_get_role_binding().returning(|_, _| Ok(None));
        kube.expect_create_role_binding().returning(|_, rb| Ok(rb.clone()));

        let (requests, stored) = request_store(pod_request(Some("5m")));
        let ctx = pod_ctx(
            kube,
            requests,
            pod_template(json!({"command": ["/bin/sleep"], "args": ["100"]})),
        );

        let action = reconcile(Arc::new(stored.get()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(7)));
        let cond = stored.condition(ConditionType::AccessResourcesReady);
        assert_eq!((cond.status, cond.reason.as_str()), (ConditionStatus::False, reasons::NOT_YET_READY));
        assert!(!stored.get().access_status().unwrap().ready);

        let action = reconcile(Arc::new(stored.get()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(3)));

        *phase.lock().unwrap() = "Running";
        let action = reconcile(Arc::new(stored.get()), ctx).await.unwrap();
        // 5m window: the next pass lands just after expiry.
        assert!(action != Action::await_change());
        let r = stored.get();
        let status = r.access_status().unwrap();
        assert!(status.ready);
        assert_eq!(status.pod_name.as_deref(), Some("r-a1b2c3d4"));
        assert_eq!(
            status.access_message.as_deref(),
            Some("kubectl exec -ti -n dev r-a1b2c3d4 -- /bin/bash")
        );
    }
}
