/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/template_controller.rs
*
* Reconciler for ExecAccessTemplate and PodAccessTemplate. A template is ready
* when its target workload exists and its duration pair is coherent. Nothing
* is created; the result is only written to status and announced as an event.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::scoped_api;
use crate::config::Settings;
use crate::crds::conditions::{
    all_true, set_condition, Condition, ConditionStatus, ConditionType, TEMPLATE_CONDITIONS,
};
use crate::crds::AccessTemplate;
use crate::duration::{format_duration, validate_template_durations};
use crate::error::{reasons, Error, Result};
use crate::events::{actions, reasons as event_reasons, EventPublisher};
use crate::kube_client::{KubeClient, ResourceStore};
use crate::metrics;
use crate::resolver::{api_version_of, resolve};
use futures::StreamExt;
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use kube_runtime::controller::{self, Action, Controller};
use kube_runtime::watcher;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub struct TemplateContext<T> {
    pub kube: Arc<dyn KubeClient>,
    pub store: Arc<dyn ResourceStore<T>>,
    pub events: Arc<dyn EventPublisher>,
    pub settings: Settings,
    _kind: PhantomData<fn() -> T>,
}

impl<T: AccessTemplate> TemplateContext<T> {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        store: Arc<dyn ResourceStore<T>>,
        events: Arc<dyn EventPublisher>,
        settings: Settings,
    ) -> Self {
        Self {
            kube,
            store,
            events,
            settings,
            _kind: PhantomData,
        }
    }
}

fn kind_of<T: AccessTemplate>() -> String {
    T::kind(&()).to_string()
}

#[instrument(skip(obj, ctx), fields(kind = %kind_of::<T>(), template = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default()))]
pub async fn reconcile<T: AccessTemplate>(obj: Arc<T>, ctx: Arc<TemplateContext<T>>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_template::<T>(&obj, &ctx).await;
    metrics::observe_reconcile(&kind_of::<T>(), result.is_ok(), started);
    result
}

async fn reconcile_template<T: AccessTemplate>(obj: &T, ctx: &TemplateContext<T>) -> Result<Action> {
    let name = obj.name_any();
    let ns = obj.namespace().ok_or(Error::MissingObjectKey("metadata.namespace"))?;

    let Some(mut tmpl) = ctx.store.get(&ns, &name).await? else {
        debug!("Template no longer exists");
        return Ok(Action::await_change());
    };
    if tmpl.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    let generation = tmpl.meta().generation;
    let target = tmpl.target_ref().clone();

    let target_cond = match resolve(ctx.kube.as_ref(), &ns, &target).await {
        Ok(_) => Condition::new(
            ConditionType::TargetRefExists,
            ConditionStatus::True,
            reasons::SUCCESS,
            format!("Found {} {:?} ({})", target.kind, target.name, api_version_of(&target)),
            generation,
        ),
        Err(e @ Error::TargetNotFound { .. }) => Condition::new(
            ConditionType::TargetRefExists,
            ConditionStatus::False,
            e.condition_reason(),
            e.to_string(),
            generation,
        ),
        Err(e) => return Err(e),
    };

    let config = tmpl.access_config();
    let durations_cond = match validate_template_durations(&config.default_duration, &config.max_duration) {
        Ok((default, max)) => Condition::new(
            ConditionType::TemplateDurationsValid,
            ConditionStatus::True,
            reasons::SUCCESS,
            format!(
                "Template durations are valid (default {}, max {})",
                format_duration(default),
                format_duration(max)
            ),
            generation,
        ),
        Err(e) => Condition::new(
            ConditionType::TemplateDurationsValid,
            ConditionStatus::False,
            reasons::BAD_REQUEST,
            e.to_string(),
            generation,
        ),
    };

    let before = tmpl.template_status().cloned();
    let status = tmpl.template_status_mut();
    set_condition(&mut status.conditions, target_cond);
    set_condition(&mut status.conditions, durations_cond);
    status.ready = all_true(&status.conditions, TEMPLATE_CONDITIONS);
    let ready = status.ready;

    if before.as_ref() != tmpl.template_status() {
        ctx.store.patch_status(&tmpl).await?;
        if ctx.store.get(&ns, &name).await?.is_none() {
            return Ok(Action::await_change());
        }

        let was_ready = before.as_ref().map(|s| s.ready);
        if was_ready != Some(ready) {
            let (type_, reason, note) = if ready {
                info!("Template is ready");
                (EventType::Normal, event_reasons::TEMPLATE_READY, "Template is ready".to_string())
            } else {
                let failing: Vec<&str> = tmpl
                    .template_status()
                    .map(|s| {
                        s.conditions
                            .iter()
                            .filter(|c| c.status != ConditionStatus::True)
                            .map(|c| c.message.as_str())
                            .collect()
                    })
                    .unwrap_or_default();
                warn!(problems = ?failing, "Template is not ready");
                (
                    EventType::Warning,
                    event_reasons::TEMPLATE_NOT_READY,
                    failing.join("; "),
                )
            };
            ctx.events
                .publish(&tmpl.object_ref(&()), type_, reason, actions::RECONCILE, Some(note))
                .await;
        }
    }

    Ok(Action::requeue(ctx.settings.reconcile_interval))
}

pub fn error_policy<T: AccessTemplate>(obj: Arc<T>, error: &Error, ctx: Arc<TemplateContext<T>>) -> Action {
    warn!(
        kind = %kind_of::<T>(),
        template = %obj.name_any(),
        namespace = %obj.namespace().unwrap_or_default(),
        error = %error,
        "Template reconciliation failed"
    );
    Action::requeue(ctx.settings.error_backoff)
}

pub async fn run<T: AccessTemplate>(
    client: Client,
    ctx: Arc<TemplateContext<T>>,
    namespace: Option<&str>,
    workers: u16,
) {
    let templates = scoped_api::<T>(&client, namespace);
    info!(kind = %kind_of::<T>(), "Starting template controller");
    Controller::new(templates, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile::<T>, error_policy::<T>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj.name, "Reconciled template"),
                Err(e) => debug!(error = %e, "Template reconcile error"),
            }
        })
        .await;
}
