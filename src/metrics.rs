/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/metrics.rs
*
* This module defines the Prometheus metrics the oz-operator exposes on
* /metrics. The handles are process-wide and shared by every reconciler;
* `create_and_register_metrics` places them in the registry served by the
* metrics endpoint.
*
* SPDX-License-Identifier: Apache-2.0
*/

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    /// Reconciliations, labeled by resource kind and outcome (`ok` or `error`).
    pub static ref RECONCILE_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("oz_reconcile_total", "Total number of reconciliations."),
        &["kind", "result"]
    )
    .expect("static metric definition");

    /// Wall-clock time of a single reconciliation.
    pub static ref RECONCILE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "oz_reconcile_duration_seconds",
            "Duration of a single reconciliation.",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        ),
        &["kind"]
    )
    .expect("static metric definition");

    /// Requests deleted because their access window elapsed.
    pub static ref ACCESS_REQUESTS_EXPIRED_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("oz_access_requests_expired_total", "Total number of expired access requests."),
        &["kind"]
    )
    .expect("static metric definition");

    /// Grants whose access resources were materialized.
    pub static ref ACCESS_RESOURCES_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "oz_access_resources_created_total",
            "Total number of access grants with materialized resources."
        ),
        &["kind"]
    )
    .expect("static metric definition");
}

/// Creates a new Prometheus registry and registers all Oz metrics.
///
/// Called once at operator startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(RECONCILE_TOTAL.clone()))?;
    r.register(Box::new(RECONCILE_DURATION_SECONDS.clone()))?;
    r.register(Box::new(ACCESS_REQUESTS_EXPIRED_TOTAL.clone()))?;
    r.register(Box::new(ACCESS_RESOURCES_CREATED_TOTAL.clone()))?;
    Ok(r)
}

/// Records the outcome and duration of one reconciliation.
pub fn observe_reconcile(kind: &str, ok: bool, started: Instant) {
    let result = if ok { "ok" } else { "error" };
    RECONCILE_TOTAL.with_label_values(&[kind, result]).inc();
    RECONCILE_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(started.elapsed().as_secs_f64());
}

/// Renders the registry in the Prometheus text exposition format.
pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
