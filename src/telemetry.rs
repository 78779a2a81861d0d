/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/telemetry.rs
*
* Logging and tracing setup. Logs go to stdout as JSON (or plain text for
* local runs), filtered by RUST_LOG with `info` as the default. With
* `--jaeger`, spans are also exported to a Jaeger agent through OpenTelemetry.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::LogFormat;
use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_telemetry(format: LogFormat, jaeger: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let telemetry = if jaeger {
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name("oz-operator")
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (json_layer, text_layer) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}

/// Flushes pending spans. No-op when Jaeger export is off.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
