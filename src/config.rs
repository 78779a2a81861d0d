/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/config.rs
*
* Command-line and environment configuration for the operator. Every flag can
* also be set through an `OZ_*` environment variable so the Deployment
* manifest can configure the controller without rewriting its args.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::duration::parse_duration_arg;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "oz_operator",
    version,
    about = "Grants time-bounded developer access to Kubernetes workloads"
)]
pub struct Cli {
    /// Print the CustomResourceDefinitions as YAML and exit.
    #[arg(long)]
    pub crd: bool,

    /// Server-side apply the CustomResourceDefinitions on startup.
    #[arg(long, env = "OZ_INSTALL_CRDS")]
    pub install_crds: bool,

    /// Requeue interval for healthy templates and requests.
    #[arg(long, env = "OZ_RECONCILE_INTERVAL", default_value = "5m", value_parser = parse_duration_arg)]
    pub reconcile_interval: Duration,

    /// Delay before the first readiness re-check of new access resources.
    #[arg(long, env = "OZ_READY_INITIAL_DELAY", default_value = "5s", value_parser = parse_duration_arg)]
    pub ready_initial_delay: Duration,

    /// Interval between later readiness re-checks.
    #[arg(long, env = "OZ_READY_POLL_INTERVAL", default_value = "5s", value_parser = parse_duration_arg)]
    pub ready_poll_interval: Duration,

    /// Requeue delay after a failed reconciliation.
    #[arg(long, env = "OZ_ERROR_BACKOFF", default_value = "30s", value_parser = parse_duration_arg)]
    pub error_backoff: Duration,

    /// Concurrent reconciliations per controller.
    #[arg(long, env = "OZ_WORKERS", default_value_t = 4)]
    pub workers: u16,

    /// Watch a single namespace instead of the whole cluster.
    #[arg(long, env = "OZ_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, env = "OZ_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: SocketAddr,

    #[arg(long, env = "OZ_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// Directory holding `tls.crt` and `tls.key` for the webhook server.
    #[arg(
        long,
        env = "OZ_WEBHOOK_CERT_DIR",
        default_value = "/tmp/k8s-webhook-server/serving-certs"
    )]
    pub webhook_cert_dir: PathBuf,

    #[arg(long, env = "OZ_DISABLE_WEBHOOKS")]
    pub disable_webhooks: bool,

    #[arg(long, env = "OZ_LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Export traces to a Jaeger agent (configured via OTEL_EXPORTER_JAEGER_* variables).
    #[arg(long, env = "OZ_JAEGER")]
    pub jaeger: bool,
}

/// Timing knobs consumed by the reconcilers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub reconcile_interval: Duration,
    pub ready_initial_delay: Duration,
    pub ready_poll_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(300),
            ready_initial_delay: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(30),
        }
    }
}

impl Cli {
    pub fn settings(&self) -> Settings {
        Settings {
            reconcile_interval: self.reconcile_interval,
            ready_initial_delay: self.ready_initial_delay,
            ready_poll_interval: self.ready_poll_interval,
            error_backoff: self.error_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_settings_default() {
        let cli = Cli::try_parse_from(["oz_operator"]).unwrap();
        assert_eq!(cli.settings(), Settings::default());
        assert_eq!(cli.workers, 4);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.webhook_addr.port(), 9443);
        assert!(!cli.crd && !cli.jaeger && !cli.disable_webhooks);
    }

    #[test]
    fn test_durations_use_go_syntax() {
        let cli = Cli::try_parse_from([
            "oz_operator",
            "--reconcile-interval",
            "1m30s",
            "--error-backoff",
            "500ms",
            "--log-format",
            "text",
        ])
        .unwrap();
        assert_eq!(cli.reconcile_interval, Duration::from_secs(90));
        assert_eq!(cli.error_backoff, Duration::from_millis(500));
        assert_eq!(cli.log_format, LogFormat::Text);

        assert!(Cli::try_parse_from(["oz_operator", "--ready-poll-interval", "soon"]).is_err());
    }
}
