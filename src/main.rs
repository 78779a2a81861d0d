/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/main.rs
*
* Entry point of the Oz operator.
*
* Architecture:
* 1.  **CLI**: settings come from flags with environment fallbacks. `--crd`
*     prints the CustomResourceDefinitions and exits.
* 2.  **Telemetry**: structured logging, plus Jaeger export when asked for.
* 3.  **CRDs**: with `--install-crds` the definitions are server-side applied.
* 4.  **Controllers**: one template controller and one request controller per
*     access mode, each wired to its `Builder` and the shared event publisher.
* 5.  **Servers**: `/metrics` over HTTP and the admission webhooks over HTTPS.
*
* The process exits when the controllers stop on SIGTERM/SIGINT.
*
* SPDX-License-Identifier: Apache-2.0
*/

use anyhow::Context;
use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use oz_operator::builders::{BuilderBase, ExecAccessBuilder, PodAccessBuilder};
use oz_operator::config::Cli;
use oz_operator::controllers::request_controller::{self, RequestContext};
use oz_operator::controllers::template_controller::{self, TemplateContext};
use oz_operator::crds::{all_crds, ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate};
use oz_operator::events::{EventPublisher, KubeEventPublisher};
use oz_operator::kube_client::{ApiStore, KubeApiClient, KubeClient};
use oz_operator::metrics;
use oz_operator::telemetry::{init_telemetry, shutdown_telemetry};
use oz_operator::webhooks::{self, WebhookState};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::Filter;

const CONTROLLER_NAME: &str = "oz-operator";

fn render_crds() -> anyhow::Result<String> {
    let docs = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

async fn install_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();
    for crd in all_crds() {
        let name = crd
            .metadata
            .name
            .clone()
            .context("generated CRD has no name")?;
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .with_context(|| format!("failed to apply CRD {name}"))?;
        info!(crd = %name, "Applied CustomResourceDefinition");
    }
    Ok(())
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let (body, status) = match metrics::encode(&registry) {
        Ok(body) => (body, StatusCode::OK),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "Content-Type", "text/plain; version=0.0.4"),
        status,
    ))
}

async fn run_metrics_server(registry: Arc<Registry>, addr: SocketAddr) -> anyhow::Result<()> {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler);

    let (bound, server) = warp::serve(metrics_route)
        .try_bind_ephemeral(addr)
        .with_context(|| format!("failed to bind metrics server on {addr}"))?;
    info!(addr = %bound, "Starting metrics server");
    server.await;
    Ok(())
}

async fn run_webhook_server(cli: &Cli, events: Arc<dyn EventPublisher>) {
    if cli.disable_webhooks {
        info!("Admission webhooks disabled");
        futures::future::pending::<()>().await;
    }
    let state = Arc::new(WebhookState { events });
    webhooks::serve_when_configured(cli.webhook_addr, &cli.webhook_cert_dir, state).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.crd {
        println!("{}", render_crds()?);
        return Ok(());
    }

    init_telemetry(cli.log_format, cli.jaeger)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Oz operator starting");

    let client = Client::try_default().await?;
    if cli.install_crds {
        install_crds(&client).await?;
    }

    let registry = Arc::new(metrics::create_and_register_metrics()?);
    let settings = cli.settings();
    let namespace = cli.namespace.as_deref();
    let workers = cli.workers;

    let kube: Arc<dyn KubeClient> = Arc::new(KubeApiClient::new(client.clone()));
    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));

    let exec_ctx = Arc::new(RequestContext::new(
        ExecAccessBuilder::new(BuilderBase::new(
            kube.clone(),
            Arc::new(ApiStore::<ExecAccessTemplate>::new(client.clone())),
            Arc::new(ApiStore::<ExecAccessRequest>::new(client.clone())),
        )),
        events.clone(),
        settings,
    ));
    let pod_ctx = Arc::new(RequestContext::new(
        PodAccessBuilder::new(BuilderBase::new(
            kube.clone(),
            Arc::new(ApiStore::<PodAccessTemplate>::new(client.clone())),
            Arc::new(ApiStore::<PodAccessRequest>::new(client.clone())),
        )),
        events.clone(),
        settings,
    ));
    let exec_tmpl_ctx = Arc::new(TemplateContext::<ExecAccessTemplate>::new(
        kube.clone(),
        Arc::new(ApiStore::<ExecAccessTemplate>::new(client.clone())),
        events.clone(),
        settings,
    ));
    let pod_tmpl_ctx = Arc::new(TemplateContext::<PodAccessTemplate>::new(
        kube.clone(),
        Arc::new(ApiStore::<PodAccessTemplate>::new(client.clone())),
        events.clone(),
        settings,
    ));

    let controllers = async {
        tokio::join!(
            template_controller::run(client.clone(), exec_tmpl_ctx, namespace, workers),
            template_controller::run(client.clone(), pod_tmpl_ctx, namespace, workers),
            request_controller::run(client.clone(), exec_ctx, namespace, workers),
            request_controller::run(client.clone(), pod_ctx, namespace, workers),
        )
    };

    tokio::select! {
        _ = controllers => info!("Controllers stopped"),
        res = run_metrics_server(registry, cli.metrics_addr) => {
            if let Err(e) = res {
                error!(error = %e, "Metrics server failed");
            }
        }
        _ = run_webhook_server(&cli, events.clone()) => {}
    }

    info!("Oz operator shutting down");
    shutdown_telemetry();
    Ok(())
}
