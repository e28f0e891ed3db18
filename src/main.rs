use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use vscode_gateway::api::make_api;
use vscode_gateway::args::Args;
use vscode_gateway::orchestrator::{KubeOrchestrator, OrchestratorGateway};
use vscode_gateway::service::GatewayService;

/// Pods pull images via the declared registry address (typically a bare
/// `localhost:<port>` dev registry, reachable on every node through a
/// per-node mirror or NodePort service). The builder, however, pushes from
/// outside that per-node context and needs a real address — a cluster node's
/// internal IP, keeping the registry's own port. Resolved once at startup;
/// falls back to the declared registry for both roles if no node address can
/// be found.
async fn resolve_push_registry(gateway: &KubeOrchestrator, registry: &str) -> String {
    if !registry.starts_with("localhost:") {
        return registry.to_string();
    }
    match gateway.node_internal_ip().await {
        Ok(Some(ip)) => {
            let port = registry.rsplit_once(':').map(|(_, port)| port).unwrap_or("5000");
            format!("{ip}:{port}")
        }
        Ok(None) => registry.to_string(),
        Err(err) => {
            tracing::warn!(%err, "failed to resolve a cluster node's internal IP, falling back to the configured registry for pushes");
            registry.to_string()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let fmt_layer = fmt::layer();
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();

    let gateway = KubeOrchestrator::new(args.namespace.clone())
        .await
        .expect("failed to build Kubernetes client");
    let push_registry = resolve_push_registry(&gateway, &args.registry).await;
    info!(pull_registry = %args.registry, %push_registry, "resolved registry addresses");

    let service = Arc::new(GatewayService::new(
        Arc::new(gateway),
        args.docker_host.clone(),
        push_registry,
        args.registry.clone(),
        args.base_domain.clone(),
    ));

    let router = make_api(service).layer(TraceLayer::new_for_http());
    let make_service = router.into_make_service();

    info!("Binding to and listening at address: {}", args.bind_addr);

    axum::Server::bind(&args.bind_addr)
        .serve(make_service)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to address: {}", args.bind_addr));
}
