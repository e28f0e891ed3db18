use std::net::SocketAddr;

use clap::Parser;

/// Control-plane configuration, read from CLI flags or environment variables.
///
/// Every field has an environment fallback so the binary runs unmodified in
/// a container where configuration arrives as env vars rather than argv.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// Address the public API listens on.
    #[clap(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Kubernetes namespace all orchestrator objects are created in.
    #[clap(long, env = "KUBERNETES_NAMESPACE", default_value = "vscode-system")]
    pub namespace: String,

    /// Domain used to build instance URLs and the ingress TLS host.
    #[clap(long, env = "BASE_DOMAIN", default_value = "vscode.local")]
    pub base_domain: String,

    /// Registry address pods use to pull built devcontainer images. Unless a
    /// cluster node's internal IP can be discovered at startup, the builder
    /// also pushes to this same address.
    #[clap(long, env = "REGISTRY", default_value = "localhost:32000")]
    pub registry: String,

    /// Endpoint the image builder uses to reach the container engine.
    #[clap(
        long,
        env = "DOCKER_HOST",
        default_value = "tcp://docker-dind-service:2375"
    )]
    pub docker_host: String,
}
