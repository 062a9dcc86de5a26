//! Gateway binary: serves the tenant-facing MCP routes and the management
//! API on one listener.

use anyhow::Context as _;
use clap::Parser;
use restgate_gateway::auth::CustomHandlerRegistry;
use restgate_gateway::config::GatewayConfig;
use restgate_gateway::registry::TenantRegistry;
use restgate_gateway::service::GatewayService;
use restgate_gateway::{admin, router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "restgate-gateway", version, about)]
struct Args {
    /// Listen address.
    #[arg(long, env = "RESTGATE_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Base URL advertised in access URLs, e.g. https://gateway.example.com.
    #[arg(long, env = "RESTGATE_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// YAML configuration file with default policy and startup backends.
    #[arg(long, env = "RESTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RESTGATE_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,restgate_gateway=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    let public_base_url = args
        .public_base_url
        .unwrap_or_else(|| format!("http://{}", args.bind));

    let custom_handlers = Arc::new(CustomHandlerRegistry::new());
    let registry = Arc::new(TenantRegistry::new(custom_handlers));
    let service = Arc::new(GatewayService::new(
        registry,
        config.default_policy.clone(),
        &public_base_url,
    ));

    let created = service
        .register_from_config(&config)
        .await
        .context("registering startup backends")?;
    for info in &created {
        tracing::info!(tenant = %info.id, name = %info.name, url = %info.access_url, "backend ready");
    }

    let app = router::mcp_routes(Arc::clone(&service))
        .merge(admin::admin_routes(Arc::clone(&service)));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(addr = %args.bind, public = %public_base_url, "gateway listening");

    let shutdown_service = Arc::clone(&service);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
        }
        let stopped = shutdown_service.stop_all();
        tracing::info!(stopped, "shutting down");
    })
    .await
    .context("serving")?;

    Ok(())
}
