//! Modulith host binary.
//!
//! Boots the extension runtime: loads the configuration file (YAML or JSON),
//! registers the built-in extensions, enables everything the configuration
//! marks enabled in dependency order, starts the configuration watcher, and
//! serves the management and extension HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use modulith_host::config::HostConfig;
use modulith_host::config_watcher::ConfigWatcher;
use modulith_host::registry::ExtensionRegistry;
use modulith_host::server::create_server;
use modulith_host::services::HostServices;
use modulith_host::storage::CloudStorageExtension;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML or JSON).
    #[arg(short, long, default_value = "modulith.yaml")]
    config: String,

    /// Port for the HTTP server; overrides the configuration file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind; overrides the configuration file.
    #[arg(long)]
    host: Option<String>,

    /// Logging filter, e.g. `info` or `modulith_host=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = HostConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    config.validate()?;

    let services = Arc::new(HostServices::in_memory());
    services.migrations.ensure_table().await?;
    let registry = Arc::new(ExtensionRegistry::new(env!("CARGO_PKG_VERSION"), services));

    // Built-in extensions.
    registry
        .register(Arc::new(CloudStorageExtension::new()))
        .await?;

    // Boot enablement in resolver order; a failure aborts the remaining
    // enables but already-enabled extensions stay up.
    match registry.enable_from_config(&config).await {
        Ok(enabled) => tracing::info!(count = enabled.len(), "boot enablement complete"),
        Err(err) => tracing::error!(error = %err, "boot enablement aborted"),
    }

    // Hot reload of per-extension configuration.
    let watcher_cancel = registry.shutdown_token();
    ConfigWatcher::new(&args.config, Arc::clone(&registry)).spawn(watcher_cancel.child_token());

    let app = create_server(config.clone(), Arc::clone(&registry));
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("starting modulith host on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            watcher_cancel.cancel();
        })
        .await?;

    Ok(())
}
