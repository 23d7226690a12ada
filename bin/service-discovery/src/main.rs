use anyhow::Result;
use discovery_core::{Backend, DirectoryBackend};
use discovery_kube::KubernetesClient;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod admin;
mod settings;

use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting service-discovery daemon...");

    let settings = Settings::load()?;
    debug!("Loaded settings: {:?}", settings);

    let kubernetes = KubernetesClient::new().await?;
    let directory = Arc::new(kubernetes.directory(settings.kubernetes.clone()));
    let backend = Arc::new(DirectoryBackend::new(
        "kubernetes",
        directory,
        settings.backend.clone(),
    )?);

    // bind before any route is published so a busy port fails fast
    let listener = admin::bind(settings.admin_addr).await?;

    backend.register(&[]).await?;
    let mut events = backend.watch_services().await?;

    // Stand-in for the proxy: apply route changes as they arrive
    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!("{}", event.route_command());
        }
        debug!("Route event stream closed");
    });

    let admin = tokio::spawn(admin::serve(listener, backend.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, deregistering routes...");

    if let Err(e) = backend.deregister_all().await {
        warn!("Failed to deregister all routes: {}", e);
    }
    backend.stop().await?;
    admin.abort();
    if let Err(e) = admin.await {
        if e.is_panic() {
            error!("Admin server panicked: {}", e);
        }
    }
    if let Err(e) = consumer.await {
        warn!("Route consumer ended abnormally: {}", e);
    }

    info!("service-discovery stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("DISCOVERY_LOG_FORMAT").is_ok_and(|format| format == "json");

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
