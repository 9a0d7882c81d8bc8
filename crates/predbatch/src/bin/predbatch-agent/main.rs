//! Model-serving agent: a reverse proxy to the local model server with the
//! predict batcher in front of it.

mod config;

use std::error::Error;
use axum::Router;
use predbatch::{BatcherService, HttpForwarder};
use tokio::net::TcpListener;
use tracing::{info, info_span};
use tracing_subscriber::EnvFilter;
use crate::config::AgentConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AgentConfig::from_env()?;
    let forwarder = HttpForwarder::new(config.component_url())?;
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(
        listen_addr = %config.listen_addr,
        component = %config.component_url(),
        batcher = config.enable_batcher,
        "starting agent"
    );

    if config.enable_batcher {
        let batcher = BatcherService::new(config.batcher(), forwarder, info_span!("batcher"));
        let handle = batcher.handle();
        let app = Router::new().fallback_service(batcher);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        handle.shutdown_and_wait().await;
    } else {
        let app = Router::new().fallback_service(forwarder);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    info!("agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
