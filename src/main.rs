use anyhow::Result;
use tracing::info;
use std::sync::Arc;
use std::time::Duration;

mod admin;
mod config;
mod error;
mod metrics;
mod middleware;
mod ratelimit;
mod server;

use metrics::Metrics;
use ratelimit::RateLimiter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portfolio_api=info".parse()?)
        )
        .init();

    info!("Starting Portfolio API");

    let config = config::load_config()?;
    info!("Configuration loaded");
    info!("Server: {}", config.server.bind_addr);

    let limiter = Arc::new(RateLimiter::new(config.limits.limiter_settings()));
    let metrics = Arc::new(Metrics::new());

    tokio::spawn(metrics::run_metrics_server(
        config.metrics.clone(),
        metrics.clone(),
        limiter.clone(),
    ));

    // Periodic sweep of idle clients
    let sweep_secs = config.limits.sweep_interval_secs;
    if sweep_secs > 0 {
        let limiter = limiter.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_secs));
            loop {
                interval.tick().await;
                metrics.add_swept(limiter.sweep_idle());
            }
        });
    }

    server::run(config, limiter, metrics).await?;

    Ok(())
}
