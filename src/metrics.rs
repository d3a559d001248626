use axum::{Router, routing::get};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::MetricsConfig;
use crate::ratelimit::RateLimiter;

#[derive(Default)]
pub struct Metrics {
    pub requests_admitted: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub requests_exempt: AtomicU64,
    pub client_resets: AtomicU64,
    pub clients_swept: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_admitted(&self) {
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_exempt(&self) {
        self.requests_exempt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resets(&self) {
        self.client_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_swept(&self, count: usize) {
        self.clients_swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn format_prometheus(&self, tracked_clients: usize) -> String {
        format!(
            "# HELP portfolio_requests_admitted Requests admitted by the rate limiter\n\
             # TYPE portfolio_requests_admitted counter\n\
             portfolio_requests_admitted {}\n\
             # HELP portfolio_requests_rejected Requests rejected by the rate limiter\n\
             # TYPE portfolio_requests_rejected counter\n\
             portfolio_requests_rejected {}\n\
             # HELP portfolio_requests_exempt Requests to allow-listed paths\n\
             # TYPE portfolio_requests_exempt counter\n\
             portfolio_requests_exempt {}\n\
             # HELP portfolio_client_resets Admin resets of client history\n\
             # TYPE portfolio_client_resets counter\n\
             portfolio_client_resets {}\n\
             # HELP portfolio_clients_swept Idle clients dropped by the sweep\n\
             # TYPE portfolio_clients_swept counter\n\
             portfolio_clients_swept {}\n\
             # HELP portfolio_tracked_clients Clients currently tracked\n\
             # TYPE portfolio_tracked_clients gauge\n\
             portfolio_tracked_clients {}\n",
            self.requests_admitted.load(Ordering::Relaxed),
            self.requests_rejected.load(Ordering::Relaxed),
            self.requests_exempt.load(Ordering::Relaxed),
            self.client_resets.load(Ordering::Relaxed),
            self.clients_swept.load(Ordering::Relaxed),
            tracked_clients,
        )
    }
}

pub async fn run_metrics_server(
    config: MetricsConfig,
    metrics: Arc<Metrics>,
    limiter: Arc<RateLimiter>,
) {
    if !config.enable {
        return;
    }

    let path = config.path.clone();
    let app = Router::new()
        .route(&path, get(move || {
            let m = metrics.clone();
            let l = limiter.clone();
            async move { m.format_prometheus(l.tracked_clients()) }
        }));

    let addr: std::net::SocketAddr = match config.bind_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid metrics bind address: {}", e);
            return;
        }
    };

    info!("Metrics server listening on {}{}", addr, path);

    match TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Metrics server stopped: {}", e);
            }
        }
        Err(e) => tracing::error!("Failed to bind metrics server: {}", e),
    }
}
