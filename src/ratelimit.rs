//! Per-client sliding-window rate limiting.
//!
//! Every client keeps the instants of its admitted requests. A request is
//! checked against the minute, hour and day windows in that order and is
//! rejected by the first window whose count has already reached its ceiling.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ApiError;

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// Evaluation order for admission checks.
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    pub fn duration(self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3_600),
            Window::Day => Duration::from_secs(86_400),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
    /// Age at which stored timestamps are pruned.
    pub window_size: Duration,
    /// Admit everything and record nothing.
    pub test_mode: bool,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
            per_day: 10_000,
            window_size: Window::Day.duration(),
            test_mode: false,
        }
    }
}

impl LimiterSettings {
    pub fn limit_for(&self, window: Window) -> u32 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            per_minute: self.per_minute,
            per_hour: self.per_hour,
            per_day: self.per_day,
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        for window in Window::ALL {
            if self.limit_for(window) == 0 {
                return Err(ApiError::InvalidSettings(format!(
                    "requests per {} must be greater than zero",
                    window
                )));
            }
        }
        if self.window_size.is_zero() {
            return Err(ApiError::InvalidSettings(
                "rate limit window size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Limits {
    pub fn for_window(&self, window: Window) -> u32 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited(Window),
}

impl Decision {
    pub fn reason(&self) -> Option<String> {
        match self {
            Decision::Allowed => None,
            Decision::Limited(window) => Some(format!(
                "Rate limit exceeded: too many requests per {}",
                window
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub client_id: String,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub requests_last_day: usize,
    pub total_requests: usize,
    pub violations: u64,
    pub limits: Limits,
}

impl ClientStats {
    pub fn requests_in(&self, window: Window) -> usize {
        match window {
            Window::Minute => self.requests_last_minute,
            Window::Hour => self.requests_last_hour,
            Window::Day => self.requests_last_day,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub total_clients: usize,
    pub total_violations: u64,
    pub limits: Limits,
}

#[derive(Debug, Default)]
struct ClientWindow {
    timestamps: VecDeque<Instant>,
    violations: u64,
}

impl ClientWindow {
    fn cleanup(&mut self, now: Instant, horizon: Duration) {
        self.timestamps
            .retain(|&t| now.saturating_duration_since(t) < horizon);
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < window)
            .count()
    }
}

/// Resolves the key a request is tracked under: forwarded-for header, then
/// real-ip header, then the peer IP. Header values are used verbatim.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Process-wide limiter state. Construct once and share behind an `Arc`.
pub struct RateLimiter {
    settings: RwLock<LimiterSettings>,
    clients: DashMap<String, ClientWindow>,
}

impl RateLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        if settings.test_mode {
            info!("Rate limiter initialized in TEST MODE - rate limiting disabled");
        } else {
            info!(
                "Rate limiter initialized: {}/min, {}/hour, {}/day",
                settings.per_minute, settings.per_hour, settings.per_day
            );
        }

        Self {
            settings: RwLock::new(settings),
            clients: DashMap::new(),
        }
    }

    pub fn settings(&self) -> LimiterSettings {
        *self.settings.read()
    }

    /// Replaces the ceilings and flags. Stored history is kept.
    pub fn update_settings(&self, settings: LimiterSettings) -> Result<(), ApiError> {
        settings.validate()?;
        *self.settings.write() = settings;
        info!(
            per_minute = settings.per_minute,
            per_hour = settings.per_hour,
            per_day = settings.per_day,
            test_mode = settings.test_mode,
            "Rate limiter settings updated"
        );
        Ok(())
    }

    pub fn check(&self, client_id: &str) -> Decision {
        self.check_at(client_id, Instant::now())
    }

    pub fn check_at(&self, client_id: &str, now: Instant) -> Decision {
        let settings = self.settings();
        if settings.test_mode {
            return Decision::Allowed;
        }

        // The entry guard holds the shard lock across prune, check and append.
        let mut entry = self.clients.entry(client_id.to_string()).or_default();
        entry.cleanup(now, settings.window_size);

        for window in Window::ALL {
            let limit = settings.limit_for(window) as usize;
            if entry.count_within(now, window.duration()) >= limit {
                entry.violations += 1;
                warn!(client = %client_id, window = %window, "Rate limit exceeded");
                return Decision::Limited(window);
            }
        }

        entry.timestamps.push_back(now);
        Decision::Allowed
    }

    pub fn client_stats(&self, client_id: &str) -> ClientStats {
        self.client_stats_at(client_id, Instant::now())
    }

    pub fn client_stats_at(&self, client_id: &str, now: Instant) -> ClientStats {
        let limits = self.settings().limits();
        let mut stats = ClientStats {
            client_id: client_id.to_string(),
            requests_last_minute: 0,
            requests_last_hour: 0,
            requests_last_day: 0,
            total_requests: 0,
            violations: 0,
            limits,
        };

        if let Some(entry) = self.clients.get(client_id) {
            stats.requests_last_minute = entry.count_within(now, Window::Minute.duration());
            stats.requests_last_hour = entry.count_within(now, Window::Hour.duration());
            stats.requests_last_day = entry.count_within(now, Window::Day.duration());
            stats.total_requests = entry.timestamps.len();
            stats.violations = entry.violations;
        }

        stats
    }

    pub fn global_stats(&self) -> GlobalStats {
        GlobalStats {
            total_clients: self.clients.len(),
            total_violations: self.clients.iter().map(|e| e.violations).sum(),
            limits: self.settings().limits(),
        }
    }

    pub fn reset_client(&self, client_id: &str) {
        self.clients.remove(client_id);
        info!("Rate limiting reset for client: {}", client_id);
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    /// Prunes every client and drops the ones left with no history and no
    /// violations. Returns the number of entries dropped.
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let horizon = self.settings().window_size;
        let before = self.clients.len();
        self.clients.retain(|_, window| {
            window.cleanup(now, horizon);
            !window.timestamps.is_empty() || window.violations > 0
        });
        let dropped = before.saturating_sub(self.clients.len());
        debug!(dropped, remaining = self.clients.len(), "Swept idle rate limit clients");
        dropped
    }
}
