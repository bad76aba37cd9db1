//! Health probes.
//!
//! Each probe is a self-contained measurement returning a `HealthResult`
//! with its own component label. Probes never panic and never retry; the
//! supervisor decides what to do with the readings.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub component: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthResult {
    pub fn new(
        component: impl Into<String>,
        status: HealthStatus,
        latency_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            latency_ms,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn component(&self) -> String;

    async fn check(&self) -> HealthResult;
}

/// Resident-set share of system memory. Over 90% is unhealthy, over 75%
/// degraded. Hosts without /proc report healthy with a note.
pub struct ProcessProbe;

#[async_trait]
impl Probe for ProcessProbe {
    fn component(&self) -> String {
        "process".to_string()
    }

    async fn check(&self) -> HealthResult {
        let started = Instant::now();
        let reading = read_rss_kb().zip(read_mem_total_kb());
        let latency = started.elapsed().as_millis() as u64;

        match reading {
            Some((rss_kb, total_kb)) if total_kb > 0 => {
                let pct = (rss_kb as f64 / total_kb as f64) * 100.0;
                let status = if pct > 90.0 {
                    HealthStatus::Unhealthy
                } else if pct > 75.0 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                HealthResult::new(
                    self.component(),
                    status,
                    latency,
                    format!("{:.1}% of system memory ({} KiB)", pct, rss_kb),
                )
            }
            _ => HealthResult::new(
                self.component(),
                HealthStatus::Healthy,
                latency,
                "memory statistics unavailable on this platform",
            ),
        }
    }
}

/// Absolute resident-set size against soft ceilings.
pub struct MemoryPressureProbe {
    unhealthy_mb: u64,
    degraded_mb: u64,
}

impl MemoryPressureProbe {
    pub fn new(unhealthy_mb: u64, degraded_mb: u64) -> Self {
        Self {
            unhealthy_mb,
            degraded_mb,
        }
    }
}

impl Default for MemoryPressureProbe {
    fn default() -> Self {
        Self::new(512, 384)
    }
}

#[async_trait]
impl Probe for MemoryPressureProbe {
    fn component(&self) -> String {
        "memory_pressure".to_string()
    }

    async fn check(&self) -> HealthResult {
        let started = Instant::now();
        let rss_kb = read_rss_kb();
        let latency = started.elapsed().as_millis() as u64;

        match rss_kb {
            Some(rss_kb) => {
                let rss_mb = rss_kb / 1024;
                let status = if rss_mb > self.unhealthy_mb {
                    HealthStatus::Unhealthy
                } else if rss_mb > self.degraded_mb {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                HealthResult::new(
                    self.component(),
                    status,
                    latency,
                    format!("resident set {} MiB", rss_mb),
                )
            }
            None => HealthResult::new(
                self.component(),
                HealthStatus::Healthy,
                latency,
                "resident set size unavailable on this platform",
            ),
        }
    }
}

/// Scheduling latency: how long a freshly spawned no-op waits before it
/// runs. Over 100 ms is unhealthy, over 50 ms degraded.
pub struct EventLoopProbe;

#[async_trait]
impl Probe for EventLoopProbe {
    fn component(&self) -> String {
        "event_loop".to_string()
    }

    async fn check(&self) -> HealthResult {
        let scheduled = Instant::now();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(Instant::now());
        });

        let delay_ms = match rx.await {
            Ok(ran_at) => ran_at.duration_since(scheduled).as_millis() as u64,
            Err(_) => u64::MAX,
        };

        let status = if delay_ms > 100 {
            HealthStatus::Unhealthy
        } else if delay_ms > 50 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResult::new(
            self.component(),
            status,
            delay_ms,
            format!("dispatch delay {}ms", delay_ms),
        )
    }
}

/// Trivial round trip against the persistent store. A throwing query is
/// unhealthy; over 500 ms is degraded.
pub struct DatabaseProbe {
    store: Store,
}

impl DatabaseProbe {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Probe for DatabaseProbe {
    fn component(&self) -> String {
        "database".to_string()
    }

    async fn check(&self) -> HealthResult {
        match self.store.ping().await {
            Ok(latency) => {
                let latency_ms = latency.as_millis() as u64;
                let status = if latency_ms > 500 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                HealthResult::new(
                    self.component(),
                    status,
                    latency_ms,
                    format!("round trip {}ms", latency_ms),
                )
            }
            Err(e) => HealthResult::new(self.component(), HealthStatus::Unhealthy, 0, e.to_string()),
        }
    }
}

/// HTTP GET against an external endpoint with a 5 s timeout. Non-2xx or a
/// transport error is unhealthy; a 2xx slower than 2 s is degraded.
pub struct ApiProbe {
    url: String,
    client: reqwest::Client,
}

impl ApiProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Probe for ApiProbe {
    fn component(&self) -> String {
        format!("api:{}", self.url)
    }

    async fn check(&self) -> HealthResult {
        let started = Instant::now();
        let response = self.client.get(&self.url).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let status = if latency_ms > 2_000 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                HealthResult::new(
                    self.component(),
                    status,
                    latency_ms,
                    format!("HTTP {} in {}ms", resp.status().as_u16(), latency_ms),
                )
            }
            Ok(resp) => HealthResult::new(
                self.component(),
                HealthStatus::Unhealthy,
                latency_ms,
                format!("HTTP {}", resp.status().as_u16()),
            ),
            Err(e) => HealthResult::new(
                self.component(),
                HealthStatus::Unhealthy,
                latency_ms,
                e.to_string(),
            ),
        }
    }
}

#[cfg(target_os = "linux")]
fn read_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_kb_line(&status, "VmRSS:")
}

#[cfg(not(target_os = "linux"))]
fn read_rss_kb() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_mem_total_kb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_kb_line(&meminfo, "MemTotal:")
}

#[cfg(not(target_os = "linux"))]
fn read_mem_total_kb() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn parse_kb_line(text: &str, prefix: &str) -> Option<u64> {
    text.lines()
        .find(|line| line.starts_with(prefix))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_process_probe_reports() {
        let result = ProcessProbe.check().await;
        assert_eq!(result.component, "process");
        assert!(!result.message.is_empty());
    }

    #[tokio::test]
    async fn test_memory_pressure_thresholds() {
        // Ceilings of zero force the degraded/unhealthy branches on any
        // host that can read its RSS.
        let result = MemoryPressureProbe::new(0, 0).check().await;
        if read_rss_kb().is_some() {
            assert_eq!(result.status, HealthStatus::Unhealthy);
        } else {
            assert_eq!(result.status, HealthStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn test_event_loop_probe_fast_when_idle() {
        let result = EventLoopProbe.check().await;
        assert_eq!(result.component, "event_loop");
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_database_probe_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("health.db")).unwrap();
        let result = DatabaseProbe::new(store).check().await;
        assert_eq!(result.component, "database");
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_api_probe_unreachable_is_unhealthy() {
        let result = ApiProbe::new("http://127.0.0.1:1/health").check().await;
        assert!(result.component.starts_with("api:"));
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }
}
