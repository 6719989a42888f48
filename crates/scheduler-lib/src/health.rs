//! Liveness and readiness of the scheduler's control loops
//!
//! Every loop reports after each iteration. A loop that stops reporting for
//! longer than its staleness bound shows as degraded, so a hung cycle is
//! visible without the loop noticing it itself. Readiness needs a connected
//! bus and a fresh report from every loop that gates it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// What `/healthz` shows for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix time of the last report; absent until the first one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<i64>,
    #[serde(default)]
    pub reports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const BUS: &str = "bus";
    pub const ASSIGNMENT: &str = "assignment";
    pub const MONITOR: &str = "monitor";
    pub const AUTOSCALER: &str = "autoscaler";
    pub const BENCHMARK: &str = "benchmark";
    pub const TELEMETRY: &str = "telemetry";
}

/// Reports whether the message bus currently holds a broker connection
pub type ConnectionCheck = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct Watch {
    stale_after: Option<Duration>,
    gates_readiness: bool,
    status: ComponentStatus,
    message: Option<String>,
    last_report: Option<(Instant, i64)>,
    reports: u64,
}

impl Watch {
    fn new(stale_after: Option<Duration>, gates_readiness: bool) -> Self {
        Self {
            stale_after,
            gates_readiness,
            status: ComponentStatus::Healthy,
            message: None,
            last_report: None,
            reports: 0,
        }
    }

    /// Time since the last report when it exceeds the staleness bound
    fn overdue(&self, now: Instant) -> Option<Duration> {
        let stale_after = self.stale_after?;
        let (at, _) = self.last_report?;
        let age = now.saturating_duration_since(at);
        (age > stale_after).then_some(age)
    }

    fn view(&self, now: Instant) -> ComponentHealth {
        let (status, message) = if self.reports == 0 {
            (ComponentStatus::Degraded, Some("awaiting first report".to_string()))
        } else if let Some(age) = self.overdue(now) {
            (
                self.status.max(ComponentStatus::Degraded),
                Some(format!("no report for {}s", age.as_secs())),
            )
        } else {
            (self.status, self.message.clone())
        };

        ComponentHealth {
            status,
            message,
            last_report: self.last_report.map(|(_, ts)| ts),
            reports: self.reports,
        }
    }
}

/// Shared component health, cloned into every loop that reports
#[derive(Clone, Default)]
pub struct HealthRegistry {
    watches: Arc<RwLock<BTreeMap<String, Watch>>>,
    bus_check: Option<ConnectionCheck>,
    stopping: Arc<AtomicBool>,
}

impl std::fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRegistry")
            .field("bus_check", &self.bus_check.is_some())
            .field("stopping", &self.stopping.load(Ordering::SeqCst))
            .finish()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the `bus` component and readiness from `check`
    pub fn with_bus_check(mut self, check: ConnectionCheck) -> Self {
        self.bus_check = Some(check);
        self
    }

    /// Expect `name` to report at least every `stale_after`
    pub async fn watch(&self, name: &str, stale_after: Duration, gates_readiness: bool) {
        self.watches
            .write()
            .await
            .insert(name.to_string(), Watch::new(Some(stale_after), gates_readiness));
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut watches = self.watches.write().await;
        let watch = watches
            .entry(name.to_string())
            .or_insert_with(|| Watch::new(None, false));
        watch.status = status;
        watch.message = message;
        watch.last_report = Some((Instant::now(), chrono::Utc::now().timestamp()));
        watch.reports += 1;
    }

    pub async fn report_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn report_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn report_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Readiness fails from now on so traffic drains before the loops stop
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn bus_connected(&self) -> Option<bool> {
        self.bus_check.as_ref().map(|check| check())
    }

    pub async fn health(&self) -> HealthResponse {
        let now = Instant::now();
        let mut components: BTreeMap<String, ComponentHealth> = self
            .watches
            .read()
            .await
            .iter()
            .map(|(name, watch)| (name.clone(), watch.view(now)))
            .collect();

        if let Some(connected) = self.bus_connected() {
            // A broker outage is survivable; loops keep their state and retry
            let (status, message) = if connected {
                (ComponentStatus::Healthy, None)
            } else {
                (ComponentStatus::Degraded, Some("broker disconnected".to_string()))
            };
            components.insert(
                components::BUS.to_string(),
                ComponentHealth {
                    status,
                    message,
                    last_report: None,
                    reports: 0,
                },
            );
        }

        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        match self.not_ready_reason().await {
            Some(reason) => ReadinessResponse {
                ready: false,
                reason: Some(reason),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }

    async fn not_ready_reason(&self) -> Option<String> {
        if self.stopping.load(Ordering::SeqCst) {
            return Some("Scheduler shutting down".to_string());
        }
        if self.bus_connected() == Some(false) {
            return Some("Message bus disconnected".to_string());
        }

        let now = Instant::now();
        let watches = self.watches.read().await;
        for (name, watch) in watches.iter() {
            if watch.status == ComponentStatus::Unhealthy {
                return Some(format!("{} unhealthy", name));
            }
            if !watch.gates_readiness {
                continue;
            }
            if watch.reports == 0 {
                return Some(format!("Waiting for first {} report", name));
            }
            if let Some(age) = watch.overdue(now) {
                return Some(format!("{} has not reported for {}s", name, age.as_secs()));
            }
        }
        None
    }
}
