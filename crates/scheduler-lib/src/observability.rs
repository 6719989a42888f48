//! Observability infrastructure for the fleet scheduler
//!
//! Provides:
//! - Prometheus metrics (schedule latency, assignment size, overflow
//!   reassignments, predicted probability, provisioning latencies)
//! - Structured JSON logging of control decisions with tracing

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for control-plane operations (in seconds)
const SCHEDULE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Buckets for provisioning latencies (in seconds)
const PROVISIONING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 180.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    schedule_latency_seconds: Histogram,
    assigned_machines: IntGauge,
    assigned_processors: IntGauge,
    tracked_machines: IntGauge,
    overflow_reassignments: IntCounter,
    predicted_probability: Gauge,
    classifier_version_info: GaugeVec,
    prewarm_pods: IntGauge,
    cold_start_seconds: Histogram,
    prewarm_activation_seconds: Histogram,
    publish_failures: IntCounter,
    cycle_errors: IntCounterVec,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            schedule_latency_seconds: register_histogram!(
                "fleet_scheduler_schedule_latency_seconds",
                "Time spent computing and applying a machine assignment",
                SCHEDULE_BUCKETS.to_vec()
            )
            .expect("Failed to register schedule_latency_seconds"),

            assigned_machines: register_int_gauge!(
                "fleet_scheduler_assigned_machines",
                "Machines covered by the current assignment"
            )
            .expect("Failed to register assigned_machines"),

            assigned_processors: register_int_gauge!(
                "fleet_scheduler_assigned_processors",
                "Processors in the current assignment"
            )
            .expect("Failed to register assigned_processors"),

            tracked_machines: register_int_gauge!(
                "fleet_scheduler_rate_tracked_machines",
                "Machines with a live arrival-rate window"
            )
            .expect("Failed to register tracked_machines"),

            overflow_reassignments: register_int_counter!(
                "fleet_scheduler_overflow_reassignments_total",
                "Machines routed to the overflow processor"
            )
            .expect("Failed to register overflow_reassignments"),

            predicted_probability: register_gauge!(
                "fleet_scheduler_predicted_overload_probability",
                "Last overload probability returned by the classifier"
            )
            .expect("Failed to register predicted_probability"),

            classifier_version_info: register_gauge_vec!(
                "fleet_scheduler_classifier_version_info",
                "Information about the currently loaded classifier artifact",
                &["version", "format"]
            )
            .expect("Failed to register classifier_version_info"),

            prewarm_pods: register_int_gauge!(
                "fleet_scheduler_prewarm_pods",
                "Prewarm pods requested in the last cycle"
            )
            .expect("Failed to register prewarm_pods"),

            cold_start_seconds: register_histogram!(
                "fleet_scheduler_cold_start_seconds",
                "Time from scale-up to a new processor pod reporting Ready",
                PROVISIONING_BUCKETS.to_vec()
            )
            .expect("Failed to register cold_start_seconds"),

            prewarm_activation_seconds: register_histogram!(
                "fleet_scheduler_prewarm_activation_seconds",
                "Time from hydration request to activation of a prewarm pod",
                PROVISIONING_BUCKETS.to_vec()
            )
            .expect("Failed to register prewarm_activation_seconds"),

            publish_failures: register_int_counter!(
                "fleet_scheduler_publish_failures_total",
                "Bus publishes that failed and were skipped"
            )
            .expect("Failed to register publish_failures"),

            cycle_errors: register_int_counter_vec!(
                "fleet_scheduler_cycle_errors_total",
                "Control loop cycles that ended with an error",
                &["loop"]
            )
            .expect("Failed to register cycle_errors"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn observe_schedule_latency(&self, duration_secs: f64) {
        self.inner().schedule_latency_seconds.observe(duration_secs);
    }

    /// Update the size of the current assignment
    pub fn set_assignment(&self, machines: usize, processors: usize) {
        self.inner().assigned_machines.set(machines as i64);
        self.inner().assigned_processors.set(processors as i64);
    }

    pub fn set_tracked_machines(&self, count: usize) {
        self.inner().tracked_machines.set(count as i64);
    }

    pub fn inc_overflow_reassignments(&self) {
        self.inner().overflow_reassignments.inc();
    }

    pub fn set_predicted_probability(&self, probability: f64) {
        self.inner().predicted_probability.set(probability);
    }

    /// Update classifier version info
    pub fn set_classifier_version(&self, version: &str, format: &str) {
        self.inner().classifier_version_info.reset();
        self.inner()
            .classifier_version_info
            .with_label_values(&[version, format])
            .set(1.0);
    }

    pub fn set_prewarm_pods(&self, count: usize) {
        self.inner().prewarm_pods.set(count as i64);
    }

    pub fn observe_cold_start(&self, duration_secs: f64) {
        self.inner().cold_start_seconds.observe(duration_secs);
    }

    pub fn observe_prewarm_activation(&self, duration_secs: f64) {
        self.inner().prewarm_activation_seconds.observe(duration_secs);
    }

    pub fn inc_publish_failures(&self) {
        self.inner().publish_failures.inc();
    }

    /// Count a failed cycle of the named control loop
    pub fn inc_cycle_errors(&self, control_loop: &str) {
        self.inner()
            .cycle_errors
            .with_label_values(&[control_loop])
            .inc();
    }
}

/// Structured logger for control-plane decisions
///
/// One canonical event per decision so that log pipelines can follow the
/// scheduler without parsing free-form messages.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log an applied machine assignment
    pub fn log_assignment_applied(&self, machines: usize, processors: usize, rescaled: bool) {
        info!(
            event = "assignment_applied",
            instance = %self.instance,
            machines = machines,
            processors = processors,
            rescaled = rescaled,
            "Applied machine assignment"
        );
    }

    /// Log a machine routed to the overflow processor
    pub fn log_overflow_reassigned(&self, machine_id: &str, processor_id: &str, rate: usize) {
        warn!(
            event = "overflow_reassigned",
            instance = %self.instance,
            machine_id = %machine_id,
            processor_id = %processor_id,
            rate = rate,
            "Machine over rate threshold, routed to overflow processor"
        );
    }

    /// Log a classifier verdict
    pub fn log_overload_predicted(&self, probability: f64, replicas: u32, classifier_version: &str) {
        info!(
            event = "overload_predicted",
            instance = %self.instance,
            probability = probability,
            replicas = replicas,
            classifier_version = %classifier_version,
            "Scored aggregate feature snapshot"
        );
    }

    /// Log a prewarm pod reaching Active
    pub fn log_prewarm_activated(&self, pod: &str, duration_ms: f64) {
        info!(
            event = "prewarm_activated",
            instance = %self.instance,
            pod = %pod,
            duration_ms = duration_ms,
            "Prewarm pod activated"
        );
    }

    /// Log the outcome of a cold-start measurement
    pub fn log_cold_start_measured(&self, pod: Option<&str>, duration_ms: Option<f64>) {
        match (pod, duration_ms) {
            (Some(pod), Some(duration_ms)) => {
                info!(
                    event = "cold_start_measured",
                    instance = %self.instance,
                    pod = %pod,
                    duration_ms = duration_ms,
                    "Cold start measured"
                );
            }
            _ => {
                warn!(
                    event = "cold_start_measured",
                    instance = %self.instance,
                    timed_out = true,
                    "No new pod became ready within the cold start timeout"
                );
            }
        }
    }

    /// Log scheduler startup
    pub fn log_startup(&self, version: &str, bus: &str, orchestrator: &str) {
        info!(
            event = "scheduler_started",
            instance = %self.instance,
            scheduler_version = %version,
            bus = %bus,
            orchestrator = %orchestrator,
            "Fleet scheduler started"
        );
    }

    /// Log scheduler shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Fleet scheduler shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_metrics_creation() {
        let metrics = SchedulerMetrics::new();

        metrics.observe_schedule_latency(0.2);
        metrics.set_assignment(7, 3);
        metrics.inc_overflow_reassignments();
        metrics.set_predicted_probability(0.75);
        metrics.set_classifier_version("abc123", "json");
        metrics.observe_cold_start(12.0);
        metrics.observe_prewarm_activation(3.1);
        metrics.inc_cycle_errors("autoscaler");

        // A second handle shares the registered metrics
        let other = SchedulerMetrics::new();
        other.set_prewarm_pods(2);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("scheduler-0");
        assert_eq!(logger.instance, "scheduler-0");
    }
}
