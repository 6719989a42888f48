//! Scheduler and processor configuration
//!
//! Both binaries read an optional config file, then environment variables
//! with their prefix (`FLEET_` for the scheduler, `PROCESSOR_` for
//! processors). Every field has a default.

use anyhow::{Context, Result};
use scheduler_lib::assignment::{env_binding_name, AssignmentConfig};
use scheduler_lib::benchmark::BenchmarkConfig;
use scheduler_lib::bus::MqttBusConfig;
use scheduler_lib::monitor::MonitorConfig;
use scheduler_lib::predictor::AutoscalerConfig;
use scheduler_lib::prewarm::PrewarmConfig;
use scheduler_lib::processor::{ProcessorConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_CGROUP_ROOT};
use scheduler_lib::telemetry::{TelemetryConfig, STALE_EXPORT_INTERVALS};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which message bus implementation to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Mqtt,
    Memory,
}

/// Which orchestration platform to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorKind {
    Kube,
    Simulated,
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics/state
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_bus")]
    pub bus: BusKind,
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default = "default_orchestrator")]
    pub orchestrator: OrchestratorKind,
    #[serde(default = "default_namespace")]
    pub namespace: String,

    // Assignment
    #[serde(default = "default_processor_deployment")]
    pub processor_deployment: String,
    /// Container receiving machine bindings; defaults to the deployment name
    #[serde(default)]
    pub processor_container: Option<String>,
    #[serde(default = "default_machine_selector")]
    pub machine_selector: String,
    #[serde(default = "default_processor_selector")]
    pub processor_selector: String,
    #[serde(default = "default_max_machines_per_processor")]
    pub max_machines_per_processor: usize,
    #[serde(default = "default_min_machines")]
    pub min_machines: usize,
    #[serde(default = "default_min_processors")]
    pub min_processors: usize,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    // Reactive monitor
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_rate_threshold")]
    pub rate_threshold: usize,
    #[serde(default = "default_overflow_processor")]
    pub overflow_processor: String,

    // Predictive autoscaler
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
    #[serde(default = "default_classifier_path")]
    pub classifier_path: PathBuf,
    #[serde(default = "default_true")]
    pub benchmark_each_cycle: bool,

    // Prewarm
    #[serde(default = "default_prewarm_deployment")]
    pub prewarm_deployment: String,
    #[serde(default = "default_prewarm_selector")]
    pub prewarm_selector: String,
    #[serde(default = "default_prewarm_settle_secs")]
    pub prewarm_settle_secs: u64,
    #[serde(default = "default_prewarm_activation_secs")]
    pub prewarm_activation_secs: u64,

    // Benchmark
    #[serde(default = "default_benchmark_timeout_secs")]
    pub benchmark_timeout_secs: u64,
    #[serde(default = "default_benchmark_log_path")]
    pub benchmark_log_path: PathBuf,

    // Telemetry export
    #[serde(default = "default_features_path")]
    pub features_path: PathBuf,
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
    /// Export intervals without a report before a source is forgotten
    #[serde(default = "default_stale_export_intervals")]
    pub stale_export_intervals: u32,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "fleet-scheduler".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_bus() -> BusKind {
    BusKind::Mqtt
}

fn default_mqtt_host() -> String {
    "mqtt-broker".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_orchestrator() -> OrchestratorKind {
    OrchestratorKind::Kube
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_processor_deployment() -> String {
    "processor".to_string()
}

fn default_machine_selector() -> String {
    "app=machine".to_string()
}

fn default_processor_selector() -> String {
    "app=processor,mode!=prewarm".to_string()
}

fn default_max_machines_per_processor() -> usize {
    2
}

fn default_min_machines() -> usize {
    5
}

fn default_min_processors() -> usize {
    2
}

fn default_wait_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_monitor_interval_secs() -> u64 {
    5
}

fn default_rate_window_secs() -> u64 {
    30
}

fn default_rate_threshold() -> usize {
    15
}

fn default_overflow_processor() -> String {
    "processor-overflow".to_string()
}

fn default_cycle_interval_secs() -> u64 {
    300
}

fn default_decision_threshold() -> f64 {
    0.5
}

fn default_classifier_path() -> PathBuf {
    PathBuf::from("/data/classifier.onnx")
}

fn default_true() -> bool {
    true
}

fn default_prewarm_deployment() -> String {
    "processor-prewarm".to_string()
}

fn default_prewarm_selector() -> String {
    "app=processor,mode=prewarm".to_string()
}

fn default_prewarm_settle_secs() -> u64 {
    5
}

fn default_prewarm_activation_secs() -> u64 {
    3
}

fn default_benchmark_timeout_secs() -> u64 {
    180
}

fn default_benchmark_log_path() -> PathBuf {
    PathBuf::from("/data/benchmark.csv")
}

fn default_features_path() -> PathBuf {
    PathBuf::from("/data/features.csv")
}

fn default_export_interval_secs() -> u64 {
    30
}

fn default_stale_export_intervals() -> u32 {
    STALE_EXPORT_INTERVALS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            bus: default_bus(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            orchestrator: default_orchestrator(),
            namespace: default_namespace(),
            processor_deployment: default_processor_deployment(),
            processor_container: None,
            machine_selector: default_machine_selector(),
            processor_selector: default_processor_selector(),
            max_machines_per_processor: default_max_machines_per_processor(),
            min_machines: default_min_machines(),
            min_processors: default_min_processors(),
            wait_timeout_secs: default_wait_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            rate_window_secs: default_rate_window_secs(),
            rate_threshold: default_rate_threshold(),
            overflow_processor: default_overflow_processor(),
            cycle_interval_secs: default_cycle_interval_secs(),
            decision_threshold: default_decision_threshold(),
            classifier_path: default_classifier_path(),
            benchmark_each_cycle: default_true(),
            prewarm_deployment: default_prewarm_deployment(),
            prewarm_selector: default_prewarm_selector(),
            prewarm_settle_secs: default_prewarm_settle_secs(),
            prewarm_activation_secs: default_prewarm_activation_secs(),
            benchmark_timeout_secs: default_benchmark_timeout_secs(),
            benchmark_log_path: default_benchmark_log_path(),
            features_path: default_features_path(),
            export_interval_secs: default_export_interval_secs(),
            stale_export_intervals: default_stale_export_intervals(),
        }
    }
}

/// Build a config from an optional file (`{prefix}_CONFIG`) and prefixed env vars
fn load_layered<T: serde::de::DeserializeOwned>(prefix: &str) -> Result<T> {
    let mut builder = config::Config::builder();

    if let Ok(path) = std::env::var(format!("{}_CONFIG", prefix)) {
        builder = builder.add_source(config::File::with_name(&path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(prefix)
                .try_parsing(true)
                .ignore_empty(true),
        )
        .build()
        .context("Failed to read configuration sources")?;

    config
        .try_deserialize()
        .with_context(|| format!("Invalid {} configuration", prefix))
}

impl SchedulerConfig {
    /// Load configuration from `FLEET_CONFIG` and `FLEET_*` variables
    pub fn load() -> Result<Self> {
        load_layered("FLEET")
    }

    pub fn assignment(&self) -> AssignmentConfig {
        AssignmentConfig {
            processor_deployment: self.processor_deployment.clone(),
            processor_container: self
                .processor_container
                .clone()
                .unwrap_or_else(|| self.processor_deployment.clone()),
            machine_selector: self.machine_selector.clone(),
            processor_selector: self.processor_selector.clone(),
            max_machines_per_processor: self.max_machines_per_processor,
            min_machines: self.min_machines,
            min_processors: self.min_processors,
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(self.monitor_interval_secs),
            window: Duration::from_secs(self.rate_window_secs),
            rate_threshold: self.rate_threshold,
            overflow_processor: self.overflow_processor.clone(),
        }
    }

    pub fn autoscaler(&self) -> AutoscalerConfig {
        AutoscalerConfig {
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            classifier_path: self.classifier_path.clone(),
            decision_threshold: self.decision_threshold,
            benchmark_each_cycle: self.benchmark_each_cycle,
        }
    }

    pub fn prewarm(&self) -> PrewarmConfig {
        PrewarmConfig {
            deployment: self.prewarm_deployment.clone(),
            pod_selector: self.prewarm_selector.clone(),
            settle_delay: Duration::from_secs(self.prewarm_settle_secs),
            activation_delay: Duration::from_secs(self.prewarm_activation_secs),
        }
    }

    pub fn benchmark(&self) -> BenchmarkConfig {
        BenchmarkConfig {
            deployment: self.processor_deployment.clone(),
            timeout: Duration::from_secs(self.benchmark_timeout_secs),
            ..Default::default()
        }
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        let export_interval = Duration::from_secs(self.export_interval_secs);
        TelemetryConfig {
            export_interval,
            features_path: self.features_path.clone(),
            stale_after: export_interval * self.stale_export_intervals.max(1),
        }
    }

    pub fn mqtt(&self) -> MqttBusConfig {
        MqttBusConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.instance_name.clone(),
            ..Default::default()
        }
    }
}

/// Processor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSettings {
    /// Processor id; defaults to the pod name
    #[serde(default = "default_processor_id")]
    pub id: String,

    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,

    /// Start inactive and wait for hydrate/activate signals
    #[serde(default)]
    pub prewarm: bool,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,
}

fn default_processor_id() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "processor".to_string())
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_publish_interval_secs() -> u64 {
    2
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from(DEFAULT_CGROUP_ROOT)
}

impl ProcessorSettings {
    /// Load configuration from `PROCESSOR_CONFIG` and `PROCESSOR_*` variables
    pub fn load() -> Result<Self> {
        load_layered("PROCESSOR")
    }

    /// Machines bound through the assignment environment variable, if any
    pub fn initial_machines(&self) -> Vec<String> {
        parse_machine_list(&std::env::var(env_binding_name(&self.id)).unwrap_or_default())
    }

    pub fn processor(&self, initial_machines: Vec<String>) -> ProcessorConfig {
        ProcessorConfig {
            id: self.id.clone(),
            buffer_capacity: self.buffer_capacity,
            publish_interval: Duration::from_secs(self.publish_interval_secs),
            prewarm: self.prewarm,
            initial_machines,
            cgroup_root: self.cgroup_root.clone(),
        }
    }

    pub fn mqtt(&self) -> MqttBusConfig {
        MqttBusConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.id.clone(),
            ..Default::default()
        }
    }
}

/// Split a comma-joined machine list, dropping blanks
pub fn parse_machine_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_component_defaults() {
        let config = SchedulerConfig::default();

        let assignment = config.assignment();
        let expected = AssignmentConfig::default();
        assert_eq!(assignment.max_machines_per_processor, expected.max_machines_per_processor);
        assert_eq!(assignment.processor_selector, expected.processor_selector);
        assert_eq!(assignment.wait_timeout, expected.wait_timeout);

        assert_eq!(config.monitor().rate_threshold, 15);
        assert_eq!(config.autoscaler().decision_threshold, 0.5);
        assert_eq!(config.prewarm().pod_selector, "app=processor,mode=prewarm");
        assert_eq!(config.benchmark().timeout, Duration::from_secs(180));
        assert_eq!(config.telemetry().export_interval, Duration::from_secs(30));
        assert_eq!(config.telemetry().stale_after, Duration::from_secs(150));
        assert_eq!(assignment.processor_container, config.processor_deployment);
    }

    #[test]
    fn test_processor_container_overrides_deployment() {
        let config: SchedulerConfig = serde_json::from_value(serde_json::json!({
            "processor_deployment": "processor",
            "processor_container": "worker",
        }))
        .unwrap();

        let assignment = config.assignment();
        assert_eq!(assignment.processor_deployment, "processor");
        assert_eq!(assignment.processor_container, "worker");
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SchedulerConfig = serde_json::from_value(serde_json::json!({
            "bus": "memory",
            "orchestrator": "simulated",
            "max_machines_per_processor": 4,
        }))
        .unwrap();

        assert_eq!(config.bus, BusKind::Memory);
        assert_eq!(config.orchestrator, OrchestratorKind::Simulated);
        assert_eq!(config.max_machines_per_processor, 4);
        assert_eq!(config.min_machines, 5);
    }

    #[test]
    fn test_parse_machine_list() {
        assert_eq!(parse_machine_list("m1, m2,,m3"), ["m1", "m2", "m3"]);
        assert!(parse_machine_list("").is_empty());
    }
}
