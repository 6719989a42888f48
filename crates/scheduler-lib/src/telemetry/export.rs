//! Append-only feature export

use super::TelemetryCollector;
use crate::health::{components, HealthRegistry};
use crate::predictor::{FeatureSnapshot, FEATURES};
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default export interval (30 seconds)
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Sources silent for this many export intervals are no longer exported
pub const STALE_EXPORT_INTERVALS: u32 = 5;

/// Configuration for the feature export
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub export_interval: Duration,
    pub features_path: PathBuf,
    /// Age after which a processor or machine is dropped from the store
    pub stale_after: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            export_interval: DEFAULT_EXPORT_INTERVAL,
            features_path: PathBuf::from("/data/features.csv"),
            stale_after: DEFAULT_EXPORT_INTERVAL * STALE_EXPORT_INTERVALS,
        }
    }
}

/// CSV header: timestamp, processor id, the feature vector, then the label
pub fn header() -> String {
    let mut columns = vec!["timestamp", "processor_id"];
    columns.extend(FEATURES);
    columns.push("label");
    columns.join(",")
}

/// Writes one feature row per known processor on every tick
pub struct FeatureExporter {
    collector: Arc<TelemetryCollector>,
    config: TelemetryConfig,
    health: Option<HealthRegistry>,
}

impl FeatureExporter {
    pub fn new(collector: Arc<TelemetryCollector>, config: TelemetryConfig) -> Self {
        Self {
            collector,
            config,
            health: None,
        }
    }

    /// Report each export to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    async fn export_and_report(&self) {
        let result = self.export_once();
        if let Err(e) = &result {
            warn!(error = %e, "Feature export failed");
        }
        if let Some(health) = &self.health {
            match result {
                Ok(_) => health.report_healthy(components::TELEMETRY).await,
                Err(e) => {
                    health
                        .report_degraded(components::TELEMETRY, format!("{:#}", e))
                        .await
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.features_path
    }

    /// Append the current snapshot of every processor; returns rows written
    ///
    /// Labels are always written as 0; labeling happens offline.
    pub fn export_once(&self) -> Result<usize> {
        self.collector.evict_stale(self.config.stale_after);
        let records = self.collector.processor_records();
        if records.is_empty() {
            debug!("No processor telemetry to export");
            return Ok(0);
        }

        let path = &self.config.features_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        if is_new {
            writeln!(file, "{}", header())?;
        }

        let timestamp = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        for (processor_id, record) in &records {
            let snapshot = FeatureSnapshot::from_record(record);
            let values: Vec<String> = snapshot.values().iter().map(f64::to_string).collect();
            writeln!(file, "{},{},{},0", timestamp, processor_id, values.join(","))?;
        }
        file.flush()?;

        debug!(rows = records.len(), path = %path.display(), "Exported feature rows");
        Ok(records.len())
    }

    /// Run the export loop
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.export_interval.as_secs(),
            path = %self.config.features_path.display(),
            "Starting feature exporter"
        );

        let mut ticker = interval(self.config.export_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; nothing has been collected yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.export_and_report().await,
                _ = shutdown.recv() => {
                    info!("Shutting down feature exporter");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Message;
    use tempfile::TempDir;

    fn exporter(dir: &TempDir) -> (Arc<TelemetryCollector>, FeatureExporter) {
        let collector = Arc::new(TelemetryCollector::new());
        let exporter = FeatureExporter::new(
            collector.clone(),
            TelemetryConfig {
                features_path: dir.path().join("out").join("features.csv"),
                ..Default::default()
            },
        );
        (collector, exporter)
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(
            header(),
            "timestamp,processor_id,cpu_usage,mem_usage,buffer_size,buffer_capacity,\
             avg_latency,avg_rate,temperature,vibration,load,label"
        );
    }

    #[test]
    fn test_nothing_to_export_creates_no_file() {
        let dir = TempDir::new().unwrap();
        let (_, exporter) = exporter(&dir);
        assert_eq!(exporter.export_once().unwrap(), 0);
        assert!(!exporter.path().exists());
    }

    #[test]
    fn test_rows_per_processor_with_single_header() {
        let dir = TempDir::new().unwrap();
        let (collector, exporter) = exporter(&dir);

        collector.ingest(&Message::new(
            "metrics/processor-0",
            br#"{"cpu_usage":0.5,"buffer_size":10}"#.to_vec(),
        ));
        collector.ingest(&Message::new(
            "metrics/processor-1",
            br#"{"cpu_usage":0.25}"#.to_vec(),
        ));
        collector.ingest(&Message::new(
            "data/machine-3",
            br#"{"temperature":71.5,"vibration":0.2,"load":0.9}"#.to_vec(),
        ));

        assert_eq!(exporter.export_once().unwrap(), 2);
        assert_eq!(exporter.export_once().unwrap(), 2);

        let content = fs::read_to_string(exporter.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], header());
        assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp")).count(), 1);

        let row: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(row.len(), FEATURES.len() + 3);
        assert_eq!(row[1], "processor-0");
        assert_eq!(row[2], "0.5");
        assert_eq!(row[4], "10");
        assert_eq!(row[8], "71.5");
        assert_eq!(*row.last().unwrap(), "0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_processors_stop_exporting() {
        let dir = TempDir::new().unwrap();
        let (collector, exporter) = exporter(&dir);

        for i in 0..10 {
            collector.ingest(&Message::new(
                format!("metrics/processor-cold-{}", i),
                br#"{"cpu_usage":0.1}"#.to_vec(),
            ));
        }
        assert_eq!(exporter.export_once().unwrap(), 10);

        tokio::time::advance(DEFAULT_EXPORT_INTERVAL * STALE_EXPORT_INTERVALS).await;
        collector.ingest(&Message::new(
            "metrics/processor-0",
            br#"{"cpu_usage":0.5}"#.to_vec(),
        ));
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(exporter.export_once().unwrap(), 1);
        assert_eq!(collector.processor_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_export_degrades_telemetry() {
        let dir = TempDir::new().unwrap();
        // A regular file where the output directory should be
        std::fs::write(dir.path().join("out"), b"").unwrap();
        let (collector, exporter) = exporter(&dir);
        let health = HealthRegistry::new();
        let exporter = exporter.with_health(health.clone());
        collector.ingest(&Message::new(
            "metrics/processor-0",
            br#"{"cpu_usage":0.5}"#.to_vec(),
        ));

        exporter.export_and_report().await;

        let status = health.health().await;
        let telemetry = &status.components[components::TELEMETRY];
        assert_eq!(telemetry.status, crate::health::ComponentStatus::Degraded);
        assert!(telemetry.message.as_deref().unwrap().contains("Failed to create"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exports_on_interval() {
        let dir = TempDir::new().unwrap();
        let (collector, exporter) = exporter(&dir);
        let exporter = Arc::new(exporter);
        collector.ingest(&Message::new(
            "metrics/processor-0",
            br#"{"cpu_usage":0.5}"#.to_vec(),
        ));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(exporter.clone().run(rx));

        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let content = fs::read_to_string(exporter.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
    }
}
