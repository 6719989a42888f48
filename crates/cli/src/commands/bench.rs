//! Benchmark log commands

use anyhow::{Context, Result};
use scheduler_lib::benchmark::{BenchmarkLog, EventSummary};
use scheduler_lib::BenchmarkEvent;
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_ms, print_heading, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "P50")]
    p50: String,
    #[tabled(rename = "P95")]
    p95: String,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Max")]
    max: String,
}

impl From<&EventSummary> for SummaryRow {
    fn from(s: &EventSummary) -> Self {
        Self {
            event: s.event_type.to_string(),
            count: s.count,
            mean: format_ms(s.mean_ms),
            p50: format_ms(s.p50_ms),
            p95: format_ms(s.p95_ms),
            min: format_ms(s.min_ms),
            max: format_ms(s.max_ms),
        }
    }
}

/// Summarize cold-start and prewarm activation latencies from a benchmark CSV
pub fn summary(file: &Path, format: OutputFormat) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Benchmark log not found: {}", file.display());
    }

    let log = BenchmarkLog::new(file);
    let summaries = log
        .summary()
        .with_context(|| format!("Failed to read {}", file.display()))?;

    match format {
        OutputFormat::Json => print_json(&summaries)?,
        OutputFormat::Table => {
            print_heading(&format!("Benchmark Summary ({})", file.display()));
            print_table(summaries.iter().map(SummaryRow::from).collect());

            let cold = summaries.iter().find(|s| s.event_type == BenchmarkEvent::Cold);
            let prewarm = summaries.iter().find(|s| s.event_type == BenchmarkEvent::Prewarm);
            if let (Some(cold), Some(prewarm)) = (cold, prewarm) {
                if prewarm.mean_ms > 0.0 {
                    println!(
                        "\nPrewarm activation is {:.1}x faster than a cold start on average",
                        cold.mean_ms / prewarm.mean_ms
                    );
                }
            }
        }
    }

    Ok(())
}
