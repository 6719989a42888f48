//! Scheduler state and health commands

use anyhow::Result;
use colored::Colorize;
use scheduler_lib::assignment::Assignment;
use scheduler_lib::benchmark::ColdStartOutcome;
use scheduler_lib::health::{HealthResponse, ReadinessResponse};
use scheduler_lib::predictor::{CycleReport, ScaleDecision, ScoreOutcome};
use tabled::Tabled;

use crate::client::{ApiClient, OverflowView};
use crate::output::{
    color_probability, color_status, format_ms, format_unix, print_heading, print_info,
    print_json, print_table, print_warning, OutputFormat,
};

/// Row for the assignments table
#[derive(Tabled)]
struct AssignmentRow {
    #[tabled(rename = "Processor")]
    processor: String,
    #[tabled(rename = "Machines")]
    count: usize,
    #[tabled(rename = "Assigned")]
    machines: String,
}

/// Row for the overflow table
#[derive(Tabled)]
struct RateRow {
    #[tabled(rename = "Machine")]
    machine: String,
    #[tabled(rename = "Msgs/Window")]
    rate: usize,
    #[tabled(rename = "Overflow")]
    overflow: String,
}

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show the latest applied assignment
pub async fn get_assignments(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let Some(assignment) = client
        .get_optional::<Assignment>("api/v1/assignments")
        .await?
    else {
        print_warning("No assignment has been applied yet");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&assignment)?,
        OutputFormat::Table => {
            let rows: Vec<AssignmentRow> = assignment
                .entries()
                .iter()
                .map(|entry| AssignmentRow {
                    processor: entry.processor_id.clone(),
                    count: entry.machines.len(),
                    machines: entry.machines.join(", "),
                })
                .collect();
            print_table(rows);
            println!(
                "\nTotal: {} machines across {} processors",
                assignment.machine_count(),
                assignment.processor_count()
            );
        }
    }

    Ok(())
}

/// Show machines routed to overflow and their current rates
pub async fn get_overflow(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let view: OverflowView = client.get("api/v1/overflow").await?;

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => {
            println!(
                "Overflow processor: {}",
                view.overflow_processor.cyan()
            );
            println!();
            let rows: Vec<RateRow> = view
                .rates
                .iter()
                .map(|r| RateRow {
                    machine: r.machine_id.clone(),
                    rate: r.messages_in_window,
                    overflow: if r.overflow {
                        "yes".red().to_string()
                    } else {
                        "no".to_string()
                    },
                })
                .collect();
            print_table(rows);
            if !view.machines.is_empty() {
                println!("\nRouted to overflow: {}", view.machines.join(", "));
            }
        }
    }

    Ok(())
}

/// Show the most recent autoscaler cycle
pub async fn get_cycle(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let Some(report) = client
        .get_optional::<CycleReport>("api/v1/autoscaler/last-cycle")
        .await?
    else {
        print_warning("No autoscaler cycle has completed yet");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_cycle(&report),
    }

    Ok(())
}

fn print_cycle(report: &CycleReport) {
    print_heading("Autoscaler Cycle");
    println!("Started:      {}", format_unix(report.started_at));
    match (report.assigned_machines, report.assigned_processors) {
        (Some(m), Some(p)) => println!("Assignment:   {} machines on {} processors", m, p),
        _ => println!("Assignment:   {}", "not applied".red()),
    }

    let score = match &report.score {
        ScoreOutcome::Scored {
            probability,
            version,
        } => format!("{} (classifier {})", color_probability(*probability), version),
        ScoreOutcome::NoClassifier => "no classifier artifact".yellow().to_string(),
        ScoreOutcome::Failed { reason } => format!("{} {}", "failed:".red(), reason),
    };
    println!("Score:        {}", score);

    let decision = match report.decision {
        ScaleDecision::Hold => "hold".to_string(),
        ScaleDecision::Provision(n) => format!("provision {} prewarm pods", n),
    };
    println!("Decision:     {}", decision.bold());

    match &report.cold_start {
        Some(ColdStartOutcome::Measured { pod, duration_ms }) => {
            println!("Cold start:   {} ({})", format_ms(*duration_ms), pod)
        }
        Some(ColdStartOutcome::TimedOut { waited_ms }) => println!(
            "Cold start:   {} after {}",
            color_status("timed_out"),
            format_ms(*waited_ms)
        ),
        None => println!("Cold start:   not measured"),
    }

    if let Some(prewarm) = &report.prewarm {
        println!();
        println!("{}", "Prewarm".bold());
        println!("{}", "-".repeat(50));
        for pod in &prewarm.pods {
            let phase = format!("{:?}", pod.phase).to_lowercase();
            let activation = pod
                .activation_ms
                .map(format_ms)
                .unwrap_or_else(|| "-".to_string());
            println!("{:<32} {:<12} {}", pod.name, color_status(&phase), activation);
        }
        if prewarm.already_active > 0 {
            println!("{} pods already active", prewarm.already_active);
        }
        if prewarm.publish_failures > 0 {
            print_warning(&format!("{} lifecycle signals failed", prewarm.publish_failures));
        }
    }

    if !report.errors.is_empty() {
        println!();
        for error in &report.errors {
            print_warning(error);
        }
    }
}

/// Show scheduler health and readiness
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (u16, HealthResponse) = client.get_status("healthz").await?;
    let (_, readiness): (u16, ReadinessResponse) = client.get_status("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            print_heading("Scheduler Status");
            let overall = format!("{:?}", health.status).to_lowercase();
            println!("Health:    {}", color_status(&overall));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            println!("Readiness: {}", color_status(ready));
            if let Some(reason) = &readiness.reason {
                print_info(reason);
            }
            println!();

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&format!("{:?}", component.status).to_lowercase()),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            print_table(rows);
        }
    }

    Ok(())
}
