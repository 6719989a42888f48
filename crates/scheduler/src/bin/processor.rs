//! Fleet Processor - consumes telemetry for the machines assigned to it
//!
//! Runs one processor instance against the MQTT bus until Ctrl-C.

use anyhow::Result;
use fleet_scheduler::config::ProcessorSettings;
use scheduler_lib::{
    bus::{MessageBus, MqttBus},
    processor::ProcessorRuntime,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let settings = ProcessorSettings::load()?;
    let initial_machines = settings.initial_machines();
    info!(
        processor_id = %settings.id,
        prewarm = settings.prewarm,
        machines = initial_machines.len(),
        "Starting fleet-processor"
    );

    let bus: Arc<dyn MessageBus> = Arc::new(MqttBus::connect(settings.mqtt()));
    let runtime = ProcessorRuntime::new(bus, settings.processor(initial_machines));

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let handle = tokio::spawn(runtime.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    handle.await??;

    Ok(())
}
