//! Processor event loop
//!
//! Bus handlers only decode and forward into a channel; all processor state
//! is owned by the loop, so handlers never block or lock.

use super::{ResourceSampler, SlidingBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::bus::{publish_json, topics, Message, MessageBus};
use crate::models::{
    BufferReport, ControlCommand, MetricsReport, PrewarmPhase, Reading, StateSnapshot,
};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for one processor instance
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Processor id; the pod name under an orchestrator
    pub id: String,
    pub buffer_capacity: usize,
    /// Period of buffer/metrics/state publishing
    pub publish_interval: Duration,
    /// Prewarm instances stay inactive until activated
    pub prewarm: bool,
    /// Machines bound through the environment at startup
    pub initial_machines: Vec<String>,
    pub cgroup_root: PathBuf,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            id: "processor".to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            publish_interval: Duration::from_secs(2),
            prewarm: false,
            initial_machines: Vec::new(),
            cgroup_root: PathBuf::from(super::DEFAULT_CGROUP_ROOT),
        }
    }
}

#[derive(Debug)]
enum Event {
    Assign(Vec<String>),
    Hydrate,
    Activate,
    Reading {
        machine: String,
        reading: Reading,
        received: Instant,
    },
    Snapshot(Box<StateSnapshot>),
}

/// Latency and arrival accounting between two publishes
#[derive(Debug)]
struct IngestStats {
    count: u64,
    latency_ms_sum: f64,
    since: Instant,
}

impl IngestStats {
    fn new() -> Self {
        Self {
            count: 0,
            latency_ms_sum: 0.0,
            since: Instant::now(),
        }
    }

    fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.latency_ms_sum += latency.as_secs_f64() * 1000.0;
    }

    /// (average latency in ms, readings per second), then reset
    fn take(&mut self) -> (f64, f64) {
        let elapsed = self.since.elapsed().as_secs_f64();
        let avg_latency = if self.count > 0 {
            self.latency_ms_sum / self.count as f64
        } else {
            0.0
        };
        let rate = if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            0.0
        };
        *self = Self::new();
        (avg_latency, rate)
    }
}

/// A peer's window for one machine, held until the machine is assigned here
#[derive(Debug)]
struct StagedWindow {
    timestamp: i64,
    readings: Vec<Reading>,
}

/// Consumes assigned machine streams and publishes processor reports
pub struct ProcessorRuntime {
    config: ProcessorConfig,
    bus: Arc<dyn MessageBus>,
    sampler: ResourceSampler,
    phase: PrewarmPhase,
    assigned: BTreeSet<String>,
    buffers: BTreeMap<String, SlidingBuffer>,
    /// Newest peer window per machine, keyed by machine id
    staged: BTreeMap<String, StagedWindow>,
    stats: IngestStats,
    last_metrics: MetricsReport,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl ProcessorRuntime {
    pub fn new(bus: Arc<dyn MessageBus>, config: ProcessorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let phase = if config.prewarm {
            PrewarmPhase::Created
        } else {
            PrewarmPhase::Active
        };

        Self {
            sampler: ResourceSampler::new(config.cgroup_root.clone()),
            config,
            bus,
            phase,
            assigned: BTreeSet::new(),
            buffers: BTreeMap::new(),
            staged: BTreeMap::new(),
            stats: IngestStats::new(),
            last_metrics: MetricsReport::default(),
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn phase(&self) -> PrewarmPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == PrewarmPhase::Active
    }

    pub fn assigned_machines(&self) -> impl Iterator<Item = &str> {
        self.assigned.iter().map(String::as_str)
    }

    pub fn buffer(&self, machine_id: &str) -> Option<&SlidingBuffer> {
        self.buffers.get(machine_id)
    }

    /// Subscribe to this processor's control and lifecycle topics
    pub async fn start(&mut self) -> Result<()> {
        let tx = self.events_tx.clone();
        self.bus
            .subscribe(
                &topics::control(&self.config.id),
                Arc::new(move |message: &Message| {
                    match message.json::<ControlCommand>() {
                        Ok(command) => {
                            let _ = tx.send(Event::Assign(command.assign));
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed control command"),
                    }
                }),
            )
            .await?;

        let tx = self.events_tx.clone();
        self.bus
            .subscribe(
                &topics::hydrate(&self.config.id),
                Arc::new(move |_: &Message| {
                    let _ = tx.send(Event::Hydrate);
                }),
            )
            .await?;

        let tx = self.events_tx.clone();
        self.bus
            .subscribe(
                &topics::activate(&self.config.id),
                Arc::new(move |_: &Message| {
                    let _ = tx.send(Event::Activate);
                }),
            )
            .await?;

        if !self.config.initial_machines.is_empty() {
            let machines = self.config.initial_machines.clone();
            self.assign(machines).await?;
        }

        info!(
            processor_id = %self.config.id,
            phase = ?self.phase,
            machines = self.assigned.len(),
            "Processor started"
        );
        Ok(())
    }

    /// Handle every event already queued, including ones raised while handling
    pub async fn process_pending(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Assign(machines) => self.assign(machines).await,
            Event::Hydrate => self.hydrate().await,
            Event::Activate => self.activate().await,
            Event::Reading {
                machine,
                reading,
                received,
            } => {
                self.ingest(machine, reading, received);
                Ok(())
            }
            Event::Snapshot(snapshot) => {
                self.merge_snapshot(*snapshot);
                Ok(())
            }
        }
    }

    /// Add machines; duplicates of already assigned machines are ignored
    async fn assign(&mut self, machines: Vec<String>) -> Result<()> {
        for machine in machines {
            if self.assigned.contains(&machine) {
                continue;
            }

            let tx = self.events_tx.clone();
            let machine_id = machine.clone();
            self.bus
                .subscribe(
                    &topics::data(&machine),
                    Arc::new(move |message: &Message| match message.json::<Reading>() {
                        Ok(reading) => {
                            let _ = tx.send(Event::Reading {
                                machine: machine_id.clone(),
                                reading,
                                received: Instant::now(),
                            });
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed reading"),
                    }),
                )
                .await?;

            info!(processor_id = %self.config.id, machine_id = %machine, "Machine assigned");
            self.assigned.insert(machine.clone());
            self.apply_staged(&machine);
        }
        Ok(())
    }

    async fn hydrate(&mut self) -> Result<()> {
        if self.phase != PrewarmPhase::Created {
            debug!(phase = ?self.phase, "Ignoring duplicate hydrate signal");
            return Ok(());
        }
        self.phase = PrewarmPhase::Hydrating;

        let tx = self.events_tx.clone();
        self.bus
            .subscribe(
                topics::ALL_STATE,
                Arc::new(move |message: &Message| match message.json::<StateSnapshot>() {
                    Ok(snapshot) => {
                        let _ = tx.send(Event::Snapshot(Box::new(snapshot)));
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed state snapshot"),
                }),
            )
            .await?;

        info!(processor_id = %self.config.id, "Hydrating from retained state");
        Ok(())
    }

    async fn activate(&mut self) -> Result<()> {
        if self.phase == PrewarmPhase::Active {
            return Ok(());
        }
        if matches!(self.phase, PrewarmPhase::Hydrating | PrewarmPhase::Hydrated) {
            self.bus.unsubscribe(topics::ALL_STATE).await?;
        }
        self.phase = PrewarmPhase::Active;
        self.stats = IngestStats::new();

        info!(
            processor_id = %self.config.id,
            buffered = self.buffered_readings(),
            "Processor activated"
        );
        Ok(())
    }

    fn ingest(&mut self, machine: String, reading: Reading, received: Instant) {
        if !self.is_active() {
            return;
        }
        self.stats.record(received.elapsed());
        let capacity = self.config.buffer_capacity;
        self.buffers
            .entry(machine)
            .or_insert_with(|| SlidingBuffer::new(capacity))
            .push(reading);
    }

    fn merge_snapshot(&mut self, snapshot: StateSnapshot) {
        if snapshot.processor_id == self.config.id
            || !matches!(self.phase, PrewarmPhase::Hydrating | PrewarmPhase::Hydrated)
        {
            return;
        }

        let mut updated = Vec::new();
        for (machine, readings) in snapshot.buffers {
            let newer = self
                .staged
                .get(&machine)
                .map_or(true, |staged| snapshot.timestamp > staged.timestamp);
            if !newer {
                continue;
            }
            self.staged.insert(
                machine.clone(),
                StagedWindow {
                    timestamp: snapshot.timestamp,
                    readings,
                },
            );
            updated.push(machine);
        }

        for machine in &updated {
            if self.assigned.contains(machine) {
                // Nothing is ingested before activation, so the window holds
                // only hydrated readings and can be replaced wholesale
                self.buffers.remove(machine);
                self.apply_staged(machine);
            }
        }
        self.phase = PrewarmPhase::Hydrated;

        debug!(
            from = %snapshot.processor_id,
            timestamp = snapshot.timestamp,
            machines = updated.len(),
            "Merged state snapshot"
        );
    }

    /// Seed an assigned machine's window from the newest staged peer window
    fn apply_staged(&mut self, machine: &str) {
        if !self.assigned.contains(machine) {
            return;
        }
        let Some(staged) = self.staged.get(machine) else {
            return;
        };
        let capacity = self.config.buffer_capacity;
        self.buffers
            .entry(machine.to_string())
            .or_insert_with(|| SlidingBuffer::new(capacity))
            .hydrate(&staged.readings);
    }

    fn assigned_buffers(&self) -> impl Iterator<Item = (&String, &SlidingBuffer)> {
        self.buffers
            .iter()
            .filter(|(machine, _)| self.assigned.contains(*machine))
    }

    /// Readings held for assigned machines; never exceeds the reported capacity
    fn buffered_readings(&self) -> usize {
        self.assigned_buffers().map(|(_, buffer)| buffer.len()).sum()
    }

    /// Current state as published on `state/{id}`
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            processor_id: self.config.id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            buffer: BufferReport {
                buffer_size: self.buffered_readings(),
                buffer_capacity: self.config.buffer_capacity * self.assigned.len().max(1),
                assigned_machines: self.assigned.iter().cloned().collect(),
            },
            metrics: self.last_metrics.clone(),
            buffers: self
                .assigned_buffers()
                .map(|(machine, buffer)| (machine.clone(), buffer.to_vec()))
                .collect(),
        }
    }

    /// Publish buffer, metrics and the retained state snapshot
    pub async fn publish_reports(&mut self) -> Result<()> {
        let usage = self.sampler.sample().await;
        let (avg_latency, avg_rate) = self.stats.take();
        self.last_metrics = MetricsReport {
            cpu_usage: usage.cpu_usage,
            mem_usage: usage.mem_usage,
            avg_latency,
            avg_rate,
        };

        let snapshot = self.snapshot();
        let id = &self.config.id;
        publish_json(self.bus.as_ref(), &topics::buffer(id), &snapshot.buffer, false).await?;
        publish_json(self.bus.as_ref(), &topics::metrics(id), &snapshot.metrics, false).await?;
        publish_json(self.bus.as_ref(), &topics::state(id), &snapshot, true).await?;

        for (machine, buffer) in &self.buffers {
            if let Some(avg) = buffer.mean_temperature() {
                debug!(machine_id = %machine, avg_temperature = avg, "Buffer average");
            }
        }
        Ok(())
    }

    /// Run until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;

        let mut ticker = interval(self.config.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    if let Err(e) = self.handle(event).await {
                        warn!(error = %e, "Failed to handle processor event");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_reports().await {
                        warn!(error = %e, "Failed to publish processor reports");
                    }
                }
                _ = shutdown.recv() => {
                    info!(processor_id = %self.config.id, "Shutting down processor");
                    break;
                }
            }
        }

        Ok(())
    }
}
