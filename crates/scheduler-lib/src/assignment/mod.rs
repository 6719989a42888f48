//! Machine-to-processor assignment
//!
//! This module provides:
//! - The `Assignment` mapping from processor id to its ordered machine ids
//! - Round-robin partitioning with last-processor overflow absorption
//! - `AssignmentEngine`, which sizes the processor pool and applies the result

mod engine;

#[cfg(test)]
mod tests;

pub use engine::{AssignmentConfig, AssignmentEngine};

use crate::error::SchedulerError;
use crate::orchestrator::EnvBinding;
use serde::{Deserialize, Serialize};

/// Prefix of the per-processor environment binding listing its machines
pub const ENV_BINDING_PREFIX: &str = "ASSIGNED_MACHINES_";

/// Machines owned by one processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorAssignment {
    pub processor_id: String,
    pub machines: Vec<String>,
}

/// Mapping from processor id to an ordered set of machine ids
///
/// Processor order is preserved; every machine appears exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    processors: Vec<ProcessorAssignment>,
}

impl Assignment {
    /// Processor ids in assignment order
    pub fn processors(&self) -> impl Iterator<Item = &str> {
        self.processors.iter().map(|p| p.processor_id.as_str())
    }

    pub fn entries(&self) -> &[ProcessorAssignment] {
        &self.processors
    }

    pub fn machines_for(&self, processor_id: &str) -> Option<&[String]> {
        self.processors
            .iter()
            .find(|p| p.processor_id == processor_id)
            .map(|p| p.machines.as_slice())
    }

    pub fn processor_for(&self, machine_id: &str) -> Option<&str> {
        self.processors
            .iter()
            .find(|p| p.machines.iter().any(|m| m == machine_id))
            .map(|p| p.processor_id.as_str())
    }

    pub fn machine_count(&self) -> usize {
        self.processors.iter().map(|p| p.machines.len()).sum()
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// One `ASSIGNED_MACHINES_<id>` binding per processor, machines comma-joined
    pub fn env_bindings(&self) -> Vec<EnvBinding> {
        self.processors
            .iter()
            .map(|p| EnvBinding {
                name: env_binding_name(&p.processor_id),
                value: p.machines.join(","),
            })
            .collect()
    }
}

/// Environment variable name carrying a processor's machine list
pub fn env_binding_name(processor_id: &str) -> String {
    format!("{}{}", ENV_BINDING_PREFIX, processor_id.replace('-', "_"))
}

/// Processor count needed for `machine_count` machines, never below one
pub fn required_processors(machine_count: usize, max_per_processor: usize) -> usize {
    (machine_count / max_per_processor.max(1)).max(1)
}

/// Partition machines round-robin across processors
///
/// Both inputs are sorted first. Each processor is filled up to
/// `max_per_processor` before moving to the next; the last processor
/// absorbs every remaining machine. Processors left without machines are
/// kept in the mapping with an empty set.
pub fn partition(
    machines: &[String],
    processors: &[String],
    max_per_processor: usize,
) -> Result<Assignment, SchedulerError> {
    if processors.is_empty() {
        return Err(SchedulerError::NoProcessors);
    }

    let mut machines = machines.to_vec();
    machines.sort();
    machines.dedup();
    let mut processors = processors.to_vec();
    processors.sort();
    processors.dedup();

    let capacity = max_per_processor.max(1);
    let last = processors.len() - 1;
    let mut remaining = machines.into_iter();

    let processors = processors
        .into_iter()
        .enumerate()
        .map(|(idx, processor_id)| {
            let machines: Vec<String> = if idx == last {
                remaining.by_ref().collect()
            } else {
                remaining.by_ref().take(capacity).collect()
            };
            ProcessorAssignment {
                processor_id,
                machines,
            }
        })
        .collect();

    Ok(Assignment { processors })
}
