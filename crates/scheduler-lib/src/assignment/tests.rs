//! Partitioning properties and end-to-end scheduling scenarios

use super::*;
use crate::bus::{topics, InMemoryBus};
use crate::models::ControlCommand;
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::orchestrator::{Orchestrator, SimulatedCluster, SimulatedDeployment};
use std::collections::BTreeMap;
use std::sync::Arc;

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
}

fn labels(app: &str) -> BTreeMap<String, String> {
    [("app".to_string(), app.to_string())].into()
}

fn engine(cluster: Arc<SimulatedCluster>, bus: Arc<InMemoryBus>) -> AssignmentEngine {
    AssignmentEngine::new(
        cluster,
        bus,
        AssignmentConfig::default(),
        SchedulerMetrics::new(),
        StructuredLogger::new("test"),
    )
}

#[test]
fn test_seven_machines_capacity_two() {
    let assignment = partition(&ids("m", 7), &ids("p", 3), 2).unwrap();

    assert_eq!(required_processors(7, 2), 3);
    assert_eq!(assignment.machines_for("p1").unwrap(), ["m1", "m2"]);
    assert_eq!(assignment.machines_for("p2").unwrap(), ["m3", "m4"]);
    assert_eq!(assignment.machines_for("p3").unwrap(), ["m5", "m6", "m7"]);
}

#[test]
fn test_every_machine_assigned_exactly_once() {
    for machines in 0..25 {
        for processors in 1..6 {
            for capacity in 1..5 {
                let machine_ids = ids("m", machines);
                let assignment =
                    partition(&machine_ids, &ids("p", processors), capacity).unwrap();

                assert_eq!(assignment.machine_count(), machines);
                for m in &machine_ids {
                    assert!(assignment.processor_for(m).is_some(), "{m} unassigned");
                }

                // Only the last processor may exceed capacity
                let entries = assignment.entries();
                for entry in &entries[..entries.len() - 1] {
                    assert!(entry.machines.len() <= capacity);
                }
            }
        }
    }
}

#[test]
fn test_partition_is_order_independent() {
    let machines = vec!["m3".to_string(), "m1".to_string(), "m2".to_string()];
    let processors = vec!["p2".to_string(), "p1".to_string()];

    let a = partition(&machines, &processors, 1).unwrap();
    let b = partition(&ids("m", 3), &ids("p", 2), 1).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.processors().collect::<Vec<_>>(), ["p1", "p2"]);
}

#[test]
fn test_fewer_machines_leaves_empty_processors() {
    let assignment = partition(&ids("m", 1), &ids("p", 3), 2).unwrap();
    assert_eq!(assignment.processor_count(), 3);
    assert!(assignment.machines_for("p2").unwrap().is_empty());
}

#[test]
fn test_partition_without_processors() {
    let err = partition(&ids("m", 3), &[], 2).unwrap_err();
    assert!(matches!(err, SchedulerError::NoProcessors));
}

#[test]
fn test_required_processors_floor_and_clamp() {
    assert_eq!(required_processors(4, 2), 2);
    assert_eq!(required_processors(5, 2), 2);
    assert_eq!(required_processors(1, 2), 1);
    assert_eq!(required_processors(0, 2), 1);
    assert_eq!(required_processors(6, 0), 6);
}

#[test]
fn test_env_bindings() {
    let assignment = partition(&ids("m", 3), &["processor-a".to_string()], 2).unwrap();
    let bindings = assignment.env_bindings();

    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].name, "ASSIGNED_MACHINES_processor_a");
    assert_eq!(bindings[0].value, "m1,m2,m3");
}

#[tokio::test(start_paused = true)]
async fn test_schedule_applies_assignment() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(SimulatedDeployment::new("machine", labels("machine")).with_pod_names(ids("m", 7)));
    cluster.add_deployment(SimulatedDeployment::new("processor", labels("processor")).with_pod_names(ids("p", 3)));
    let bus = Arc::new(InMemoryBus::new());
    let engine = engine(cluster.clone(), bus.clone());

    let assignment = engine.schedule().await.unwrap();

    assert_eq!(assignment.machines_for("p3").unwrap(), ["m5", "m6", "m7"]);
    assert_eq!(cluster.scale_calls(), 0);

    let env = cluster.env_bindings("processor", "processor");
    assert_eq!(env.len(), 3);
    assert_eq!(env[0].name, "ASSIGNED_MACHINES_p1");
    assert_eq!(env[0].value, "m1,m2");

    let retained = bus.retained(&topics::control("p2")).unwrap();
    let command: ControlCommand = serde_json::from_slice(&retained).unwrap();
    assert_eq!(command, ControlCommand::assign(["m3", "m4"]));

    assert_eq!(engine.latest().await, Some(assignment));
}

#[tokio::test(start_paused = true)]
async fn test_schedule_is_idempotent() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(SimulatedDeployment::new("machine", labels("machine")).with_pod_names(ids("m", 7)));
    cluster.add_deployment(SimulatedDeployment::new("processor", labels("processor")).with_pod_names(ids("p", 3)));
    let engine = engine(cluster.clone(), Arc::new(InMemoryBus::new()));

    let first = engine.schedule().await.unwrap();
    let second = engine.schedule().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cluster.scale_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_rescales_processor_pool() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(SimulatedDeployment::new("machine", labels("machine")).with_pod_names(ids("m", 8)));
    cluster.add_deployment(
        SimulatedDeployment::new("processor", labels("processor"))
            .with_replicas(1)
            .with_ready_delay(std::time::Duration::from_secs(5)),
    );
    let engine = engine(cluster.clone(), Arc::new(InMemoryBus::new()));

    let assignment = engine.schedule().await.unwrap();

    assert_eq!(cluster.scale_calls(), 1);
    assert_eq!(cluster.read_replica_count("processor").await.unwrap(), 4);
    assert_eq!(assignment.machine_count(), 8);
    assert!(assignment.processor_count() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_times_out_without_machines() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(SimulatedDeployment::new("machine", labels("machine")).with_pod_names(ids("m", 3)));
    cluster.add_deployment(SimulatedDeployment::new("processor", labels("processor")).with_pod_names(ids("p", 2)));
    let engine = engine(cluster.clone(), Arc::new(InMemoryBus::new()));

    let err = engine.schedule().await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(cluster.scale_calls(), 0);
    assert!(engine.latest().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_schedule_survives_publish_failure() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(SimulatedDeployment::new("machine", labels("machine")).with_pod_names(ids("m", 5)));
    cluster.add_deployment(SimulatedDeployment::new("processor", labels("processor")).with_pod_names(ids("p", 2)));
    let bus = Arc::new(InMemoryBus::new());
    bus.set_fail_publishes(true);
    let engine = engine(cluster.clone(), bus.clone());

    let assignment = engine.schedule().await.unwrap();

    assert_eq!(assignment.machine_count(), 5);
    assert!(bus.published().is_empty());
    assert_eq!(cluster.patch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_propagates_platform_failure() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(SimulatedDeployment::new("machine", labels("machine")).with_pod_names(ids("m", 6)));
    cluster.add_deployment(SimulatedDeployment::new("processor", labels("processor")).with_pod_names(ids("p", 1)));
    cluster.set_fail_scale(true);
    let engine = engine(cluster.clone(), Arc::new(InMemoryBus::new()));

    let err = engine.schedule().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Orchestrator(_)));
}
