//! Dependency ordering, cycle rejection and failure propagation

mod common;

use proptest::prelude::*;
use rynq::platform::SimulatedBus;
use rynq::{
    Accelerator, Error, ExecutionGraph, ExecutionStream, NodeId, NodeState, StatusCode, StreamParameters,
    StreamState,
};
use std::sync::Arc;

const WINDOW: usize = 0x100;

fn stream(name: &str) -> ExecutionStream {
    ExecutionStream::new(ExecutionGraph::new(), StreamParameters::named(name)).unwrap()
}

/// Node `i` writes `i` into register `4 * i`
fn build_dag(accel: &Accelerator, graph: &ExecutionGraph, edges: &[Vec<usize>]) -> Vec<Vec<NodeId>> {
    let mut dependencies = Vec::with_capacity(edges.len());
    let mut ids = Vec::with_capacity(edges.len());
    for (i, picks) in edges.iter().enumerate() {
        let deps: Vec<NodeId> = if i == 0 {
            Vec::new()
        } else {
            picks.iter().map(|p| ids[p % i]).collect()
        };
        let id = accel
            .enqueue_write(graph, 4 * i as u64, &(i as u32).to_le_bytes(), &deps)
            .unwrap();
        assert_eq!(id, NodeId::new(i));
        ids.push(id);
        dependencies.push(deps);
    }
    dependencies
}

fn position(order: &[NodeId], id: NodeId) -> Option<usize> {
    order.iter().position(|&n| n == id)
}

fn dag_edges() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(any::<usize>(), 0..4), 1..32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_node_is_issued_once_after_its_dependencies(edges in dag_edges()) {
        let bus = Arc::new(SimulatedBus::new(WINDOW));
        let accel = Accelerator::from_bus(bus.clone());
        let stream = stream("prop");
        let dependencies = build_dag(&accel, stream.graph(), &edges);

        let status = stream.sync();
        prop_assert!(status.is_ok(), "{}", status.message());
        prop_assert_eq!(status.retval(), edges.len() as i64);

        let order = stream.graph().issue_order();
        prop_assert_eq!(order.len(), edges.len());
        let mut seen = order.clone();
        seen.sort();
        seen.dedup();
        prop_assert_eq!(seen.len(), edges.len());

        for (i, deps) in dependencies.iter().enumerate() {
            let at = position(&order, NodeId::new(i)).unwrap();
            for dep in deps {
                prop_assert!(position(&order, *dep).unwrap() < at);
            }
            prop_assert_eq!(stream.graph().state(NodeId::new(i)).unwrap(), NodeState::Completed);
            prop_assert_eq!(bus.peek(4 * i, 4), (i as u32).to_le_bytes().to_vec());
        }
    }

    #[test]
    fn a_failure_poisons_exactly_its_dependents(edges in dag_edges(), pick in any::<usize>()) {
        let bus = Arc::new(SimulatedBus::new(WINDOW));
        let accel = Accelerator::from_bus(bus.clone());
        let stream = stream("prop-fail");
        let dependencies = build_dag(&accel, stream.graph(), &edges);

        let failing = pick % edges.len();
        bus.inject_fault(4 * failing as u64, 4);

        // Dependencies always have lower ids, so one forward pass finds
        // every transitive dependent
        let mut doomed = vec![false; edges.len()];
        for i in 0..edges.len() {
            doomed[i] = i == failing || dependencies[i].iter().any(|d| doomed[d.index()]);
        }

        let status = stream.sync();
        prop_assert_eq!(status.code(), StatusCode::RegisterIoError);
        prop_assert_eq!(stream.state(), StreamState::Failed);

        let order = stream.graph().issue_order();
        for i in 0..edges.len() {
            let id = NodeId::new(i);
            let state = stream.graph().state(id).unwrap();
            if doomed[i] {
                prop_assert_eq!(state, NodeState::Failed);
                prop_assert_eq!(position(&order, id).is_some(), i == failing);
            } else {
                prop_assert_eq!(state, NodeState::Completed);
                prop_assert!(position(&order, id).is_some());
            }
        }
    }
}

#[test]
fn test_ready_nodes_issue_lowest_id_first() {
    let accel = Accelerator::from_bus(Arc::new(SimulatedBus::new(WINDOW)));
    let stream = stream("order");
    let graph = stream.graph();

    let a = accel.enqueue_write(graph, 0x00, &[1, 0, 0, 0], &[]).unwrap();
    let b = accel.enqueue_write(graph, 0x04, &[2, 0, 0, 0], &[]).unwrap();
    let c = accel.enqueue_write(graph, 0x08, &[3, 0, 0, 0], &[a]).unwrap();
    let d = accel.enqueue_write(graph, 0x0C, &[4, 0, 0, 0], &[]).unwrap();

    assert!(stream.sync().is_ok());
    assert_eq!(graph.issue_order(), vec![a, b, c, d]);
}

#[test]
fn test_cycle_is_rejected_and_graph_unchanged() {
    let accel = Accelerator::from_bus(Arc::new(SimulatedBus::new(WINDOW)));
    let stream = stream("cycle");
    let graph = stream.graph();

    let a = accel.enqueue_write(graph, 0x00, &[1, 0, 0, 0], &[]).unwrap();
    let b = accel.enqueue_write(graph, 0x04, &[2, 0, 0, 0], &[a]).unwrap();
    let c = accel.enqueue_write(graph, 0x08, &[3, 0, 0, 0], &[b]).unwrap();

    assert_eq!(
        graph.add_dependency(a, c),
        Err(Error::CycleDetected { node: a, dependency: c })
    );
    assert_eq!(
        graph.add_dependency(b, b),
        Err(Error::CycleDetected { node: b, dependency: b })
    );
    assert!(graph.dependencies(a).unwrap().is_empty());
    assert_eq!(graph.dependencies(b).unwrap(), vec![a]);
    assert_eq!(graph.state(a).unwrap(), NodeState::Ready);

    assert!(stream.sync().is_ok());
    assert_eq!(graph.issue_order(), vec![a, b, c]);
}

#[test]
fn test_added_dependency_delays_a_ready_node() {
    let accel = Accelerator::from_bus(Arc::new(SimulatedBus::new(WINDOW)));
    let stream = stream("late-edge");
    let graph = stream.graph();

    let a = accel.enqueue_write(graph, 0x00, &[1, 0, 0, 0], &[]).unwrap();
    let b = accel.enqueue_write(graph, 0x04, &[2, 0, 0, 0], &[]).unwrap();
    graph.add_dependency(a, b).unwrap();
    assert_eq!(graph.state(a).unwrap(), NodeState::Pending);
    // Repeating an existing edge changes nothing
    graph.add_dependency(a, b).unwrap();
    assert_eq!(graph.dependencies(a).unwrap(), vec![b]);

    assert!(stream.sync().is_ok());
    assert_eq!(graph.issue_order(), vec![b, a]);
}

#[test]
fn test_unknown_dependency_inserts_nothing() {
    let accel = Accelerator::from_bus(Arc::new(SimulatedBus::new(WINDOW)));
    let graph = ExecutionGraph::new();
    let err = accel
        .enqueue_write(&graph, 0, &[0, 0, 0, 0], &[NodeId::new(7)])
        .unwrap_err();
    assert_eq!(err, Error::UnknownNode(NodeId::new(7)));
    assert!(graph.is_empty());
}

#[test]
fn test_failure_spares_independent_siblings() {
    common::init_tracing();
    let bus = Arc::new(SimulatedBus::new(WINDOW));
    let accel = Accelerator::from_bus(bus.clone());
    let stream = stream("siblings");
    let graph = stream.graph();
    bus.inject_fault(0x00, 4);

    let a = accel.enqueue_write(graph, 0x00, &[1, 0, 0, 0], &[]).unwrap();
    let b = accel.enqueue_write(graph, 0x04, &[2, 0, 0, 0], &[a]).unwrap();
    let c = accel.enqueue_write(graph, 0x08, &[3, 0, 0, 0], &[]).unwrap();
    let (d, value) = accel.enqueue_read(graph, 0x08, 4, &[c]).unwrap();

    let status = stream.sync();
    assert_eq!(status.code(), StatusCode::RegisterIoError);
    assert_eq!(stream.last_error(), Some(Error::io("bus fault at 0x0")));

    assert_eq!(graph.state(a).unwrap(), NodeState::Failed);
    assert_eq!(graph.state(b).unwrap(), NodeState::Failed);
    assert_eq!(graph.state(c).unwrap(), NodeState::Completed);
    assert_eq!(graph.state(d).unwrap(), NodeState::Completed);
    assert_eq!(value.value::<u32>().unwrap(), 3);

    assert!(!graph.issue_order().contains(&b));
    assert_eq!(bus.peek(0x04, 4), vec![0; 4]);
    let cause = graph.status(b).unwrap().unwrap();
    assert!(cause.message().contains("dependency #0 failed"), "{}", cause.message());
}

#[test]
fn test_node_added_after_failed_dependency_is_failed_immediately() {
    let bus = Arc::new(SimulatedBus::new(WINDOW));
    let accel = Accelerator::from_bus(bus.clone());
    let graph = ExecutionGraph::new();
    let stream = ExecutionStream::new(graph.clone(), StreamParameters::named("late")).unwrap();
    bus.inject_fault(0x00, 4);

    let a = accel.enqueue_write(&graph, 0x00, &[1, 0, 0, 0], &[]).unwrap();
    assert_eq!(stream.sync_node(a).code(), StatusCode::RegisterIoError);
    assert!(!stream.sync().is_ok());
    assert_eq!(graph.state(a).unwrap(), NodeState::Failed);

    // The stream is terminal now; new work needs a reset first
    assert!(matches!(
        accel.enqueue_write(&graph, 0x04, &[0; 4], &[a]),
        Err(Error::ExecutionFailed(_))
    ));
}
