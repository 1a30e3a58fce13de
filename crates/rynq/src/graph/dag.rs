//! Dependency DAG of scheduled operations
//!
//! Nodes live in an arena indexed by [`NodeId`]. Next to the arena the graph
//! keeps, per node, the list of dependents and the number of dependencies
//! that have not completed yet. A node whose counter reaches zero moves to
//! the ready heap; the attached stream pops the lowest ready id first.

use super::node::{Node, NodeId, NodeState, Operation};
use super::stream::StreamState;
use crate::error::{Error, Result};
use crate::status::Status;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

pub(crate) struct GraphState {
    pub(crate) nodes: Vec<Node>,
    /// `dependents[i]` lists the nodes waiting on node `i`
    pub(crate) dependents: Vec<Vec<NodeId>>,
    /// Dependencies of node `i` not yet completed
    pub(crate) remaining: Vec<usize>,
    pub(crate) ready: BinaryHeap<Reverse<NodeId>>,
    pub(crate) issue_order: Vec<NodeId>,

    // Stream-side bookkeeping; at most one stream is attached
    pub(crate) attached: bool,
    pub(crate) stream_state: StreamState,
    pub(crate) abort_requested: bool,
    pub(crate) aborted: bool,
    /// First failure among issued nodes
    pub(crate) first_failure: Option<Status>,
    pub(crate) last_error: Option<Error>,
}

impl GraphState {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            dependents: Vec::new(),
            remaining: Vec::new(),
            ready: BinaryHeap::new(),
            issue_order: Vec::new(),
            attached: false,
            stream_state: StreamState::Idle,
            abort_requested: false,
            aborted: false,
            first_failure: None,
            last_error: None,
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(Error::UnknownNode(id))
    }

    /// Whether `from` transitively depends on `target`
    fn depends_on(&self, from: NodeId, target: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            stack.extend(self.nodes[id.index()].dependencies.iter().copied());
        }
        false
    }

    fn make_ready(&mut self, id: NodeId) {
        self.nodes[id.index()].state = NodeState::Ready;
        self.ready.push(Reverse(id));
    }

    /// Fail `id` with `status` and every transitive dependent still waiting
    pub(crate) fn poison(&mut self, id: NodeId, status: Status) {
        let mut stack = vec![(id, status)];
        while let Some((id, status)) = stack.pop() {
            let node = &mut self.nodes[id.index()];
            if node.state.is_terminal() || node.state == NodeState::Issued {
                continue;
            }
            node.finish(status);
            let cause = Error::execution(format!("dependency {id} failed"));
            for &dependent in &self.dependents[id.index()] {
                stack.push((dependent, Status::failed(cause.clone())));
            }
        }
    }

    /// Record the outcome of an issued node and release its dependents
    pub(crate) fn retire(&mut self, id: NodeId, status: Status) {
        let index = id.index();
        if status.is_ok() {
            self.nodes[index].finish(status);
            let dependents = self.dependents[index].clone();
            for dependent in dependents {
                let counter = &mut self.remaining[dependent.index()];
                *counter = counter.saturating_sub(1);
                if *counter == 0 && self.nodes[dependent.index()].state == NodeState::Pending {
                    self.make_ready(dependent);
                }
            }
        } else {
            if let Some(err) = status.error() {
                self.last_error = Some(err.clone());
            }
            if self.first_failure.is_none() {
                self.first_failure = Some(status.clone());
            }
            self.nodes[index].finish(status);
            let cause = Error::execution(format!("dependency {id} failed"));
            for dependent in self.dependents[index].clone() {
                self.poison(dependent, Status::failed(cause.clone()));
            }
        }
    }

    /// Fail every node that has not been issued yet
    ///
    /// Returns whether any node was affected.
    pub(crate) fn abort_unissued(&mut self) -> bool {
        let mut any = false;
        for node in self.nodes.iter_mut() {
            if matches!(node.state, NodeState::Pending | NodeState::Ready) {
                node.finish(Status::failed(Error::execution("stream aborted")));
                any = true;
            }
        }
        self.ready.clear();
        any
    }

    /// Pop the next ready node and mark it issued
    pub(crate) fn issue_next(&mut self) -> Option<(NodeId, Arc<Operation>)> {
        while let Some(Reverse(id)) = self.ready.pop() {
            let node = &mut self.nodes[id.index()];
            // Entries go stale when an edge is added to a ready node
            if node.state != NodeState::Ready {
                continue;
            }
            node.state = NodeState::Issued;
            self.issue_order.push(id);
            return Some((id, Arc::clone(&node.operation)));
        }
        None
    }

    pub(crate) fn clear_nodes(&mut self) {
        self.nodes.clear();
        self.dependents.clear();
        self.remaining.clear();
        self.ready.clear();
        self.issue_order.clear();
    }
}

pub(crate) struct GraphShared {
    pub(crate) state: Mutex<GraphState>,
    /// Signalled whenever a node retires or the stream changes state
    pub(crate) changed: Condvar,
}

/// Dependency graph of register and transfer operations
///
/// Cloning is cheap and yields another handle to the same graph. Nodes are
/// added with [`add_node`](Self::add_node) (typically through the `enqueue`
/// calls of accelerators and data movers) and drained by an attached
/// [`ExecutionStream`](super::ExecutionStream).
#[derive(Clone)]
pub struct ExecutionGraph {
    pub(crate) shared: Arc<GraphShared>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(GraphShared {
                state: Mutex::new(GraphState::new()),
                changed: Condvar::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.shared.state.lock()
    }

    /// Insert a node running `operation` after `dependencies`
    ///
    /// Duplicate dependency ids are collapsed. A node whose dependencies all
    /// completed is ready right away; one with a failed dependency is failed
    /// on insertion and never issued. On error the graph is unchanged.
    pub fn add_node(&self, operation: Operation, dependencies: &[NodeId]) -> Result<NodeId> {
        let mut state = self.lock();

        if state.stream_state.is_terminal() {
            return Err(Error::execution(
                "stream has finished; reset it before adding nodes",
            ));
        }

        let mut deps = dependencies.to_vec();
        deps.sort_unstable();
        deps.dedup();
        for &dep in &deps {
            state.node(dep)?;
        }

        // A fresh id has no dependents, so no existing edge can reach it.
        let id = NodeId::new(state.nodes.len());
        let failed_dep = deps
            .iter()
            .copied()
            .find(|dep| state.nodes[dep.index()].state == NodeState::Failed);
        let remaining = deps
            .iter()
            .filter(|dep| state.nodes[dep.index()].state != NodeState::Completed)
            .count();

        tracing::trace!(node = %id, kind = operation.kind(), dependencies = deps.len(), "node_added");

        for &dep in &deps {
            state.dependents[dep.index()].push(id);
        }
        state.nodes.push(Node::new(id, deps, operation));
        state.dependents.push(Vec::new());
        state.remaining.push(remaining);

        if let Some(dep) = failed_dep {
            state.poison(id, Status::failed(Error::execution(format!("dependency {dep} failed"))));
        } else if remaining == 0 {
            state.make_ready(id);
        }

        drop(state);
        self.shared.changed.notify_all();
        Ok(id)
    }

    /// Make `node` wait on `dependency` as well
    ///
    /// Only nodes that have not been issued yet accept new edges. Fails with
    /// [`Error::CycleDetected`] if `dependency` already depends on `node`
    /// (directly, transitively or because they are the same node).
    pub fn add_dependency(&self, node: NodeId, dependency: NodeId) -> Result<()> {
        let mut state = self.lock();
        let current = state.node(node)?.state;
        state.node(dependency)?;

        if !matches!(current, NodeState::Pending | NodeState::Ready) {
            return Err(Error::invalid(format!(
                "node {node} is {current:?}; edges can only be added before it is issued"
            )));
        }
        if state.nodes[node.index()].dependencies.contains(&dependency) {
            return Ok(());
        }
        if state.depends_on(dependency, node) {
            return Err(Error::CycleDetected { node, dependency });
        }

        state.nodes[node.index()].dependencies.push(dependency);
        state.dependents[dependency.index()].push(node);

        match state.nodes[dependency.index()].state {
            NodeState::Completed => {}
            NodeState::Failed => {
                state.poison(
                    node,
                    Status::failed(Error::execution(format!("dependency {dependency} failed"))),
                );
            }
            _ => {
                state.remaining[node.index()] += 1;
                if current == NodeState::Ready {
                    state.nodes[node.index()].state = NodeState::Pending;
                }
            }
        }

        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        Ok(self.lock().node(id)?.state)
    }

    /// Recorded outcome of `id`; `None` until the node is terminal
    pub fn status(&self, id: NodeId) -> Result<Option<Status>> {
        Ok(self.lock().node(id)?.status.clone())
    }

    pub fn dependencies(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.lock().node(id)?.dependencies.clone())
    }

    /// Ids in the order the stream issued them
    pub fn issue_order(&self) -> Vec<NodeId> {
        self.lock().issue_order.clone()
    }

    /// Discard every node
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        if state.stream_state == StreamState::Running {
            return Err(Error::busy("graph is being drained by a running stream"));
        }
        state.clear_nodes();
        Ok(())
    }
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ExecutionGraph")
            .field("nodes", &state.nodes.len())
            .field("stream_state", &state.stream_state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::Accelerator;
    use crate::platform::SimulatedBus;

    fn write_op(address: u64) -> Operation {
        let accelerator = Accelerator::from_bus(Arc::new(SimulatedBus::new(0x100)));
        Operation::RegisterWrite {
            accelerator,
            address,
            data: vec![1, 0, 0, 0],
        }
    }

    #[test]
    fn test_node_without_dependencies_is_ready() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        assert_eq!(graph.state(a).unwrap(), NodeState::Ready);
        assert_eq!(graph.status(a).unwrap(), None);
    }

    #[test]
    fn test_unknown_dependency_leaves_graph_unchanged() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        let err = graph.add_node(write_op(4), &[a, NodeId::new(9)]).unwrap_err();
        assert_eq!(err, Error::UnknownNode(NodeId::new(9)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        let b = graph.add_node(write_op(4), &[a, a, a]).unwrap();
        assert_eq!(graph.dependencies(b).unwrap(), vec![a]);
        assert_eq!(graph.state(b).unwrap(), NodeState::Pending);
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        assert_eq!(
            graph.add_dependency(a, a),
            Err(Error::CycleDetected { node: a, dependency: a })
        );
    }

    #[test]
    fn test_ready_node_becomes_pending_with_new_edge() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        let b = graph.add_node(write_op(4), &[]).unwrap();
        graph.add_dependency(a, b).unwrap();
        assert_eq!(graph.state(a).unwrap(), NodeState::Pending);
        assert_eq!(graph.dependencies(a).unwrap(), vec![b]);
    }

    #[test]
    fn test_issue_next_prefers_lowest_id_and_skips_stale_entries() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        let b = graph.add_node(write_op(4), &[]).unwrap();
        let c = graph.add_node(write_op(8), &[]).unwrap();
        graph.add_dependency(a, c).unwrap();

        let mut state = graph.lock();
        assert_eq!(state.issue_next().map(|(id, _)| id), Some(b));
        assert_eq!(state.issue_next().map(|(id, _)| id), Some(c));
        assert_eq!(state.issue_next().map(|(id, _)| id), None);
    }

    #[test]
    fn test_retire_failure_poisons_transitive_dependents() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        let b = graph.add_node(write_op(4), &[a]).unwrap();
        let c = graph.add_node(write_op(8), &[b]).unwrap();
        let d = graph.add_node(write_op(12), &[]).unwrap();

        {
            let mut state = graph.lock();
            let (id, _) = state.issue_next().unwrap();
            assert_eq!(id, a);
            state.retire(a, Status::failed(Error::io("bus fault")));
        }

        assert_eq!(graph.state(b).unwrap(), NodeState::Failed);
        assert_eq!(graph.state(c).unwrap(), NodeState::Failed);
        assert_eq!(graph.state(d).unwrap(), NodeState::Ready);
        assert_eq!(graph.lock().first_failure, Some(Status::failed(Error::io("bus fault"))));
    }

    #[test]
    fn test_node_with_failed_dependency_fails_on_insertion() {
        let graph = ExecutionGraph::new();
        let a = graph.add_node(write_op(0), &[]).unwrap();
        {
            let mut state = graph.lock();
            state.issue_next();
            state.retire(a, Status::failed(Error::io("bus fault")));
        }
        let b = graph.add_node(write_op(4), &[a]).unwrap();
        assert_eq!(graph.state(b).unwrap(), NodeState::Failed);
        assert!(graph.issue_order().iter().all(|&id| id != b));
    }

    #[test]
    fn test_clear_discards_nodes() {
        let graph = ExecutionGraph::new();
        graph.add_node(write_op(0), &[]).unwrap();
        graph.clear().unwrap();
        assert!(graph.is_empty());
    }
}
