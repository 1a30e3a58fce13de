//! Execution stream: the worker that drains a graph
//!
//! A stream attaches to one [`ExecutionGraph`] and, once started, issues its
//! ready nodes on a dedicated thread, one node at a time, lowest id first.
//! The graph lock is released while the node's transport call runs, so
//! callers can keep adding nodes while the stream is running.
//!
//! ```text
//!          start / sync
//!   Idle ───────────────► Running ──┬──► Completed
//!    ▲                              └──► Failed
//!    └────────────── reset ◄──────────────┘
//! ```

use super::dag::GraphState;
use super::node::NodeId;
use super::ExecutionGraph;
use crate::config::StreamParameters;
use crate::error::{Error, Result};
use crate::status::Status;
use parking_lot::Mutex;
use std::fmt;
use std::thread::JoinHandle;

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    Running,
    /// Every node completed
    Completed,
    /// At least one node failed or the stream was aborted
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Runnable instance of an execution graph
pub struct ExecutionStream {
    graph: ExecutionGraph,
    parameters: StreamParameters,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionStream {
    /// Attach a new stream to `graph`
    ///
    /// Fails with [`Error::ResourceBusy`] if another stream is attached.
    pub fn new(graph: ExecutionGraph, parameters: StreamParameters) -> Result<Self> {
        let start = std::time::Instant::now();

        {
            let mut state = graph.lock();
            if state.attached {
                return Err(Error::busy("graph already has an attached stream"));
            }
            state.attached = true;
        }

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(duration_us = duration_us, stream = %parameters.name, "stream_created");

        Ok(Self {
            graph,
            parameters,
            worker: Mutex::new(None),
        })
    }

    /// The graph this stream drains
    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        &self.parameters.name
    }

    pub fn state(&self) -> StreamState {
        self.graph.lock().stream_state
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Most recent failure reported by an issued node
    pub fn last_error(&self) -> Option<Error> {
        self.graph.lock().last_error.clone()
    }

    /// Start draining the graph in the background
    #[tracing::instrument(skip(self), fields(stream = %self.parameters.name))]
    pub fn start(&self) -> Result<()> {
        let mut state = self.graph.lock();
        match state.stream_state {
            StreamState::Idle => {}
            StreamState::Running => return Err(Error::busy("stream is already running")),
            StreamState::Completed | StreamState::Failed => {
                return Err(Error::execution("stream has finished; reset it before starting again"))
            }
        }
        state.stream_state = StreamState::Running;
        drop(state);

        let graph = self.graph.clone();
        let name = self.parameters.name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("rynq-{}", name.replace('\0', "")))
            .spawn(move || drain(graph, name));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.graph.lock().stream_state = StreamState::Idle;
                Err(Error::execution(format!("cannot spawn stream worker: {e}")))
            }
        }
    }

    /// Run the graph to completion and return the aggregate status
    ///
    /// Starts the stream if it is idle. The aggregate is `Ok` (with the
    /// number of issued nodes as `retval`) only if every node completed;
    /// otherwise it is the first failure in issuance order.
    pub fn sync(&self) -> Status {
        if let Err(e) = self.start_if_idle() {
            return Status::failed(e);
        }

        let status = {
            let mut state = self.graph.lock();
            while !state.stream_state.is_terminal() {
                self.graph.shared.changed.wait(&mut state);
            }
            aggregate(&state)
        };
        self.join_worker();
        status
    }

    /// Block until node `id` is terminal and return its status
    pub fn sync_node(&self, id: NodeId) -> Status {
        if let Err(e) = self.start_if_idle() {
            return Status::failed(e);
        }

        let mut state = self.graph.lock();
        loop {
            let Some(node) = state.nodes.get(id.index()) else {
                return Status::failed(Error::UnknownNode(id));
            };
            if node.state.is_terminal() {
                return node.status.clone().unwrap_or_default();
            }
            if state.stream_state.is_terminal() {
                return Status::failed(Error::execution(format!("node {id} was never issued")));
            }
            self.graph.shared.changed.wait(&mut state);
        }
    }

    /// Fail every node that has not been issued yet
    ///
    /// A node already handed to the transport runs to completion.
    pub fn abort(&self) {
        let mut state = self.graph.lock();
        match state.stream_state {
            StreamState::Running => state.abort_requested = true,
            StreamState::Idle => {
                if state.abort_unissued() {
                    state.aborted = true;
                    state.stream_state = StreamState::Failed;
                }
            }
            StreamState::Completed | StreamState::Failed => {}
        }
        drop(state);
        tracing::debug!(stream = %self.parameters.name, "stream_abort_requested");
        self.graph.shared.changed.notify_all();
    }

    /// Return to `Idle` with an empty graph
    pub fn reset(&self) -> Result<()> {
        {
            let mut state = self.graph.lock();
            if state.stream_state == StreamState::Running {
                return Err(Error::busy("cannot reset a running stream"));
            }
            state.clear_nodes();
            reset_stream_side(&mut state);
        }
        self.join_worker();
        Ok(())
    }

    fn start_if_idle(&self) -> Result<()> {
        if self.state() == StreamState::Idle {
            match self.start() {
                // Raced with another caller that started it
                Err(Error::ResourceBusy(_)) => Ok(()),
                other => other,
            }
        } else {
            Ok(())
        }
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(stream = %self.parameters.name, "stream worker panicked");
            }
        }
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        {
            let mut state = self.graph.lock();
            if state.stream_state == StreamState::Running {
                state.abort_requested = true;
            }
        }
        self.graph.shared.changed.notify_all();
        self.join_worker();

        let mut state = self.graph.lock();
        reset_stream_side(&mut state);
        state.attached = false;
    }
}

impl fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("name", &self.parameters.name)
            .field("state", &self.state())
            .finish()
    }
}

fn reset_stream_side(state: &mut GraphState) {
    state.stream_state = StreamState::Idle;
    state.abort_requested = false;
    state.aborted = false;
    state.first_failure = None;
    state.last_error = None;
}

fn aggregate(state: &GraphState) -> Status {
    match state.stream_state {
        StreamState::Completed => Status::ok_with(state.issue_order.len() as i64),
        _ => state
            .first_failure
            .clone()
            .unwrap_or_else(|| Status::failed(Error::execution("stream aborted"))),
    }
}

/// Worker loop: issue ready nodes until none are left
fn drain(graph: ExecutionGraph, name: String) {
    let start = std::time::Instant::now();

    loop {
        let mut state = graph.lock();
        if state.abort_requested && state.abort_unissued() {
            state.aborted = true;
        }

        let Some((id, operation)) = state.issue_next() else {
            state.stream_state = if state.first_failure.is_some() || state.aborted {
                StreamState::Failed
            } else {
                StreamState::Completed
            };
            state.abort_requested = false;

            let duration_us = start.elapsed().as_micros() as u64;
            tracing::debug!(
                duration_us = duration_us,
                stream = %name,
                issued = state.issue_order.len(),
                state = ?state.stream_state,
                "stream_drained"
            );
            drop(state);
            graph.shared.changed.notify_all();
            return;
        };
        drop(state);

        tracing::trace!(stream = %name, node = %id, kind = operation.kind(), "node_issued");
        let status = Status::from(operation.execute());
        match status.error() {
            Some(err) => tracing::warn!(stream = %name, node = %id, error = %err, "node_failed"),
            None => tracing::trace!(stream = %name, node = %id, "node_completed"),
        }

        graph.lock().retire(id, status);
        graph.shared.changed.notify_all();
    }
}
