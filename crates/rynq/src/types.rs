//! Value types shared by every backend

use crate::graph::{ExecutionGraph, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device-visible address
///
/// Opaque to the core: produced by a backend's allocator and only ever
/// passed back into backend calls, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(pub u64);

impl DeviceAddress {
    /// Create a new device address
    pub const fn new(raw: u64) -> Self {
        DeviceAddress(raw)
    }

    /// Get the raw value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{:#x}", self.0)
    }
}

/// Direction of a host/device synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    HostToDevice,
    DeviceToHost,
}

/// Accelerator start mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartMode {
    /// Run a single invocation
    Once,
    /// Run with auto-restart set
    Continuous,
}

/// Decoded accelerator or data-mover state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Unknown,
    Done,
    Idle,
    Running,
    Error,
}

/// Placement requested for a memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Host-visible and device-visible with explicit synchronisation
    #[default]
    Dual,
    /// Host-cacheable
    Cacheable,
    /// Host only
    Host,
    /// Device only
    Device,
}

/// Selects how an operation executes
///
/// `Immediate` blocks the caller until the transport completes. `Graph`
/// inserts a node into `graph` after `dependencies` and returns right away;
/// the attached stream performs the transport later.
#[derive(Clone, Copy)]
pub enum ExecutionType<'g> {
    Immediate,
    Graph {
        graph: &'g ExecutionGraph,
        dependencies: &'g [NodeId],
    },
}

impl<'g> ExecutionType<'g> {
    /// Graph-scheduled execution after `dependencies`
    pub fn graph(graph: &'g ExecutionGraph, dependencies: &'g [NodeId]) -> Self {
        Self::Graph { graph, dependencies }
    }
}

impl fmt::Debug for ExecutionType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Graph { dependencies, .. } => f.debug_struct("Graph").field("dependencies", dependencies).finish(),
        }
    }
}

/// What an operation submitted through [`ExecutionType`] resulted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The operation ran to completion
    Completed,
    /// The operation was enqueued as the given node
    Enqueued(NodeId),
}

impl Submission {
    /// Node id, if the operation was enqueued
    pub fn node(self) -> Option<NodeId> {
        match self {
            Self::Completed => None,
            Self::Enqueued(id) => Some(id),
        }
    }
}
