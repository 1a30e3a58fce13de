//! Graph nodes and the operations they carry

use crate::accelerator::Accelerator;
use crate::datamover::{DataMover, TransferDirection};
use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::status::Status;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Index of a node in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a node
///
/// ```text
/// Pending ──► Ready ──► Issued ──► Completed
///    │          │          └─────► Failed
///    └──────────┴────────────────► Failed (poisoned or aborted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Waiting for dependencies
    Pending,
    /// Every dependency completed; waiting to be issued
    Ready,
    /// Handed to the transport
    Issued,
    Completed,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Destination of a scheduled register read
///
/// Cheap to clone; every clone sees the same bytes. Holds zeros until the
/// read node completes.
#[derive(Clone, Default)]
pub struct RegisterBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl RegisterBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Contents reinterpreted as a value of `T`
    pub fn value<T: bytemuck::Pod>(&self) -> Result<T> {
        let bytes = self.bytes.lock();
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(Error::invalid(format!(
                "register buffer holds {} bytes, {} requested",
                bytes.len(),
                std::mem::size_of::<T>()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    pub(crate) fn fill_from(&self, accelerator: &Accelerator, address: u64) -> Result<usize> {
        let mut bytes = self.bytes.lock();
        accelerator.read_register(address, &mut bytes)?;
        Ok(bytes.len())
    }
}

impl fmt::Debug for RegisterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RegisterBuffer").field(&*self.bytes.lock()).finish()
    }
}

/// Work carried by a node
///
/// Issuing an operation calls the same primitive the immediate form of the
/// call uses.
#[derive(Clone)]
pub enum Operation {
    RegisterRead {
        accelerator: Accelerator,
        address: u64,
        target: RegisterBuffer,
    },
    RegisterWrite {
        accelerator: Accelerator,
        address: u64,
        data: Vec<u8>,
    },
    MemoryUpload {
        mover: DataMover,
        memory: Arc<Memory>,
        size: usize,
        offset: usize,
    },
    MemoryDownload {
        mover: DataMover,
        memory: Arc<Memory>,
        size: usize,
        offset: usize,
    },
}

impl Operation {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterRead { .. } => "register_read",
            Self::RegisterWrite { .. } => "register_write",
            Self::MemoryUpload { .. } => "memory_upload",
            Self::MemoryDownload { .. } => "memory_download",
        }
    }

    /// Run the operation; returns the number of bytes moved
    pub(crate) fn execute(&self) -> Result<i64> {
        let moved = match self {
            Self::RegisterRead {
                accelerator,
                address,
                target,
            } => target.fill_from(accelerator, *address)?,
            Self::RegisterWrite {
                accelerator,
                address,
                data,
            } => {
                accelerator.write_register(*address, data)?;
                data.len()
            }
            Self::MemoryUpload {
                mover,
                memory,
                size,
                offset,
            } => {
                mover.transfer(TransferDirection::Upload, memory, *size, *offset)?;
                *size
            }
            Self::MemoryDownload {
                mover,
                memory,
                size,
                offset,
            } => {
                mover.transfer(TransferDirection::Download, memory, *size, *offset)?;
                *size
            }
        };
        Ok(moved as i64)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegisterRead { address, target, .. } => f
                .debug_struct("RegisterRead")
                .field("address", &format_args!("{address:#x}"))
                .field("len", &target.len())
                .finish(),
            Self::RegisterWrite { address, data, .. } => f
                .debug_struct("RegisterWrite")
                .field("address", &format_args!("{address:#x}"))
                .field("len", &data.len())
                .finish(),
            Self::MemoryUpload { size, offset, .. } => f
                .debug_struct("MemoryUpload")
                .field("size", size)
                .field("offset", offset)
                .finish(),
            Self::MemoryDownload { size, offset, .. } => f
                .debug_struct("MemoryDownload")
                .field("size", size)
                .field("offset", offset)
                .finish(),
        }
    }
}

/// One scheduled operation
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) dependencies: Vec<NodeId>,
    pub(crate) operation: Arc<Operation>,
    pub(crate) state: NodeState,
    pub(crate) status: Option<Status>,
}

impl Node {
    pub(crate) fn new(id: NodeId, dependencies: Vec<NodeId>, operation: Operation) -> Self {
        Self {
            id,
            dependencies,
            operation: Arc::new(operation),
            state: NodeState::Pending,
            status: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Recorded outcome, set once the node is terminal
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub(crate) fn finish(&mut self, status: Status) {
        self.state = if status.is_ok() {
            NodeState::Completed
        } else {
            NodeState::Failed
        };
        self.status = Some(status);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("operation", &self.operation)
            .field("state", &self.state)
            .finish()
    }
}
