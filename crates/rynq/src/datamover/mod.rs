//! Bulk transfers between host buffers and device memory
//!
//! [`DataMover`] is the backend-independent handle. Uploads move host bytes
//! of a [`Memory`] to the device, downloads move them back. Both can run
//! immediately or be enqueued on an [`ExecutionGraph`](crate::ExecutionGraph)
//! through [`ExecutionType`].
//!
//! # Backends
//!
//! ```text
//! ┌─────────────────┬────────────────────────────────────────────────┐
//! │ DmaDataMover    │ AXI DMA engine, direct-register mode           │
//! │ VendorDataMover │ synchronous copy through a vendor runtime      │
//! └─────────────────┴────────────────────────────────────────────────┘
//! ```

pub mod dma;
mod vendor;

pub use dma::{DmaChannel, DmaDataMover, DMA_REGISTER_WINDOW};
pub use vendor::VendorDataMover;

use crate::error::{Error, Result};
use crate::graph::Operation;
use crate::memory::{check_extent, Memory};
use crate::platform::DeviceMemory;
use crate::types::{DeviceStatus, ExecutionType, MemoryType, Submission};
use std::fmt;
use std::sync::Arc;

/// Direction of a bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// Host to device
    Upload,
    /// Device to host
    Download,
}

/// Transfer engine behind a [`DataMover`]
///
/// `transfer` receives ranges already checked against the memory object.
pub trait TransferBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Device memory this engine can reach
    fn device_memory(&self) -> Arc<dyn DeviceMemory>;

    /// Move `size` bytes at `offset` of `memory`, blocking until done
    fn transfer(&self, direction: TransferDirection, memory: &Memory, size: usize, offset: usize) -> Result<()>;

    fn status(&self) -> DeviceStatus;
}

/// Handle to a transfer engine
///
/// Cloning is cheap; clones drive the same engine.
#[derive(Clone)]
pub struct DataMover {
    backend: Arc<dyn TransferBackend>,
}

impl DataMover {
    pub fn new(backend: Arc<dyn TransferBackend>) -> Self {
        Self { backend }
    }

    /// Allocate a memory object reachable by this engine
    pub fn allocate(&self, size: usize, kind: MemoryType) -> Result<Arc<Memory>> {
        Memory::allocate(self.backend.device_memory(), size, kind).map(Arc::new)
    }

    /// Move `size` bytes at `offset` from the host buffer to the device
    pub fn upload(
        &self,
        memory: &Arc<Memory>,
        size: usize,
        offset: usize,
        execution: ExecutionType<'_>,
    ) -> Result<Submission> {
        self.submit(TransferDirection::Upload, memory, size, offset, execution)
    }

    /// Move `size` bytes at `offset` from the device to the host buffer
    pub fn download(
        &self,
        memory: &Arc<Memory>,
        size: usize,
        offset: usize,
        execution: ExecutionType<'_>,
    ) -> Result<Submission> {
        self.submit(TransferDirection::Download, memory, size, offset, execution)
    }

    pub fn status(&self) -> DeviceStatus {
        self.backend.status()
    }

    fn submit(
        &self,
        direction: TransferDirection,
        memory: &Arc<Memory>,
        size: usize,
        offset: usize,
        execution: ExecutionType<'_>,
    ) -> Result<Submission> {
        validate(memory, size, offset)?;
        match execution {
            ExecutionType::Immediate => {
                self.transfer(direction, memory, size, offset)?;
                Ok(Submission::Completed)
            }
            ExecutionType::Graph { graph, dependencies } => {
                let mover = self.clone();
                let memory = Arc::clone(memory);
                let operation = match direction {
                    TransferDirection::Upload => Operation::MemoryUpload {
                        mover,
                        memory,
                        size,
                        offset,
                    },
                    TransferDirection::Download => Operation::MemoryDownload {
                        mover,
                        memory,
                        size,
                        offset,
                    },
                };
                graph.add_node(operation, dependencies).map(Submission::Enqueued)
            }
        }
    }

    /// Validated transfer; shared by the immediate path and graph nodes
    #[tracing::instrument(skip(self, memory), fields(backend = self.backend.name()))]
    pub(crate) fn transfer(
        &self,
        direction: TransferDirection,
        memory: &Memory,
        size: usize,
        offset: usize,
    ) -> Result<()> {
        let start = std::time::Instant::now();
        validate(memory, size, offset)?;
        self.backend.transfer(direction, memory, size, offset)?;

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            duration_us = duration_us,
            direction = ?direction,
            size = size,
            "transfer_complete"
        );
        Ok(())
    }
}

fn validate(memory: &Memory, size: usize, offset: usize) -> Result<()> {
    if size == 0 {
        return Err(Error::invalid("transfer size must be non-zero"));
    }
    check_extent(size, offset, memory.size())?;
    memory.device_address().map(|_| ())
}

impl fmt::Debug for DataMover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMover").field("backend", &self.backend.name()).finish()
    }
}
