//! Register I/O on accelerators
//!
//! [`Accelerator`] is the backend-independent handle. Every access, whether
//! issued immediately or through a graph node, is validated the same way
//! before it reaches the backend:
//!
//! - the address must be a multiple of the backend register width
//!   ([`Error::RegisterNotAligned`])
//! - the payload must be non-empty and fit in the address space
//!   ([`Error::InvalidParameter`], [`Error::RegisterOutOfBounds`])
//!
//! # Backends
//!
//! ```text
//! ┌───────────────────┬──────────────────────────────────────────────┐
//! │ MmioAccelerator   │ memory-mapped window, one lock per window    │
//! │ VendorAccelerator │ kernel registers through a vendor runtime    │
//! └───────────────────┴──────────────────────────────────────────────┘
//! ```

mod mmio;
mod vendor;

pub use mmio::MmioAccelerator;
pub use vendor::VendorAccelerator;

use crate::error::{Error, Result};
use crate::graph::{ExecutionGraph, NodeId, Operation, RegisterBuffer};
use crate::memory::Memory;
use crate::platform::RegisterBus;
use crate::types::{DeviceStatus, ExecutionType, StartMode, Submission};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Offset of the HLS AXI-lite control register
pub const CONTROL_REGISTER: u64 = 0x00;

/// Control value starting a single invocation
pub const CONTROL_START: u32 = 0x01;

/// Control value starting with auto-restart
pub const CONTROL_START_CONTINUOUS: u32 = 0x81;

/// Register width used when none is configured
pub const DEFAULT_REGISTER_WIDTH: usize = 4;

/// Register transport of one accelerator
///
/// Implementations perform the access; validation happens in
/// [`Accelerator`] before any call reaches them.
pub trait RegisterBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Register width in bytes; accesses must be aligned to it
    fn register_width(&self) -> usize;

    /// Size of the register address space in bytes
    fn address_space(&self) -> u64;

    fn read(&self, address: u64, data: &mut [u8]) -> Result<()>;

    fn write(&self, address: u64, data: &[u8]) -> Result<()>;
}

/// Handle to an accelerator's register space
///
/// Cloning is cheap; clones address the same accelerator.
#[derive(Clone)]
pub struct Accelerator {
    backend: Arc<dyn RegisterBackend>,
}

impl Accelerator {
    pub fn new(backend: Arc<dyn RegisterBackend>) -> Self {
        Self { backend }
    }

    /// Accelerator on a bare register window with 4-byte registers
    ///
    /// The window gets a lock of its own; use
    /// [`Hardware::accelerator`](crate::Hardware::accelerator) to share
    /// locks between accelerators on the same window.
    pub fn from_bus(bus: Arc<dyn RegisterBus>) -> Self {
        Self::new(Arc::new(MmioAccelerator::with_lock(
            bus,
            Arc::new(Mutex::new(())),
            DEFAULT_REGISTER_WIDTH,
        )))
    }

    pub fn register_width(&self) -> usize {
        self.backend.register_width()
    }

    pub fn address_space(&self) -> u64 {
        self.backend.address_space()
    }

    fn validate(&self, address: u64, len: usize) -> Result<()> {
        let width = self.backend.register_width();
        if address % width as u64 != 0 {
            return Err(Error::RegisterNotAligned { address, width });
        }
        if len == 0 {
            return Err(Error::invalid("register access needs a non-empty payload"));
        }
        let space = self.backend.address_space();
        match address.checked_add(len as u64) {
            Some(end) if end <= space => Ok(()),
            _ => Err(Error::RegisterOutOfBounds {
                address,
                size: len,
                space,
            }),
        }
    }

    /// Read `data.len()` bytes starting at `address`
    #[tracing::instrument(skip(self, data), fields(backend = self.backend.name(), len = data.len()))]
    pub fn read_register(&self, address: u64, data: &mut [u8]) -> Result<()> {
        self.validate(address, data.len())?;
        self.backend.read(address, data)
    }

    /// Write `data` starting at `address`
    #[tracing::instrument(skip(self, data), fields(backend = self.backend.name(), len = data.len()))]
    pub fn write_register(&self, address: u64, data: &[u8]) -> Result<()> {
        self.validate(address, data.len())?;
        self.backend.write(address, data)
    }

    /// Schedule a read of `size` bytes at `address`
    ///
    /// The returned buffer holds the bytes once the node completes.
    pub fn enqueue_read(
        &self,
        graph: &ExecutionGraph,
        address: u64,
        size: usize,
        dependencies: &[NodeId],
    ) -> Result<(NodeId, RegisterBuffer)> {
        self.validate(address, size)?;
        let target = RegisterBuffer::new(size);
        let id = graph.add_node(
            Operation::RegisterRead {
                accelerator: self.clone(),
                address,
                target: target.clone(),
            },
            dependencies,
        )?;
        Ok((id, target))
    }

    /// Schedule a write of `data` at `address`
    pub fn enqueue_write(
        &self,
        graph: &ExecutionGraph,
        address: u64,
        data: &[u8],
        dependencies: &[NodeId],
    ) -> Result<NodeId> {
        self.validate(address, data.len())?;
        graph.add_node(
            Operation::RegisterWrite {
                accelerator: self.clone(),
                address,
                data: data.to_vec(),
            },
            dependencies,
        )
    }

    /// Write `data` at `address`, now or as a graph node
    pub fn write_register_with(&self, address: u64, data: &[u8], execution: ExecutionType<'_>) -> Result<Submission> {
        match execution {
            ExecutionType::Immediate => self.write_register(address, data).map(|()| Submission::Completed),
            ExecutionType::Graph { graph, dependencies } => self
                .enqueue_write(graph, address, data, dependencies)
                .map(Submission::Enqueued),
        }
    }

    /// Read `size` bytes at `address`, now or as a graph node
    ///
    /// An immediate read fills the buffer before returning; a scheduled one
    /// fills it when its node completes.
    pub fn read_register_with(
        &self,
        address: u64,
        size: usize,
        execution: ExecutionType<'_>,
    ) -> Result<(Submission, RegisterBuffer)> {
        match execution {
            ExecutionType::Immediate => {
                self.validate(address, size)?;
                let target = RegisterBuffer::new(size);
                target.fill_from(self, address)?;
                Ok((Submission::Completed, target))
            }
            ExecutionType::Graph { graph, dependencies } => self
                .enqueue_read(graph, address, size, dependencies)
                .map(|(id, target)| (Submission::Enqueued(id), target)),
        }
    }

    /// Read values into `out`, one register-width chunk per access
    pub fn read<T: bytemuck::Pod>(&self, address: u64, out: &mut [T]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        self.validate(address, bytes.len())?;
        let width = self.backend.register_width();
        for (i, chunk) in bytes.chunks_mut(width).enumerate() {
            self.backend.read(address + (i * width) as u64, chunk)?;
        }
        Ok(())
    }

    /// Write values, one register-width chunk per access
    pub fn write<T: bytemuck::Pod>(&self, address: u64, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.validate(address, bytes.len())?;
        let width = self.backend.register_width();
        for (i, chunk) in bytes.chunks(width).enumerate() {
            self.backend.write(address + (i * width) as u64, chunk)?;
        }
        Ok(())
    }

    pub fn read_value<T: bytemuck::Pod>(&self, address: u64) -> Result<T> {
        let mut value = <T as bytemuck::Zeroable>::zeroed();
        self.read(address, std::slice::from_mut(&mut value))?;
        Ok(value)
    }

    pub fn write_value<T: bytemuck::Pod>(&self, address: u64, value: T) -> Result<()> {
        self.write(address, std::slice::from_ref(&value))
    }

    /// Start the accelerator through its control register
    pub fn start(&self, mode: StartMode) -> Result<()> {
        let value = match mode {
            StartMode::Once => CONTROL_START,
            StartMode::Continuous => CONTROL_START_CONTINUOUS,
        };
        tracing::debug!(backend = self.backend.name(), mode = ?mode, "accelerator_start");
        self.write_value(CONTROL_REGISTER, value)
    }

    /// Clear the control register
    pub fn stop(&self) -> Result<()> {
        tracing::debug!(backend = self.backend.name(), "accelerator_stop");
        self.write_value(CONTROL_REGISTER, 0u32)
    }

    /// Decode the control register
    pub fn status(&self) -> DeviceStatus {
        match self.read_value::<u32>(CONTROL_REGISTER) {
            Ok(value) => decode_control(value),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read accelerator control register");
                DeviceStatus::Error
            }
        }
    }

    /// Write the low 32 bits of `memory`'s device address at `address`
    pub fn attach(&self, address: u64, memory: &Memory) -> Result<()> {
        let device = memory.device_address()?;
        self.write_value(address, (device.raw() & 0xFFFF_FFFF) as u32)
    }
}

/// Map an HLS control register value onto a device status
pub fn decode_control(value: u32) -> DeviceStatus {
    match value & 0xFF {
        0x01 | 0x03 | 0x81 | 0x83 => DeviceStatus::Running,
        0x04 => DeviceStatus::Idle,
        0x06 => DeviceStatus::Done,
        _ => DeviceStatus::Unknown,
    }
}

impl fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accelerator")
            .field("backend", &self.backend.name())
            .field("register_width", &self.backend.register_width())
            .field("address_space", &self.backend.address_space())
            .finish()
    }
}
