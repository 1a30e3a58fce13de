//! Primitive transports
//!
//! Everything above this module compiles down to the calls declared here:
//!
//! - [`RegisterBus`] - byte access at an offset of a mapped register window
//! - [`WindowMapper`] - maps physical register windows (embedded platforms)
//! - [`DeviceMemory`] - allocates device-visible buffers and moves bytes in
//!   and out of them
//! - [`VendorRuntime`] - register access through a vendor driver (PCIe cards)
//!
//! # Implementations
//!
//! ```text
//! ┌────────────────────┬───────────────────────────────────────────┐
//! │ DevMemMapper       │ /dev/mem + mmap, volatile word access     │
//! │ SimulatedBus       │ in-process register file                  │
//! │ SimulatedMapper    │ WindowMapper handing out simulated buses  │
//! │ SimulatedMemory    │ in-process contiguous device memory       │
//! │ SimulatedDma       │ AXI DMA register model with MM2S→S2MM     │
//! │                    │ loopback                                  │
//! │ SimulatedRuntime   │ in-process vendor runtime                 │
//! └────────────────────┴───────────────────────────────────────────┘
//! ```

#[cfg(target_os = "linux")]
pub mod devmem;
pub mod sim;

use crate::error::Result;
use crate::hardware::DeviceInfo;
use crate::types::{DeviceAddress, MemoryType};
use std::fmt;
use std::sync::Arc;

#[cfg(target_os = "linux")]
pub use devmem::{DevMemMapper, MappedWindow};
pub use sim::{SimulatedBus, SimulatedDma, SimulatedMapper, SimulatedMemory, SimulatedRuntime};

/// Byte-level access to one mapped register window
///
/// Offsets are relative to the window base. Implementations reject ranges
/// that leave the window; alignment policy lives one layer up.
pub trait RegisterBus: Send + Sync {
    /// Size of the window in bytes
    fn window_size(&self) -> u64;

    /// Read `data.len()` bytes starting at `offset`
    fn read(&self, offset: u64, data: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;
}

/// Maps physical register windows into the process
pub trait WindowMapper: Send + Sync {
    /// Map `size` bytes at physical address `base`
    fn map(&self, base: u64, size: u64) -> Result<Arc<dyn RegisterBus>>;
}

/// Device-visible memory facility
///
/// The backend owns the device storage; [`Memory`](crate::Memory) owns the
/// host mirror and the address handed out by [`DeviceMemory::allocate`].
pub trait DeviceMemory: Send + Sync {
    /// Allocate `size` bytes and return the device address of the block
    fn allocate(&self, size: usize, kind: MemoryType) -> Result<DeviceAddress>;

    /// Release a block previously returned by `allocate`
    fn release(&self, address: DeviceAddress) -> Result<()>;

    /// Copy host bytes into the block at `offset`
    fn write(&self, address: DeviceAddress, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy bytes out of the block at `offset`
    fn read(&self, address: DeviceAddress, offset: usize, data: &mut [u8]) -> Result<()>;
}

/// Handle to a kernel (compute unit) opened through a vendor runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

impl KernelHandle {
    pub const fn new(id: u64) -> Self {
        KernelHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel{}", self.0)
    }
}

/// Vendor driver for PCIe cards
///
/// Memory traffic for these cards goes through the [`DeviceMemory`]
/// implementation of the same runtime.
pub trait VendorRuntime: Send + Sync {
    /// Identity and clocks of the card
    fn device_info(&self) -> Result<DeviceInfo>;

    /// Program the card with the given container, resetting its state
    fn load(&self, xclbin: &str) -> Result<()>;

    /// Open a kernel by name
    fn open_kernel(&self, name: &str) -> Result<KernelHandle>;

    /// Size of the kernel's register space in bytes
    fn register_space(&self, kernel: KernelHandle) -> Result<u64>;

    /// Read kernel registers
    fn read_register(&self, kernel: KernelHandle, offset: u64, data: &mut [u8]) -> Result<()>;

    /// Write kernel registers
    fn write_register(&self, kernel: KernelHandle, offset: u64, data: &[u8]) -> Result<()>;
}

/// Check that `[offset, offset + len)` lies inside a window of `window` bytes
pub(crate) fn check_window(offset: u64, len: usize, window: u64) -> Result<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= window => Ok(()),
        _ => Err(crate::Error::RegisterOutOfBounds {
            address: offset,
            size: len,
            space: window,
        }),
    }
}
