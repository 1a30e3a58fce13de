//! Memory-mapped accelerator backend

use super::RegisterBackend;
use crate::error::{Error, Result};
use crate::platform::RegisterBus;
use parking_lot::Mutex;
use std::sync::Arc;

/// Accelerator registers in a memory-mapped window
///
/// Every transport call holds the window lock, which is shared by all
/// accelerators opened on the same window, so concurrent accesses never
/// interleave on the bus.
pub struct MmioAccelerator {
    bus: Arc<dyn RegisterBus>,
    lock: Arc<Mutex<()>>,
    register_width: usize,
}

impl MmioAccelerator {
    /// Open an accelerator on `bus` guarded by `lock`
    ///
    /// `register_width` must be 1, 2, 4 or 8 bytes.
    pub fn new(bus: Arc<dyn RegisterBus>, lock: Arc<Mutex<()>>, register_width: usize) -> Result<Self> {
        if !matches!(register_width, 1 | 2 | 4 | 8) {
            return Err(Error::invalid(format!(
                "register width must be 1, 2, 4 or 8 bytes, got {register_width}"
            )));
        }
        Ok(Self::with_lock(bus, lock, register_width))
    }

    pub(crate) fn with_lock(bus: Arc<dyn RegisterBus>, lock: Arc<Mutex<()>>, register_width: usize) -> Self {
        Self {
            bus,
            lock,
            register_width,
        }
    }
}

impl RegisterBackend for MmioAccelerator {
    fn name(&self) -> &'static str {
        "mmio"
    }

    fn register_width(&self) -> usize {
        self.register_width
    }

    fn address_space(&self) -> u64 {
        self.bus.window_size()
    }

    fn read(&self, address: u64, data: &mut [u8]) -> Result<()> {
        let _guard = self.lock.lock();
        self.bus.read(address, data)
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        self.bus.write(address, data)
    }
}
