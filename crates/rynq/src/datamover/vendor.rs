//! Vendor-runtime data mover (PCIe cards)

use super::{TransferBackend, TransferDirection};
use crate::error::Result;
use crate::memory::Memory;
use crate::platform::DeviceMemory;
use crate::types::{DeviceStatus, SyncType};
use std::sync::Arc;

/// Transfers through the runtime's synchronous buffer copy
///
/// The copy happens in [`Memory::sync`], which calls the runtime's
/// [`DeviceMemory`] implementation the memory was allocated from.
pub struct VendorDataMover {
    runtime: Arc<dyn DeviceMemory>,
    memory_bank: u32,
}

impl VendorDataMover {
    pub fn new(runtime: Arc<dyn DeviceMemory>, memory_bank: u32) -> Self {
        Self { runtime, memory_bank }
    }

    /// Memory bank buffers are placed in
    pub fn memory_bank(&self) -> u32 {
        self.memory_bank
    }
}

impl TransferBackend for VendorDataMover {
    fn name(&self) -> &'static str {
        "vendor"
    }

    fn device_memory(&self) -> Arc<dyn DeviceMemory> {
        Arc::clone(&self.runtime)
    }

    fn transfer(&self, direction: TransferDirection, memory: &Memory, size: usize, offset: usize) -> Result<()> {
        let sync = match direction {
            TransferDirection::Upload => SyncType::HostToDevice,
            TransferDirection::Download => SyncType::DeviceToHost,
        };
        tracing::trace!(bank = self.memory_bank, size = size, offset = offset, "vendor_bo_sync");
        memory.sync(sync, size, offset)
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus::Idle
    }
}
