//! Vendor-runtime accelerator backend (PCIe cards)

use super::{RegisterBackend, DEFAULT_REGISTER_WIDTH};
use crate::error::Result;
use crate::platform::{KernelHandle, VendorRuntime};
use std::sync::Arc;

/// Kernel registers reached through a vendor runtime
pub struct VendorAccelerator {
    runtime: Arc<dyn VendorRuntime>,
    kernel: KernelHandle,
    space: u64,
}

impl VendorAccelerator {
    /// Open kernel `name` on `runtime`
    ///
    /// Fails with [`Error::MemberAbsent`](crate::Error::MemberAbsent) if the
    /// loaded container has no such kernel.
    pub fn open(runtime: Arc<dyn VendorRuntime>, name: &str) -> Result<Self> {
        let kernel = runtime.open_kernel(name)?;
        let space = runtime.register_space(kernel)?;
        tracing::debug!(kernel = %kernel, name = name, space = space, "vendor_kernel_opened");
        Ok(Self { runtime, kernel, space })
    }

    pub fn kernel(&self) -> KernelHandle {
        self.kernel
    }
}

impl RegisterBackend for VendorAccelerator {
    fn name(&self) -> &'static str {
        "vendor"
    }

    fn register_width(&self) -> usize {
        DEFAULT_REGISTER_WIDTH
    }

    fn address_space(&self) -> u64 {
        self.space
    }

    fn read(&self, address: u64, data: &mut [u8]) -> Result<()> {
        self.runtime.read_register(self.kernel, address, data)
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<()> {
        self.runtime.write_register(self.kernel, address, data)
    }
}
