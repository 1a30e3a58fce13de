//! PCIe platform driven by a vendor runtime

use super::{DeviceInfo, Hardware};
use crate::accelerator::{Accelerator, VendorAccelerator};
use crate::config::{AcceleratorParameters, DataMoverParameters, HardwareParameters};
use crate::datamover::{DataMover, VendorDataMover};
use crate::error::{Error, Result};
use crate::platform::{DeviceMemory, VendorRuntime};
use std::sync::Arc;

/// A card programmed through its vendor runtime
///
/// The container named by the parameters is loaded when the platform is
/// created and again on every [`reset`](Hardware::reset).
pub struct VendorPlatform<R> {
    runtime: Arc<R>,
    xclbin: String,
    device_index: u32,
}

impl<R> VendorPlatform<R>
where
    R: VendorRuntime + DeviceMemory + 'static,
{
    pub fn new(parameters: &HardwareParameters, runtime: Arc<R>) -> Result<Self> {
        let start = std::time::Instant::now();

        let HardwareParameters::Vendor { xclbin, device_index } = parameters else {
            return Err(Error::IncompatibleParameter(
                "vendor platform needs vendor hardware parameters".to_string(),
            ));
        };
        if xclbin.is_empty() {
            return Err(Error::Configuration("cannot work with an empty xclbin path".to_string()));
        }

        let platform = Self {
            runtime,
            xclbin: xclbin.clone(),
            device_index: *device_index,
        };
        platform.reset()?;

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            duration_us = duration_us,
            xclbin = %platform.xclbin,
            device_index = platform.device_index,
            "vendor_platform_created"
        );
        Ok(platform)
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    fn check_device(&self, device: u32) -> Result<()> {
        if device != self.device_index {
            return Err(Error::IncompatibleParameter(format!(
                "device {device} requested from the platform of device {}",
                self.device_index
            )));
        }
        Ok(())
    }
}

impl<R> Hardware for VendorPlatform<R>
where
    R: VendorRuntime + DeviceMemory + 'static,
{
    #[tracing::instrument(skip(self), fields(xclbin = %self.xclbin))]
    fn reset(&self) -> Result<()> {
        self.runtime.load(&self.xclbin)
    }

    fn query(&self) -> Result<DeviceInfo> {
        self.runtime.device_info()
    }

    fn accelerator(&self, parameters: &AcceleratorParameters) -> Result<Accelerator> {
        let AcceleratorParameters::Vendor { device, kernel } = parameters else {
            return Err(Error::IncompatibleParameter(
                "vendor platform needs vendor accelerator parameters".to_string(),
            ));
        };
        self.check_device(*device)?;

        let runtime: Arc<dyn VendorRuntime> = self.runtime.clone();
        let backend = VendorAccelerator::open(runtime, kernel)?;
        Ok(Accelerator::new(Arc::new(backend)))
    }

    fn data_mover(&self, parameters: &DataMoverParameters) -> Result<DataMover> {
        let DataMoverParameters::Vendor { device, memory_bank } = parameters else {
            return Err(Error::IncompatibleParameter(
                "vendor platform needs vendor data mover parameters".to_string(),
            ));
        };
        self.check_device(*device)?;

        let memory: Arc<dyn DeviceMemory> = self.runtime.clone();
        Ok(DataMover::new(Arc::new(VendorDataMover::new(memory, *memory_bank))))
    }
}
