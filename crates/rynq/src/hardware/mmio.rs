//! Embedded platform: accelerators and DMA engines in mapped windows

use super::{DeviceInfo, Hardware};
use crate::accelerator::{Accelerator, MmioAccelerator};
use crate::config::{AcceleratorParameters, DataMoverParameters, HardwareParameters, REGISTER_ALIGNMENT};
use crate::datamover::{DataMover, DmaDataMover, DMA_REGISTER_WINDOW};
use crate::error::{Error, Result};
use crate::platform::{DeviceMemory, RegisterBus, WindowMapper};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
struct Window {
    bus: Arc<dyn RegisterBus>,
    /// Serialises every accelerator and engine opened on this window
    lock: Arc<Mutex<()>>,
}

/// Programmable logic on a system-on-chip
///
/// Windows are mapped once per base address and shared: two accelerators
/// opened at the same base use the same bus and the same lock, and two
/// data movers at the same base drive the same engine.
pub struct MmioPlatform {
    mapper: Arc<dyn WindowMapper>,
    memory: Arc<dyn DeviceMemory>,
    bitstream: Option<String>,
    xclbin: String,
    info: Option<DeviceInfo>,
    windows: Mutex<HashMap<u64, Window>>,
    movers: Mutex<HashMap<u64, CachedMover>>,
}

struct CachedMover {
    mover: DataMover,
    poll_budget: Option<u64>,
}

impl MmioPlatform {
    /// Bring up the platform described by `parameters`
    ///
    /// `mapper` maps register windows (e.g. `DevMemMapper`); `memory`
    /// provides DMA-capable buffers.
    pub fn new(
        parameters: &HardwareParameters,
        mapper: Arc<dyn WindowMapper>,
        memory: Arc<dyn DeviceMemory>,
    ) -> Result<Self> {
        let start = std::time::Instant::now();

        let HardwareParameters::Mmio { bitstream, xclbin } = parameters else {
            return Err(Error::IncompatibleParameter(
                "mmio platform needs mmio hardware parameters".to_string(),
            ));
        };
        if xclbin.is_empty() {
            return Err(Error::Configuration("cannot work with an empty xclbin path".to_string()));
        }

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            duration_us = duration_us,
            xclbin = %xclbin,
            bitstream = ?bitstream,
            "mmio_platform_created"
        );

        Ok(Self {
            mapper,
            memory,
            bitstream: bitstream.clone(),
            xclbin: xclbin.clone(),
            info: None,
            windows: Mutex::new(HashMap::new()),
            movers: Mutex::new(HashMap::new()),
        })
    }

    /// Report `info` from [`Hardware::query`]
    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn bitstream(&self) -> Option<&str> {
        self.bitstream.as_deref()
    }

    /// Number of distinct windows mapped so far
    pub fn mapped_windows(&self) -> usize {
        self.windows.lock().len()
    }

    fn window(&self, base: u64, size: u64) -> Result<Window> {
        if base % REGISTER_ALIGNMENT != 0 {
            return Err(Error::Configuration(format!(
                "window base {base:#x} is not {REGISTER_ALIGNMENT}-byte aligned"
            )));
        }
        let mut windows = self.windows.lock();
        if let Some(window) = windows.get(&base) {
            if window.bus.window_size() < size {
                return Err(Error::Configuration(format!(
                    "window at {base:#x} is mapped with {:#x} bytes, {size:#x} requested",
                    window.bus.window_size()
                )));
            }
            return Ok(window.clone());
        }

        let window = Window {
            bus: self.mapper.map(base, size)?,
            lock: Arc::new(Mutex::new(())),
        };
        tracing::debug!(base = base, size = size, "window_mapped");
        windows.insert(base, window.clone());
        Ok(window)
    }
}

impl Hardware for MmioPlatform {
    fn reset(&self) -> Result<()> {
        // Programmable logic is configured before the platform is brought
        // up; there is no device-side state to restore here.
        tracing::debug!(xclbin = %self.xclbin, "mmio_platform_reset");
        Ok(())
    }

    fn query(&self) -> Result<DeviceInfo> {
        Ok(self.info.clone().unwrap_or_else(|| DeviceInfo {
            name: "mmio".to_string(),
            identity: self.xclbin.clone(),
            clocks_mhz: Vec::new(),
        }))
    }

    fn accelerator(&self, parameters: &AcceleratorParameters) -> Result<Accelerator> {
        let AcceleratorParameters::Mmio {
            base_address,
            window_size,
            register_width,
        } = parameters
        else {
            return Err(Error::IncompatibleParameter(
                "mmio platform needs mmio accelerator parameters".to_string(),
            ));
        };

        let window = self.window(*base_address, *window_size)?;
        let backend = MmioAccelerator::new(window.bus, window.lock, *register_width)?;
        Ok(Accelerator::new(Arc::new(backend)))
    }

    fn data_mover(&self, parameters: &DataMoverParameters) -> Result<DataMover> {
        let DataMoverParameters::Dma {
            base_address,
            poll_budget,
        } = parameters
        else {
            return Err(Error::IncompatibleParameter(
                "mmio platform needs dma data mover parameters".to_string(),
            ));
        };

        let mut movers = self.movers.lock();
        if let Some(cached) = movers.get(base_address) {
            if cached.poll_budget != *poll_budget {
                return Err(Error::Configuration(format!(
                    "dma engine at {base_address:#x} is open with poll budget {:?}, {poll_budget:?} requested",
                    cached.poll_budget
                )));
            }
            return Ok(cached.mover.clone());
        }
        let window = self.window(*base_address, DMA_REGISTER_WINDOW)?;
        let engine =
            DmaDataMover::new(window.bus, Arc::clone(&self.memory), *poll_budget).with_window_lock(window.lock);
        let mover = DataMover::new(Arc::new(engine));
        movers.insert(
            *base_address,
            CachedMover {
                mover: mover.clone(),
                poll_budget: *poll_budget,
            },
        );
        Ok(mover)
    }
}
