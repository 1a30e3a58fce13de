//! AXI DMA engine in direct-register (simple) mode
//!
//! Uploads run on the MM2S channel (memory to stream), downloads on the
//! S2MM channel (stream to memory). A transfer is programmed as run/stop,
//! address, then length; writing the length starts it. Completion is
//! detected by polling the channel status register for its idle bit.

use super::{TransferBackend, TransferDirection};
use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::platform::{DeviceMemory, RegisterBus};
use crate::types::{DeviceStatus, SyncType};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Size of the engine's register window
pub const DMA_REGISTER_WINDOW: u64 = 0x1_0000;

/// Register map, offsets from the engine base
pub mod regs {
    /// MM2S channel block
    pub const MM2S_DMACR: u64 = 0x00;
    /// S2MM channel block
    pub const S2MM_DMACR: u64 = 0x30;

    // Offsets inside a channel block
    pub const DMACR: u64 = 0x00;
    pub const DMASR: u64 = 0x04;
    /// MM2S_SA or S2MM_DA
    pub const ADDR: u64 = 0x18;
    /// MM2S_SA_MSB or S2MM_DA_MSB
    pub const ADDR_MSB: u64 = 0x1C;
    pub const LENGTH: u64 = 0x28;

    pub const DMACR_RS: u32 = 1 << 0;
    pub const DMACR_RESET: u32 = 1 << 2;

    pub const DMASR_HALTED: u32 = 1 << 0;
    pub const DMASR_IDLE: u32 = 1 << 1;
    pub const DMASR_INT_ERR: u32 = 1 << 4;
    pub const DMASR_SLV_ERR: u32 = 1 << 5;
    pub const DMASR_DEC_ERR: u32 = 1 << 6;
    pub const DMASR_IOC: u32 = 1 << 12;
    pub const DMASR_DLY: u32 = 1 << 13;
    pub const DMASR_ERR_IRQ: u32 = 1 << 14;

    pub const DMASR_ERRORS: u32 = DMASR_INT_ERR | DMASR_SLV_ERR | DMASR_DEC_ERR;
    /// Write-one-to-clear interrupt bits
    pub const DMASR_W1C: u32 = DMASR_IOC | DMASR_DLY | DMASR_ERR_IRQ;

    /// Widest length the engine accepts (26-bit buffer length register)
    pub const MAX_LENGTH: usize = (1 << 26) - 1;
}

/// One direction of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaChannel {
    /// Memory-mapped to stream (uploads)
    Mm2s,
    /// Stream to memory-mapped (downloads)
    S2mm,
}

impl DmaChannel {
    fn block(self) -> u64 {
        match self {
            Self::Mm2s => regs::MM2S_DMACR,
            Self::S2mm => regs::S2MM_DMACR,
        }
    }
}

impl fmt::Display for DmaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mm2s => f.write_str("mm2s"),
            Self::S2mm => f.write_str("s2mm"),
        }
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    /// Set once a transfer has been issued; before that the idle bit is
    /// not meaningful
    used: bool,
}

/// Data mover on an AXI DMA engine
pub struct DmaDataMover {
    bus: Arc<dyn RegisterBus>,
    /// Held around every register access, shared with accelerators opened
    /// on the same window
    window_lock: Arc<Mutex<()>>,
    memory: Arc<dyn DeviceMemory>,
    mm2s: Mutex<ChannelState>,
    s2mm: Mutex<ChannelState>,
    /// Maximum status polls per transfer, unbounded when `None`
    poll_budget: Option<u64>,
}

impl DmaDataMover {
    /// Drive the engine mapped at `bus`, moving buffers of `memory`
    pub fn new(bus: Arc<dyn RegisterBus>, memory: Arc<dyn DeviceMemory>, poll_budget: Option<u64>) -> Self {
        Self {
            bus,
            window_lock: Arc::new(Mutex::new(())),
            memory,
            mm2s: Mutex::new(ChannelState::default()),
            s2mm: Mutex::new(ChannelState::default()),
            poll_budget,
        }
    }

    /// Serialise register access with other users of the window
    pub fn with_window_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.window_lock = lock;
        self
    }

    pub fn poll_budget(&self) -> Option<u64> {
        self.poll_budget
    }

    fn channel(&self, channel: DmaChannel) -> &Mutex<ChannelState> {
        match channel {
            DmaChannel::Mm2s => &self.mm2s,
            DmaChannel::S2mm => &self.s2mm,
        }
    }

    fn read_reg(&self, channel: DmaChannel, offset: u64) -> Result<u32> {
        let mut word = [0u8; 4];
        let _guard = self.window_lock.lock();
        self.bus.read(channel.block() + offset, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_reg(&self, channel: DmaChannel, offset: u64, value: u32) -> Result<()> {
        let _guard = self.window_lock.lock();
        self.bus.write(channel.block() + offset, &value.to_le_bytes())
    }

    /// Program one transfer and wait for it
    ///
    /// `prepare` runs once the channel is known to be free, before the
    /// first register write.
    fn run(&self, channel: DmaChannel, address: u64, size: usize, prepare: impl FnOnce() -> Result<()>) -> Result<()> {
        let Some(mut state) = self.channel(channel).try_lock() else {
            tracing::debug!(channel = %channel, "dma_channel_busy");
            return Err(Error::busy(format!("dma {channel} channel is in use")));
        };

        if state.used && self.read_reg(channel, regs::DMASR)? & regs::DMASR_IDLE == 0 {
            tracing::debug!(channel = %channel, "dma_channel_not_idle");
            return Err(Error::busy(format!("dma {channel} channel has a transfer in flight")));
        }
        prepare()?;

        self.write_reg(channel, regs::DMACR, regs::DMACR_RS)?;
        self.write_reg(channel, regs::ADDR, address as u32)?;
        self.write_reg(channel, regs::ADDR_MSB, (address >> 32) as u32)?;
        self.write_reg(channel, regs::LENGTH, size as u32)?;
        state.used = true;

        let mut polls = 0u64;
        loop {
            let status = self.read_reg(channel, regs::DMASR)?;
            if status & regs::DMASR_ERRORS != 0 {
                tracing::warn!(channel = %channel, status = status, "dma_transfer_error");
                // Error bits only clear on a channel reset
                if let Err(e) = self.write_reg(channel, regs::DMACR, regs::DMACR_RESET) {
                    tracing::warn!(channel = %channel, error = %e, "dma_reset_failed");
                }
                state.used = false;
                return Err(Error::io(format!("dma {channel} reported error status {status:#x}")));
            }
            if status & regs::DMASR_IDLE != 0 {
                break;
            }
            polls += 1;
            if self.poll_budget.is_some_and(|budget| polls >= budget) {
                return Err(Error::io(format!("dma {channel} did not complete within {polls} polls")));
            }
            std::hint::spin_loop();
        }

        self.write_reg(channel, regs::DMASR, regs::DMASR_IOC)
    }
}

impl TransferBackend for DmaDataMover {
    fn name(&self) -> &'static str {
        "dma"
    }

    fn device_memory(&self) -> Arc<dyn DeviceMemory> {
        Arc::clone(&self.memory)
    }

    fn transfer(&self, direction: TransferDirection, memory: &Memory, size: usize, offset: usize) -> Result<()> {
        if size > regs::MAX_LENGTH {
            return Err(Error::invalid(format!(
                "transfer of {size} bytes exceeds the engine limit of {} bytes",
                regs::MAX_LENGTH
            )));
        }
        // The block stays allocated until the engine is done with it
        let pinned = memory.pin()?;
        let address = pinned.device_address().raw() + offset as u64;

        match direction {
            TransferDirection::Upload => self.run(DmaChannel::Mm2s, address, size, || {
                pinned.sync(SyncType::HostToDevice, size, offset)
            }),
            TransferDirection::Download => {
                self.run(DmaChannel::S2mm, address, size, || Ok(()))?;
                pinned.sync(SyncType::DeviceToHost, size, offset)
            }
        }
    }

    fn status(&self) -> DeviceStatus {
        let mut running = false;
        for channel in [DmaChannel::Mm2s, DmaChannel::S2mm] {
            let used = self.channel(channel).try_lock().map_or(true, |state| state.used);
            match self.read_reg(channel, regs::DMASR) {
                Ok(status) if status & regs::DMASR_ERRORS != 0 => return DeviceStatus::Error,
                Ok(status) => running |= used && status & regs::DMASR_IDLE == 0,
                Err(_) => return DeviceStatus::Error,
            }
        }
        if running {
            DeviceStatus::Running
        } else {
            DeviceStatus::Idle
        }
    }
}
