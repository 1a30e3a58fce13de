//! In-process simulated device
//!
//! Used by the test suite and by hosts without programmable logic. The
//! simulated transports follow the same contracts as the real ones: bounds
//! are enforced, device memory is addressed physically and the DMA model
//! exposes the AXI DMA direct-register interface.

use super::{check_window, DeviceMemory, KernelHandle, RegisterBus, VendorRuntime, WindowMapper};
use crate::datamover::dma::{regs, DmaChannel, DMA_REGISTER_WINDOW};
use crate::error::{Error, Result};
use crate::hardware::DeviceInfo;
use crate::types::{DeviceAddress, MemoryType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Register file
// ============================================================================

/// Simulated register window backed by a byte array
///
/// Faults can be injected on address ranges; any access overlapping a
/// faulted range fails with [`Error::RegisterIo`] and leaves the registers
/// untouched.
pub struct SimulatedBus {
    regs: Mutex<Vec<u8>>,
    faults: Mutex<Vec<(u64, u64)>>,
    accesses: AtomicU64,
}

impl SimulatedBus {
    /// Create a zeroed window of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            regs: Mutex::new(vec![0; size]),
            faults: Mutex::new(Vec::new()),
            accesses: AtomicU64::new(0),
        }
    }

    /// Make every access overlapping `[offset, offset + len)` fail
    pub fn inject_fault(&self, offset: u64, len: u64) {
        self.faults.lock().push((offset, offset.saturating_add(len)));
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of read and write calls that reached the window
    pub fn access_count(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Inspect registers without counting an access
    pub fn peek(&self, offset: usize, len: usize) -> Vec<u8> {
        let regs = self.regs.lock();
        let end = offset.saturating_add(len).min(regs.len());
        regs[offset.min(end)..end].to_vec()
    }

    /// Set registers without counting an access
    ///
    /// Models the device side changing a register, e.g. a kernel raising
    /// its done bit.
    pub fn poke(&self, offset: usize, data: &[u8]) {
        let mut regs = self.regs.lock();
        let end = offset.saturating_add(data.len()).min(regs.len());
        if offset < end {
            regs[offset..end].copy_from_slice(&data[..end - offset]);
        }
    }

    fn check_fault(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.saturating_add(len as u64);
        let faulted = self.faults.lock().iter().any(|&(lo, hi)| offset < hi && lo < end);
        if faulted {
            return Err(Error::io(format!("bus fault at {offset:#x}")));
        }
        Ok(())
    }
}

impl RegisterBus for SimulatedBus {
    fn window_size(&self) -> u64 {
        self.regs.lock().len() as u64
    }

    fn read(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        let regs = self.regs.lock();
        check_window(offset, data.len(), regs.len() as u64)?;
        self.check_fault(offset, data.len())?;
        let start = offset as usize;
        data.copy_from_slice(&regs[start..start + data.len()]);
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        let mut regs = self.regs.lock();
        check_window(offset, data.len(), regs.len() as u64)?;
        self.check_fault(offset, data.len())?;
        let start = offset as usize;
        regs[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Window mapper handing out simulated windows
///
/// The first `map` of a base address creates a zeroed [`SimulatedBus`];
/// later maps of the same base return the same window. Other models (a DMA
/// engine, a spy) can be placed at a base with [`insert`](Self::insert).
#[derive(Default)]
pub struct SimulatedMapper {
    windows: Mutex<HashMap<u64, Arc<dyn RegisterBus>>>,
    maps: AtomicU64,
}

impl SimulatedMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a register model at `base`
    pub fn insert(&self, base: u64, bus: Arc<dyn RegisterBus>) {
        self.windows.lock().insert(base, bus);
    }

    /// Window currently mapped at `base`
    pub fn window(&self, base: u64) -> Option<Arc<dyn RegisterBus>> {
        self.windows.lock().get(&base).cloned()
    }

    /// Number of successful `map` calls
    pub fn map_count(&self) -> u64 {
        self.maps.load(Ordering::Relaxed)
    }
}

impl WindowMapper for SimulatedMapper {
    fn map(&self, base: u64, size: u64) -> Result<Arc<dyn RegisterBus>> {
        if size == 0 {
            return Err(Error::invalid("register window size must be non-zero"));
        }
        let len = usize::try_from(size).map_err(|_| Error::invalid(format!("register window too large: {size:#x}")))?;

        let mut windows = self.windows.lock();
        let bus = windows
            .entry(base)
            .or_insert_with(|| Arc::new(SimulatedBus::new(len)) as Arc<dyn RegisterBus>);
        if bus.window_size() < size {
            return Err(Error::RegisterOutOfBounds {
                address: base,
                size: len,
                space: bus.window_size(),
            });
        }
        self.maps.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(bus))
    }
}

// ============================================================================
// Device memory
// ============================================================================

/// First address handed out by the simulated allocator
pub const SIM_MEMORY_BASE: u64 = 0x1000_0000;

/// Allocation granularity of the simulated allocator
pub const SIM_PAGE: u64 = 4096;

struct MemoryState {
    blocks: BTreeMap<u64, Vec<u8>>,
    next: u64,
}

/// Simulated contiguous device memory
///
/// Blocks are handed out from a page-aligned bump allocator. Besides the
/// [`DeviceMemory`] interface, blocks can be accessed by physical address
/// the way a bus master sees them.
pub struct SimulatedMemory {
    state: Mutex<MemoryState>,
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                blocks: BTreeMap::new(),
                next: SIM_MEMORY_BASE,
            }),
        }
    }

    /// Number of live allocations
    pub fn allocation_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Bus-master read at a physical address
    pub fn read_physical(&self, address: u64, data: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let (base, block) = Self::containing(&state, address, data.len())?;
        let start = (address - base) as usize;
        data.copy_from_slice(&block[start..start + data.len()]);
        Ok(())
    }

    /// Bus-master write at a physical address
    pub fn write_physical(&self, address: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let (base, _) = Self::containing(&state, address, data.len())?;
        let start = (address - base) as usize;
        if let Some(block) = state.blocks.get_mut(&base) {
            block[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn containing(state: &MemoryState, address: u64, len: usize) -> Result<(u64, &Vec<u8>)> {
        let (&base, block) = state
            .blocks
            .range(..=address)
            .next_back()
            .ok_or_else(|| Error::io(format!("no device memory at {address:#x}")))?;
        let end = address
            .checked_add(len as u64)
            .ok_or_else(|| Error::io(format!("address overflow at {address:#x}")))?;
        if end > base + block.len() as u64 {
            return Err(Error::io(format!(
                "access of {len} bytes at {address:#x} leaves block at {base:#x}"
            )));
        }
        Ok((base, block))
    }

    fn block_range(block: &[u8], offset: usize, len: usize) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= block.len() => Ok(offset..end),
            _ => Err(Error::TransferOutOfBounds {
                offset,
                size: len,
                memory_size: block.len(),
            }),
        }
    }
}

impl Default for SimulatedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMemory for SimulatedMemory {
    fn allocate(&self, size: usize, kind: MemoryType) -> Result<DeviceAddress> {
        if size == 0 {
            return Err(Error::invalid("allocation size must be non-zero"));
        }
        let mut state = self.state.lock();
        let address = state.next;
        let span = (size as u64).div_ceil(SIM_PAGE) * SIM_PAGE;
        state.next = address
            .checked_add(span)
            .ok_or_else(|| Error::io("simulated device memory exhausted"))?;
        state.blocks.insert(address, vec![0; size]);
        tracing::trace!(address = address, size = size, kind = ?kind, "sim_block_allocated");
        Ok(DeviceAddress::new(address))
    }

    fn release(&self, address: DeviceAddress) -> Result<()> {
        match self.state.lock().blocks.remove(&address.raw()) {
            Some(_) => Ok(()),
            None => Err(Error::invalid(format!("{address} is not an allocated block"))),
        }
    }

    fn write(&self, address: DeviceAddress, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let block = state
            .blocks
            .get_mut(&address.raw())
            .ok_or_else(|| Error::invalid(format!("{address} is not an allocated block")))?;
        let range = Self::block_range(block, offset, data.len())?;
        block[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, address: DeviceAddress, offset: usize, data: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let block = state
            .blocks
            .get(&address.raw())
            .ok_or_else(|| Error::invalid(format!("{address} is not an allocated block")))?;
        let range = Self::block_range(block, offset, data.len())?;
        data.copy_from_slice(&block[range]);
        Ok(())
    }
}

// ============================================================================
// AXI DMA model
// ============================================================================

#[derive(Default)]
struct ChannelModel {
    control: u32,
    status: u32,
    address: u64,
    /// Transfers never complete while set
    stalled: bool,
}

impl ChannelModel {
    fn reset(&mut self) {
        *self = ChannelModel {
            status: regs::DMASR_HALTED,
            stalled: self.stalled,
            ..ChannelModel::default()
        };
    }
}

struct DmaState {
    mm2s: ChannelModel,
    s2mm: ChannelModel,
    /// Stream between the two channels
    fifo: VecDeque<u8>,
}

/// AXI DMA engine in direct-register mode, MM2S looped back into S2MM
///
/// Writing an MM2S length reads that many bytes from device memory into an
/// internal stream FIFO; writing an S2MM length drains the FIFO into device
/// memory. Transfers complete synchronously with the length write unless
/// the channel is stalled with [`set_busy`](Self::set_busy).
pub struct SimulatedDma {
    memory: Arc<SimulatedMemory>,
    state: Mutex<DmaState>,
}

impl SimulatedDma {
    pub fn new(memory: Arc<SimulatedMemory>) -> Self {
        let mut mm2s = ChannelModel::default();
        let mut s2mm = ChannelModel::default();
        mm2s.reset();
        s2mm.reset();
        Self {
            memory,
            state: Mutex::new(DmaState {
                mm2s,
                s2mm,
                fifo: VecDeque::new(),
            }),
        }
    }

    /// Stall a channel: transfers started on it stay in flight
    pub fn set_busy(&self, channel: DmaChannel, busy: bool) {
        let mut state = self.state.lock();
        let model = match channel {
            DmaChannel::Mm2s => &mut state.mm2s,
            DmaChannel::S2mm => &mut state.s2mm,
        };
        model.stalled = busy;
        if busy {
            model.status &= !regs::DMASR_IDLE;
        } else if model.control & regs::DMACR_RS != 0 {
            model.status |= regs::DMASR_IDLE | regs::DMASR_IOC;
        }
    }

    /// Bytes currently buffered between MM2S and S2MM
    pub fn pending_stream_bytes(&self) -> usize {
        self.state.lock().fifo.len()
    }

    fn write_word(&self, offset: u64, value: u32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (channel, model) = match offset {
            o if o < regs::S2MM_DMACR => (DmaChannel::Mm2s, &mut state.mm2s),
            _ => (DmaChannel::S2mm, &mut state.s2mm),
        };
        let base = match channel {
            DmaChannel::Mm2s => regs::MM2S_DMACR,
            DmaChannel::S2mm => regs::S2MM_DMACR,
        };

        match offset - base {
            regs::DMACR => {
                if value & regs::DMACR_RESET != 0 {
                    model.reset();
                    return;
                }
                model.control = value;
                if value & regs::DMACR_RS != 0 {
                    model.status &= !regs::DMASR_HALTED;
                } else {
                    model.status |= regs::DMASR_HALTED;
                    model.status &= !regs::DMASR_IDLE;
                }
            }
            regs::DMASR => {
                model.status &= !(value & regs::DMASR_W1C);
            }
            regs::ADDR => {
                model.address = (model.address & !0xFFFF_FFFF) | u64::from(value);
            }
            regs::ADDR_MSB => {
                model.address = (model.address & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
            regs::LENGTH => {
                if model.control & regs::DMACR_RS == 0 || model.status & regs::DMASR_HALTED != 0 {
                    model.status |= regs::DMASR_INT_ERR;
                    return;
                }
                model.status &= !regs::DMASR_IDLE;
                let len = value as usize;
                let outcome = match channel {
                    DmaChannel::Mm2s => {
                        let mut bytes = vec![0u8; len];
                        self.memory
                            .read_physical(model.address, &mut bytes)
                            .map(|()| state.fifo.extend(bytes))
                    }
                    DmaChannel::S2mm => {
                        if state.fifo.len() < len {
                            model.status |= regs::DMASR_INT_ERR;
                            return;
                        }
                        let bytes: Vec<u8> = state.fifo.drain(..len).collect();
                        self.memory.write_physical(model.address, &bytes)
                    }
                };
                match outcome {
                    Err(_) => {
                        model.status |= regs::DMASR_DEC_ERR | regs::DMASR_HALTED;
                    }
                    Ok(()) if !model.stalled => {
                        model.status |= regs::DMASR_IDLE | regs::DMASR_IOC;
                    }
                    Ok(()) => {}
                }
            }
            _ => {}
        }
    }

    fn read_word(&self, offset: u64) -> u32 {
        let state = self.state.lock();
        let (base, model) = if offset < regs::S2MM_DMACR {
            (regs::MM2S_DMACR, &state.mm2s)
        } else {
            (regs::S2MM_DMACR, &state.s2mm)
        };
        match offset - base {
            regs::DMACR => model.control,
            regs::DMASR => model.status,
            regs::ADDR => model.address as u32,
            regs::ADDR_MSB => (model.address >> 32) as u32,
            _ => 0,
        }
    }
}

impl RegisterBus for SimulatedDma {
    fn window_size(&self) -> u64 {
        DMA_REGISTER_WINDOW
    }

    fn read(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        check_window(offset, data.len(), DMA_REGISTER_WINDOW)?;
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(Error::io(format!("unaligned DMA register read at {offset:#x}")));
        }
        for (i, chunk) in data.chunks_exact_mut(4).enumerate() {
            let word = self.read_word(offset + 4 * i as u64);
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_window(offset, data.len(), DMA_REGISTER_WINDOW)?;
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(Error::io(format!("unaligned DMA register write at {offset:#x}")));
        }
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            let mut word = [0u8; 4];
            word.copy_from_slice(chunk);
            self.write_word(offset + 4 * i as u64, u32::from_le_bytes(word));
        }
        Ok(())
    }
}

// ============================================================================
// Vendor runtime
// ============================================================================

/// Register space of every simulated kernel
pub const SIM_KERNEL_SPACE: usize = 0x1_0000;

struct RuntimeState {
    kernels: Vec<(String, Vec<u8>)>,
    loaded: Option<String>,
    loads: u64,
}

/// Simulated vendor runtime for a PCIe card
///
/// Kernels are plain register files declared up front with
/// [`with_kernel`](Self::with_kernel); loading a container zeroes them.
pub struct SimulatedRuntime {
    name: String,
    state: Mutex<RuntimeState>,
    memory: SimulatedMemory,
}

impl SimulatedRuntime {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RuntimeState {
                kernels: Vec::new(),
                loaded: None,
                loads: 0,
            }),
            memory: SimulatedMemory::new(),
        }
    }

    /// Declare a kernel
    pub fn with_kernel(self, name: impl Into<String>) -> Self {
        self.state.lock().kernels.push((name.into(), vec![0; SIM_KERNEL_SPACE]));
        self
    }

    /// Number of `load` calls served
    pub fn load_count(&self) -> u64 {
        self.state.lock().loads
    }

    /// Container currently loaded
    pub fn loaded(&self) -> Option<String> {
        self.state.lock().loaded.clone()
    }

    /// Set kernel registers from the device side
    pub fn poke_register(&self, kernel: &str, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let (_, regs) = state
            .kernels
            .iter_mut()
            .find(|(name, _)| name == kernel)
            .ok_or_else(|| Error::MemberAbsent(format!("kernel {kernel}")))?;
        check_window(offset as u64, data.len(), regs.len() as u64)?;
        regs[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Device memory of the card
    pub fn memory(&self) -> &SimulatedMemory {
        &self.memory
    }

    fn with_regs<T>(&self, kernel: KernelHandle, f: impl FnOnce(&mut Vec<u8>) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let (_, regs) = state
            .kernels
            .get_mut(kernel.id() as usize)
            .ok_or_else(|| Error::MemberAbsent(format!("{kernel} is not open")))?;
        f(regs)
    }
}

impl VendorRuntime for SimulatedRuntime {
    fn device_info(&self) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            name: self.name.clone(),
            identity: format!("sim:{}", self.name),
            clocks_mhz: vec![300.0, 500.0],
        })
    }

    fn load(&self, xclbin: &str) -> Result<()> {
        if xclbin.is_empty() {
            return Err(Error::File("empty container path".to_string()));
        }
        let mut state = self.state.lock();
        for (_, regs) in state.kernels.iter_mut() {
            regs.fill(0);
        }
        state.loaded = Some(xclbin.to_string());
        state.loads += 1;
        Ok(())
    }

    fn open_kernel(&self, name: &str) -> Result<KernelHandle> {
        let state = self.state.lock();
        state
            .kernels
            .iter()
            .position(|(kernel, _)| kernel == name)
            .map(|index| KernelHandle::new(index as u64))
            .ok_or_else(|| Error::MemberAbsent(format!("kernel {name}")))
    }

    fn register_space(&self, kernel: KernelHandle) -> Result<u64> {
        self.with_regs(kernel, |regs| Ok(regs.len() as u64))
    }

    fn read_register(&self, kernel: KernelHandle, offset: u64, data: &mut [u8]) -> Result<()> {
        self.with_regs(kernel, |regs| {
            check_window(offset, data.len(), regs.len() as u64)?;
            let start = offset as usize;
            data.copy_from_slice(&regs[start..start + data.len()]);
            Ok(())
        })
    }

    fn write_register(&self, kernel: KernelHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.with_regs(kernel, |regs| {
            check_window(offset, data.len(), regs.len() as u64)?;
            let start = offset as usize;
            regs[start..start + data.len()].copy_from_slice(data);
            Ok(())
        })
    }
}

impl DeviceMemory for SimulatedRuntime {
    fn allocate(&self, size: usize, kind: MemoryType) -> Result<DeviceAddress> {
        self.memory.allocate(size, kind)
    }

    fn release(&self, address: DeviceAddress) -> Result<()> {
        self.memory.release(address)
    }

    fn write(&self, address: DeviceAddress, offset: usize, data: &[u8]) -> Result<()> {
        self.memory.write(address, offset, data)
    }

    fn read(&self, address: DeviceAddress, offset: usize, data: &mut [u8]) -> Result<()> {
        self.memory.read(address, offset, data)
    }
}
