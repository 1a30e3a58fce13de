//! Host buffers bound to device-visible memory
//!
//! A [`Memory`] owns two things: a zeroed host buffer and the device address
//! of a block allocated from a [`DeviceMemory`] backend. The host side is
//! what callers fill and inspect; [`Memory::sync`] moves bytes between the
//! two sides. Data movers read and write the device block directly.
//!
//! `Memory` is not `Clone`. Share it through `Arc<Memory>`; the device block
//! is released exactly once, either explicitly or on drop. Anything that
//! touches the device block holds a [`PinnedMemory`] for the duration, and
//! release waits for every pin to drop.

use crate::error::{Error, Result};
use crate::platform::DeviceMemory;
use crate::types::{DeviceAddress, MemoryType, SyncType};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Host buffer plus device address
pub struct Memory {
    backend: Arc<dyn DeviceMemory>,
    /// `None` once released
    address: Mutex<Option<DeviceAddress>>,
    host: Mutex<Vec<u8>>,
    size: usize,
    kind: MemoryType,
}

impl Memory {
    /// Allocate `size` bytes on `backend`
    ///
    /// Nothing is held if the backend allocation fails.
    pub fn allocate(backend: Arc<dyn DeviceMemory>, size: usize, kind: MemoryType) -> Result<Self> {
        let start = std::time::Instant::now();

        if size == 0 {
            return Err(Error::invalid("memory size must be non-zero"));
        }

        let address = backend.allocate(size, kind)?;

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            duration_us = duration_us,
            size = size,
            kind = ?kind,
            address = %address,
            "memory_created"
        );

        Ok(Self {
            backend,
            address: Mutex::new(Some(address)),
            host: Mutex::new(vec![0; size]),
            size,
            kind,
        })
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> MemoryType {
        self.kind
    }

    /// Device address of the block; fails after release
    pub fn device_address(&self) -> Result<DeviceAddress> {
        self.address.lock().ok_or(Error::MemoryReleased)
    }

    pub fn is_released(&self) -> bool {
        self.address.lock().is_none()
    }

    /// Locked view of the host buffer
    pub fn host(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.host.lock(), |bytes| bytes.as_mut_slice())
    }

    /// Host buffer without locking, for exclusive owners
    pub fn host_mut(&mut self) -> &mut [u8] {
        self.host.get_mut().as_mut_slice()
    }

    /// Copy `data` into the host buffer at byte `offset`
    pub fn write_host<T: bytemuck::Pod>(&self, offset: usize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let range = self.range(bytes.len(), offset)?;
        self.host.lock()[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy host bytes at `offset` into `out`
    pub fn read_host<T: bytemuck::Pod>(&self, offset: usize, out: &mut [T]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        let range = self.range(bytes.len(), offset)?;
        bytes.copy_from_slice(&self.host.lock()[range]);
        Ok(())
    }

    /// Keep the device block allocated until the returned guard drops
    ///
    /// [`Memory::release`] blocks while a pin is held. Calling
    /// [`Memory::sync`] or [`Memory::device_address`] on the same memory
    /// while pinned deadlocks; use the guard's methods instead.
    pub fn pin(&self) -> Result<PinnedMemory<'_>> {
        let guard = self.address.lock();
        let address = guard.ok_or(Error::MemoryReleased)?;
        Ok(PinnedMemory {
            memory: self,
            address,
            _guard: guard,
        })
    }

    /// Synchronise `size` bytes at `offset` between host and device
    #[tracing::instrument(skip(self), fields(memory_size = self.size))]
    pub fn sync(&self, direction: SyncType, size: usize, offset: usize) -> Result<()> {
        let range = self.range(size, offset)?;
        self.pin()?.sync_range(direction, range)
    }

    /// Synchronise the whole buffer
    pub fn sync_all(&self, direction: SyncType) -> Result<()> {
        self.sync(direction, self.size, 0)
    }

    /// Return the device block to the backend
    ///
    /// Calling this more than once is a no-op.
    pub fn release(&self) -> Result<()> {
        let mut address = self.address.lock();
        match address.take() {
            Some(addr) => {
                tracing::debug!(address = %addr, size = self.size, "memory_released");
                self.backend.release(addr)
            }
            None => Ok(()),
        }
    }

    /// Byte range `[offset, offset + size)` if it lies inside the buffer
    pub(crate) fn range(&self, size: usize, offset: usize) -> Result<std::ops::Range<usize>> {
        check_extent(size, offset, self.size).map(|()| offset..offset + size)
    }
}

/// Borrow of a [`Memory`] whose device block cannot be released
pub struct PinnedMemory<'a> {
    memory: &'a Memory,
    address: DeviceAddress,
    _guard: MutexGuard<'a, Option<DeviceAddress>>,
}

impl PinnedMemory<'_> {
    pub fn device_address(&self) -> DeviceAddress {
        self.address
    }

    /// Same as [`Memory::sync`], under the pin
    pub fn sync(&self, direction: SyncType, size: usize, offset: usize) -> Result<()> {
        let range = self.memory.range(size, offset)?;
        self.sync_range(direction, range)
    }

    fn sync_range(&self, direction: SyncType, range: std::ops::Range<usize>) -> Result<()> {
        let offset = range.start;
        match direction {
            SyncType::HostToDevice => {
                let host = self.memory.host.lock();
                self.memory.backend.write(self.address, offset, &host[range])
            }
            SyncType::DeviceToHost => {
                let mut host = self.memory.host.lock();
                self.memory.backend.read(self.address, offset, &mut host[range])
            }
        }
    }
}

/// Validate a transfer of `size` bytes at `offset` against `memory_size`
pub(crate) fn check_extent(size: usize, offset: usize, memory_size: usize) -> Result<()> {
    match size.checked_add(offset) {
        Some(end) if end <= memory_size => Ok(()),
        _ => Err(Error::TransferOutOfBounds {
            offset,
            size,
            memory_size,
        }),
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "failed to release device memory");
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("address", &*self.address.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedMemory;

    fn backend() -> Arc<SimulatedMemory> {
        Arc::new(SimulatedMemory::new())
    }

    #[test]
    fn test_zero_size_is_rejected_without_allocating() {
        let sim = backend();
        let err = Memory::allocate(sim.clone(), 0, MemoryType::Dual).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert_eq!(sim.allocation_count(), 0);
    }

    #[test]
    fn test_host_buffer_starts_zeroed() {
        let memory = Memory::allocate(backend(), 64, MemoryType::Dual).unwrap();
        assert!(memory.host().iter().all(|&b| b == 0));
        assert_eq!(memory.size(), 64);
    }

    #[test]
    fn test_release_is_idempotent() {
        let sim = backend();
        let memory = Memory::allocate(sim.clone(), 16, MemoryType::Cacheable).unwrap();
        assert_eq!(sim.allocation_count(), 1);
        memory.release().unwrap();
        memory.release().unwrap();
        assert_eq!(sim.allocation_count(), 0);
        assert_eq!(memory.device_address(), Err(Error::MemoryReleased));
    }

    #[test]
    fn test_drop_releases_block() {
        let sim = backend();
        {
            let _memory = Memory::allocate(sim.clone(), 16, MemoryType::Dual).unwrap();
            assert_eq!(sim.allocation_count(), 1);
        }
        assert_eq!(sim.allocation_count(), 0);
    }

    #[test]
    fn test_sync_round_trip_through_device() {
        let sim = backend();
        let memory = Memory::allocate(sim.clone(), 16, MemoryType::Dual).unwrap();
        memory.write_host(0, &[0xDEAD_BEEFu32, 0x0BAD_F00D]).unwrap();
        memory.sync(SyncType::HostToDevice, 8, 0).unwrap();

        memory.host().fill(0);
        memory.sync(SyncType::DeviceToHost, 8, 0).unwrap();

        let mut out = [0u32; 2];
        memory.read_host(0, &mut out).unwrap();
        assert_eq!(out, [0xDEAD_BEEF, 0x0BAD_F00D]);
    }

    #[test]
    fn test_out_of_range_access_is_rejected() {
        let memory = Memory::allocate(backend(), 8, MemoryType::Dual).unwrap();
        assert!(matches!(
            memory.write_host(4, &[0u32; 2]),
            Err(Error::TransferOutOfBounds { .. })
        ));
        assert!(matches!(
            memory.sync(SyncType::HostToDevice, usize::MAX, 1),
            Err(Error::TransferOutOfBounds { .. })
        ));
    }

    /// Blocks inside `write` until opened
    struct GatedMemory {
        inner: SimulatedMemory,
        entered: parking_lot::Mutex<std::sync::mpsc::Sender<()>>,
        gate: parking_lot::Mutex<bool>,
        opened: parking_lot::Condvar,
        released: std::sync::atomic::AtomicBool,
        released_in_write: std::sync::atomic::AtomicBool,
    }

    impl DeviceMemory for GatedMemory {
        fn allocate(&self, size: usize, kind: MemoryType) -> Result<DeviceAddress> {
            self.inner.allocate(size, kind)
        }

        fn release(&self, address: DeviceAddress) -> Result<()> {
            self.released.store(true, std::sync::atomic::Ordering::SeqCst);
            self.inner.release(address)
        }

        fn write(&self, address: DeviceAddress, offset: usize, data: &[u8]) -> Result<()> {
            let _ = self.entered.lock().send(());
            let mut open = self.gate.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            if self.released.load(std::sync::atomic::Ordering::SeqCst) {
                self.released_in_write.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            self.inner.write(address, offset, data)
        }

        fn read(&self, address: DeviceAddress, offset: usize, data: &mut [u8]) -> Result<()> {
            self.inner.read(address, offset, data)
        }
    }

    #[test]
    fn test_release_waits_for_in_flight_sync() {
        let (entered, entered_rx) = std::sync::mpsc::channel();
        let gated = Arc::new(GatedMemory {
            inner: SimulatedMemory::new(),
            entered: parking_lot::Mutex::new(entered),
            gate: parking_lot::Mutex::new(false),
            opened: parking_lot::Condvar::new(),
            released: std::sync::atomic::AtomicBool::new(false),
            released_in_write: std::sync::atomic::AtomicBool::new(false),
        });
        let memory = Arc::new(Memory::allocate(gated.clone(), 64, MemoryType::Dual).unwrap());

        let syncer = {
            let memory = Arc::clone(&memory);
            std::thread::spawn(move || memory.sync(SyncType::HostToDevice, 64, 0))
        };
        entered_rx.recv().unwrap();

        let releaser = {
            let memory = Arc::clone(&memory);
            std::thread::spawn(move || memory.release())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!gated.released.load(std::sync::atomic::Ordering::SeqCst));

        *gated.gate.lock() = true;
        gated.opened.notify_all();

        assert_eq!(syncer.join().unwrap(), Ok(()));
        assert_eq!(releaser.join().unwrap(), Ok(()));
        assert!(!gated.released_in_write.load(std::sync::atomic::Ordering::SeqCst));
        assert!(memory.is_released());
    }

    #[test]
    fn test_pin_after_release_fails() {
        let memory = Memory::allocate(backend(), 8, MemoryType::Dual).unwrap();
        let address = memory.device_address().unwrap();
        assert_eq!(memory.pin().unwrap().device_address(), address);
        memory.release().unwrap();
        assert!(matches!(memory.pin(), Err(Error::MemoryReleased)));
    }

    #[test]
    fn test_sync_after_release_fails() {
        let memory = Memory::allocate(backend(), 8, MemoryType::Dual).unwrap();
        memory.release().unwrap();
        assert_eq!(memory.sync_all(SyncType::HostToDevice), Err(Error::MemoryReleased));
    }
}
