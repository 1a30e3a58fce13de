//! Physical register windows through `/dev/mem`
//!
//! Windows are mapped uncached (`O_SYNC`) and accessed with volatile loads
//! and stores: full 32-bit words where the range allows it, single bytes at
//! the edges.

use super::{check_window, RegisterBus, WindowMapper};
use crate::config::REGISTER_ALIGNMENT;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;
use std::sync::Arc;

const DEV_MEM: &str = "/dev/mem";

/// Maps physical windows from `/dev/mem`
///
/// Requires `CAP_SYS_RAWIO` (or root) and a kernel built without
/// `CONFIG_STRICT_DEVMEM` restrictions on the target range.
pub struct DevMemMapper {
    file: Arc<File>,
}

impl DevMemMapper {
    /// Open `/dev/mem` for read/write uncached access
    pub fn open() -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(DEV_MEM)
            .map_err(|e| Error::File(format!("cannot open {DEV_MEM}: {e}")))?;
        Ok(Self { file: Arc::new(file) })
    }
}

impl WindowMapper for DevMemMapper {
    fn map(&self, base: u64, size: u64) -> Result<Arc<dyn RegisterBus>> {
        let window = MappedWindow::map(&self.file, base, size)?;
        Ok(Arc::new(window))
    }
}

/// One `mmap`ed register window
pub struct MappedWindow {
    /// Start of the page-aligned mapping
    map: NonNull<u8>,

    /// Length of the page-aligned mapping
    map_len: usize,

    /// Offset of the window base inside the mapping
    skew: usize,

    /// Window size as requested
    size: u64,

    // Keeps the descriptor alive for the lifetime of the mapping
    _file: Arc<File>,
}

// SAFETY: the mapping is device memory owned by this value; every access goes
// through volatile operations on bounds-checked offsets.
unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    fn map(file: &Arc<File>, base: u64, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid("register window size must be non-zero"));
        }
        if base % REGISTER_ALIGNMENT != 0 {
            return Err(Error::invalid(format!("register window base {base:#x} is not word aligned")));
        }

        // SAFETY: sysconf has no preconditions.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page = if page > 0 { page as u64 } else { 4096 };
        let aligned = base & !(page - 1);
        let skew = (base - aligned) as usize;
        let map_len = usize::try_from(size)
            .ok()
            .and_then(|s| s.checked_add(skew))
            .ok_or_else(|| Error::invalid(format!("register window too large: {size:#x}")))?;
        let offset = libc::off_t::try_from(aligned)
            .map_err(|_| Error::invalid(format!("physical address out of range: {base:#x}")))?;

        // SAFETY: a fresh shared mapping of a device file; the result is
        // checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::io(format!(
                "mmap of {size:#x} bytes at {base:#x} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let map = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| Error::io("mmap returned null"))?;

        tracing::debug!(base = base, size = size, "register_window_mapped");

        Ok(Self {
            map,
            map_len,
            skew,
            size,
            _file: Arc::clone(file),
        })
    }

    fn base_ptr(&self) -> *mut u8 {
        // SAFETY: skew < page size <= map_len.
        unsafe { self.map.as_ptr().add(self.skew) }
    }
}

impl RegisterBus for MappedWindow {
    fn window_size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        check_window(offset, data.len(), self.size)?;
        let base = self.base_ptr();
        let mut pos = 0usize;
        let start = offset as usize;
        while pos < data.len() {
            let at = start + pos;
            let aligned = (base as usize).wrapping_add(at) % 4 == 0;
            // SAFETY: [at, at + 4) or [at, at + 1) is inside the window and
            // word accesses only happen on word-aligned pointers.
            unsafe {
                if aligned && data.len() - pos >= 4 {
                    let word = std::ptr::read_volatile(base.add(at).cast::<u32>());
                    data[pos..pos + 4].copy_from_slice(&word.to_le_bytes());
                    pos += 4;
                } else {
                    data[pos] = std::ptr::read_volatile(base.add(at));
                    pos += 1;
                }
            }
        }
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_window(offset, data.len(), self.size)?;
        let base = self.base_ptr();
        let mut pos = 0usize;
        let start = offset as usize;
        while pos < data.len() {
            let at = start + pos;
            let aligned = (base as usize).wrapping_add(at) % 4 == 0;
            // SAFETY: [at, at + 4) or [at, at + 1) is inside the window and
            // word accesses only happen on word-aligned pointers.
            unsafe {
                if aligned && data.len() - pos >= 4 {
                    let mut word = [0u8; 4];
                    word.copy_from_slice(&data[pos..pos + 4]);
                    std::ptr::write_volatile(base.add(at).cast::<u32>(), u32::from_le_bytes(word));
                    pos += 4;
                } else {
                    std::ptr::write_volatile(base.add(at), data[pos]);
                    pos += 1;
                }
            }
        }
        Ok(())
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region returned by mmap.
        let rc = unsafe { libc::munmap(self.map.as_ptr().cast(), self.map_len) };
        if rc != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "munmap of register window failed"
            );
        }
    }
}
