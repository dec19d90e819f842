//! Memory-mapped I/O for the convolver overlay
//!
//! [`RegisterBank`] is the seam between the typed register layer and the
//! hardware: one aligned 32-bit read or write at a byte offset. The hardware
//! implementation is [`MappedRegion`], a `/dev/mem` (or UIO) window mapped with
//! rustix; tests and the simulated backend provide in-memory banks.

// Hardware register access requires exact type casts for mmap APIs
// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{ConvolverError, Result};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

/// Mapping granularity for physical windows.
pub const PAGE_SIZE: usize = 4096;

/// 32-bit register access at byte offsets.
///
/// Implementations take `&self`: MMIO has interior mutability by nature, and
/// in-memory banks use locks. Offsets are word aligned by construction of the
/// register map.
pub trait RegisterBank: std::fmt::Debug + Send + Sync {
    /// Read one register.
    fn read32(&self, offset: usize) -> u32;

    /// Write one register.
    fn write32(&self, offset: usize, value: u32);
}

impl<B: RegisterBank + ?Sized> RegisterBank for Arc<B> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

impl<B: RegisterBank + ?Sized> RegisterBank for Box<B> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

impl<B: RegisterBank + ?Sized> RegisterBank for &B {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

/// Physical register window mapped into the process.
pub struct MappedRegion {
    /// Start of the mapping (page aligned)
    map_ptr: NonNull<u8>,
    /// Length of the mapping
    map_len: usize,
    /// Offset of the requested base within the mapping
    base_offset: usize,
    /// Usable span from the requested base
    span: usize,
    /// Physical base address
    phys_base: u64,
    /// Device node backing the mapping
    path: PathBuf,
    _file: File,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.map_ptr))
            .field("phys_base", &format_args!("{:#x}", self.phys_base))
            .field("span", &format_args!("{:#x}", self.span))
            .field("path", &self.path)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively. Moving between threads
// doesn't invalidate the mapping (mmap'd memory is process-wide). No thread-local state.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - every access is a single bounds-checked volatile 32-bit read or write.
// Register-level ordering between threads is the caller's concern (the session holds
// `&mut` for the duration of a request).
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `span` bytes of physical address space starting at `phys_base`.
    ///
    /// `device` is usually `/dev/mem`; for a UIO device pass `/dev/uioN` and a
    /// `phys_base` of `map_index * PAGE_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device node cannot be opened (missing, or insufficient permission)
    /// - `span` is zero
    /// - Memory mapping the window fails
    pub fn map(device: &Path, phys_base: u64, span: usize) -> Result<Self> {
        if span == 0 {
            return Err(ConvolverError::initialization(format!(
                "Empty register window at {phys_base:#x}"
            )));
        }

        // SAFETY: OFlags::SYNC.bits() is a small positive flag value
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(device)
            .map_err(|e| {
                ConvolverError::initialization(format!("Cannot open {}: {e}", device.display()))
            })?;

        let page_mask = (PAGE_SIZE as u64) - 1;
        let map_base = phys_base & !page_mask;
        let base_offset = (phys_base - map_base) as usize;
        let map_len = (base_offset + span).div_ceil(PAGE_SIZE) * PAGE_SIZE;

        // SAFETY: mmap necessary for MMIO - maps the physical window into the process.
        // Invariants: (1) file is open read/write; (2) map_base is page aligned; (3) map_len
        // is a non-zero multiple of the page size; (4) ptr valid for map_len bytes or Err.
        // The file is stored alongside the mapping and munmap runs in Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                map_base,
            )
            .map_err(|e| {
                ConvolverError::initialization(format!(
                    "Failed to mmap {:#x}+{map_len:#x} from {}: {e}",
                    map_base,
                    device.display()
                ))
            })?
        };

        let map_ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| ConvolverError::initialization("mmap returned a null pointer"))?;

        tracing::info!(
            "Mapped {:#x}+{span:#x} from {} at {map_ptr:p}",
            phys_base,
            device.display()
        );

        Ok(Self {
            map_ptr,
            map_len,
            base_offset,
            span,
            phys_base,
            path: device.to_path_buf(),
            _file: file,
        })
    }

    /// Physical base address of the window
    pub const fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Usable size of the window in bytes
    pub const fn span(&self) -> usize {
        self.span
    }

    fn register_ptr(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.span,
            "Register offset {offset:#x} outside window of {:#x} bytes",
            self.span
        );
        // SAFETY: base_offset + offset + 4 <= map_len (checked above), so the
        // resulting pointer stays inside the mapping.
        unsafe { self.map_ptr.as_ptr().add(self.base_offset + offset).cast::<u32>() }
    }
}

impl RegisterBank for MappedRegion {
    /// # Panics
    ///
    /// Panics if `offset` is unaligned or `offset + 4` exceeds the window.
    fn read32(&self, offset: usize) -> u32 {
        let ptr = self.register_ptr(offset);
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr inside the mapping; (2) u32 aligned; (3) mapping lives as long as self.
        let value = unsafe { ptr.read_volatile() };
        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        value
    }

    /// # Panics
    ///
    /// Panics if `offset` is unaligned or `offset + 4` exceeds the window.
    fn write32(&self, offset: usize, value: u32) {
        let ptr = self.register_ptr(offset);
        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr inside the mapping; (2) u32 aligned.
        unsafe { ptr.write_volatile(value) };
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: map_ptr/map_len come from the successful mmap in map(); Drop runs once.
        unsafe {
            if let Err(e) = munmap(self.map_ptr.as_ptr().cast(), self.map_len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
        tracing::debug!("Unmapped {:#x} ({})", self.phys_base, self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Words(Mutex<Vec<u32>>);

    impl RegisterBank for Words {
        fn read32(&self, offset: usize) -> u32 {
            self.0.lock().unwrap()[offset / 4]
        }

        fn write32(&self, offset: usize, value: u32) {
            self.0.lock().unwrap()[offset / 4] = value;
        }
    }

    #[test]
    fn bank_through_smart_pointers() {
        let bank: Arc<dyn RegisterBank> = Arc::new(Words(Mutex::new(vec![0; 4])));
        bank.write32(8, 0xdead_beef);
        let boxed: Box<dyn RegisterBank> = Box::new(Arc::clone(&bank));
        assert_eq!(boxed.read32(8), 0xdead_beef);
        assert_eq!((&bank).read32(8), 0xdead_beef);
    }

    #[test]
    fn empty_window_rejected() {
        let err = MappedRegion::map(Path::new("/dev/null"), 0x4000_0000, 0).unwrap_err();
        assert!(matches!(err, ConvolverError::Initialization { .. }));
    }

    #[test]
    #[ignore] // Requires /dev/mem access and the overlay loaded
    fn map_adapter_window() {
        let region = MappedRegion::map(Path::new("/dev/mem"), 0x43C0_0000, 0x1_0000)
            .expect("map adapter registers");
        println!("status = {:#x}", region.read32(convolver_chip::regs::STATUS));
    }
}
