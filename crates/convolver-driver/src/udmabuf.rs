//! Contiguous DMA memory from the u-dma-buf kernel module
//!
//! The module exposes a physically contiguous region as `/dev/udmabufN` and
//! publishes its bus address under `/sys/class/u-dma-buf/udmabufN/`. The
//! allocator maps the whole region once and hands out page-aligned slices.
//! When every slice has been released the arena rewinds, so a session that
//! allocates and releases per request never runs out.
//!
//! Opening with `O_SYNC` gives an uncached mapping; buffers from it may be
//! marked coherent. On a cached mapping, non-coherent buffers sync through
//! the module's `sync_for_device` / `sync_for_cpu` attributes.

#![allow(clippy::cast_possible_truncation)]

use crate::dma::{BufferAllocator, BufferStorage, TransferBuffer};
use crate::error::{ConvolverError, Result};
use crate::mmio::PAGE_SIZE;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// sysfs class directory of the module.
pub const SYSFS_CLASS: &str = "/sys/class/u-dma-buf";

const SYNC_TO_DEVICE: u32 = 1;
const SYNC_FROM_DEVICE: u32 = 2;

/// Parse a sysfs integer attribute (`0x`-prefixed hex or decimal).
pub fn parse_sysfs_u64(text: &str) -> Option<u64> {
    let t = text.trim();
    match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => t.parse().ok(),
    }
}

fn read_attr(dir: &Path, attr: &str) -> Result<u64> {
    let path = dir.join(attr);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        ConvolverError::initialization(format!("Cannot read {}: {e}", path.display()))
    })?;
    parse_sysfs_u64(&text).ok_or_else(|| {
        ConvolverError::initialization(format!("Unparseable {}: {:?}", path.display(), text.trim()))
    })
}

#[derive(Debug, Default)]
struct Arena {
    next: usize,
    outstanding: usize,
}

struct Region {
    ptr: NonNull<u8>,
    len: usize,
    phys_addr: u64,
    sysfs: PathBuf,
    arena: Mutex<Arena>,
    _file: File,
}

// SAFETY: Send/Sync - the mapping is process-wide and the arena hands out
// disjoint slices; the only shared mutable state is behind the Mutex.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn sync(&self, offset: usize, size: usize, direction: u32, trigger: &str) {
        let writes = [
            ("sync_offset", offset.to_string()),
            ("sync_size", size.to_string()),
            ("sync_direction", direction.to_string()),
            (trigger, "1".to_string()),
        ];
        for (attr, value) in writes {
            if let Err(e) = std::fs::write(self.sysfs.join(attr), value) {
                warn!("u-dma-buf {attr} failed: {e}");
                return;
            }
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from the successful mmap in open(); Drop runs once.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
        debug!("Unmapped u-dma-buf region at {:#x}", self.phys_addr);
    }
}

/// Page-aligned slices of one u-dma-buf region.
#[derive(Clone)]
pub struct UdmabufAllocator {
    region: Arc<Region>,
}

impl std::fmt::Debug for UdmabufAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdmabufAllocator")
            .field("phys_addr", &format_args!("{:#x}", self.region.phys_addr))
            .field("len", &format_args!("{:#x}", self.region.len))
            .field("sysfs", &self.region.sysfs)
            .finish_non_exhaustive()
    }
}

impl UdmabufAllocator {
    /// Map `/dev/{name}`.
    ///
    /// `uncached` opens with `O_SYNC`, which makes every buffer safe to mark
    /// coherent.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device node or its sysfs attributes are missing
    /// - The region is empty
    /// - Memory mapping the region fails
    pub fn open(name: &str, uncached: bool) -> Result<Self> {
        let sysfs = Path::new(SYSFS_CLASS).join(name);
        let phys_addr = read_attr(&sysfs, "phys_addr")?;
        let len = read_attr(&sysfs, "size")? as usize;
        if len == 0 {
            return Err(ConvolverError::initialization(format!("u-dma-buf {name} is empty")));
        }

        let device = Path::new("/dev").join(name);
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if uncached {
            // SAFETY: OFlags::SYNC.bits() is a small positive flag value
            #[allow(clippy::cast_possible_wrap)]
            let sync_flag = OFlags::SYNC.bits() as i32;
            options.custom_flags(sync_flag);
        }
        let file = options.open(&device).map_err(|e| {
            ConvolverError::initialization(format!("Cannot open {}: {e}", device.display()))
        })?;

        // SAFETY: mmap of the whole device region. Invariants: (1) file open read/write;
        // (2) offset 0; (3) len is the region size reported by the module. The file is
        // kept alive in Region and munmap runs in its Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| {
                ConvolverError::initialization(format!("Failed to mmap {}: {e}", device.display()))
            })?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| ConvolverError::initialization("mmap returned a null pointer"))?;

        info!(
            "Mapped {} ({len:#x} bytes at {phys_addr:#x}, {})",
            device.display(),
            if uncached { "uncached" } else { "cached" }
        );

        Ok(Self {
            region: Arc::new(Region {
                ptr,
                len,
                phys_addr,
                sysfs,
                arena: Mutex::new(Arena::default()),
                _file: file,
            }),
        })
    }

    /// Bus address of the region.
    pub fn phys_addr(&self) -> u64 {
        self.region.phys_addr
    }

    /// Region size in bytes.
    pub fn capacity(&self) -> usize {
        self.region.len
    }
}

impl BufferAllocator for UdmabufAllocator {
    fn allocate(&self, words: usize, coherent: bool) -> Result<TransferBuffer> {
        if words == 0 {
            return Err(ConvolverError::configuration("zero-length buffer requested"));
        }
        let bytes = words * 4;
        let span = bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let offset = {
            let mut arena = self.region.arena.lock().unwrap_or_else(PoisonError::into_inner);
            if arena.next + span > self.region.len {
                return Err(ConvolverError::transfer_failed(format!(
                    "u-dma-buf exhausted: need {span:#x}, {:#x} of {:#x} in use",
                    arena.next, self.region.len
                )));
            }
            let offset = arena.next;
            arena.next += span;
            arena.outstanding += 1;
            offset
        };

        debug!("u-dma-buf slice {offset:#x}+{bytes:#x}");
        Ok(TransferBuffer::new(
            Box::new(UdmabufSlice {
                region: Arc::clone(&self.region),
                offset,
                words,
            }),
            coherent,
        ))
    }

    fn outstanding(&self) -> usize {
        self.region
            .arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outstanding
    }
}

struct UdmabufSlice {
    region: Arc<Region>,
    offset: usize,
    words: usize,
}

impl std::fmt::Debug for UdmabufSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdmabufSlice")
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("words", &self.words)
            .finish()
    }
}

impl BufferStorage for UdmabufSlice {
    fn words(&self) -> &[u32] {
        // SAFETY: offset + words*4 <= region.len (checked in allocate); offset is page
        // aligned so the cast is u32 aligned; slices from one arena never overlap.
        unsafe {
            std::slice::from_raw_parts(
                self.region.ptr.as_ptr().add(self.offset).cast::<u32>(),
                self.words,
            )
        }
    }

    fn words_mut(&mut self) -> &mut [u32] {
        // SAFETY: as in words(); &mut self guarantees exclusive access to this slice.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.ptr.as_ptr().add(self.offset).cast::<u32>(),
                self.words,
            )
        }
    }

    fn physical_address(&self) -> u64 {
        self.region.phys_addr + self.offset as u64
    }

    fn sync_for_device(&mut self) {
        self.region
            .sync(self.offset, self.words * 4, SYNC_TO_DEVICE, "sync_for_device");
    }

    fn sync_for_cpu(&mut self) {
        self.region
            .sync(self.offset, self.words * 4, SYNC_FROM_DEVICE, "sync_for_cpu");
    }
}

impl Drop for UdmabufSlice {
    fn drop(&mut self) {
        let mut arena = self.region.arena.lock().unwrap_or_else(PoisonError::into_inner);
        arena.outstanding = arena.outstanding.saturating_sub(1);
        if arena.outstanding == 0 {
            arena.next = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_integers() {
        assert_eq!(parse_sysfs_u64("0x3f000000\n"), Some(0x3f00_0000));
        assert_eq!(parse_sysfs_u64("1048576"), Some(1_048_576));
        assert_eq!(parse_sysfs_u64("0XFF"), Some(255));
        assert_eq!(parse_sysfs_u64("bogus"), None);
    }

    #[test]
    fn missing_module_is_initialization_error() {
        let err = UdmabufAllocator::open("udmabuf-does-not-exist", true).unwrap_err();
        assert!(matches!(err, ConvolverError::Initialization { .. }));
    }

    #[test]
    #[ignore] // Requires the u-dma-buf module with udmabuf0 configured
    fn arena_rewinds_after_release() {
        let alloc = UdmabufAllocator::open("udmabuf0", true).expect("open udmabuf0");
        let a = alloc.allocate(1000, true).unwrap();
        let b = alloc.allocate(10, true).unwrap();
        assert_eq!(b.physical_address() - a.physical_address(), PAGE_SIZE as u64);
        drop(a);
        drop(b);
        assert_eq!(alloc.outstanding(), 0);
        let c = alloc.allocate(10, true).unwrap();
        assert_eq!(c.physical_address(), alloc.phys_addr());
    }
}
