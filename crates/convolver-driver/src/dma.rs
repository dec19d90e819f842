//! DMA transfer contract
//!
//! Buffer ownership follows the hardware transaction:
//!
//! ```text
//! allocate ──▶ host fills ──▶ channel.transfer(buf) ──▶ (hardware owns)
//!                                                          │
//!   release (Drop) ◀── host reads ◀── channel.wait() ◀─────┘
//!                                   ◀── channel.abort() (fault path)
//! ```
//!
//! A buffer handed to `transfer` cannot be touched by the host until `wait`
//! or `abort` gives it back. Releasing is tied to `Drop` of the buffer's
//! storage, so every exit path returns memory to its allocator.

use crate::error::Result;
use convolver_chip::axi_dma::Direction;
use std::fmt::Debug;
use std::time::Duration;

/// Backing memory of a [`TransferBuffer`].
///
/// Dropping the storage releases it to the allocator it came from.
pub trait BufferStorage: Debug + Send {
    /// Host view of the words.
    fn words(&self) -> &[u32];

    /// Mutable host view of the words.
    fn words_mut(&mut self) -> &mut [u32];

    /// Device-visible bus address of word 0.
    fn physical_address(&self) -> u64;

    /// Write back CPU caches so the device sees host writes.
    fn sync_for_device(&mut self) {}

    /// Discard stale CPU cache lines so the host sees device writes.
    fn sync_for_cpu(&mut self) {}
}

/// Host-owned, DMA-visible buffer of 32-bit words.
#[derive(Debug)]
pub struct TransferBuffer {
    storage: Box<dyn BufferStorage>,
    coherent: bool,
}

impl TransferBuffer {
    /// Wrap allocator storage.
    pub fn new(storage: Box<dyn BufferStorage>, coherent: bool) -> Self {
        Self { storage, coherent }
    }

    /// Element count in words.
    pub fn len(&self) -> usize {
        self.storage.words().len()
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len() * 4
    }

    /// True when cache maintenance is skipped for this buffer.
    pub const fn coherent(&self) -> bool {
        self.coherent
    }

    /// Device-visible address.
    pub fn physical_address(&self) -> u64 {
        self.storage.physical_address()
    }

    /// Host view of the contents.
    pub fn as_slice(&self) -> &[u32] {
        self.storage.words()
    }

    /// Mutable host view of the contents.
    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        self.storage.words_mut()
    }

    /// Make host writes visible to the device. No-op for coherent buffers.
    pub fn flush(&mut self) {
        if !self.coherent {
            self.storage.sync_for_device();
        }
    }

    /// Make device writes visible to the host. No-op for coherent buffers.
    pub fn invalidate(&mut self) {
        if !self.coherent {
            self.storage.sync_for_cpu();
        }
    }

    /// Release the buffer back to its allocator.
    pub fn release(self) {
        tracing::trace!(
            "Releasing {} word buffer at {:#x}",
            self.len(),
            self.physical_address()
        );
        drop(self);
    }
}

/// Source of DMA-visible, page-aligned memory.
pub trait BufferAllocator: Debug + Send {
    /// Allocate `words` 32-bit elements.
    ///
    /// # Errors
    ///
    /// Returns error if the backing memory cannot hold the request.
    fn allocate(&self, words: usize, coherent: bool) -> Result<TransferBuffer>;

    /// Buffers handed out and not yet released.
    fn outstanding(&self) -> usize;
}

/// One direction of a DMA engine.
pub trait DmaChannel: Debug + Send {
    /// Direction this channel moves data in.
    fn direction(&self) -> Direction;

    /// Arm the channel with `buffer` and return without waiting.
    ///
    /// The channel owns the buffer until [`DmaChannel::wait`] or
    /// [`DmaChannel::abort`] returns it. On error the buffer is released.
    ///
    /// # Errors
    ///
    /// Returns error if the channel already has a transfer in flight or the
    /// buffer does not fit the engine's limits.
    fn transfer(&mut self, buffer: TransferBuffer) -> Result<()>;

    /// Block until the in-flight transfer completes, at most `timeout`.
    ///
    /// On timeout or hardware error the buffer stays with the channel; call
    /// [`DmaChannel::abort`] to stop the engine and get it back.
    ///
    /// # Errors
    ///
    /// Returns `TransferTimeout`, `HardwareFault`, or `TransferFailed` when no
    /// transfer is in flight.
    fn wait(&mut self, timeout: Duration) -> Result<TransferBuffer>;

    /// Stop the channel and hand back any in-flight buffer.
    fn abort(&mut self) -> Option<TransferBuffer>;

    /// True while a buffer is armed.
    fn is_busy(&self) -> bool;
}

/// Send / receive channel pair of one DMA engine.
#[derive(Debug)]
pub struct DmaEngine {
    /// Memory → accelerator stream.
    pub send: Box<dyn DmaChannel>,
    /// Accelerator stream → memory.
    pub recv: Box<dyn DmaChannel>,
}

impl DmaEngine {
    /// Pair two channels.
    pub fn new(send: Box<dyn DmaChannel>, recv: Box<dyn DmaChannel>) -> Self {
        debug_assert_eq!(send.direction(), Direction::Send);
        debug_assert_eq!(recv.direction(), Direction::Receive);
        Self { send, recv }
    }

    /// Abort both channels, releasing whatever they held.
    ///
    /// Returns the number of buffers that were still in flight.
    pub fn abort_all(&mut self) -> usize {
        let held = [self.recv.abort(), self.send.abort()];
        let count = held.iter().filter(|b| b.is_some()).count();
        for buf in held.into_iter().flatten() {
            buf.release();
        }
        if count > 0 {
            tracing::warn!("Aborted DMA engine with {count} buffer(s) in flight");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sim::TrackingAllocator;

    #[test]
    fn release_returns_to_allocator() {
        let alloc = TrackingAllocator::new();
        let a = alloc.allocate(16, true).unwrap();
        let b = alloc.allocate(4, false).unwrap();
        assert_eq!(alloc.outstanding(), 2);
        a.release();
        assert_eq!(alloc.outstanding(), 1);
        drop(b);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn buffer_views() {
        let alloc = TrackingAllocator::new();
        let mut buf = alloc.allocate(3, true).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.size_bytes(), 12);
        buf.as_mut_slice().copy_from_slice(&[1, 2, 3]);
        buf.flush();
        buf.invalidate();
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        assert!(buf.coherent());
    }

    #[test]
    fn non_coherent_buffers_sync() {
        let alloc = TrackingAllocator::new();
        let mut buf = alloc.allocate(2, false).unwrap();
        buf.flush();
        buf.invalidate();
        buf.invalidate();
        assert_eq!(alloc.syncs(), 3);

        let mut coherent = alloc.allocate(2, true).unwrap();
        coherent.flush();
        assert_eq!(alloc.syncs(), 3);
    }
}
