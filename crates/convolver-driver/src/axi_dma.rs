//! AXI DMA channel driver (simple register mode)
//!
//! One [`AxiDmaChannel`] drives one direction of the engine through its
//! register block. A transfer is armed by writing the buffer address and then
//! the byte length; completion is the channel reporting `IDLE` in DMASR.
//! Waits are bounded; a channel that never goes idle surfaces as
//! [`ConvolverError::TransferTimeout`] and keeps its buffer until aborted.

use crate::dma::{DmaChannel, TransferBuffer};
use crate::error::{ConvolverError, Result};
use crate::mmio::RegisterBank;
use convolver_chip::axi_dma::{control, status, ChannelRegisters, Direction, MAX_TRANSFER_BYTES};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bound on the channel's self-clearing reset.
const RESET_TIMEOUT: Duration = Duration::from_millis(100);

/// Parameters for polling DMASR.
#[derive(Clone, Copy)]
struct PollConfig {
    done_mask: u32,
    error_mask: u32,
    timeout: Duration,
    yield_interval: u32,
}

/// One direction of an AXI DMA engine.
#[derive(Debug)]
pub struct AxiDmaChannel<B: RegisterBank> {
    bank: B,
    direction: Direction,
    regs: ChannelRegisters,
    in_flight: Option<TransferBuffer>,
}

impl<B: RegisterBank> AxiDmaChannel<B> {
    /// Reset the channel and start it running.
    ///
    /// # Errors
    ///
    /// Returns error if the reset does not clear or the channel stays halted.
    pub fn new(bank: B, direction: Direction) -> Result<Self> {
        let mut channel = Self {
            bank,
            direction,
            regs: direction.registers(),
            in_flight: None,
        };
        channel.reset()?;
        channel.start()?;
        debug!("{direction} channel running");
        Ok(channel)
    }

    /// Raw DMASR.
    pub fn read_status(&self) -> u32 {
        self.bank.read32(self.regs.status)
    }

    fn reset(&mut self) -> Result<()> {
        self.bank.write32(self.regs.control, control::RESET);
        let deadline = Instant::now() + RESET_TIMEOUT;
        while self.bank.read32(self.regs.control) & control::RESET != 0 {
            if Instant::now() >= deadline {
                return Err(ConvolverError::hardware_fault(format!(
                    "{} reset did not complete",
                    self.direction
                )));
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let cr = self.bank.read32(self.regs.control);
        self.bank.write32(self.regs.control, cr | control::RUN);
        if self.read_status() & status::HALTED != 0 {
            return Err(ConvolverError::hardware_fault(format!(
                "{} still halted after run",
                self.direction
            )));
        }
        Ok(())
    }

    /// Poll DMASR until `done_mask` is set, returning the poll count.
    fn poll_status(&self, cfg: PollConfig) -> Result<u32> {
        let PollConfig {
            done_mask,
            error_mask,
            timeout,
            yield_interval,
        } = cfg;
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            let sr = self.read_status();
            polls = polls.wrapping_add(1);
            if sr & error_mask != 0 {
                return Err(ConvolverError::hardware_fault(format!(
                    "{} DMASR error bits {:#x}",
                    self.direction,
                    sr & error_mask
                )));
            }
            if sr & done_mask != 0 {
                return Ok(polls);
            }
            if start.elapsed() >= timeout {
                #[allow(clippy::cast_possible_truncation)]
                let ms = timeout.as_millis() as u64;
                return Err(ConvolverError::transfer_timeout(self.direction, ms));
            }
            if polls % yield_interval == 0 {
                std::thread::yield_now();
            }
        }
    }
}

impl<B: RegisterBank> DmaChannel for AxiDmaChannel<B> {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn transfer(&mut self, mut buffer: TransferBuffer) -> Result<()> {
        if self.in_flight.is_some() {
            return Err(ConvolverError::transfer_failed(format!(
                "{} already has a transfer in flight",
                self.direction
            )));
        }
        let bytes = buffer.size_bytes();
        if bytes == 0 || bytes > MAX_TRANSFER_BYTES {
            return Err(ConvolverError::transfer_failed(format!(
                "{} length {bytes} bytes outside 1..={MAX_TRANSFER_BYTES}",
                self.direction
            )));
        }

        buffer.flush();
        let addr = buffer.physical_address();

        // clear stale completion interrupts before arming
        self.bank.write32(self.regs.status, status::IRQ_MASK);
        #[allow(clippy::cast_possible_truncation)]
        let (lo, hi, len) = (addr as u32, (addr >> 32) as u32, bytes as u32);
        self.bank.write32(self.regs.address, lo);
        self.bank.write32(self.regs.address_msb, hi);
        self.bank.write32(self.regs.length, len);
        debug!("{} armed: {bytes} bytes at {addr:#x}", self.direction);

        self.in_flight = Some(buffer);
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<TransferBuffer> {
        if self.in_flight.is_none() {
            return Err(ConvolverError::transfer_failed(format!(
                "{} has no transfer in flight",
                self.direction
            )));
        }

        let polls = self.poll_status(PollConfig {
            done_mask: status::IDLE,
            error_mask: status::ERROR_MASK,
            timeout,
            yield_interval: 1_000,
        })?;
        debug!("{} complete after {polls} polls", self.direction);

        let mut buffer = self
            .in_flight
            .take()
            .ok_or_else(|| ConvolverError::transfer_failed("buffer vanished during wait"))?;
        buffer.invalidate();
        Ok(buffer)
    }

    fn abort(&mut self) -> Option<TransferBuffer> {
        // stop the engine before the buffer can be released
        if let Err(e) = self.reset().and_then(|()| self.start()) {
            warn!("{e}");
        }
        self.in_flight.take()
    }

    fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }
}

impl<B: RegisterBank> Drop for AxiDmaChannel<B> {
    fn drop(&mut self) {
        if self.in_flight.is_some() {
            // halt the channel so it stops touching memory about to be freed
            self.bank.write32(self.regs.control, control::RESET);
            warn!("{} dropped with a transfer in flight", self.direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sim::{MemoryBank, TrackingAllocator};
    use crate::dma::BufferAllocator;
    use convolver_chip::axi_dma::{MM2S, S2MM};

    /// Memory bank whose channel reset bit self-clears like the real engine.
    #[derive(Debug, Default)]
    struct DmaBank(MemoryBank);

    impl RegisterBank for DmaBank {
        fn read32(&self, offset: usize) -> u32 {
            self.0.read32(offset)
        }

        fn write32(&self, offset: usize, value: u32) {
            let value = if offset == MM2S.control || offset == S2MM.control {
                value & !control::RESET
            } else {
                value
            };
            self.0.write32(offset, value);
        }
    }

    fn channel(direction: Direction) -> AxiDmaChannel<DmaBank> {
        AxiDmaChannel::new(DmaBank::default(), direction).unwrap()
    }

    #[test]
    fn arm_writes_address_then_length() {
        let alloc = TrackingAllocator::new();
        let mut ch = channel(Direction::Receive);
        ch.bank.0.clear_log();

        let buf = alloc.allocate(900, true).unwrap();
        let addr = buf.physical_address();
        ch.transfer(buf).unwrap();

        let regs = Direction::Receive.registers();
        assert_eq!(ch.bank.0.writes_to(regs.length), vec![3600]);
        assert_eq!(ch.bank.0.writes_to(regs.address), vec![addr as u32]);
        let order = ch.bank.0.write_offsets();
        let addr_pos = order.iter().position(|&o| o == regs.address).unwrap();
        let len_pos = order.iter().position(|&o| o == regs.length).unwrap();
        assert!(addr_pos < len_pos);
        assert!(ch.is_busy());
    }

    #[test]
    fn second_transfer_rejected_while_busy() {
        let alloc = TrackingAllocator::new();
        let mut ch = channel(Direction::Send);
        ch.transfer(alloc.allocate(4, true).unwrap()).unwrap();
        let err = ch.transfer(alloc.allocate(4, true).unwrap()).unwrap_err();
        assert!(matches!(err, ConvolverError::TransferFailed { .. }));
        // the rejected buffer was released, the armed one is still held
        assert_eq!(alloc.outstanding(), 1);
    }

    #[test]
    fn wait_returns_buffer_when_idle() {
        let alloc = TrackingAllocator::new();
        let mut ch = channel(Direction::Send);
        ch.transfer(alloc.allocate(4, true).unwrap()).unwrap();
        ch.bank.0.poke(Direction::Send.registers().status, status::IDLE);
        let buf = ch.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(buf.len(), 4);
        assert!(!ch.is_busy());
    }

    #[test]
    fn wait_times_out_and_abort_releases() {
        let alloc = TrackingAllocator::new();
        let mut ch = channel(Direction::Receive);
        ch.transfer(alloc.allocate(4, true).unwrap()).unwrap();

        let err = ch.wait(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, ConvolverError::TransferTimeout { .. }));
        assert!(ch.is_busy());

        ch.abort().unwrap().release();
        assert_eq!(alloc.outstanding(), 0);
        assert!(!ch.is_busy());
    }

    #[test]
    fn error_bits_are_hardware_faults() {
        let alloc = TrackingAllocator::new();
        let mut ch = channel(Direction::Receive);
        ch.transfer(alloc.allocate(4, true).unwrap()).unwrap();
        ch.bank
            .0
            .poke(Direction::Receive.registers().status, status::DECODE_ERR);
        let err = ch.wait(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ConvolverError::HardwareFault { .. }));
    }

    #[test]
    fn wait_without_transfer_fails() {
        let mut ch = channel(Direction::Send);
        assert!(matches!(
            ch.wait(Duration::from_millis(1)),
            Err(ConvolverError::TransferFailed { .. })
        ));
    }
}
