// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated overlay backend
//!
//! Stands in for the board so the session protocol can be exercised in CI:
//!
//! - [`MemoryBank`]: plain register memory with an access log
//! - [`TrackingAllocator`]: heap-backed transfer buffers with an outstanding count
//! - [`SimulatedAccelerator`]: adapter registers, both DMA channels and the
//!   reference network wired together
//!
//! The accelerator reacts to the execute command the way the hardware does
//! from the host's point of view. The input stream is consumed only if the
//! send channel is armed; output beats are captured only if the receive
//! channel is armed *before* execute. Output produced with no receive buffer
//! is lost and the receive wait times out.

use super::reference::{self, Kernel};
use crate::dma::{BufferAllocator, BufferStorage, DmaChannel, DmaEngine, TransferBuffer};
use crate::error::{ConvolverError, Result};
use crate::mmio::{RegisterBank, PAGE_SIZE};
use crate::registers::AdapterRegisters;
use crate::session::SessionParts;
use convolver_chip::axi_dma::Direction;
use convolver_chip::regs::{self, command, slot_status};
use convolver_chip::NetworkGeometry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status bit the simulated adapter raises for malformed requests.
pub const SIM_FAULT: u32 = 1 << 8;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Register memory ──────────────────────────────────────────────────────────

/// One logged register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `read32(offset)` returned `value`
    Read {
        /// Byte offset
        offset: usize,
        /// Value returned
        value: u32,
    },
    /// `write32(offset, value)`
    Write {
        /// Byte offset
        offset: usize,
        /// Value written
        value: u32,
    },
}

#[derive(Debug, Default)]
struct BankInner {
    words: BTreeMap<usize, u32>,
    log: Vec<Access>,
}

/// In-memory register bank. Unwritten registers read as zero.
#[derive(Debug, Default)]
pub struct MemoryBank {
    inner: Mutex<BankInner>,
}

impl MemoryBank {
    /// Empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and writes since the last [`MemoryBank::clear_log`].
    pub fn access_count(&self) -> usize {
        lock(&self.inner).log.len()
    }

    /// Copy of the access log.
    pub fn accesses(&self) -> Vec<Access> {
        lock(&self.inner).log.clone()
    }

    /// Forget logged accesses (register contents are kept).
    pub fn clear_log(&self) {
        lock(&self.inner).log.clear();
    }

    /// Values written to `offset`, oldest first.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        lock(&self.inner)
            .log
            .iter()
            .filter_map(|a| match *a {
                Access::Write { offset: o, value } if o == offset => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Offsets of every logged write, in order.
    pub fn write_offsets(&self) -> Vec<usize> {
        lock(&self.inner)
            .log
            .iter()
            .filter_map(|a| match *a {
                Access::Write { offset, .. } => Some(offset),
                Access::Read { .. } => None,
            })
            .collect()
    }

    /// Read without logging.
    pub fn peek(&self, offset: usize) -> u32 {
        lock(&self.inner).words.get(&offset).copied().unwrap_or(0)
    }

    /// Write without logging (hardware-side update).
    pub fn poke(&self, offset: usize, value: u32) {
        lock(&self.inner).words.insert(offset, value);
    }
}

impl RegisterBank for MemoryBank {
    fn read32(&self, offset: usize) -> u32 {
        let mut inner = lock(&self.inner);
        let value = inner.words.get(&offset).copied().unwrap_or(0);
        inner.log.push(Access::Read { offset, value });
        value
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut inner = lock(&self.inner);
        inner.words.insert(offset, value);
        inner.log.push(Access::Write { offset, value });
    }
}

// ── Buffers ──────────────────────────────────────────────────────────────────

/// Heap allocator that counts outstanding buffers.
///
/// Clones share their counters, so a test can keep one handle while the
/// session owns another.
#[derive(Debug, Clone)]
pub struct TrackingAllocator {
    outstanding: Arc<AtomicUsize>,
    allocations: Arc<AtomicUsize>,
    syncs: Arc<AtomicUsize>,
    next_addr: Arc<AtomicU64>,
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self {
            outstanding: Arc::default(),
            allocations: Arc::default(),
            syncs: Arc::default(),
            next_addr: Arc::new(AtomicU64::new(0x1000_0000)),
        }
    }
}

impl TrackingAllocator {
    /// Fresh allocator with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers handed out over the allocator's lifetime.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Cache maintenance calls issued on non-coherent buffers.
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

impl BufferAllocator for TrackingAllocator {
    fn allocate(&self, words: usize, coherent: bool) -> Result<TransferBuffer> {
        if words == 0 {
            return Err(ConvolverError::configuration("zero-length buffer requested"));
        }
        let span = (words * 4).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let addr = self.next_addr.fetch_add(span as u64, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(TransferBuffer::new(
            Box::new(HeapStorage {
                words: vec![0; words],
                addr,
                outstanding: Arc::clone(&self.outstanding),
                syncs: Arc::clone(&self.syncs),
            }),
            coherent,
        ))
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct HeapStorage {
    words: Vec<u32>,
    addr: u64,
    outstanding: Arc<AtomicUsize>,
    syncs: Arc<AtomicUsize>,
}

impl BufferStorage for HeapStorage {
    fn words(&self) -> &[u32] {
        &self.words
    }

    fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    fn physical_address(&self) -> u64 {
        self.addr
    }

    fn sync_for_device(&mut self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn sync_for_cpu(&mut self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for HeapStorage {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Accelerator ──────────────────────────────────────────────────────────────

/// Something the simulated overlay observed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// A DMA channel was armed with a buffer.
    Armed(Direction),
    /// The execute-step command was written.
    Executed,
    /// A DMA channel was aborted.
    Aborted(Direction),
    /// The adapter reset bit was pulsed.
    Reset,
}

/// Failure modes the simulated overlay can be told to exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Execute starts but never completes; both waits time out.
    Hang,
    /// Complete normally but raise these extra status bits.
    StatusBits(u32),
    /// Receive channel reports a DMA decode error.
    DmaError,
}

#[derive(Debug, Default)]
struct ChannelSlot {
    buffer: Option<TransferBuffer>,
    done: bool,
}

#[derive(Debug)]
struct SimCore {
    regs: MemoryBank,
    geometry: NetworkGeometry,
    events: Vec<SimEvent>,
    send: ChannelSlot,
    recv: ChannelSlot,
    fault: Option<SimFault>,
    executions: usize,
}

impl SimCore {
    fn slot_mut(&mut self, direction: Direction) -> &mut ChannelSlot {
        match direction {
            Direction::Send => &mut self.send,
            Direction::Receive => &mut self.recv,
        }
    }

    fn idle_status(&mut self) {
        self.regs.poke(regs::STATUS, regs::status::IDLE | regs::status::READY);
    }

    fn reset(&mut self) {
        self.events.push(SimEvent::Reset);
        self.idle_status();
    }

    fn execute(&mut self) {
        self.events.push(SimEvent::Executed);
        self.executions += 1;
        self.regs.poke(regs::STATUS, regs::status::START);

        if self.fault == Some(SimFault::Hang) {
            debug!("Simulated hang: execute never completes");
            return;
        }

        let iarg_en = self.regs.peek(regs::IARG_RQT_EN);
        let oarg_en = self.regs.peek(regs::OARG_RQT_EN);
        if iarg_en & 1 == 0 || oarg_en & 1 == 0 {
            warn!("Execute with argument 0 disabled (iarg_en={iarg_en:#x}, oarg_en={oarg_en:#x}); stalling");
            return;
        }
        let Some(input) = self.send.buffer.as_ref() else {
            debug!("Execute with no input armed; waiting for a stream that never comes");
            return;
        };

        let done = regs::status::DONE | regs::status::IDLE | regs::status::READY;
        let output = match self.compute(input.as_slice()) {
            Ok(out) => out,
            Err(reason) => {
                warn!("Simulated adapter fault: {reason}");
                self.send.done = true;
                self.regs.poke(regs::STATUS, done | SIM_FAULT);
                return;
            }
        };
        self.send.done = true;
        self.regs.poke(regs::IARG_STATUS_BASE, slot_status::EMPTY);

        let stream_len = if self.regs.peek(regs::OARG_LENGTH_MODE) & 1 == 1 {
            self.regs.peek(regs::OARG_LENGTH_BASE) as usize
        } else {
            output.len()
        };

        match self.recv.buffer.as_mut() {
            Some(buf) => {
                let n = stream_len.min(output.len()).min(buf.len());
                buf.as_mut_slice()[..n].copy_from_slice(&output[..n]);
                self.recv.done = true;
            }
            None => warn!("{} output words lost: receive channel not armed", output.len()),
        }

        if self.regs.peek(regs::OSCALAR_RQT_EN) & 1 == 1 {
            let words = u32::try_from(output.len()).unwrap_or(u32::MAX);
            self.regs.poke(regs::OSCALAR_DATA_BASE, words);
        }

        let extra = match self.fault {
            Some(SimFault::StatusBits(bits)) => bits,
            _ => 0,
        };
        self.regs.poke(regs::STATUS, done | extra);
    }

    fn compute(&self, words: &[u32]) -> std::result::Result<Vec<u32>, String> {
        let header = *words.first().ok_or("empty input stream")? as usize;
        if header % 4 != 0 {
            return Err(format!("length header {header} is not a whole number of words"));
        }
        let count = header / 4;
        let pixels = words
            .get(1..=count)
            .ok_or_else(|| format!("header claims {count} words, stream has {}", words.len() - 1))?;
        let side = (0..=count).find(|s| s * s >= count).unwrap_or(0);
        if side * side != count {
            return Err(format!("{count} elements is not a square image"));
        }

        let kernel_id = if self.regs.peek(regs::ISCALAR_RQT_EN) & 1 == 1 {
            self.regs.peek(regs::ISCALAR_DATA_BASE)
        } else {
            Kernel::Box.id()
        };
        let kernel = Kernel::from_id(kernel_id).ok_or_else(|| format!("unknown kernel id {kernel_id}"))?;

        reference::forward(pixels, side, kernel, &self.geometry)
            .ok_or_else(|| format!("{side}x{side} image collapses in the network"))
    }
}

/// Simulated convolver overlay.
///
/// Cloning shares the same overlay, so tests can inspect what the session did.
#[derive(Debug, Clone)]
pub struct SimulatedAccelerator {
    core: Arc<Mutex<SimCore>>,
    allocator: TrackingAllocator,
}

impl Default for SimulatedAccelerator {
    fn default() -> Self {
        Self::new(NetworkGeometry::default())
    }
}

impl SimulatedAccelerator {
    /// Overlay running a network of the given shape.
    pub fn new(geometry: NetworkGeometry) -> Self {
        let mut core = SimCore {
            regs: MemoryBank::new(),
            geometry,
            events: Vec::new(),
            send: ChannelSlot::default(),
            recv: ChannelSlot::default(),
            fault: None,
            executions: 0,
        };
        core.idle_status();
        info!("Simulated overlay ready ({} stages)", geometry.stages);
        Self {
            core: Arc::new(Mutex::new(core)),
            allocator: TrackingAllocator::new(),
        }
    }

    /// Register bank, DMA engine and allocator backed by this overlay.
    pub fn session_parts(&self) -> SessionParts {
        let bank: Arc<dyn RegisterBank> = Arc::new(SimAdapterBank {
            core: Arc::clone(&self.core),
        });
        SessionParts {
            registers: AdapterRegisters::new(bank),
            dma: DmaEngine::new(
                Box::new(self.channel(Direction::Send)),
                Box::new(self.channel(Direction::Receive)),
            ),
            allocator: Box::new(self.allocator.clone()),
        }
    }

    /// Standalone DMA channel for one direction.
    pub fn channel(&self, direction: Direction) -> SimDmaChannel {
        SimDmaChannel {
            core: Arc::clone(&self.core),
            direction,
        }
    }

    /// Allocator handed to sessions (shares counters with them).
    pub fn allocator(&self) -> &TrackingAllocator {
        &self.allocator
    }

    /// Make subsequent executions fail.
    pub fn inject_fault(&self, fault: SimFault) {
        lock(&self.core).fault = Some(fault);
    }

    /// Back to normal behaviour.
    pub fn clear_fault(&self) {
        lock(&self.core).fault = None;
    }

    /// Events observed so far.
    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.core).events.clone()
    }

    /// Number of execute commands seen.
    pub fn executions(&self) -> usize {
        lock(&self.core).executions
    }

    /// Current register value, without logging.
    pub fn register(&self, offset: usize) -> u32 {
        lock(&self.core).regs.peek(offset)
    }

    /// Values the host wrote to `offset`, oldest first.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        lock(&self.core).regs.writes_to(offset)
    }

    /// Host register writes as `(offset, value)`, oldest first.
    pub fn register_writes(&self) -> Vec<(usize, u32)> {
        lock(&self.core)
            .regs
            .accesses()
            .into_iter()
            .filter_map(|a| match a {
                Access::Write { offset, value } => Some((offset, value)),
                Access::Read { .. } => None,
            })
            .collect()
    }
}

/// Adapter register bank of a [`SimulatedAccelerator`].
#[derive(Debug)]
struct SimAdapterBank {
    core: Arc<Mutex<SimCore>>,
}

impl RegisterBank for SimAdapterBank {
    fn read32(&self, offset: usize) -> u32 {
        lock(&self.core).regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut core = lock(&self.core);
        core.regs.write32(offset, value);
        match offset {
            regs::CTRL if value & regs::control::RESET != 0 => core.reset(),
            regs::CMD if command::opcode(value) == command::OPCODE_EXECUTE_STEP => core.execute(),
            _ => {}
        }
    }
}

/// DMA channel of a [`SimulatedAccelerator`].
///
/// Completion is decided when execute runs, so `wait` never sleeps: an
/// incomplete transfer reports the timeout immediately.
#[derive(Debug)]
pub struct SimDmaChannel {
    core: Arc<Mutex<SimCore>>,
    direction: Direction,
}

impl DmaChannel for SimDmaChannel {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn transfer(&mut self, buffer: TransferBuffer) -> Result<()> {
        let mut core = lock(&self.core);
        let slot = core.slot_mut(self.direction);
        if slot.buffer.is_some() {
            return Err(ConvolverError::transfer_failed(format!(
                "{} already has a transfer in flight",
                self.direction
            )));
        }
        slot.buffer = Some(buffer);
        slot.done = false;
        core.events.push(SimEvent::Armed(self.direction));
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<TransferBuffer> {
        let mut core = lock(&self.core);
        let dma_error = core.fault == Some(SimFault::DmaError) && self.direction == Direction::Receive;
        let slot = core.slot_mut(self.direction);
        if slot.buffer.is_none() {
            return Err(ConvolverError::transfer_failed(format!(
                "{} has no transfer in flight",
                self.direction
            )));
        }
        if dma_error {
            return Err(ConvolverError::hardware_fault(format!(
                "{} DMASR error bits {:#x}",
                self.direction,
                convolver_chip::axi_dma::status::DECODE_ERR
            )));
        }
        if slot.done {
            slot.done = false;
            return slot
                .buffer
                .take()
                .ok_or_else(|| ConvolverError::transfer_failed("buffer vanished during wait"));
        }
        #[allow(clippy::cast_possible_truncation)]
        let ms = timeout.as_millis() as u64;
        Err(ConvolverError::transfer_timeout(self.direction, ms))
    }

    fn abort(&mut self) -> Option<TransferBuffer> {
        let mut core = lock(&self.core);
        core.events.push(SimEvent::Aborted(self.direction));
        let slot = core.slot_mut(self.direction);
        slot.done = false;
        slot.buffer.take()
    }

    fn is_busy(&self) -> bool {
        let mut core = lock(&self.core);
        core.slot_mut(self.direction).buffer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convolver_chip::{enable_mask, ArgKind};

    fn armed_sim(kernel: u32) -> (SimulatedAccelerator, SessionParts) {
        let sim = SimulatedAccelerator::default();
        let parts = sim.session_parts();
        let r = &parts.registers;
        r.set_argument_enable(ArgKind::InputArg, enable_mask(1).unwrap());
        r.set_argument_enable(ArgKind::OutputArg, enable_mask(1).unwrap());
        r.set_argument_enable(ArgKind::InputScalar, enable_mask(1).unwrap());
        r.set_input_scalar(0, kernel).unwrap();
        (sim, parts)
    }

    fn input(parts: &SessionParts, side: usize, value: u32) -> TransferBuffer {
        let n = side * side;
        let mut buf = parts.allocator.allocate(n + 1, true).unwrap();
        let words = buf.as_mut_slice();
        words[0] = (n * 4) as u32;
        words[1..].fill(value);
        buf
    }

    #[test]
    fn memory_bank_logs_accesses() {
        let bank = MemoryBank::new();
        bank.write32(0x10, 5);
        assert_eq!(bank.read32(0x10), 5);
        assert_eq!(bank.read32(0x14), 0);
        assert_eq!(bank.access_count(), 3);
        bank.poke(0x20, 1);
        assert_eq!(bank.peek(0x20), 1);
        assert_eq!(bank.access_count(), 3);
        assert_eq!(bank.writes_to(0x10), vec![5]);
        bank.clear_log();
        assert_eq!(bank.access_count(), 0);
        assert_eq!(bank.peek(0x10), 5);
    }

    #[test]
    fn recv_armed_before_execute_captures_output() {
        let (sim, mut parts) = armed_sim(Kernel::Box.id());
        // 16 -> 8 -> 4 -> 2 -> 1
        let out = parts.allocator.allocate(1, true).unwrap();
        parts.dma.recv.transfer(out).unwrap();
        parts.dma.send.transfer(input(&parts, 16, 1)).unwrap();
        parts.registers.execute_step();

        let timeout = Duration::from_millis(10);
        parts.dma.send.wait(timeout).unwrap().release();
        let out = parts.dma.recv.wait(timeout).unwrap();
        assert!(out.as_slice().iter().all(|&v| v > 0));
        out.release();

        assert_eq!(
            sim.events(),
            vec![
                SimEvent::Armed(Direction::Receive),
                SimEvent::Armed(Direction::Send),
                SimEvent::Executed
            ]
        );
        assert_eq!(sim.allocator().outstanding(), 0);
    }

    #[test]
    fn recv_armed_after_execute_times_out() {
        let (_sim, mut parts) = armed_sim(Kernel::Box.id());
        parts.dma.send.transfer(input(&parts, 16, 1)).unwrap();
        parts.registers.execute_step();
        let out = parts.allocator.allocate(4, true).unwrap();
        parts.dma.recv.transfer(out).unwrap();

        let err = parts.dma.recv.wait(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, ConvolverError::TransferTimeout { .. }));
        assert_eq!(parts.dma.abort_all(), 2);
        assert_eq!(parts.allocator.outstanding(), 0);
    }

    #[test]
    fn unknown_kernel_raises_fault_bit() {
        let (sim, mut parts) = armed_sim(77);
        parts.dma.send.transfer(input(&parts, 16, 1)).unwrap();
        parts.registers.execute_step();
        assert_ne!(sim.register(regs::STATUS) & SIM_FAULT, 0);
        assert!(parts.registers.status().is_fault());
    }

    #[test]
    fn disabled_arguments_stall() {
        let sim = SimulatedAccelerator::default();
        let mut parts = sim.session_parts();
        parts.dma.send.transfer(input(&parts, 16, 1)).unwrap();
        parts.registers.execute_step();
        assert!(parts.dma.send.wait(Duration::from_millis(1)).is_err());
        assert!(parts.dma.send.is_busy());
    }

    #[test]
    fn reset_bit_is_observed() {
        let sim = SimulatedAccelerator::default();
        let parts = sim.session_parts();
        parts.registers.soft_reset();
        assert_eq!(sim.events(), vec![SimEvent::Reset]);
        assert_eq!(sim.writes_to(regs::CTRL), vec![1, 0]);
    }
}
