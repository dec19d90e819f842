//! Transfer orchestrator
//!
//! A [`Session`] owns the adapter registers, the DMA engine and the buffer
//! allocator, and drives one convolution at a time:
//!
//! ```text
//! Uninitialized ──setup()──▶ Ready ──convolve()──▶ Armed ──▶ Executing ──▶ Draining ──▶ Ready
//!       ▲                                              │           │            │
//!       └──────── timeout / DMA misuse (after soft reset + abort) ◀┴────────────┘
//!                                    Faulted ◀── hardware fault bits
//! ```
//!
//! Per request the receive channel is armed before the send channel, and both
//! before execute, so no output beat can arrive without a buffer to land in.
//! Both buffers are released on every path.

use crate::backends::sim::SimulatedAccelerator;
use crate::config::{LengthMode, SessionConfig};
use crate::diagnostics::{append_timing, write_output_artifacts, ExecutionTimer};
use crate::dma::{BufferAllocator, DmaEngine, TransferBuffer};
use crate::error::{ConvolverError, Result};
use crate::image::Image;
use crate::mmio::RegisterBank;
use crate::overlay::Overlay;
use crate::registers::{AdapterRegisters, Command, DebugSnapshot, RegisterValue};
use convolver_chip::{enable_mask, ArgKind, NetworkGeometry, OutputLengthMode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Hardware (or simulated) handles a session drives.
#[derive(Debug)]
pub struct SessionParts {
    /// Adapter register set
    pub registers: AdapterRegisters<Arc<dyn RegisterBank>>,
    /// Send / receive DMA channels
    pub dma: DmaEngine,
    /// DMA-visible memory
    pub allocator: Box<dyn BufferAllocator>,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Setup has not run, or a failed request invalidated it.
    Uninitialized,
    /// Accepting requests.
    Ready,
    /// Buffers handed to the DMA channels.
    Armed,
    /// Execute command issued.
    Executing,
    /// Waiting for both channels to complete.
    Draining,
    /// The adapter reported a fault; setup must run again.
    Faulted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Armed => "armed",
            Self::Executing => "executing",
            Self::Draining => "draining",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Sizes derived from one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// Input side length
    pub side: usize,
    /// Pixel count
    pub element_count: usize,
    /// Length header written to input word 0
    pub input_length_bytes: u32,
    /// Output side length
    pub output_dim: usize,
    /// Output buffer size in words (`output_dim²`)
    pub output_words: usize,
}

impl TransferPlan {
    /// Size a request for `image` through `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvolverError::Configuration`] if the image is not square,
    /// collapses in the network, or is too large for the length header.
    pub fn new(image: &Image, geometry: &NetworkGeometry) -> Result<Self> {
        let side = image.side().ok_or_else(|| {
            ConvolverError::configuration(format!(
                "image must be square, got {}x{}",
                image.width(),
                image.height()
            ))
        })?;
        let element_count = image.element_count();
        let output_dim = geometry
            .output_dim(image.height())
            .filter(|&d| d > 0)
            .ok_or_else(|| {
                ConvolverError::configuration(format!(
                    "{side}x{side} image is too small for {} stages (P={}, K={}, p={})",
                    geometry.stages, geometry.padding, geometry.kernel, geometry.pool
                ))
            })?;
        let input_length_bytes = element_count
            .checked_mul(4)
            .and_then(|bytes| u32::try_from(bytes).ok())
            .ok_or_else(|| {
                ConvolverError::configuration(format!(
                    "{element_count} pixels overflow the length header"
                ))
            })?;
        Ok(Self {
            side,
            element_count,
            input_length_bytes,
            output_dim,
            output_words: output_dim * output_dim,
        })
    }

    /// Input buffer size in words (header + pixels).
    pub const fn input_words(&self) -> usize {
        1 + self.element_count
    }
}

/// Result of one convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionOutput {
    /// Row-major `dim × dim` output words
    pub words: Vec<u32>,
    /// Output side length
    pub dim: usize,
    /// Output scalar slots read after completion
    pub output_scalars: Vec<u32>,
    /// Execute-to-drain time (timed variant only)
    pub elapsed: Option<Duration>,
}

impl ConvolutionOutput {
    /// Word at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<u32> {
        if row >= self.dim || col >= self.dim {
            return None;
        }
        self.words.get(row * self.dim + col).copied()
    }

    /// Output rows.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, u32> {
        self.words.chunks_exact(self.dim.max(1))
    }
}

/// One exclusive driver session over an overlay.
#[derive(Debug)]
pub struct Session {
    parts: SessionParts,
    config: SessionConfig,
    state: SessionState,
}

impl Session {
    /// Session over already-open parts. Starts `Uninitialized`.
    pub fn new(parts: SessionParts, config: SessionConfig) -> Self {
        Self {
            parts,
            config,
            state: SessionState::Uninitialized,
        }
    }

    /// Open the hardware overlay described by `config.hardware`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvolverError::Configuration`] for an inconsistent config
    /// (checked before any device is opened), or
    /// [`ConvolverError::Initialization`] if the overlay cannot be opened.
    pub fn open(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let parts = Overlay::open(&config.hardware, config.coherent_buffers)
            .and_then(|overlay| overlay.session_parts())
            .inspect_err(|e| error!("Overlay initialization failed: {e}"))?;
        Ok(Self::new(parts, config))
    }

    /// Session over a simulated overlay.
    pub fn simulated(sim: &SimulatedAccelerator, config: SessionConfig) -> Self {
        Self::new(sim.session_parts(), config)
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Adapter registers.
    pub const fn registers(&self) -> &AdapterRegisters<Arc<dyn RegisterBank>> {
        &self.parts.registers
    }

    /// Buffers allocated and not yet released.
    pub fn outstanding_buffers(&self) -> usize {
        self.parts.allocator.outstanding()
    }

    /// Decoded register report.
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        self.parts.registers.debug_snapshot()
    }

    /// Raw register dump.
    pub fn dump_registers(&self) -> Vec<RegisterValue> {
        self.parts.registers.dump_registers()
    }

    /// Configure the adapter: reset, enable masks, output length mode and
    /// buffer advance commands. Safe to repeat; allowed from any state.
    ///
    /// # Errors
    ///
    /// Returns [`ConvolverError::Configuration`] if the session config is
    /// inconsistent. No register is written in that case.
    pub fn setup(&mut self) -> Result<()> {
        self.state = SessionState::Uninitialized;
        self.config.validate()?;

        let regs = &self.parts.registers;
        let slots = self.config.slots;
        regs.soft_reset();

        for (kind, count) in [
            (ArgKind::InputArg, slots.input_args),
            (ArgKind::OutputArg, slots.output_args),
            (ArgKind::InputScalar, slots.input_scalars),
            (ArgKind::OutputScalar, slots.output_scalars),
        ] {
            let mask = enable_mask(count)
                .ok_or_else(|| ConvolverError::configuration(format!("{count} {kind} slots")))?;
            regs.set_argument_enable(kind, mask);
            debug!("{kind} enable = {mask:#x}");
        }

        let mode = OutputLengthMode::from(self.config.output_length_mode);
        regs.set_output_length_mode(mode);
        if let Some(words) = self.config.output_length_words.filter(|_| mode == OutputLengthMode::Software) {
            for i in 0..slots.output_args {
                regs.set_output_length(i, words)?;
            }
        }

        regs.write_command(Command::OutputBufferAdvance);
        regs.write_command(Command::InputBufferAdvance);

        self.state = SessionState::Ready;
        info!("Adapter configured ({mode} output length)");
        Ok(())
    }

    /// Run one convolution.
    ///
    /// Writes `CNN_output_hex.txt` / `CNN_output_bin.txt` when
    /// `diagnostics.output_dir` is set.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the session is not `Ready`
    /// - `Configuration` for a non-square or undersized image
    /// - `TransferTimeout` / `HardwareFault` / `TransferFailed` from the
    ///   transfer; the session is reset and must be set up again
    pub fn convolve(&mut self, image: &Image) -> Result<ConvolutionOutput> {
        let out = self.run(image, false)?;
        if let Some(dir) = &self.config.diagnostics.output_dir {
            write_output_artifacts(dir, &out.words)?;
        }
        Ok(out)
    }

    /// Run one convolution and append the execute-to-drain time, in
    /// seconds, to `diagnostics.timing_log`.
    ///
    /// # Errors
    ///
    /// As [`Session::convolve`], plus I/O errors from the timing log.
    pub fn convolve_timed(&mut self, image: &Image) -> Result<ConvolutionOutput> {
        let out = self.run(image, true)?;
        if let Some(elapsed) = out.elapsed {
            append_timing(&self.config.diagnostics.timing_log, elapsed)?;
        }
        Ok(out)
    }

    fn run(&mut self, image: &Image, timed: bool) -> Result<ConvolutionOutput> {
        if self.state != SessionState::Ready {
            return Err(ConvolverError::invalid_state(format!(
                "{} (run setup first)",
                self.state
            )));
        }

        let plan = TransferPlan::new(image, &self.config.network())?;
        if self.config.output_length_mode == LengthMode::Software {
            let declared = self.config.output_length_words.map(|w| w as usize);
            if declared != Some(plan.output_words) {
                return Err(ConvolverError::configuration(format!(
                    "declared output length {declared:?} words, request produces {}",
                    plan.output_words
                )));
            }
        }

        let coherent = self.config.coherent_buffers;
        let mut input = self.parts.allocator.allocate(plan.input_words(), coherent)?;
        let output = self.parts.allocator.allocate(plan.output_words, coherent)?;

        let words = input.as_mut_slice();
        words[0] = plan.input_length_bytes;
        for (dst, px) in words[1..].iter_mut().zip(image.words()) {
            *dst = px;
        }
        self.parts.registers.set_input_scalar(0, self.config.kernel_id)?;
        debug!(
            "Request {}x{} -> {}x{} ({} bytes in, {} words out)",
            plan.side, plan.side, plan.output_dim, plan.output_dim, plan.input_length_bytes, plan.output_words
        );

        let (words, elapsed) = match self.stream(input, output, timed) {
            Ok(r) => r,
            Err(e) => {
                self.recover(&e);
                return Err(e);
            }
        };

        let output_scalars = (0..self.config.slots.output_scalars)
            .map(|i| self.parts.registers.output_scalar(i))
            .collect::<Result<Vec<_>>>()?;

        self.state = SessionState::Ready;
        info!("Convolution complete: {} output words", words.len());
        Ok(ConvolutionOutput {
            words,
            dim: plan.output_dim,
            output_scalars,
            elapsed,
        })
    }

    /// Arm, execute and drain. Buffers not handed back are still owned by a
    /// channel on error; [`Session::recover`] aborts them.
    fn stream(
        &mut self,
        input: TransferBuffer,
        output: TransferBuffer,
        timed: bool,
    ) -> Result<(Vec<u32>, Option<Duration>)> {
        let timeout = self.config.dma_timeout();
        let regs = &self.parts.registers;
        let dma = &mut self.parts.dma;

        self.state = SessionState::Armed;
        dma.recv.transfer(output)?;
        dma.send.transfer(input)?;

        self.state = SessionState::Executing;
        let timer = timed.then(ExecutionTimer::start);
        regs.execute_step();

        self.state = SessionState::Draining;
        let sent = dma.send.wait(timeout).map_err(|e| adapter_fault(regs).unwrap_or(e))?;
        let received = dma.recv.wait(timeout).map_err(|e| adapter_fault(regs).unwrap_or(e))?;
        let elapsed = timer.map(|t| t.elapsed());
        sent.release();

        if let Some(fault) = adapter_fault(regs) {
            return Err(fault);
        }

        let words = received.as_slice().to_vec();
        received.release();
        Ok((words, elapsed))
    }

    fn recover(&mut self, err: &ConvolverError) {
        warn!("Convolution failed while {}: {err}", self.state);
        self.parts.registers.soft_reset();
        self.parts.dma.abort_all();
        self.state = match err {
            ConvolverError::HardwareFault { .. } => SessionState::Faulted,
            _ => SessionState::Uninitialized,
        };
        debug!(
            "Recovered to {} with {} buffer(s) outstanding",
            self.state,
            self.parts.allocator.outstanding()
        );
    }
}

/// `HardwareFault` if the status register carries undocumented bits.
///
/// Takes precedence over a DMA wait error: a faulted adapter stops streaming.
fn adapter_fault<B: RegisterBank>(regs: &AdapterRegisters<B>) -> Option<ConvolverError> {
    let status = regs.status();
    status.is_fault().then(|| {
        ConvolverError::hardware_fault(format!(
            "status register has unknown bits {:#x}",
            status.unknown_bits
        ))
    })
}
