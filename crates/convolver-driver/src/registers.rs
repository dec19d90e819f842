//! Typed view over the accelerator adapter registers
//!
//! Every method is a single 32-bit access, except [`AdapterRegisters::soft_reset`]
//! which composes read + two writes. Indexed families validate the slot before
//! computing an address, so an out-of-range slot never reaches the bank.

use crate::error::{ConvolverError, Result};
use crate::mmio::RegisterBank;
use convolver_chip::regs::{self, command};
use convolver_chip::{ArgKind, ArgStatus, ControlFlags, OutputLengthMode, SlotIndex, StatusFlags};
use tracing::debug;

/// Command words accepted by [`AdapterRegisters::write_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Execute one iteration synchronously.
    ExecuteStep,
    /// Advance the output buffer on every output stream beat.
    OutputBufferAdvance,
    /// Advance the input buffer on every input stream beat.
    InputBufferAdvance,
}

impl Command {
    /// Raw command word.
    #[must_use]
    pub const fn word(self) -> u32 {
        match self {
            Self::ExecuteStep => command::EXECUTE_STEP,
            Self::OutputBufferAdvance => command::OUTPUT_BUFFER_ADVANCE,
            Self::InputBufferAdvance => command::INPUT_BUFFER_ADVANCE,
        }
    }
}

/// Compute `base + 4 * index`, rejecting indices outside `0..8`.
///
/// # Errors
///
/// Returns [`ConvolverError::InvalidSlot`] for out-of-range indices.
pub fn indexed_offset(base: usize, index: usize) -> Result<usize> {
    regs::indexed_offset(base, index).ok_or_else(|| ConvolverError::invalid_slot(family_name(base), index))
}

/// Validate a raw slot number for the family at `base`.
fn slot(base: usize, index: usize) -> Result<SlotIndex> {
    SlotIndex::new(index).ok_or_else(|| ConvolverError::invalid_slot(family_name(base), index))
}

const fn family_name(base: usize) -> &'static str {
    match base {
        regs::ISCALAR_DATA_BASE => "ISCALARn_DATA",
        regs::OSCALAR_DATA_BASE => "OSCALARn_DATA",
        regs::IARG_STATUS_BASE => "IARGn_STATUS",
        regs::OARG_STATUS_BASE => "OARGn_STATUS",
        regs::ISCALAR_STATUS_BASE => "ISCALARn_STATUS",
        regs::OSCALAR_STATUS_BASE => "OSCALARn_STATUS",
        regs::OARG_LENGTH_BASE => "OARGn_LENGTH",
        regs::OARG_TDEST_BASE => "OARGn_TDEST",
        _ => "indexed register",
    }
}

/// Adapter register set over any [`RegisterBank`].
#[derive(Debug, Clone)]
pub struct AdapterRegisters<B> {
    bank: B,
}

impl<B: RegisterBank> AdapterRegisters<B> {
    /// Wrap a register bank.
    pub const fn new(bank: B) -> Self {
        Self { bank }
    }

    /// Underlying bank.
    pub const fn bank(&self) -> &B {
        &self.bank
    }

    /// Control register (CTRL).
    pub fn read_control(&self) -> u32 {
        self.bank.read32(regs::CTRL)
    }

    /// Write the control register.
    pub fn write_control(&self, value: u32) {
        self.bank.write32(regs::CTRL, value);
    }

    /// Decoded control register.
    pub fn control(&self) -> ControlFlags {
        ControlFlags::from_raw(self.read_control())
    }

    /// Status register (STATUS). Hardware driven.
    pub fn read_status(&self) -> u32 {
        self.bank.read32(regs::STATUS)
    }

    /// Decoded status register.
    pub fn status(&self) -> StatusFlags {
        StatusFlags::from_raw(self.read_status())
    }

    /// Pulse the soft reset bit: `saved | RESET`, then `saved & !RESET`.
    pub fn soft_reset(&self) {
        let saved = self.read_control();
        self.write_control(saved | regs::control::RESET);
        self.write_control(saved & !regs::control::RESET);
        debug!("Soft reset pulsed (ctrl was {saved:#x})");
    }

    /// Write a request enable mask.
    pub fn set_argument_enable(&self, kind: ArgKind, mask: u32) {
        self.bank.write32(kind.enable_offset(), mask);
    }

    /// Read a request enable mask.
    pub fn argument_enable(&self, kind: ArgKind) -> u32 {
        self.bank.read32(kind.enable_offset())
    }

    /// Select the output length mode.
    pub fn set_output_length_mode(&self, mode: OutputLengthMode) {
        self.bank.write32(regs::OARG_LENGTH_MODE, mode.to_raw());
    }

    /// Raw `OARG_LENGTH_MODE` word (bit i = mode of output argument i).
    pub fn output_length_mode_raw(&self) -> u32 {
        self.bank.read32(regs::OARG_LENGTH_MODE)
    }

    /// Mode of output argument 0.
    pub fn output_length_mode(&self) -> OutputLengthMode {
        OutputLengthMode::from_bit(self.output_length_mode_raw())
    }

    /// Input scalar write data (ISCALARn_DATA).
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn set_input_scalar(&self, index: usize, value: u32) -> Result<()> {
        let s = slot(regs::ISCALAR_DATA_BASE, index)?;
        self.bank.write32(s.offset_in(regs::ISCALAR_DATA_BASE), value);
        Ok(())
    }

    /// Output scalar read data (OSCALARn_DATA).
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn output_scalar(&self, index: usize) -> Result<u32> {
        let s = slot(regs::OSCALAR_DATA_BASE, index)?;
        Ok(self.bank.read32(s.offset_in(regs::OSCALAR_DATA_BASE)))
    }

    /// Raw per-slot status word.
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn arg_status_raw(&self, kind: ArgKind, index: usize) -> Result<u32> {
        let base = kind.status_base();
        let s = slot(base, index)?;
        Ok(self.bank.read32(s.offset_in(base)))
    }

    /// Decoded per-slot status.
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn arg_status(&self, kind: ArgKind, index: usize) -> Result<ArgStatus> {
        self.arg_status_raw(kind, index).map(ArgStatus::from_raw)
    }

    /// Output argument length in words (OARGn_LENGTH, software mode).
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn set_output_length(&self, index: usize, length_words: u32) -> Result<()> {
        let s = slot(regs::OARG_LENGTH_BASE, index)?;
        self.bank.write32(s.offset_in(regs::OARG_LENGTH_BASE), length_words);
        Ok(())
    }

    /// Output argument routing tag (OARGn_TDEST).
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn set_output_tdest(&self, index: usize, tag: u32) -> Result<()> {
        let s = slot(regs::OARG_TDEST_BASE, index)?;
        self.bank.write32(s.offset_in(regs::OARG_TDEST_BASE), tag);
        Ok(())
    }

    /// Read back an output routing tag.
    ///
    /// # Errors
    ///
    /// Returns error if `index` is outside `0..8`.
    pub fn output_tdest(&self, index: usize) -> Result<u32> {
        let s = slot(regs::OARG_TDEST_BASE, index)?;
        Ok(self.bank.read32(s.offset_in(regs::OARG_TDEST_BASE)))
    }

    /// Fire a command word.
    pub fn write_command(&self, cmd: Command) {
        self.bank.write32(regs::CMD, cmd.word());
    }

    /// Last command word (CMD).
    pub fn read_command(&self) -> u32 {
        self.bank.read32(regs::CMD)
    }

    /// Execute step (single iteration): opcode 0b010 in bits [19:16].
    pub fn execute_step(&self) {
        self.write_command(Command::ExecuteStep);
    }

    /// Read every documented register word.
    ///
    /// Returns `(word index, byte offset, value)` triples in address order.
    pub fn dump_registers(&self) -> Vec<RegisterValue> {
        regs::DUMP_WORD_RANGES
            .iter()
            .flat_map(|&(lo, hi)| lo..hi)
            .map(|index| {
                let offset = index << 2;
                RegisterValue {
                    index,
                    offset,
                    value: self.bank.read32(offset),
                }
            })
            .collect()
    }

    /// Decode control, status, enables and per-slot status into one report.
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let enables = ArgKind::ALL.map(|kind| self.argument_enable(kind));
        let [iarg_en, oarg_en, ..] = enables;
        let length_mode = self.output_length_mode_raw();

        let mut slots = Vec::new();
        for kind in ArgKind::ALL {
            // scalar families are always reported, argument families only when enabled
            let mask = match kind {
                ArgKind::InputArg => iarg_en,
                ArgKind::OutputArg => oarg_en,
                ArgKind::InputScalar | ArgKind::OutputScalar => u32::MAX,
            };
            for s in SlotIndex::all() {
                if mask & (1 << s.get()) == 0 {
                    continue;
                }
                let raw = self.bank.read32(s.offset_in(kind.status_base()));
                slots.push(SlotReport {
                    kind,
                    slot: s,
                    status: ArgStatus::from_raw(raw),
                });
            }
        }

        DebugSnapshot {
            control_raw: self.read_control(),
            status_raw: self.read_status(),
            enables,
            length_mode_raw: length_mode,
            slots,
        }
    }
}

/// One word of a register dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterValue {
    /// Word index (offset / 4)
    pub index: usize,
    /// Byte offset
    pub offset: usize,
    /// Value read
    pub value: u32,
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:4} (offset:0x{:04x}): value = {:10} (0x{:08x}) (0b{:b})",
            self.index, self.offset, self.value, self.value, self.value
        )
    }
}

/// Status of one slot in a [`DebugSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotReport {
    /// Slot family
    pub kind: ArgKind,
    /// Slot number
    pub slot: SlotIndex,
    /// Decoded status
    pub status: ArgStatus,
}

/// Decoded register state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSnapshot {
    /// Raw CTRL
    pub control_raw: u32,
    /// Raw STATUS
    pub status_raw: u32,
    /// Enable masks in [`ArgKind::ALL`] order
    pub enables: [u32; 4],
    /// Raw OARG_LENGTH_MODE
    pub length_mode_raw: u32,
    /// Per-slot status of enabled argument slots and every scalar slot
    pub slots: Vec<SlotReport>,
}

impl DebugSnapshot {
    /// Enable mask for one kind.
    pub fn enable(&self, kind: ArgKind) -> u32 {
        let i = ArgKind::ALL
            .iter()
            .position(|&k| k == kind)
            .unwrap_or_default();
        self.enables[i]
    }
}

impl std::fmt::Display for DebugSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bit = |v: u32, i: usize| (v >> i) & 1;

        let ctrl = ControlFlags::from_raw(self.control_raw);
        writeln!(f, "0x{:04x} (Control register):", regs::CTRL)?;
        writeln!(
            f,
            "   rst:{} gie:{}",
            u8::from(ctrl.reset),
            u8::from(ctrl.global_interrupt_enable)
        )?;

        let st = StatusFlags::from_raw(self.status_raw);
        writeln!(f, "0x{:04x} (Status register):", regs::STATUS)?;
        writeln!(
            f,
            "   start:{} done:{} idle:{} ready:{}",
            u8::from(st.start),
            u8::from(st.done),
            u8::from(st.idle),
            u8::from(st.ready)
        )?;
        if st.is_fault() {
            writeln!(f, "   unknown bits: 0x{:08x}", st.unknown_bits)?;
        }

        for kind in ArgKind::ALL {
            let mask = self.enable(kind);
            writeln!(
                f,
                "0x{:04x} ({kind} request enable register): 0x{mask:08x}",
                kind.enable_offset()
            )?;
            for i in (0..regs::SLOT_COUNT).filter(|&i| bit(mask, i) == 1) {
                writeln!(f, "   {}{i}_en = 1", kind.prefix())?;
            }
        }

        let oarg_en = self.enable(ArgKind::OutputArg);
        writeln!(
            f,
            "0x{:04x} (Output argument length mode register): 0x{:08x}",
            regs::OARG_LENGTH_MODE,
            self.length_mode_raw
        )?;
        for i in (0..regs::SLOT_COUNT).filter(|&i| bit(oarg_en, i) == 1) {
            let mode = OutputLengthMode::from_bit(bit(self.length_mode_raw, i));
            writeln!(f, "   oarg{i}_mode = {} ({mode})", mode.to_raw())?;
        }

        for kind in ArgKind::ALL {
            writeln!(f, "0x{:04x} ({kind} status register):", kind.status_base())?;
            for r in self.slots.iter().filter(|r| r.kind == kind) {
                writeln!(f, "   {}{}_status = {}", kind.prefix(), r.slot, r.status)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sim::MemoryBank;

    fn regs() -> AdapterRegisters<MemoryBank> {
        AdapterRegisters::new(MemoryBank::new())
    }

    #[test]
    fn enable_mask_round_trip() {
        let r = regs();
        for kind in ArgKind::ALL {
            for mask in [0, 1, 0b101, 0xFF, 0xDEAD_BEEF, u32::MAX] {
                r.set_argument_enable(kind, mask);
                assert_eq!(r.argument_enable(kind), mask, "{kind}");
            }
        }
    }

    #[test]
    fn indexed_offsets() {
        for base in regs::INDEXED_FAMILIES {
            for i in 0..8 {
                assert_eq!(indexed_offset(base, i).unwrap(), base + 4 * i);
            }
            assert!(matches!(
                indexed_offset(base, 8),
                Err(ConvolverError::InvalidSlot { index: 8, .. })
            ));
        }
    }

    #[test]
    fn out_of_range_slot_never_touches_bank() {
        let r = regs();
        assert!(r.set_input_scalar(8, 1).is_err());
        assert!(r.output_scalar(9).is_err());
        assert!(r.arg_status(ArgKind::OutputArg, 8).is_err());
        assert!(r.set_output_length(100, 4).is_err());
        assert!(r.set_output_tdest(8, 1).is_err());
        assert!(r.output_tdest(8).is_err());
        assert_eq!(r.bank().access_count(), 0);
    }

    #[test]
    fn soft_reset_pulses_bit_zero() {
        let r = regs();
        r.write_control(regs::control::GIE);
        r.bank().clear_log();

        r.soft_reset();

        let writes = r.bank().writes_to(regs::CTRL);
        assert_eq!(writes, vec![0b11, 0b10]);
        assert_eq!(r.read_control(), regs::control::GIE);
    }

    #[test]
    fn indexed_writes_land_at_stride() {
        let r = regs();
        r.set_input_scalar(2, 7).unwrap();
        r.set_output_length(3, 900).unwrap();
        r.set_output_tdest(7, 0x5).unwrap();
        assert_eq!(r.bank().peek(0x0088), 7);
        assert_eq!(r.bank().peek(0x020C), 900);
        assert_eq!(r.output_tdest(7).unwrap(), 0x5);
    }

    #[test]
    fn arg_status_decoding() {
        let r = regs();
        r.bank().poke(regs::OARG_STATUS_BASE + 4, 0b0001_0101_0011);
        let s = r.arg_status(ArgKind::OutputArg, 1).unwrap();
        assert_eq!(s.used_buffers, 3);
        assert!(s.empty);
        assert!(!s.full);
    }

    #[test]
    fn mode_written_as_raw_integer() {
        let r = regs();
        r.set_output_length_mode(OutputLengthMode::Software);
        assert_eq!(r.bank().peek(regs::OARG_LENGTH_MODE), 1);
        assert_eq!(r.output_length_mode(), OutputLengthMode::Software);
        r.set_output_length_mode(OutputLengthMode::Hardware);
        assert_eq!(r.bank().peek(regs::OARG_LENGTH_MODE), 0);
    }

    #[test]
    fn execute_step_word() {
        let r = regs();
        r.execute_step();
        assert_eq!(r.read_command(), 0x0002_0000);
    }

    #[test]
    fn dump_covers_all_ranges() {
        let r = regs();
        let dump = r.dump_registers();
        assert_eq!(dump.len(), 2 + 2 + 1 + 5 + 24 + 8 + 8 + 40 + 8);
        assert_eq!(dump[0].offset, 0);
        assert_eq!(dump.last().unwrap().offset, 151 << 2);
        assert!(dump[2].to_string().contains("offset:0x0010"));
    }

    #[test]
    fn snapshot_reports_enabled_slots() {
        let r = regs();
        r.set_argument_enable(ArgKind::InputArg, 0b1);
        r.set_argument_enable(ArgKind::OutputArg, 0b11);
        r.bank().poke(regs::IARG_STATUS_BASE, 0b1_0000);

        let snap = r.debug_snapshot();
        let iargs: Vec<_> = snap.slots.iter().filter(|s| s.kind == ArgKind::InputArg).collect();
        assert_eq!(iargs.len(), 1);
        assert!(iargs[0].status.empty);
        assert_eq!(snap.slots.iter().filter(|s| s.kind == ArgKind::OutputArg).count(), 2);
        assert_eq!(snap.slots.iter().filter(|s| s.kind == ArgKind::InputScalar).count(), 8);

        let text = snap.to_string();
        assert!(text.contains("iarg0_en = 1"));
        assert!(text.contains("oarg1_mode = 0 (Hardware)"));
        assert!(text.contains("iarg0_status = used_buf:0, empty:1, full:0"));
    }
}
