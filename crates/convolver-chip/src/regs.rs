//! Register map of the AXI-Stream accelerator adapter (`axis_accelerator_adapter` v2.1).
//!
//! All registers are 32 bits wide and word aligned. Scalar registers live at
//! fixed offsets; indexed families repeat every 4 bytes for slots `0..8`.
//!
//! ```text
//! 0x0000  CTRL                 rst(0) gie(1)
//! 0x0004  STATUS               start(0) done(1) idle(2) ready(3)
//! 0x0010  IARG_RQT_EN          bit i = input argument i
//! 0x0014  OARG_RQT_EN          bit i = output argument i
//! 0x0028  CMD                  opcode in bits [19:16]
//! 0x003C  OARG_LENGTH_MODE     0 = hardware, 1 = software (bit i per output arg)
//! 0x0048  ISCALAR_RQT_EN
//! 0x004C  OSCALAR_RQT_EN
//! 0x0080  ISCALARn_DATA        8 words
//! 0x00C0  OSCALARn_DATA        8 words
//! 0x0100  IARGn_STATUS         8 words
//! 0x0140  OARGn_STATUS         8 words
//! 0x0180  ISCALARn_STATUS      8 words
//! 0x01C0  OSCALARn_STATUS      8 words
//! 0x0200  OARGn_LENGTH         8 words
//! 0x0240  OARGn_TDEST          8 words
//! ```

// ── Control and status ───────────────────────────────────────────────────────

/// Control register (soft reset, global interrupt enable).
pub const CTRL: usize = 0x0000;
/// Status register of the accelerator control interface. Hardware driven.
pub const STATUS: usize = 0x0004;

// ── Request enables ──────────────────────────────────────────────────────────

/// Input argument request enable. Bits [N-1:0] select which input arguments
/// take part in generating `ap_start`.
pub const IARG_RQT_EN: usize = 0x0010;
/// Output argument request enable.
pub const OARG_RQT_EN: usize = 0x0014;
/// Input scalar request enable.
pub const ISCALAR_RQT_EN: usize = 0x0048;
/// Output scalar request enable.
pub const OSCALAR_RQT_EN: usize = 0x004C;

// ── Command / mode ───────────────────────────────────────────────────────────

/// Command register.
pub const CMD: usize = 0x0028;
/// Output argument length mode register.
pub const OARG_LENGTH_MODE: usize = 0x003C;

// ── Indexed families (base + 4 × slot) ───────────────────────────────────────

/// Input scalar write data, one word per slot.
pub const ISCALAR_DATA_BASE: usize = 0x0080;
/// Output scalar read data.
pub const OSCALAR_DATA_BASE: usize = 0x00C0;
/// Input argument buffer status.
pub const IARG_STATUS_BASE: usize = 0x0100;
/// Output argument buffer status.
pub const OARG_STATUS_BASE: usize = 0x0140;
/// Input scalar status.
pub const ISCALAR_STATUS_BASE: usize = 0x0180;
/// Output scalar status.
pub const OSCALAR_STATUS_BASE: usize = 0x01C0;
/// Output argument length in words (software length mode only).
pub const OARG_LENGTH_BASE: usize = 0x0200;
/// Output argument TDEST routing tag.
pub const OARG_TDEST_BASE: usize = 0x0240;

/// Number of slots in every indexed family.
pub const SLOT_COUNT: usize = 8;
/// Byte stride between consecutive slots of a family.
pub const SLOT_STRIDE: usize = 4;

/// Bytes a register window must span to reach every documented register.
pub const REGISTER_SPAN: usize = OARG_TDEST_BASE + SLOT_COUNT * SLOT_STRIDE;

/// Every indexed family, in address order.
pub const INDEXED_FAMILIES: [usize; 8] = [
    ISCALAR_DATA_BASE,
    OSCALAR_DATA_BASE,
    IARG_STATUS_BASE,
    OARG_STATUS_BASE,
    ISCALAR_STATUS_BASE,
    OSCALAR_STATUS_BASE,
    OARG_LENGTH_BASE,
    OARG_TDEST_BASE,
];

/// Word indices covered by a full register dump.
///
/// Skips the reserved holes between the documented registers.
pub const DUMP_WORD_RANGES: [(usize, usize); 9] = [
    (0, 2),
    (4, 6),
    (10, 11),
    (15, 20),
    (32, 56),
    (64, 72),
    (80, 88),
    (96, 136),
    (144, 152),
];

/// Offset of `slot` within the family starting at `base`.
///
/// Returns `None` when `slot` is outside `0..SLOT_COUNT`.
#[must_use]
pub const fn indexed_offset(base: usize, slot: usize) -> Option<usize> {
    if slot < SLOT_COUNT {
        Some(base + (slot << 2))
    } else {
        None
    }
}

// ── Control register bits ────────────────────────────────────────────────────

pub mod control {
    /// Soft reset of the adapter core logic.
    pub const RESET: u32 = 1 << 0;
    /// Global interrupt enable.
    pub const GIE: u32 = 1 << 1;
}

// ── Status register bits ─────────────────────────────────────────────────────

pub mod status {
    /// `ap_start` issued to the accelerator.
    pub const START: u32 = 1 << 0;
    /// `ap_done` seen from the accelerator.
    pub const DONE: u32 = 1 << 1;
    /// Accelerator idle.
    pub const IDLE: u32 = 1 << 2;
    /// Accelerator ready for new inputs.
    pub const READY: u32 = 1 << 3;
    /// Union of all documented bits. Anything else is a fault pattern.
    pub const KNOWN: u32 = START | DONE | IDLE | READY;
}

// ── Slot status bits (IARGn/OARGn/ISCALARn/OSCALARn_STATUS) ──────────────────

pub mod slot_status {
    /// Used buffer count, bits [3:0].
    pub const USED_MASK: u32 = 0xF;
    /// Buffer empty.
    pub const EMPTY: u32 = 1 << 4;
    /// Buffer full.
    pub const FULL: u32 = 1 << 5;
}

// ── Command words ────────────────────────────────────────────────────────────

pub mod command {
    /// Opcode field position in the command word.
    pub const OPCODE_SHIFT: u32 = 16;
    /// Opcode field mask (bits [19:16]).
    pub const OPCODE_MASK: u32 = 0xF << OPCODE_SHIFT;
    /// Opcode 0b010: execute step (single iteration).
    pub const OPCODE_EXECUTE_STEP: u32 = 0b010;

    /// Execute one iteration synchronously.
    pub const EXECUTE_STEP: u32 = OPCODE_EXECUTE_STEP << OPCODE_SHIFT;
    /// Advance the output buffer on every beat of the output stream.
    pub const OUTPUT_BUFFER_ADVANCE: u32 = 0x0001_0001;
    /// Advance the input buffer on every beat of the input stream.
    pub const INPUT_BUFFER_ADVANCE: u32 = 0x0000_0101;

    /// Extract the opcode field from a command word.
    #[must_use]
    pub const fn opcode(word: u32) -> u32 {
        (word & OPCODE_MASK) >> OPCODE_SHIFT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_word_aligned() {
        let scalars = [
            CTRL,
            STATUS,
            IARG_RQT_EN,
            OARG_RQT_EN,
            CMD,
            OARG_LENGTH_MODE,
            ISCALAR_RQT_EN,
            OSCALAR_RQT_EN,
        ];
        for off in scalars.iter().chain(INDEXED_FAMILIES.iter()) {
            assert_eq!(off % 4, 0, "offset {off:#x} not word aligned");
        }
    }

    #[test]
    fn indexed_families_do_not_overlap() {
        let span = SLOT_COUNT * SLOT_STRIDE;
        for pair in INDEXED_FAMILIES.windows(2) {
            assert!(pair[0] + span <= pair[1], "{:#x} overlaps {:#x}", pair[0], pair[1]);
        }
        // scalar registers sit below the first family
        assert!(OSCALAR_RQT_EN < ISCALAR_DATA_BASE);
    }

    #[test]
    fn indexed_offset_stride() {
        for slot in 0..SLOT_COUNT {
            assert_eq!(
                indexed_offset(OARG_TDEST_BASE, slot),
                Some(OARG_TDEST_BASE + 4 * slot)
            );
        }
        assert_eq!(indexed_offset(IARG_STATUS_BASE, SLOT_COUNT), None);
        assert_eq!(indexed_offset(IARG_STATUS_BASE, usize::MAX), None);
    }

    #[test]
    fn command_words() {
        assert_eq!(command::EXECUTE_STEP, 0x0002_0000);
        assert_eq!(command::opcode(command::EXECUTE_STEP), 0b010);
        assert_ne!(command::opcode(command::OUTPUT_BUFFER_ADVANCE), 0b010);
        assert_ne!(command::opcode(command::INPUT_BUFFER_ADVANCE), 0b010);
    }

    #[test]
    fn dump_ranges_cover_documented_registers() {
        let covered = |off: usize| {
            DUMP_WORD_RANGES
                .iter()
                .any(|&(lo, hi)| (lo..hi).contains(&(off >> 2)))
        };
        assert!(covered(CTRL));
        assert!(covered(CMD));
        assert!(covered(OARG_LENGTH_MODE));
        assert!(covered(OSCALAR_RQT_EN));
        assert!(covered(OARG_TDEST_BASE + 4 * 7));
    }

    #[test]
    fn register_span_ends_after_last_dump_word() {
        assert_eq!(REGISTER_SPAN, 0x260);
        let (_, last) = DUMP_WORD_RANGES[DUMP_WORD_RANGES.len() - 1];
        assert_eq!(last * 4, REGISTER_SPAN);
    }
}
