//! Argument / scalar slots and the output length mode.

use crate::regs;

/// Kind of slot family the adapter routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Streamed input argument (fed by the DMA send channel).
    InputArg,
    /// Streamed output argument (drained by the DMA receive channel).
    OutputArg,
    /// Single-word input scalar.
    InputScalar,
    /// Single-word output scalar.
    OutputScalar,
}

impl ArgKind {
    /// All kinds, in enable-register setup order.
    pub const ALL: [Self; 4] = [
        Self::InputArg,
        Self::OutputArg,
        Self::InputScalar,
        Self::OutputScalar,
    ];

    /// Offset of the request enable register for this kind.
    #[must_use]
    pub const fn enable_offset(self) -> usize {
        match self {
            Self::InputArg => regs::IARG_RQT_EN,
            Self::OutputArg => regs::OARG_RQT_EN,
            Self::InputScalar => regs::ISCALAR_RQT_EN,
            Self::OutputScalar => regs::OSCALAR_RQT_EN,
        }
    }

    /// Base of the per-slot status family for this kind.
    #[must_use]
    pub const fn status_base(self) -> usize {
        match self {
            Self::InputArg => regs::IARG_STATUS_BASE,
            Self::OutputArg => regs::OARG_STATUS_BASE,
            Self::InputScalar => regs::ISCALAR_STATUS_BASE,
            Self::OutputScalar => regs::OSCALAR_STATUS_BASE,
        }
    }

    /// Short register-style prefix (`iarg`, `oarg`, ...).
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::InputArg => "iarg",
            Self::OutputArg => "oarg",
            Self::InputScalar => "iscalar",
            Self::OutputScalar => "oscalar",
        }
    }
}

impl std::fmt::Display for ArgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputArg => write!(f, "input argument"),
            Self::OutputArg => write!(f, "output argument"),
            Self::InputScalar => write!(f, "input scalar"),
            Self::OutputScalar => write!(f, "output scalar"),
        }
    }
}

/// Slot index in `0..8`, checked on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(u8);

impl SlotIndex {
    /// First slot.
    pub const ZERO: Self = Self(0);

    /// Validate a raw slot number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: usize) -> Option<Self> {
        if index < regs::SLOT_COUNT {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// Raw slot number.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Offset of this slot within the family at `base`.
    #[must_use]
    pub const fn offset_in(self, base: usize) -> usize {
        base + (self.0 as usize) * regs::SLOT_STRIDE
    }

    /// Every slot, `0..8`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = Self> {
        (0..regs::SLOT_COUNT as u8).map(Self)
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Enable mask for the first `count` slots: `(1 << count) - 1`.
///
/// Returns `None` when `count` exceeds the slot count.
#[must_use]
pub const fn enable_mask(count: usize) -> Option<u32> {
    if count <= regs::SLOT_COUNT {
        Some((1u32 << count) - 1)
    } else {
        None
    }
}

/// Who determines the length of an output argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLengthMode {
    /// The accelerator signals the end of its output stream.
    #[default]
    Hardware,
    /// The host writes the length into `OARGn_LENGTH`.
    Software,
}

impl OutputLengthMode {
    /// Wire encoding written to `OARG_LENGTH_MODE`.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Hardware => 0,
            Self::Software => 1,
        }
    }

    /// Decode one mode bit. Only bit 0 is considered.
    #[must_use]
    pub const fn from_bit(bit: u32) -> Self {
        if bit & 1 == 0 {
            Self::Hardware
        } else {
            Self::Software
        }
    }
}

impl std::fmt::Display for OutputLengthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "Hardware"),
            Self::Software => write!(f, "Software"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_bounds() {
        assert_eq!(SlotIndex::new(0), Some(SlotIndex::ZERO));
        assert_eq!(SlotIndex::new(7).map(SlotIndex::get), Some(7));
        assert!(SlotIndex::new(8).is_none());
        assert_eq!(SlotIndex::all().count(), 8);
    }

    #[test]
    fn slot_offsets() {
        let s = SlotIndex::new(3).unwrap();
        assert_eq!(s.offset_in(regs::OARG_LENGTH_BASE), 0x020C);
    }

    #[test]
    fn enable_masks() {
        assert_eq!(enable_mask(0), Some(0));
        assert_eq!(enable_mask(1), Some(0b1));
        assert_eq!(enable_mask(3), Some(0b111));
        assert_eq!(enable_mask(8), Some(0xFF));
        assert_eq!(enable_mask(9), None);
    }

    #[test]
    fn length_mode_encoding() {
        assert_eq!(OutputLengthMode::Hardware.to_raw(), 0);
        assert_eq!(OutputLengthMode::Software.to_raw(), 1);
        assert_eq!(OutputLengthMode::from_bit(0b10), OutputLengthMode::Hardware);
        assert_eq!(OutputLengthMode::from_bit(1), OutputLengthMode::Software);
        assert_eq!(OutputLengthMode::default(), OutputLengthMode::Hardware);
    }

    #[test]
    fn enable_offsets_match_register_map() {
        assert_eq!(ArgKind::InputArg.enable_offset(), 0x10);
        assert_eq!(ArgKind::OutputArg.enable_offset(), 0x14);
        assert_eq!(ArgKind::InputScalar.enable_offset(), 0x48);
        assert_eq!(ArgKind::OutputScalar.enable_offset(), 0x4C);
        assert_eq!(ArgKind::OutputScalar.status_base(), 0x1C0);
    }
}
