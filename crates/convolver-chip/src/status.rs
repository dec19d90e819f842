//! Decoding of control, status and per-slot status words.

use crate::regs::{control, slot_status, status};

/// Decoded `CTRL` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    /// Soft reset asserted.
    pub reset: bool,
    /// Global interrupt enable.
    pub global_interrupt_enable: bool,
}

impl ControlFlags {
    /// Decode a raw control word.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            reset: raw & control::RESET != 0,
            global_interrupt_enable: raw & control::GIE != 0,
        }
    }
}

/// Decoded `STATUS` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    /// `ap_start` issued.
    pub start: bool,
    /// `ap_done` observed.
    pub done: bool,
    /// Accelerator idle.
    pub idle: bool,
    /// Accelerator ready.
    pub ready: bool,
    /// Bits outside start/done/idle/ready. Non-zero means a fault pattern.
    pub unknown_bits: u32,
}

impl StatusFlags {
    /// Decode a raw status word.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            start: raw & status::START != 0,
            done: raw & status::DONE != 0,
            idle: raw & status::IDLE != 0,
            ready: raw & status::READY != 0,
            unknown_bits: raw & !status::KNOWN,
        }
    }

    /// True when the word carries bits the adapter never documents.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        self.unknown_bits != 0
    }
}

/// Decoded `IARGn/OARGn/ISCALARn/OSCALARn_STATUS` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgStatus {
    /// Number of buffers in use, bits [3:0].
    pub used_buffers: u8,
    /// Bit 4.
    pub empty: bool,
    /// Bit 5.
    pub full: bool,
}

impl ArgStatus {
    /// Decode a raw slot status word. Bits above 5 are ignored.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            used_buffers: (raw & slot_status::USED_MASK) as u8,
            empty: raw & slot_status::EMPTY != 0,
            full: raw & slot_status::FULL != 0,
        }
    }
}

impl std::fmt::Display for ArgStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "used_buf:{}, empty:{}, full:{}",
            self.used_buffers,
            u8::from(self.empty),
            u8::from(self.full)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_status_bit_slices() {
        let s = ArgStatus::from_raw(0b0001_0101_0011);
        assert_eq!(s.used_buffers, 3);
        assert!(s.empty);
        assert!(!s.full);

        let s = ArgStatus::from_raw(0b10_1111);
        assert_eq!(s.used_buffers, 15);
        assert!(!s.empty);
        assert!(s.full);
    }

    #[test]
    fn status_known_bits() {
        let s = StatusFlags::from_raw(0b1110);
        assert!(!s.start && s.done && s.idle && s.ready);
        assert!(!s.is_fault());

        let s = StatusFlags::from_raw(0x8000_0004);
        assert!(s.idle);
        assert_eq!(s.unknown_bits, 0x8000_0000);
        assert!(s.is_fault());
    }

    #[test]
    fn control_bits() {
        let c = ControlFlags::from_raw(0b11);
        assert!(c.reset && c.global_interrupt_enable);
        assert_eq!(ControlFlags::from_raw(0), ControlFlags { reset: false, global_interrupt_enable: false });
    }

    #[test]
    fn arg_status_display() {
        assert_eq!(
            ArgStatus::from_raw(0b01_0010).to_string(),
            "used_buf:2, empty:1, full:0"
        );
    }
}
