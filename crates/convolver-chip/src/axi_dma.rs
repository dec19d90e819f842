//! AXI DMA (simple / direct register mode) register map.
//!
//! One register block holds both directions:
//!
//! ```text
//! Channel   Direction            CR     SR     ADDR   ADDR_MSB  LENGTH
//! ───────── ──────────────────── ────── ────── ────── ───────── ──────
//! MM2S      memory → stream      0x00   0x04   0x18   0x1C      0x28
//! S2MM      stream → memory      0x30   0x34   0x48   0x4C      0x58
//! ```
//!
//! Writing `LENGTH` (in bytes) starts a transfer on a running channel.

/// DMA direction, named from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// MM2S: host memory to the accelerator's input stream.
    Send,
    /// S2MM: the accelerator's output stream to host memory.
    Receive,
}

impl Direction {
    /// Register offsets for this direction.
    #[must_use]
    pub const fn registers(self) -> ChannelRegisters {
        match self {
            Self::Send => MM2S,
            Self::Receive => S2MM,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "send (MM2S)"),
            Self::Receive => write!(f, "recv (S2MM)"),
        }
    }
}

/// Register offsets of one DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRegisters {
    /// DMACR.
    pub control: usize,
    /// DMASR.
    pub status: usize,
    /// Source (MM2S) or destination (S2MM) address, low word.
    pub address: usize,
    /// Address, high word.
    pub address_msb: usize,
    /// Transfer length in bytes.
    pub length: usize,
}

/// Memory-mapped to stream channel.
pub const MM2S: ChannelRegisters = ChannelRegisters {
    control: 0x00,
    status: 0x04,
    address: 0x18,
    address_msb: 0x1C,
    length: 0x28,
};

/// Stream to memory-mapped channel.
pub const S2MM: ChannelRegisters = ChannelRegisters {
    control: 0x30,
    status: 0x34,
    address: 0x48,
    address_msb: 0x4C,
    length: 0x58,
};

/// Size of the register block.
pub const REGISTER_SPAN: usize = 0x1_0000;

/// Largest transfer the default 26-bit length register accepts.
pub const MAX_TRANSFER_BYTES: usize = (1 << 26) - 1;

/// DMACR bits.
pub mod control {
    /// Run / stop.
    pub const RUN: u32 = 1 << 0;
    /// Soft reset of the channel (self clearing).
    pub const RESET: u32 = 1 << 2;
    /// Interrupt on complete enable.
    pub const IOC_IRQ_EN: u32 = 1 << 12;
    /// Error interrupt enable.
    pub const ERR_IRQ_EN: u32 = 1 << 14;
}

/// DMASR bits.
pub mod status {
    /// Channel halted.
    pub const HALTED: u32 = 1 << 0;
    /// Channel idle (transfer complete).
    pub const IDLE: u32 = 1 << 1;
    /// Internal error.
    pub const INTERNAL_ERR: u32 = 1 << 4;
    /// AXI slave error.
    pub const SLAVE_ERR: u32 = 1 << 5;
    /// Address decode error.
    pub const DECODE_ERR: u32 = 1 << 6;
    /// Interrupt on complete (write 1 to clear).
    pub const IOC_IRQ: u32 = 1 << 12;
    /// Error interrupt (write 1 to clear).
    pub const ERR_IRQ: u32 = 1 << 14;
    /// Any error bit.
    pub const ERROR_MASK: u32 = INTERNAL_ERR | SLAVE_ERR | DECODE_ERR;
    /// Interrupt bits, cleared by writing them back.
    pub const IRQ_MASK: u32 = IOC_IRQ | ERR_IRQ;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_do_not_share_registers() {
        let m = Direction::Send.registers();
        let s = Direction::Receive.registers();
        for a in [m.control, m.status, m.address, m.address_msb, m.length] {
            for b in [s.control, s.status, s.address, s.address_msb, s.length] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn known_offsets() {
        assert_eq!(S2MM.length, 0x58);
        assert_eq!(MM2S.address, 0x18);
        assert_eq!(status::ERROR_MASK, 0x70);
    }
}
