//! Silicon model for the convolver overlay.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the programmable logic the host talks to: the AXI-Stream
//! accelerator adapter register map, its bit definitions and command words,
//! the AXI DMA register block, and the layer geometry of the compiled
//! convolution network.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Adapter register map, bit definitions, command opcodes |
//! | [`slots`] | Slot kinds, checked slot indices, enable masks, output length mode |
//! | [`status`] | Control / status / per-slot status decoding |
//! | [`axi_dma`] | AXI DMA MM2S / S2MM register layout |
//! | [`network`] | Layer-size recurrence and network geometry |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod axi_dma;
pub mod network;
pub mod regs;
pub mod slots;
pub mod status;

pub use network::{layer_input_size, NetworkGeometry};
pub use slots::{enable_mask, ArgKind, OutputLengthMode, SlotIndex};
pub use status::{ArgStatus, ControlFlags, StatusFlags};
