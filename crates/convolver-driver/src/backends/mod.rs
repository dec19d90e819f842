//! Overlay backends
//!
//! Two ways to get a register bank, a DMA engine and a buffer allocator:
//! - **Hardware**: `/dev/mem` register windows, AXI DMA, u-dma-buf memory
//!   (see [`crate::overlay`])
//! - **Simulated**: in-memory overlay running the reference network ([`sim`])

pub mod reference;
pub mod sim;

pub use sim::{MemoryBank, SimulatedAccelerator, TrackingAllocator};
