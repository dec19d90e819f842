//! Pure Rust host driver for the convolver FPGA overlay.
//!
//! The overlay puts a convolution network behind an AXI-Stream accelerator
//! adapter, fed and drained by an AXI DMA engine. This crate drives it from
//! user space: register windows through `/dev/mem`, DMA memory from
//! u-dma-buf, and the request protocol on top.
//!
//! # Layers
//!
//! ```text
//! Session (setup / convolve / convolve_timed)
//!   ├── AdapterRegisters ── RegisterBank ── MappedRegion | MemoryBank
//!   ├── DmaEngine { send, recv } ── AxiDmaChannel | SimDmaChannel
//!   └── BufferAllocator ── UdmabufAllocator | TrackingAllocator
//! ```
//!
//! Hardware parts come from [`overlay::Overlay`]; the simulated backend
//! ([`backends::sim`]) runs the same protocol against an in-memory overlay
//! and the reference network.
//!
//! # Quick start
//!
//! ```no_run
//! use convolver_driver::{Image, Session, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::resolve(None)?;
//! let mut session = Session::open(config)?;
//! session.setup()?;
//!
//! let image = Image::zeros(480)?;
//! let out = session.convolve(&image)?;
//! println!("{}x{} output, first word {:#x}", out.dim, out.dim, out.words[0]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod axi_dma;
pub mod backends;
pub mod config;
pub mod diagnostics;
pub mod dma;
mod error;
mod image;
pub mod mmio;
pub mod overlay;
pub mod registers;
mod session;
pub mod udmabuf;

pub use backends::SimulatedAccelerator;
pub use config::{HardwareConfig, LengthMode, SessionConfig};
pub use dma::{BufferAllocator, DmaChannel, DmaEngine, TransferBuffer};
pub use error::{ConvolverError, Result};
pub use image::Image;
pub use mmio::{MappedRegion, RegisterBank};
pub use registers::{AdapterRegisters, Command, DebugSnapshot, RegisterValue};
pub use session::{ConvolutionOutput, Session, SessionParts, SessionState, TransferPlan};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ConvolutionOutput, ConvolverError, Image, Result, Session, SessionConfig, SessionState,
        SimulatedAccelerator,
    };
}
