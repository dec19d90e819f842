//! Hardware overlay handles
//!
//! Opens the three hardware resources a session needs: the adapter register
//! window, the AXI DMA register window and the u-dma-buf region. Undersized
//! windows are a [`ConvolverError::Configuration`]; every device failure
//! surfaces as [`ConvolverError::Initialization`].

use crate::axi_dma::AxiDmaChannel;
use crate::config::HardwareConfig;
use crate::dma::DmaEngine;
use crate::error::{ConvolverError, Result};
use crate::mmio::{MappedRegion, RegisterBank};
use crate::registers::AdapterRegisters;
use crate::session::SessionParts;
use crate::udmabuf::UdmabufAllocator;
use convolver_chip::axi_dma::Direction;
use std::sync::Arc;
use tracing::info;

/// Mapped overlay resources.
#[derive(Debug)]
pub struct Overlay {
    adapter: Arc<MappedRegion>,
    dma: Arc<MappedRegion>,
    allocator: UdmabufAllocator,
}

impl Overlay {
    /// Map the register windows and the DMA memory region.
    ///
    /// `uncached` maps DMA memory with `O_SYNC` so buffers can be coherent.
    ///
    /// # Errors
    ///
    /// Returns [`ConvolverError::Configuration`] if a register window is
    /// smaller than its register block, otherwise an error if any device
    /// node is missing, inaccessible, or cannot be mapped.
    pub fn open(hw: &HardwareConfig, uncached: bool) -> Result<Self> {
        hw.validate()?;
        let adapter = MappedRegion::map(&hw.mem_device, hw.adapter_base, hw.adapter_span)?;
        let dma = MappedRegion::map(&hw.mem_device, hw.dma_base, hw.dma_span)?;
        let allocator = UdmabufAllocator::open(&hw.udmabuf, uncached)?;
        info!(
            "Overlay open: adapter {:#x}, dma {:#x}, {} ({:#x} bytes)",
            hw.adapter_base,
            hw.dma_base,
            hw.udmabuf,
            allocator.capacity()
        );
        Ok(Self {
            adapter: Arc::new(adapter),
            dma: Arc::new(dma),
            allocator,
        })
    }

    /// Reset both DMA channels and assemble session parts.
    ///
    /// # Errors
    ///
    /// Returns error if a DMA channel does not come out of reset.
    pub fn session_parts(&self) -> Result<SessionParts> {
        let channel = |direction| {
            AxiDmaChannel::new(Arc::clone(&self.dma), direction).map_err(|e| {
                ConvolverError::initialization(format!("DMA {direction} did not start: {e}"))
            })
        };
        let send = channel(Direction::Send)?;
        let recv = channel(Direction::Receive)?;

        let bank: Arc<dyn RegisterBank> = Arc::clone(&self.adapter) as Arc<dyn RegisterBank>;
        Ok(SessionParts {
            registers: AdapterRegisters::new(bank),
            dma: DmaEngine::new(Box::new(send), Box::new(recv)),
            allocator: Box::new(self.allocator.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_device_is_initialization_error() {
        let hw = HardwareConfig {
            mem_device: PathBuf::from("/nonexistent/mem"),
            ..HardwareConfig::default()
        };
        let err = Overlay::open(&hw, true).unwrap_err();
        assert!(matches!(err, ConvolverError::Initialization { .. }), "{err}");
    }

    #[test]
    fn undersized_window_rejected_before_mapping() {
        let hw = HardwareConfig {
            mem_device: PathBuf::from("/nonexistent/mem"),
            adapter_span: 0x100,
            ..HardwareConfig::default()
        };
        let err = Overlay::open(&hw, true).unwrap_err();
        assert!(err.is_configuration(), "{err}");
    }

    #[test]
    #[ignore] // Requires the overlay bitstream loaded, /dev/mem and udmabuf0
    fn open_default_overlay() {
        let overlay = Overlay::open(&HardwareConfig::default(), true).expect("open overlay");
        let parts = overlay.session_parts().expect("session parts");
        println!("{}", parts.registers.debug_snapshot());
    }
}
