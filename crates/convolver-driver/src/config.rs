//! Session configuration
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! describes the stock overlay:
//!
//! ```toml
//! output_length_mode = "hardware"
//! kernel_id = 1
//! dma_timeout_ms = 5000
//! coherent_buffers = true
//!
//! [slots]
//! input_args = 1
//! output_args = 1
//! input_scalars = 1
//! output_scalars = 0
//!
//! [geometry]
//! stages = 4
//! padding = 1
//! kernel = 3
//! pool = 2
//!
//! [diagnostics]
//! # output_dir = "out"   (unset: no output dumps)
//! timing_log = "execution_time.txt"
//!
//! [hardware]
//! mem_device = "/dev/mem"
//! adapter_base = 0x43C0_0000
//! adapter_span = 0x1_0000
//! dma_base = 0x4040_0000
//! dma_span = 0x1_0000
//! udmabuf = "udmabuf0"
//! ```

use crate::error::{ConvolverError, Result};
use convolver_chip::axi_dma;
use convolver_chip::regs::{self, SLOT_COUNT};
use convolver_chip::{NetworkGeometry, OutputLengthMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CONVOLVER_CONFIG";

/// Number of active slots per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlotCounts {
    /// Input argument streams
    pub input_args: usize,
    /// Output argument streams
    pub output_args: usize,
    /// Input scalars (slot 0 carries the kernel id)
    pub input_scalars: usize,
    /// Output scalars
    pub output_scalars: usize,
}

impl Default for SlotCounts {
    fn default() -> Self {
        Self {
            input_args: 1,
            output_args: 1,
            input_scalars: 1,
            output_scalars: 0,
        }
    }
}

/// Output length mode as spelled in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthMode {
    /// Accelerator decides (TLAST)
    #[default]
    Hardware,
    /// Host declares the length
    Software,
}

impl From<LengthMode> for OutputLengthMode {
    fn from(m: LengthMode) -> Self {
        match m {
            LengthMode::Hardware => Self::Hardware,
            LengthMode::Software => Self::Software,
        }
    }
}

/// Network shape of the loaded overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometryConfig {
    /// Convolution + pooling stages
    pub stages: usize,
    /// Padding P
    pub padding: usize,
    /// Kernel size K
    pub kernel: usize,
    /// Pooling window p
    pub pool: usize,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        NetworkGeometry::default().into()
    }
}

impl From<NetworkGeometry> for GeometryConfig {
    fn from(g: NetworkGeometry) -> Self {
        Self {
            stages: g.stages,
            padding: g.padding,
            kernel: g.kernel,
            pool: g.pool,
        }
    }
}

impl From<GeometryConfig> for NetworkGeometry {
    fn from(g: GeometryConfig) -> Self {
        Self {
            stages: g.stages,
            padding: g.padding,
            kernel: g.kernel,
            pool: g.pool,
        }
    }
}

/// Where diagnostic artifacts go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Directory for `CNN_output_hex.txt` / `CNN_output_bin.txt`; unset disables them
    pub output_dir: Option<PathBuf>,
    /// Append-only log of timed runs, one duration in seconds per line
    pub timing_log: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            timing_log: PathBuf::from("execution_time.txt"),
        }
    }
}

/// Physical layout of the overlay on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareConfig {
    /// Device node for register windows
    pub mem_device: PathBuf,
    /// Adapter register block base address
    pub adapter_base: u64,
    /// Adapter register block size
    pub adapter_span: usize,
    /// AXI DMA register block base address
    pub dma_base: u64,
    /// AXI DMA register block size
    pub dma_span: usize,
    /// u-dma-buf device name (`/dev/<name>`)
    pub udmabuf: String,
}

impl HardwareConfig {
    /// Check that both register windows cover their register blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ConvolverError::Configuration`] for a window too small to
    /// hold every register the driver touches.
    pub fn validate(&self) -> Result<()> {
        for (name, span, needed) in [
            ("adapter_span", self.adapter_span, regs::REGISTER_SPAN),
            ("dma_span", self.dma_span, axi_dma::REGISTER_SPAN),
        ] {
            if span < needed {
                return Err(ConvolverError::configuration(format!(
                    "hardware.{name} = {span:#x} is smaller than the {needed:#x}-byte register block"
                )));
            }
        }
        Ok(())
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            mem_device: PathBuf::from("/dev/mem"),
            adapter_base: 0x43C0_0000,
            adapter_span: 0x1_0000,
            dma_base: 0x4040_0000,
            dma_span: axi_dma::REGISTER_SPAN,
            udmabuf: "udmabuf0".to_string(),
        }
    }
}

/// Everything a session needs besides the hardware handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Active slot counts
    pub slots: SlotCounts,
    /// Output length mode written during setup
    pub output_length_mode: LengthMode,
    /// Declared output length (words) for software mode
    pub output_length_words: Option<u32>,
    /// Kernel selection id written to input scalar 0
    pub kernel_id: u32,
    /// Network shape
    pub geometry: GeometryConfig,
    /// Bound on each DMA wait
    pub dma_timeout_ms: u64,
    /// Mark transfer buffers coherent (skip cache maintenance)
    pub coherent_buffers: bool,
    /// Diagnostic artifacts
    pub diagnostics: DiagnosticsConfig,
    /// Board layout
    pub hardware: HardwareConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            slots: SlotCounts::default(),
            output_length_mode: LengthMode::Hardware,
            output_length_words: None,
            kernel_id: 1,
            geometry: GeometryConfig::default(),
            dma_timeout_ms: 5_000,
            coherent_buffers: true,
            diagnostics: DiagnosticsConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse TOML text.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML for this schema.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConvolverError::ConfigParse {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text).map_err(|e| ConvolverError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `path` if given, else `$CONVOLVER_CONFIG`, else defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the selected file cannot be read or parsed.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(p) if !p.is_empty() => Self::load(Path::new(&p)),
            _ => Ok(Self::default()),
        }
    }

    /// Serialize back to TOML.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConvolverError::configuration(e.to_string()))
    }

    /// Network shape as the chip model type.
    pub fn network(&self) -> NetworkGeometry {
        self.geometry.into()
    }

    /// Bound on each DMA wait.
    pub const fn dma_timeout(&self) -> Duration {
        Duration::from_millis(self.dma_timeout_ms)
    }

    /// Check cross-field consistency before any register is touched.
    ///
    /// # Errors
    ///
    /// Returns [`ConvolverError::Configuration`] naming the first problem.
    pub fn validate(&self) -> Result<()> {
        let s = &self.slots;
        for (name, count) in [
            ("input_args", s.input_args),
            ("output_args", s.output_args),
            ("input_scalars", s.input_scalars),
            ("output_scalars", s.output_scalars),
        ] {
            if count > SLOT_COUNT {
                return Err(ConvolverError::configuration(format!(
                    "slots.{name} = {count} exceeds {SLOT_COUNT}"
                )));
            }
        }
        if s.input_args == 0 || s.output_args == 0 {
            return Err(ConvolverError::configuration(
                "at least one input and one output argument must be enabled",
            ));
        }
        if s.input_scalars == 0 {
            return Err(ConvolverError::configuration(
                "kernel_id is written to input scalar 0, but slots.input_scalars = 0",
            ));
        }
        if self.output_length_mode == LengthMode::Software && self.output_length_words.is_none() {
            return Err(ConvolverError::configuration(
                "output_length_mode = \"software\" requires output_length_words",
            ));
        }
        let g = &self.geometry;
        if g.pool == 0 || g.kernel == 0 {
            return Err(ConvolverError::configuration(format!(
                "geometry kernel ({}) and pool ({}) must be non-zero",
                g.kernel, g.pool
            )));
        }
        if self.dma_timeout_ms == 0 {
            return Err(ConvolverError::configuration("dma_timeout_ms must be non-zero"));
        }
        self.hardware.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_defaults() {
        let c = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(c, SessionConfig::default());
        assert_eq!(c.network(), NetworkGeometry::default());
        assert_eq!(c.dma_timeout(), Duration::from_secs(5));
        c.validate().unwrap();
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let c = SessionConfig::from_toml_str(
            r#"
            output_length_mode = "software"
            output_length_words = 900
            kernel_id = 2

            [slots]
            output_scalars = 1

            [geometry]
            stages = 2

            [hardware]
            adapter_base = 0xA000_0000
            "#,
        )
        .unwrap();
        assert_eq!(c.output_length_mode, LengthMode::Software);
        assert_eq!(c.slots.input_args, 1);
        assert_eq!(c.slots.output_scalars, 1);
        assert_eq!(c.geometry.stages, 2);
        assert_eq!(c.geometry.kernel, 3);
        assert_eq!(c.hardware.adapter_base, 0xA000_0000);
        assert_eq!(c.hardware.udmabuf, "udmabuf0");
        c.validate().unwrap();
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = SessionConfig::from_toml_str("kernel = 3").unwrap_err();
        assert!(matches!(err, ConvolverError::ConfigParse { .. }));
    }

    #[test]
    fn validation_failures() {
        let mut c = SessionConfig::default();
        c.slots.input_args = 9;
        assert!(c.validate().unwrap_err().is_configuration());

        let mut c = SessionConfig::default();
        c.slots.output_args = 0;
        assert!(c.validate().is_err());

        let mut c = SessionConfig::default();
        c.slots.input_scalars = 0;
        assert!(c.validate().is_err());

        let mut c = SessionConfig::default();
        c.output_length_mode = LengthMode::Software;
        assert!(c.validate().is_err());
        c.output_length_words = Some(900);
        c.validate().unwrap();

        let mut c = SessionConfig::default();
        c.geometry.pool = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_from_file_and_round_trip() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "dma_timeout_ms = 250\ncoherent_buffers = false").unwrap();
        let c = SessionConfig::resolve(Some(f.path())).unwrap();
        assert_eq!(c.dma_timeout_ms, 250);
        assert!(!c.coherent_buffers);

        let text = c.to_toml_string().unwrap();
        assert_eq!(SessionConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn bad_file_names_path() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "dma_timeout_ms = \"soon\"").unwrap();
        match SessionConfig::load(f.path()).unwrap_err() {
            ConvolverError::ConfigParse { path, .. } => assert_eq!(path, f.path()),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let text = include_str!("../../../config/convolver.toml");
        let cfg = SessionConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn undersized_register_windows_rejected() {
        let mut cfg = SessionConfig::default();
        cfg.hardware.adapter_span = 0x100;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("adapter_span"), "{err}");

        let mut cfg = SessionConfig::default();
        cfg.hardware.dma_span = 0x40;
        assert!(cfg.validate().unwrap_err().is_configuration());

        let mut cfg = SessionConfig::default();
        cfg.hardware.adapter_span = regs::REGISTER_SPAN;
        cfg.validate().unwrap();
    }
}
