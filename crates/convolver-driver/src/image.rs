//! Grayscale input images
//!
//! The network consumes one 8-bit channel, row-major. Images can be built in
//! memory, read from raw `side × side` byte dumps, or from binary PGM (`P5`).

use crate::error::{ConvolverError, Result};
use std::path::Path;

/// Row-major 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Image {
    /// Wrap `pixels` as a `width × height` image.
    ///
    /// # Errors
    ///
    /// Returns error if the image is empty or `pixels` has the wrong length.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ConvolverError::configuration(format!(
                "empty image ({width}x{height})"
            )));
        }
        let count = pixel_count(width, height)?;
        if pixels.len() != count {
            return Err(ConvolverError::configuration(format!(
                "{width}x{height} image needs {count} pixels, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// All-zero `side × side` image.
    ///
    /// # Errors
    ///
    /// Returns error if `side` is zero or `side²` overflows.
    pub fn zeros(side: usize) -> Result<Self> {
        Self::new(side, side, vec![0; pixel_count(side, side)?])
    }

    /// Square image from raw bytes; `side` is inferred when not given.
    ///
    /// # Errors
    ///
    /// Returns error if the byte count is not `side²` (or not a perfect square).
    pub fn from_raw(bytes: Vec<u8>, side: Option<usize>) -> Result<Self> {
        let side = match side {
            Some(s) => s,
            None => {
                let n = bytes.len();
                (0..=n)
                    .find(|s| s * s >= n)
                    .filter(|s| s * s == n)
                    .ok_or_else(|| {
                        ConvolverError::configuration(format!(
                            "{n} raw bytes is not a square image; pass the side length"
                        ))
                    })?
            }
        };
        Self::new(side, side, bytes)
    }

    /// Parse a binary PGM (`P5`, maxval ≤ 255).
    ///
    /// # Errors
    ///
    /// Returns error on a malformed header or short pixel data.
    pub fn from_pgm(bytes: &[u8]) -> Result<Self> {
        let bad = |why: &str| ConvolverError::configuration(format!("invalid PGM: {why}"));

        // header: magic, width, height, maxval, separated by whitespace and comments
        let mut fields = Vec::with_capacity(4);
        let mut pos = 0;
        while fields.len() < 4 {
            while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b'#') {
                if bytes[pos] == b'#' {
                    while pos < bytes.len() && bytes[pos] != b'\n' {
                        pos += 1;
                    }
                } else {
                    pos += 1;
                }
            }
            let start = pos;
            while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if start == pos {
                return Err(bad("truncated header"));
            }
            fields.push(std::str::from_utf8(&bytes[start..pos]).map_err(|_| bad("non-ASCII header"))?);
        }
        // exactly one whitespace byte separates maxval from the raster
        pos += 1;

        if fields[0] != "P5" {
            return Err(bad("only binary greymaps (P5) are supported"));
        }
        let num = |s: &str| s.parse::<usize>().map_err(|_| bad("non-numeric header field"));
        let (width, height, maxval) = (num(fields[1])?, num(fields[2])?, num(fields[3])?);
        if maxval == 0 || maxval > 255 {
            return Err(bad("maxval must be 1..=255"));
        }
        let end = pixel_count(width, height)?
            .checked_add(pos)
            .ok_or_else(|| bad("raster size overflows"))?;
        let raster = bytes.get(pos..end).ok_or_else(|| bad("short raster"))?;
        Self::new(width, height, raster.to_vec())
    }

    /// Load a PGM or raw byte file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded.
    pub fn load(path: &Path, side: Option<usize>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.starts_with(b"P5") {
            Self::from_pgm(&bytes)
        } else {
            Self::from_raw(bytes, side)
        }
    }

    /// Width in pixels.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Pixel count.
    pub fn element_count(&self) -> usize {
        self.pixels.len()
    }

    /// Row-major pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Side length, if square.
    pub const fn side(&self) -> Option<usize> {
        if self.width == self.height {
            Some(self.width)
        } else {
            None
        }
    }

    /// Pixels zero-extended to stream words.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.pixels.iter().map(|&p| u32::from(p))
    }
}

fn pixel_count(width: usize, height: usize) -> Result<usize> {
    width.checked_mul(height).ok_or_else(|| {
        ConvolverError::configuration(format!("{width}x{height} image is too large"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_side_inferred() {
        let img = Image::from_raw(vec![7; 36], None).unwrap();
        assert_eq!(img.side(), Some(6));
        assert!(Image::from_raw(vec![0; 35], None).is_err());
        assert!(Image::from_raw(vec![0; 35], Some(6)).is_err());
        assert!(Image::from_raw(Vec::new(), None).is_err());
    }

    #[test]
    fn pgm_with_comment() {
        let mut data = b"P5\n# made by hand\n3 2\n255\n".to_vec();
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let img = Image::from_pgm(&data).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
        assert_eq!(img.side(), None);
        assert_eq!(img.words().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn pgm_rejects_ascii_and_short() {
        assert!(Image::from_pgm(b"P2\n1 1\n255\n0").is_err());
        assert!(Image::from_pgm(b"P5\n2 2\n255\n\x01\x02").is_err());
    }

    #[test]
    fn zeros_is_square() {
        let img = Image::zeros(4).unwrap();
        assert_eq!(img.element_count(), 16);
        assert!(img.words().all(|w| w == 0));
        assert!(Image::zeros(0).is_err());
    }

    #[test]
    fn load_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("img.raw");
        std::fs::write(&raw, [9u8; 16]).unwrap();
        assert_eq!(Image::load(&raw, None).unwrap().side(), Some(4));

        let pgm = dir.path().join("img.pgm");
        let mut data = b"P5 2 2 255 ".to_vec();
        data.extend_from_slice(&[1, 2, 3, 4]);
        std::fs::write(&pgm, data).unwrap();
        assert_eq!(Image::load(&pgm, None).unwrap().pixels(), &[1, 2, 3, 4]);
    }

    #[test]
    fn oversized_dimensions_are_errors() {
        let err = Image::from_pgm(b"P5\n4294967296 4294967296\n255\n").unwrap_err();
        assert!(err.is_configuration(), "{err}");

        let err = Image::new(usize::MAX, 2, Vec::new()).unwrap_err();
        assert!(err.is_configuration(), "{err}");

        assert!(Image::zeros(usize::MAX).is_err());
    }
}
