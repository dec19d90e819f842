//! Layer geometry of the compiled convolution network.
//!
//! Each stage is a padded convolution followed by a pooling window. The
//! spatial size entering stage `i + 1` is
//!
//! ```text
//! size ← (size + 2·P − K + 1) / p        (floor division)
//! ```
//!
//! With the overlay's topology (P = 1, K = 3, p = 2) every stage halves the
//! size: `480 → 240 → 120 → 60 → 30`.

/// Padding per convolution layer in the shipped overlay.
pub const PADDING: usize = 1;
/// Square kernel size.
pub const KERNEL: usize = 3;
/// Square pooling window.
pub const POOL: usize = 2;
/// Layer index whose input is the network output.
pub const OUTPUT_LAYER: usize = 4;
/// Side length the preprocessing front end resizes faces to.
pub const FIXED_IMAGE_SIZE: usize = 480;

/// Spatial size of the map entering layer `layer_index`.
///
/// `layer_index == 0` returns `n_in` unchanged. Returns `None` if a stage
/// would produce a negative size or `pool` is zero.
#[must_use]
pub const fn layer_input_size(
    layer_index: usize,
    n_in: usize,
    padding: usize,
    kernel: usize,
    pool: usize,
) -> Option<usize> {
    if pool == 0 {
        return None;
    }
    let mut size = n_in;
    let mut i = 0;
    while i < layer_index {
        let padded = size + 2 * padding + 1;
        if padded < kernel {
            return None;
        }
        size = (padded - kernel) / pool;
        i += 1;
    }
    Some(size)
}

/// Topology parameters of the compiled network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkGeometry {
    /// Number of convolution + pooling stages (the output layer index).
    pub stages: usize,
    /// Padding `P`.
    pub padding: usize,
    /// Kernel size `K`.
    pub kernel: usize,
    /// Pooling window `p`.
    pub pool: usize,
}

impl Default for NetworkGeometry {
    fn default() -> Self {
        Self {
            stages: OUTPUT_LAYER,
            padding: PADDING,
            kernel: KERNEL,
            pool: POOL,
        }
    }
}

impl NetworkGeometry {
    /// Output side length for a square input of side `n_in`.
    #[must_use]
    pub const fn output_dim(&self, n_in: usize) -> Option<usize> {
        layer_input_size(self.stages, n_in, self.padding, self.kernel, self.pool)
    }

    /// Side length entering every layer, input first, output last.
    #[must_use]
    pub fn layer_sizes(&self, n_in: usize) -> Vec<usize> {
        (0..=self.stages)
            .map_while(|i| layer_input_size(i, n_in, self.padding, self.kernel, self.pool))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_layers_is_identity() {
        for n in [0, 1, 17, 480] {
            assert_eq!(layer_input_size(0, n, 1, 3, 2), Some(n));
            assert_eq!(layer_input_size(0, n, 0, 5, 3), Some(n));
        }
    }

    #[test]
    fn overlay_geometry_halves() {
        let g = NetworkGeometry::default();
        assert_eq!(g.layer_sizes(480), vec![480, 240, 120, 60, 30]);
        assert_eq!(g.output_dim(FIXED_IMAGE_SIZE), Some(30));
        assert_eq!(layer_input_size(4, 480, 1, 3, 2), Some(30));
    }

    #[test]
    fn floor_division() {
        // (7 + 2 - 3 + 1) / 2 = 3
        assert_eq!(layer_input_size(1, 7, 1, 3, 2), Some(3));
        // no padding, 5x5 kernel: (10 - 5 + 1) / 2 = 3
        assert_eq!(layer_input_size(1, 10, 0, 5, 2), Some(3));
    }

    #[test]
    fn degenerate_parameters() {
        assert_eq!(layer_input_size(1, 8, 1, 3, 0), None);
        assert_eq!(layer_input_size(1, 1, 0, 5, 1), None);
    }
}
