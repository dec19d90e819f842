//! Reference convolution network
//!
//! Plain CPU model of the compiled network the overlay runs: each stage is a
//! `K × K` convolution over a zero-padded input (stride 1, ReLU) followed by a
//! non-overlapping `p × p` max pool. Output dimensions follow
//! [`convolver_chip::layer_input_size`] exactly.
//!
//! The simulated backend computes its output stream with this model, so host
//! code can be checked end to end without the board.

use convolver_chip::NetworkGeometry;

/// Value every output element takes for an all-zero input, for any kernel.
pub const ZERO_RESPONSE: u32 = 0;

/// Kernels selectable through input scalar 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// Centre tap only; the network reduces to repeated max pooling.
    Identity,
    /// All ones.
    Box,
    /// Centre `K² - 1`, every other tap `-1`.
    Laplacian,
}

impl Kernel {
    /// Decode a kernel selection id.
    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Identity),
            1 => Some(Self::Box),
            2 => Some(Self::Laplacian),
            _ => None,
        }
    }

    /// Selection id written to input scalar 0.
    pub const fn id(self) -> u32 {
        match self {
            Self::Identity => 0,
            Self::Box => 1,
            Self::Laplacian => 2,
        }
    }

    /// Row-major `k × k` taps.
    #[allow(clippy::cast_possible_wrap)]
    fn taps(self, k: usize) -> Vec<i64> {
        let centre = (k / 2) * k + k / 2;
        let n = k * k;
        (0..n)
            .map(|i| match self {
                Self::Identity => i64::from(i == centre),
                Self::Box => 1,
                Self::Laplacian if i == centre => n as i64 - 1,
                Self::Laplacian => -1,
            })
            .collect()
    }
}

/// Zero-padded `k × k` convolution, stride 1, ReLU clamped to `u32`.
///
/// Returns the output and its side, or `None` if the kernel does not fit.
pub fn conv2d(input: &[u32], side: usize, taps: &[i64], k: usize, padding: usize) -> Option<(Vec<u32>, usize)> {
    let padded = side + 2 * padding;
    if k == 0 || padded < k || taps.len() != k * k || input.len() != side * side {
        return None;
    }
    let out_side = padded - k + 1;
    let mut out = Vec::with_capacity(out_side * out_side);

    for oy in 0..out_side {
        for ox in 0..out_side {
            let mut acc: i64 = 0;
            for ky in 0..k {
                for kx in 0..k {
                    // coordinates in the padded frame; outside the image reads as 0
                    let (py, px) = (oy + ky, ox + kx);
                    if py < padding || px < padding || py - padding >= side || px - padding >= side {
                        continue;
                    }
                    let x = input[(py - padding) * side + (px - padding)];
                    acc += taps[ky * k + kx] * i64::from(x);
                }
            }
            out.push(u32::try_from(acc.max(0)).unwrap_or(u32::MAX));
        }
    }
    Some((out, out_side))
}

/// Non-overlapping `pool × pool` max pooling; trailing rows/columns are dropped.
pub fn max_pool(input: &[u32], side: usize, pool: usize) -> Option<(Vec<u32>, usize)> {
    if pool == 0 || input.len() != side * side {
        return None;
    }
    let out_side = side / pool;
    let mut out = Vec::with_capacity(out_side * out_side);
    for oy in 0..out_side {
        for ox in 0..out_side {
            let mut m = 0;
            for dy in 0..pool {
                let row = (oy * pool + dy) * side;
                for dx in 0..pool {
                    m = m.max(input[row + ox * pool + dx]);
                }
            }
            out.push(m);
        }
    }
    Some((out, out_side))
}

/// Run every stage of `geometry` over a square `side × side` image.
///
/// Returns the flattened output (row-major, `output_dim²` words), or `None`
/// if a stage collapses the image.
pub fn forward(pixels: &[u32], side: usize, kernel: Kernel, geometry: &NetworkGeometry) -> Option<Vec<u32>> {
    let taps = kernel.taps(geometry.kernel);
    let mut data = pixels.to_vec();
    let mut n = side;
    for _ in 0..geometry.stages {
        let (conv, conv_side) = conv2d(&data, n, &taps, geometry.kernel, geometry.padding)?;
        let (pooled, pooled_side) = max_pool(&conv, conv_side, geometry.pool)?;
        data = pooled;
        n = pooled_side;
    }
    if n == 0 {
        return None;
    }
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_side_matches_recurrence() {
        let g = NetworkGeometry::default();
        for side in [16, 30, 64, 100, 480] {
            let Some(expected) = g.output_dim(side) else {
                continue;
            };
            let out = forward(&vec![1; side * side], side, Kernel::Box, &g).unwrap();
            assert_eq!(out.len(), expected * expected, "side {side}");
        }
    }

    #[test]
    fn zero_input_gives_zero_response() {
        let g = NetworkGeometry::default();
        for kernel in [Kernel::Identity, Kernel::Box, Kernel::Laplacian] {
            let out = forward(&vec![0; 64 * 64], 64, kernel, &g).unwrap();
            assert!(out.iter().all(|&v| v == ZERO_RESPONSE), "{kernel:?}");
        }
    }

    #[test]
    fn identity_is_max_pool() {
        let g = NetworkGeometry {
            stages: 1,
            ..NetworkGeometry::default()
        };
        let img: Vec<u32> = (0..16).collect();
        let out = forward(&img, 4, Kernel::Identity, &g).unwrap();
        assert_eq!(out, vec![5, 7, 13, 15]);
    }

    #[test]
    fn box_kernel_sums_neighbourhood() {
        let (out, side) = conv2d(&[1; 9], 3, &Kernel::Box.taps(3), 3, 1).unwrap();
        assert_eq!(side, 3);
        assert_eq!(out, vec![4, 6, 4, 6, 9, 6, 4, 6, 4]);
    }

    #[test]
    fn laplacian_flat_interior_is_zero() {
        let (out, _) = conv2d(&[7; 25], 5, &Kernel::Laplacian.taps(3), 3, 1).unwrap();
        // interior pixel (2,2) sees a flat neighbourhood
        assert_eq!(out[2 * 5 + 2], 0);
        // corner sees only 3 neighbours: 8*7 - 3*7
        assert_eq!(out[0], 35);
    }

    #[test]
    fn collapsing_geometry_is_none() {
        let g = NetworkGeometry::default();
        assert!(forward(&[1; 4], 2, Kernel::Box, &g).is_none());
    }

    #[test]
    fn kernel_ids() {
        for k in [Kernel::Identity, Kernel::Box, Kernel::Laplacian] {
            assert_eq!(Kernel::from_id(k.id()), Some(k));
        }
        assert_eq!(Kernel::from_id(9), None);
    }
}
