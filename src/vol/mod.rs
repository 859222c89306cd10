mod serde;

use crate::{utils::randn, Float};

/// A `sx × sy × depth` block of values with a gradient of the same shape.
///
/// Holds line crops, activations and weights alike. Layout is row major
/// with channels innermost (HWC), the layout crops are decoded in.
#[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
#[serde(try_from = "serde::StoredVol")]
pub struct Vol {
    sx: usize,
    sy: usize,
    depth: usize,

    pub w: Vec<Float>,

    #[serde(skip)]
    pub dw: Vec<Float>,
}

impl From<Vec<Float>> for Vol {
    fn from(value: Vec<Float>) -> Self {
        let depth = value.len();
        Self::from_hwc(1, 1, depth, value)
    }
}

impl From<&[Float]> for Vol {
    fn from(value: &[Float]) -> Self {
        Self::from(value.to_vec())
    }
}

impl Vol {
    /// Randomly initialized volume, used for filters and weights.
    pub fn new(sx: usize, sy: usize, depth: usize) -> Self {
        let n = sx * sy * depth;

        // weight normalization is done to equalize the output
        // variance of every neuron, otherwise neurons with a lot
        // of incoming connections have outputs of larger variance
        let scale = (1.0 / (n as Float)).sqrt();
        let w = (0..n).map(|_| randn(0.0, scale)).collect();

        Self {
            sx,
            sy,
            depth,
            w,
            dw: vec![0.0; n],
        }
    }

    pub fn with_constant(sx: usize, sy: usize, depth: usize, constant: Float) -> Self {
        let n = sx * sy * depth;
        Self {
            sx,
            sy,
            depth,
            w: vec![constant; n],
            dw: vec![0.0; n],
        }
    }

    pub fn zeros(sx: usize, sy: usize, depth: usize) -> Self {
        Self::with_constant(sx, sy, depth, 0.0)
    }

    /// Wraps already laid out HWC data.
    ///
    /// Panics if `w` does not hold exactly `sx * sy * depth` values.
    pub fn from_hwc(sx: usize, sy: usize, depth: usize, w: Vec<Float>) -> Self {
        let n = sx * sy * depth;
        assert_eq!(n, w.len(), "volume data does not match its dimensions");
        Self {
            sx,
            sy,
            depth,
            w,
            dw: vec![0.0; n],
        }
    }

    /// Flat position of `(x, y, d)` in `w` and `dw`.
    pub(crate) fn index(&self, x: usize, y: usize, d: usize) -> usize {
        ((self.sx * y) + x) * self.depth + d
    }

    pub fn get(&self, x: usize, y: usize, d: usize) -> Float {
        self.w[self.index(x, y, d)]
    }

    pub fn set(&mut self, x: usize, y: usize, d: usize, value: Float) {
        let index = self.index(x, y, d);
        self.w[index] = value
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn sx(&self) -> usize {
        self.sx
    }
    pub fn sy(&self) -> usize {
        self.sy
    }
    pub fn depth(&self) -> usize {
        self.depth
    }
}
