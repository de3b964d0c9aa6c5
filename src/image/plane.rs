//! Owned single-channel 2D grid in row-major layout (stride == width).
//!
//! Slice intensities use `Plane<f64>`, slice masks use `Plane<u8>` where any
//! non-zero value marks a pixel as part of the objective.
#[derive(Clone, Debug, PartialEq)]
pub struct Plane<T> {
    /// Width in pixels
    pub w: usize,
    /// Height in pixels
    pub h: usize,
    /// Number of elements between consecutive rows (equals `w`)
    pub stride: usize,
    /// Backing storage in row-major order
    pub data: Vec<T>,
}

pub type Mask = Plane<u8>;

impl<T: Copy + Default> Plane<T> {
    /// Construct a default-initialized buffer of size `w × h`.
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            stride: w,
            data: vec![T::default(); w * h],
        }
    }

    pub fn filled(w: usize, h: usize, value: T) -> Self {
        Self {
            w,
            h,
            stride: w,
            data: vec![value; w * h],
        }
    }

    /// Wrap an existing buffer; returns `None` when the length does not match.
    pub fn from_vec(w: usize, h: usize, data: Vec<T>) -> Option<Self> {
        (data.len() == w * h).then_some(Self {
            w,
            h,
            stride: w,
            data,
        })
    }

    #[inline]
    /// Convert (x, y) to a linear index into `data`.
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.stride + x
    }
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.idx(x, y)]
    }
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: T) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        let start = y * self.stride;
        &self.data[start..start + self.w]
    }

    pub fn len(&self) -> usize {
        self.w * self.h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Plane<u8> {
    /// Number of pixels flagged by the mask.
    pub fn count_set(&self) -> usize {
        self.data.iter().filter(|&&m| m != 0).count()
    }
}
