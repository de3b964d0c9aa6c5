//! Separable Gaussian smoothing of planes and volumes.
//!
//! Border samples clamp to the grid extents.

/// 1D filter applied independently along each axis.
pub trait SeparableFilter {
    /// Taps in left-to-right order, centred on `taps().len() / 2`.
    fn taps(&self) -> &[f64];

    fn radius(&self) -> usize {
        self.taps().len() / 2
    }
}

/// Sampled, normalised Gaussian truncated at three standard deviations.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianFilter {
    taps: Vec<f64>,
}

impl GaussianFilter {
    /// `sigma` in samples; `sigma <= 0` yields the identity filter.
    pub fn new(sigma: f64) -> Self {
        if sigma.is_nan() || sigma <= 0.0 {
            return Self { taps: vec![1.0] };
        }
        let radius = (3.0 * sigma).ceil() as isize;
        let mut taps: Vec<f64> = (-radius..=radius)
            .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
            .collect();
        let total: f64 = taps.iter().sum();
        taps.iter_mut().for_each(|t| *t /= total);
        Self { taps }
    }

    pub fn is_identity(&self) -> bool {
        self.taps.len() == 1
    }
}

impl SeparableFilter for GaussianFilter {
    #[inline]
    fn taps(&self) -> &[f64] {
        &self.taps
    }
}

pub(crate) fn clamp_index(idx: isize, upper: usize) -> usize {
    if upper == 0 || idx < 0 {
        0
    } else if (idx as usize) >= upper {
        upper - 1
    } else {
        idx as usize
    }
}

/// Filter `len` samples read at `base + n * stride` of `data` in place.
fn filter_line(data: &mut [f64], base: usize, stride: usize, len: usize, taps: &[f64], line: &mut Vec<f64>) {
    let radius = taps.len() / 2;
    line.clear();
    line.extend((0..len).map(|n| data[base + n * stride]));
    for n in 0..len {
        let mut acc = 0.0;
        for (k, &tap) in taps.iter().enumerate() {
            let src = clamp_index(n as isize + k as isize - radius as isize, len);
            acc += tap * line[src];
        }
        data[base + n * stride] = acc;
    }
}

/// Smooth a row-major `dims[0] × dims[1] × …` buffer along each axis whose
/// filter is not the identity.
pub fn filter_separable<F: SeparableFilter>(data: &mut [f64], dims: &[usize], filters: &[F]) {
    debug_assert_eq!(dims.len(), filters.len());
    debug_assert_eq!(data.len(), dims.iter().product::<usize>());
    let mut line = Vec::new();
    let mut stride = 1;
    for (axis, filter) in filters.iter().enumerate() {
        let len = dims[axis];
        let taps = filter.taps();
        if taps.len() > 1 && len > 1 {
            let block = stride * len;
            for outer in (0..data.len()).step_by(block) {
                for inner in 0..stride {
                    filter_line(data, outer + inner, stride, len, taps, &mut line);
                }
            }
        }
        stride *= len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_taps_are_normalised_and_symmetric() {
        let g = GaussianFilter::new(1.2);
        let taps = g.taps();
        assert!((taps.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(taps.len(), 2 * g.radius() + 1);
        for k in 0..taps.len() {
            assert!((taps[k] - taps[taps.len() - 1 - k]).abs() < 1e-15);
        }
        assert!(GaussianFilter::new(0.0).is_identity());
    }

    #[test]
    fn constant_buffers_are_preserved() {
        let mut data = vec![3.0; 5 * 4 * 3];
        let filters = [GaussianFilter::new(1.0), GaussianFilter::new(0.0), GaussianFilter::new(2.0)];
        filter_separable(&mut data, &[5, 4, 3], &filters);
        assert!(data.iter().all(|v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn impulse_spreads_along_filtered_axis_only() {
        let mut data = vec![0.0; 7 * 7];
        data[3 + 7 * 3] = 1.0;
        filter_separable(&mut data, &[7, 7], &[GaussianFilter::new(1.0), GaussianFilter::new(0.0)]);
        assert!(data[2 + 7 * 3] > 0.0);
        assert_eq!(data[3 + 7 * 2], 0.0);
        assert!((data.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
