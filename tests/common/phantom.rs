use slice_srr::image::Volume;
use slice_srr::synthetic::{phantom, Blob, PhantomConfig};
use slice_srr::Transform;

/// Asymmetric blob phantom that decays to zero at the grid border.
pub fn compact_phantom(n: usize, spacing: f64) -> Volume {
    let blob = |center, radii, amplitude| Blob {
        center,
        radii,
        amplitude,
    };
    phantom(&PhantomConfig {
        size: [n, n, n],
        spacing,
        blobs: vec![
            blob([0.5, 0.5, 0.5], [0.14, 0.11, 0.12], 1.0),
            blob([0.40, 0.55, 0.58], [0.05, 0.07, 0.04], 0.9),
            blob([0.62, 0.42, 0.45], [0.04, 0.04, 0.07], 0.7),
            blob([0.52, 0.64, 0.40], [0.06, 0.03, 0.03], 0.6),
        ],
    })
    .expect("phantom")
}

/// `moving(p) = fixed(T(p))` on the grid of `fixed`.
pub fn resample_through(fixed: &Volume, t: &Transform) -> Volume {
    let [nx, ny, _] = fixed.size;
    let data = (0..fixed.len())
        .map(|n| {
            let (i, j, k) = (n % nx, (n / nx) % ny, n / (nx * ny));
            fixed.sample_physical(&t.apply_point(&fixed.voxel_center(i, j, k)))
        })
        .collect();
    fixed.with_data(data)
}

pub fn rmse(a: &Volume, b: &Volume) -> f64 {
    let sq: f64 = a.data.iter().zip(&b.data).map(|(x, y)| (x - y) * (x - y)).sum();
    (sq / a.len().max(1) as f64).sqrt()
}
