//! I/O helpers for planes, volumes and JSON.
//!
//! - `save_plane_png`: write a `Plane<f64>` to a grayscale PNG, rescaled to its range.
//! - `save_volume_planes`: dump every z-plane of a volume as numbered PNGs.
//! - `write_json_file`: pretty JSON on disk.
use super::{Plane, Volume};
use image::{GrayImage, Luma};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Save a plane to a grayscale PNG, mapping `[min, max]` onto `[0, 255]`.
pub fn save_plane_png(plane: &Plane<f64>, path: &Path) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let (lo, hi) = plane
        .data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if hi > lo { hi - lo } else { 1.0 };
    let mut out = GrayImage::new(plane.w as u32, plane.h as u32);
    for y in 0..plane.h {
        let row = plane.row(y);
        for (x, &px) in row.iter().enumerate() {
            let v = ((px - lo) / range * 255.0).clamp(0.0, 255.0);
            out.put_pixel(x as u32, y as u32, Luma([v as u8]));
        }
    }
    out.save(path)
        .map_err(|e| format!("Failed to save {}: {e}", path.display()))
}

/// Save each z-plane of `volume` as `<dir>/<prefix>_<k>.png`.
pub fn save_volume_planes(volume: &Volume, dir: &Path, prefix: &str) -> Result<(), String> {
    fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
    for k in 0..volume.size[2] {
        let path = dir.join(format!("{prefix}_{k:03}.png"));
        save_plane_png(&volume.plane_z(k), &path)?;
    }
    Ok(())
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON for {}: {e}", path.display()))?;
    fs::write(path, json).map_err(|e| format!("Failed to write JSON {}: {e}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_export_spans_the_full_range() {
        let dir = std::env::temp_dir().join(format!("slice_srr_io_{}", std::process::id()));
        let path = dir.join("ramp.png");
        let plane = Plane::from_vec(4, 2, vec![-1.0, 0.0, 1.0, 3.0, 3.0, 1.0, 0.0, -1.0]).unwrap();
        save_plane_png(&plane, &path).unwrap();
        let loaded = image::open(&path).unwrap().into_luma8();
        assert_eq!(loaded.dimensions(), (4, 2));
        assert_eq!(loaded.get_pixel(0, 0)[0], 0);
        assert_eq!(loaded.get_pixel(3, 0)[0], 255);

        let json = dir.join("plane.json");
        write_json_file(&json, &plane.data).unwrap();
        let back: Vec<f64> = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(back, plane.data);
        let _ = fs::remove_dir_all(&dir);
    }
}
