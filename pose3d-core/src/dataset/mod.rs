//! dataset — training index preparation
//!
//! Loaders turn COCO-style annotation files into immutable `TrainingSample`
//! records. Multi-person images go through `select_persons`, which keeps the
//! person closest to the camera plus anyone clearly separated from everyone
//! else. Boxes are sanitized and then expanded to a fixed aspect ratio;
//! boxes that fail sanitization are dropped, never repaired.

mod coco;
pub mod mpii;
pub mod muco;

pub use coco::{AnnotationFile, AnnotationRecord, Flag, ImageRecord};

use anyhow::{Context, Result};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::DatasetConfig;
use crate::geometry::{BoundingBox, CameraIntrinsics};
use crate::skeleton::{Skeleton, MPII, MUCO};

/// Supported annotation sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Muco,
    Mpii,
}

impl DatasetKind {
    pub fn skeleton(self) -> &'static Skeleton {
        match self {
            DatasetKind::Muco => &MUCO,
            DatasetKind::Mpii => &MPII,
        }
    }

    /// Valid root depth range in mm; `None` when the dataset has no depth.
    pub fn depth_range(self) -> Option<(f32, f32)> {
        match self {
            DatasetKind::Muco => Some((1500.0, 7500.0)),
            DatasetKind::Mpii => None,
        }
    }

    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        self,
        annotation_path: P,
        image_dir: Q,
        cfg: &DatasetConfig,
    ) -> Result<Vec<TrainingSample>> {
        match self {
            DatasetKind::Muco => muco::load(annotation_path, image_dir, cfg),
            DatasetKind::Mpii => mpii::load(annotation_path, image_dir, cfg),
        }
    }
}

/// One annotated person of a multi-person image.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedPerson {
    /// Root joint in camera space (mm).
    pub root_cam: Point3<f32>,
    /// Per-joint `[x, y, depth]` in image pixels.
    pub joints_img: Vec<[f32; 3]>,
    pub joints_vis: Vec<f32>,
    pub bbox: BoundingBox,
    pub intrinsics: Option<CameraIntrinsics>,
}

/// One entry of the prepared training index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub img_path: PathBuf,
    /// Sanitized, aspect-expanded box.
    pub bbox: BoundingBox,
    pub area: f32,
    /// Root `[x, y, depth]`; depth is 0 when the dataset has none.
    pub root_img: [f32; 3],
    /// Root in camera space; `None` when the dataset has no 3D labels.
    pub root_cam: Option<[f32; 3]>,
    pub root_vis: f32,
    /// `None` when the dataset carries no calibration.
    pub intrinsics: Option<CameraIntrinsics>,
}

/// Indices of the people to keep, closest first, then survivors in input
/// order.
///
/// The person with the smallest root depth is always kept. Every other
/// person is kept only if its root is at least `min_separation` away from
/// every other person's root, both in the X/Y plane and in 3D.
pub fn select_persons(persons: &[AnnotatedPerson], min_separation: f32) -> Vec<usize> {
    let roots: Vec<Point3<f32>> = persons.iter().map(|p| p.root_cam).collect();
    select_by_roots(&roots, min_separation)
}

pub fn select_by_roots(roots: &[Point3<f32>], min_separation: f32) -> Vec<usize> {
    let Some(closest) = roots
        .iter()
        .enumerate()
        .fold(None::<(usize, f32)>, |best, (i, r)| match best {
            Some((_, z)) if z <= r.z => best,
            _ => Some((i, r.z)),
        })
        .map(|(i, _)| i)
    else {
        return Vec::new();
    };

    let mut picked = vec![closest];
    for (i, ri) in roots.iter().enumerate() {
        if i == closest {
            continue;
        }
        let contested = roots.iter().enumerate().any(|(j, rj)| {
            if i == j {
                return false;
            }
            let d = ri - rj;
            let dist_2d = d.xy().norm();
            let dist_3d = d.norm();
            dist_2d < min_separation || dist_3d < min_separation
        });
        if !contested {
            picked.push(i);
        }
    }
    picked
}

/// Sanitize an annotated `[x, y, w, h]` box and expand it to the training
/// aspect ratio. `None` means the box is dropped.
pub fn prepare_box(
    raw: [f32; 4],
    image_width: u32,
    image_height: u32,
    cfg: &DatasetConfig,
) -> Option<BoundingBox> {
    let sanitized = BoundingBox::new(raw[0], raw[1], raw[2], raw[3]).sanitize(image_width, image_height)?;
    let expanded = sanitized.expand_to_aspect(cfg.aspect_ratio, cfg.box_expansion);
    (expanded.area() > 0.0).then_some(expanded)
}

/// Write the prepared index as pretty JSON.
pub fn write_index<P: AsRef<Path>>(samples: &[TrainingSample], path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create index: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, samples).context("failed to serialize index")?;
    writer.flush().context("failed to flush index")?;
    info!(path = %path.display(), samples = samples.len(), "wrote training index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32, z: f32) -> Point3<f32> {
        Point3::new(x, y, z)
    }

    #[test]
    fn test_single_person_is_kept() {
        assert_eq!(select_by_roots(&[p(0.0, 0.0, 9000.0)], 500.0), vec![0]);
    }

    #[test]
    fn test_empty_input() {
        assert!(select_by_roots(&[], 500.0).is_empty());
    }

    #[test]
    fn test_closest_always_kept() {
        // everyone is within 100mm of everyone else
        let roots = [p(0.0, 0.0, 4000.0), p(50.0, 0.0, 3000.0), p(0.0, 50.0, 3500.0)];
        assert_eq!(select_by_roots(&roots, 500.0), vec![1]);
    }

    #[test]
    fn test_2d_violation_alone_rejects() {
        // 2D distance 400, 3D distance sqrt(400² + 447.2²) ≈ 600
        let dz = (600.0f32 * 600.0 - 400.0 * 400.0).sqrt();
        let roots = [p(0.0, 0.0, 3000.0), p(400.0, 0.0, 3000.0 + dz)];
        let d = roots[1] - roots[0];
        assert!((d.norm() - 600.0).abs() < 1e-2);
        assert_eq!(select_by_roots(&roots, 500.0), vec![0]);
    }

    #[test]
    fn test_well_separated_people_kept_in_order() {
        let roots = [
            p(2000.0, 0.0, 5000.0),
            p(0.0, 0.0, 3000.0),
            p(-2000.0, 0.0, 6000.0),
        ];
        assert_eq!(select_by_roots(&roots, 500.0), vec![1, 0, 2]);
    }

    #[test]
    fn test_third_person_can_reject_second_closest() {
        // person 1 is far from the closest but close to person 2
        let roots = [
            p(0.0, 0.0, 3000.0),
            p(2000.0, 0.0, 3500.0),
            p(2200.0, 0.0, 6000.0),
        ];
        assert_eq!(select_by_roots(&roots, 500.0), vec![0]);
    }

    #[test]
    fn test_depth_tie_picks_first() {
        let roots = [p(0.0, 0.0, 3000.0), p(5000.0, 0.0, 3000.0)];
        assert_eq!(select_by_roots(&roots, 500.0), vec![0, 1]);
    }

    #[test]
    fn test_prepare_box_square() {
        let cfg = DatasetConfig::default();
        let b = prepare_box([0.0, 0.0, 101.0, 51.0], 640, 480, &cfg).unwrap();
        assert!((b.width - b.height).abs() < 1e-4);
        assert!((b.width - 125.0).abs() < 1e-4);
        assert!(prepare_box([0.0, 0.0, 0.0, 10.0], 640, 480, &cfg).is_none());
    }
}
