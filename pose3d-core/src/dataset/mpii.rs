//! MPII: single-view 2D keypoints, no depth and no calibration.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::{prepare_box, AnnotationFile, AnnotationRecord, DatasetKind, ImageRecord, TrainingSample};
use crate::config::DatasetConfig;

pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
    annotation_path: P,
    image_dir: Q,
    cfg: &DatasetConfig,
) -> Result<Vec<TrainingSample>> {
    let annotation_path = annotation_path.as_ref();
    let file = AnnotationFile::load(annotation_path)?;
    let samples = build_samples(&file, image_dir.as_ref(), cfg);
    if samples.is_empty() {
        bail!("no usable MPII records in {}", annotation_path.display());
    }
    info!(
        samples = samples.len(),
        annotations = file.annotations.len(),
        "loaded MPII annotations"
    );
    Ok(samples)
}

/// One sample per usable annotation, in file order.
pub fn build_samples(file: &AnnotationFile, image_dir: &Path, cfg: &DatasetConfig) -> Vec<TrainingSample> {
    let skeleton = DatasetKind::Mpii.skeleton();
    let root_idx = skeleton.root_index();
    let joint_num = skeleton.joint_count();
    let images: HashMap<u64, &ImageRecord> = file.images.iter().map(|img| (img.id, img)).collect();

    let mut skipped = 0usize;
    let mut samples = Vec::new();
    for ann in &file.annotations {
        let Some(img) = images.get(&ann.image_id) else {
            skipped += 1;
            continue;
        };
        if !usable(ann) {
            skipped += 1;
            continue;
        }
        let Some(keypoints) = ann.keypoints.get(..joint_num * 3) else {
            skipped += 1;
            continue;
        };
        let Some(bbox) = prepare_box(ann.bbox, img.width, img.height, cfg) else {
            skipped += 1;
            continue;
        };

        let root = &keypoints[root_idx * 3..root_idx * 3 + 3];
        samples.push(TrainingSample {
            img_path: image_dir.join(&img.file_name),
            bbox,
            area: bbox.area(),
            root_img: [root[0], root[1], 0.0],
            root_cam: None,
            root_vis: root[2],
            intrinsics: None,
        });
    }
    if skipped > 0 {
        debug!(skipped, "MPII annotations skipped");
    }
    samples
}

fn usable(ann: &AnnotationRecord) -> bool {
    if ann.iscrowd.is_some_and(|f| f.is_set()) || ann.num_keypoints == Some(0) {
        return false;
    }
    ann.area.map_or(true, |a| a > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keypoints(root: [f32; 3]) -> Vec<f32> {
        let mut kp = vec![50.0f32; 16 * 3];
        kp[18..21].copy_from_slice(&root);
        kp
    }

    fn file(anns: serde_json::Value) -> AnnotationFile {
        serde_json::from_value(json!({
            "images": [{"id": 1, "file_name": "mpii/a.jpg", "width": 400, "height": 300}],
            "annotations": anns,
        }))
        .unwrap()
    }

    #[test]
    fn test_sample_has_no_depth_or_camera() {
        let f = file(json!([{
            "image_id": 1, "bbox": [10, 20, 100, 200], "area": 20000,
            "iscrowd": 0, "num_keypoints": 16, "keypoints": keypoints([60.0, 90.0, 1.0]),
        }]));
        let samples = build_samples(&f, Path::new("root"), &DatasetConfig::default());
        assert_eq!(samples.len(), 1);
        let s = &samples[0];
        assert_eq!(s.root_img, [60.0, 90.0, 0.0]);
        assert_eq!(s.root_vis, 1.0);
        assert!(s.root_cam.is_none());
        assert!(s.intrinsics.is_none());
        assert_eq!(s.img_path, Path::new("root").join("mpii/a.jpg"));
        assert!((s.bbox.width - s.bbox.height).abs() < 1e-3);
    }

    #[test]
    fn test_unusable_annotations_skipped() {
        let kp = keypoints([60.0, 90.0, 1.0]);
        let f = file(json!([
            {"image_id": 9, "bbox": [10, 20, 100, 200], "area": 1, "keypoints": kp},
            {"image_id": 1, "bbox": [10, 20, 100, 200], "area": 1, "iscrowd": true, "keypoints": kp},
            {"image_id": 1, "bbox": [10, 20, 100, 200], "area": 1, "num_keypoints": 0, "keypoints": kp},
            {"image_id": 1, "bbox": [10, 20, 100, 200], "area": 0, "keypoints": kp},
            {"image_id": 1, "bbox": [10, 20, 100, 200], "area": 1, "keypoints": [1, 2, 3]},
            {"image_id": 1, "bbox": [10, 20, 0, 200], "area": 1, "keypoints": kp},
        ]));
        assert!(build_samples(&f, Path::new("."), &DatasetConfig::default()).is_empty());
    }

    #[test]
    fn test_load_rejects_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{"images": [], "annotations": []}"#).unwrap();
        assert!(load(&path, dir.path(), &DatasetConfig::default()).is_err());
    }
}
