//! MuCo-3DHP: multi-person composites with camera-space joints.

use anyhow::{bail, ensure, Result};
use nalgebra::Point3;
use std::path::Path;
use tracing::info;

use super::{
    prepare_box, select_persons, AnnotatedPerson, AnnotationFile, AnnotationRecord, DatasetKind,
    TrainingSample,
};
use crate::config::DatasetConfig;
use crate::geometry::{BoundingBox, CameraIntrinsics};

pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
    annotation_path: P,
    image_dir: Q,
    cfg: &DatasetConfig,
) -> Result<Vec<TrainingSample>> {
    let annotation_path = annotation_path.as_ref();
    let file = AnnotationFile::load(annotation_path)?;
    let samples = build_samples(&file, image_dir.as_ref(), cfg)?;
    if samples.is_empty() {
        bail!("no usable MuCo records in {}", annotation_path.display());
    }
    info!(samples = samples.len(), images = file.images.len(), "loaded MuCo annotations");
    Ok(samples)
}

/// Every annotation must carry complete joint arrays; a malformed record
/// fails the whole load instead of silently dropping out of the
/// closest-person selection.
pub fn build_samples(
    file: &AnnotationFile,
    image_dir: &Path,
    cfg: &DatasetConfig,
) -> Result<Vec<TrainingSample>> {
    let kind = DatasetKind::Muco;
    let root_idx = kind.skeleton().root_index();
    let joint_num = kind.skeleton().joint_count();
    let by_image = file.annotations_by_image();

    let mut samples = Vec::new();
    for img in &file.images {
        let Some(anns) = by_image.get(&img.id) else {
            continue;
        };
        let intrinsics = match (img.f, img.c) {
            (Some(f), Some(c)) => Some(CameraIntrinsics::new(f, c)),
            _ => None,
        };

        let persons = anns
            .iter()
            .map(|ann| to_person(ann, joint_num, root_idx, intrinsics))
            .collect::<Result<Vec<AnnotatedPerson>>>()?;

        for pid in select_persons(&persons, cfg.min_separation) {
            let person = &persons[pid];
            let root_cam = person.root_cam;
            if let Some((min_depth, max_depth)) = kind.depth_range() {
                if root_cam.z < min_depth || root_cam.z > max_depth {
                    continue;
                }
            }
            let Some(bbox) = prepare_box(
                [person.bbox.x, person.bbox.y, person.bbox.width, person.bbox.height],
                img.width,
                img.height,
                cfg,
            ) else {
                continue;
            };

            samples.push(TrainingSample {
                img_path: image_dir.join(&img.file_name),
                bbox,
                area: bbox.area(),
                root_img: person.joints_img[root_idx],
                root_cam: Some([root_cam.x, root_cam.y, root_cam.z]),
                root_vis: person.joints_vis[root_idx],
                intrinsics: person.intrinsics,
            });
        }
    }
    Ok(samples)
}

fn to_person(
    ann: &AnnotationRecord,
    joint_num: usize,
    root_idx: usize,
    intrinsics: Option<CameraIntrinsics>,
) -> Result<AnnotatedPerson> {
    ensure!(
        ann.keypoints_cam.len() == joint_num
            && ann.keypoints_img.len() == joint_num
            && ann.keypoints_vis.len() == joint_num,
        "annotation {} of image {}: expected {joint_num} joints, got cam/img/vis = {}/{}/{}",
        ann.id,
        ann.image_id,
        ann.keypoints_cam.len(),
        ann.keypoints_img.len(),
        ann.keypoints_vis.len()
    );
    let cam = ann.keypoints_cam[root_idx];
    Ok(AnnotatedPerson {
        root_cam: Point3::new(cam[0], cam[1], cam[2]),
        // image x/y with the camera depth as z
        joints_img: ann
            .keypoints_img
            .iter()
            .zip(&ann.keypoints_cam)
            .map(|(img, cam)| [img[0], img[1], cam[2]])
            .collect(),
        joints_vis: ann.keypoints_vis.iter().map(|v| v.value()).collect(),
        bbox: BoundingBox::new(ann.bbox[0], ann.bbox[1], ann.bbox[2], ann.bbox[3]),
        intrinsics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ann(image_id: u64, root: [f32; 3], bbox: [f32; 4]) -> serde_json::Value {
        let mut cam = vec![[0.0f32, 0.0, 0.0]; 21];
        cam[14] = root;
        json!({
            "image_id": image_id,
            "bbox": bbox,
            "keypoints_cam": cam,
            "keypoints_img": vec![[100.0f32, 120.0]; 21],
            "keypoints_vis": vec![true; 21],
        })
    }

    fn file(anns: Vec<serde_json::Value>) -> AnnotationFile {
        serde_json::from_value(json!({
            "images": [{
                "id": 7, "file_name": "img.jpg", "width": 640, "height": 480,
                "f": [1500.0, 1500.0], "c": [320.0, 240.0]
            }],
            "annotations": anns,
        }))
        .unwrap()
    }

    #[test]
    fn test_closest_and_separated_people() {
        let f = file(vec![
            ann(7, [2000.0, 0.0, 5000.0], [300.0, 100.0, 80.0, 200.0]),
            ann(7, [0.0, 0.0, 3000.0], [100.0, 100.0, 100.0, 250.0]),
            ann(7, [2100.0, 0.0, 5200.0], [320.0, 100.0, 80.0, 200.0]),
        ]);
        let samples = build_samples(&f, Path::new("data"), &DatasetConfig::default()).unwrap();
        assert_eq!(samples.len(), 1);
        let s = &samples[0];
        assert_eq!(s.root_cam, Some([0.0, 0.0, 3000.0]));
        assert_eq!(s.root_img, [100.0, 120.0, 3000.0]);
        assert_eq!(s.root_vis, 1.0);
        assert_eq!(s.img_path, Path::new("data").join("img.jpg"));
        assert_eq!(s.intrinsics.unwrap().principal, [320.0, 240.0]);
        assert!((s.bbox.width - s.bbox.height).abs() < 1e-3);
    }

    #[test]
    fn test_out_of_range_depth_dropped() {
        let f = file(vec![ann(7, [0.0, 0.0, 9000.0], [100.0, 100.0, 100.0, 250.0])]);
        assert!(build_samples(&f, Path::new("."), &DatasetConfig::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_malformed_record_fails_load() {
        let mut broken = ann(7, [0.0, 0.0, 3000.0], [100.0, 100.0, 100.0, 250.0]);
        broken["keypoints_img"] = json!(vec![[100.0f32, 120.0]; 20]);
        // the well-formed neighbour must not silently become uncontested
        let f = file(vec![broken, ann(7, [100.0, 0.0, 3200.0], [300.0, 100.0, 80.0, 200.0])]);
        let err = build_samples(&f, Path::new("."), &DatasetConfig::default()).unwrap_err();
        assert!(err.to_string().contains("expected 21 joints"));
    }

    #[test]
    fn test_degenerate_box_dropped() {
        let f = file(vec![
            ann(7, [0.0, 0.0, 3000.0], [100.0, 100.0, 0.0, 250.0]),
            ann(7, [3000.0, 0.0, 4000.0], [400.0, 100.0, 60.0, 200.0]),
        ]);
        let samples = build_samples(&f, Path::new("."), &DatasetConfig::default()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].root_cam, Some([3000.0, 0.0, 4000.0]));
    }
}
