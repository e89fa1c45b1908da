//! pose — full-body 3D joints per person
//!
//! The pose model sees the same patches as the root model and predicts each
//! joint on a volumetric grid: x/y on the output grid, z as a depth bin
//! relative to the root. `estimate_poses` turns those into frame pixels and
//! absolute depth using the person's crop window and root estimate.

use anyhow::{ensure, Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::PoseConfig;
use crate::geometry::{BoundingBox, CameraIntrinsics};
use crate::patch::{stack_patches, Patch};
use crate::root::RootEstimate;
use crate::runtime;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One person's pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub root: RootEstimate,
    /// Frame-pixel x/y and absolute depth z, in skeleton order.
    pub joints: Vec<Joint>,
    /// Camera-space joints, present only when intrinsics were supplied.
    pub camera_joints: Option<Vec<Joint>>,
}

impl PoseEstimate {
    /// Attach camera-space coordinates for the root and every joint.
    pub fn with_camera(self, intrinsics: &CameraIntrinsics) -> Self {
        let camera_joints = self
            .joints
            .iter()
            .map(|j| {
                let p = intrinsics.pixel_to_camera(j.x, j.y, j.z);
                Joint {
                    x: p.x,
                    y: p.y,
                    z: p.z,
                }
            })
            .collect();
        Self {
            root: self.root.with_camera(intrinsics),
            camera_joints: Some(camera_joints),
            ..self
        }
    }
}

/// Pose model capability: a batch of patches plus each person's root depth
/// in, per-person raw `[x, y, z]` joints on the output grid out.
pub trait PoseEstimator {
    fn infer(&mut self, patches: &[Patch], root_depths: &[f32]) -> Result<Vec<Vec<[f32; 3]>>>;
}

impl<T: PoseEstimator + ?Sized> PoseEstimator for Box<T> {
    fn infer(&mut self, patches: &[Patch], root_depths: &[f32]) -> Result<Vec<Vec<[f32; 3]>>> {
        (**self).infer(patches, root_depths)
    }
}

/// Run the pose model for every person and map the joints into frame space.
///
/// `boxes`, `patches` and `roots` must be index-aligned; a length mismatch is
/// a programming error and fails the call.
pub fn estimate_poses<P: PoseEstimator + ?Sized>(
    model: &mut P,
    boxes: &[BoundingBox],
    patches: &[Patch],
    roots: &[RootEstimate],
    cfg: &PoseConfig,
) -> Result<Vec<PoseEstimate>> {
    ensure!(
        boxes.len() == patches.len() && patches.len() == roots.len(),
        "misaligned pose inputs: {} boxes, {} patches, {} roots",
        boxes.len(),
        patches.len(),
        roots.len()
    );
    if boxes.is_empty() {
        return Ok(Vec::new());
    }

    let root_depths: Vec<f32> = roots.iter().map(|r| r.depth).collect();
    let raw = model.infer(patches, &root_depths)?;
    ensure!(
        raw.len() == boxes.len(),
        "pose model returned {} people for {} inputs",
        raw.len(),
        boxes.len()
    );

    boxes
        .iter()
        .zip(roots)
        .zip(raw)
        .map(|((bbox, root), joints)| {
            ensure!(
                joints.len() == cfg.joint_num,
                "pose model returned {} joints, expected {}",
                joints.len(),
                cfg.joint_num
            );
            Ok(PoseEstimate {
                root: *root,
                joints: joints
                    .iter()
                    .map(|j| grid_to_frame(j, bbox, root.depth, cfg))
                    .collect(),
                camera_joints: None,
            })
        })
        .collect()
}

/// Output-grid joint → frame pixels plus absolute depth.
fn grid_to_frame(raw: &[f32; 3], bbox: &BoundingBox, root_depth: f32, cfg: &PoseConfig) -> Joint {
    let out_w = cfg.output_width as f32;
    let out_h = cfg.output_height as f32;
    let depth_dim = cfg.depth_dim as f32;
    Joint {
        x: raw[0] / out_w * bbox.width + bbox.x,
        y: raw[1] / out_h * bbox.height + bbox.y,
        z: (raw[2] / depth_dim * 2.0 - 1.0) * (cfg.bbox_3d_depth / 2.0) + root_depth,
    }
}

// ── ONNX pose model ──────────────────────────────────────────────────────────

/// PoseNet exported to ONNX: input `image` `[N, 3, H, W]`, output
/// `[N, J, 3]`. The root depth is applied afterwards in `estimate_poses`.
pub struct OrtPoseNet {
    session: Session,
    joint_num: usize,
}

impl OrtPoseNet {
    pub fn load<P: AsRef<Path>>(model_path: P, cfg: &PoseConfig) -> Result<Self> {
        let session = runtime::build_session(model_path.as_ref(), runtime::default_intra_threads())
            .context("failed to load pose model")?;
        Ok(Self {
            session,
            joint_num: cfg.joint_num,
        })
    }
}

impl PoseEstimator for OrtPoseNet {
    fn infer(&mut self, patches: &[Patch], _root_depths: &[f32]) -> Result<Vec<Vec<[f32; 3]>>> {
        let (shape, data) = stack_patches(patches)?;
        let image = Tensor::from_array((shape, data.into_boxed_slice()))
            .context("failed to create pose input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs!["image" => image])
            .context("pose inference failed")?;
        let (out_shape, out) = runtime::first_output(&outputs)?;
        let per_person = self.joint_num * 3;
        ensure!(
            out.len() == patches.len() * per_person,
            "unexpected pose output shape {out_shape:?} for {} people",
            patches.len()
        );

        Ok(out
            .chunks_exact(per_person)
            .map(|person| {
                person
                    .chunks_exact(3)
                    .map(|j| [j[0], j[1], j[2]])
                    .collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstPose {
        joints: usize,
        calls: usize,
    }

    impl PoseEstimator for ConstPose {
        fn infer(&mut self, patches: &[Patch], _root_depths: &[f32]) -> Result<Vec<Vec<[f32; 3]>>> {
            self.calls += 1;
            Ok(patches
                .iter()
                .map(|_| vec![[32.0, 32.0, 32.0]; self.joints])
                .collect())
        }
    }

    fn patch() -> Patch {
        Patch {
            width: 1,
            height: 1,
            data: vec![0.0; 3],
        }
    }

    fn root(depth: f32) -> RootEstimate {
        RootEstimate {
            image_x: 0.0,
            image_y: 0.0,
            depth,
            camera: None,
        }
    }

    #[test]
    fn test_joint_mapping() {
        let cfg = PoseConfig {
            joint_num: 2,
            ..PoseConfig::default()
        };
        let mut model = ConstPose { joints: 2, calls: 0 };
        let boxes = [BoundingBox::new(100.0, 200.0, 64.0, 128.0)];
        let out = estimate_poses(&mut model, &boxes, &[patch()], &[root(4000.0)], &cfg).unwrap();
        assert_eq!(out.len(), 1);
        let j = out[0].joints[0];
        assert_eq!(j.x, 132.0);
        assert_eq!(j.y, 264.0);
        // middle depth bin sits on the root
        assert_eq!(j.z, 4000.0);
        assert!(out[0].camera_joints.is_none());
    }

    #[test]
    fn test_misaligned_inputs_fail() {
        let cfg = PoseConfig::default();
        let mut model = ConstPose { joints: 21, calls: 0 };
        let boxes = [BoundingBox::new(0.0, 0.0, 10.0, 10.0); 2];
        let err = estimate_poses(&mut model, &boxes, &[patch()], &[root(1.0), root(2.0)], &cfg);
        assert!(err.is_err());
        assert_eq!(model.calls, 0);
    }

    #[test]
    fn test_wrong_joint_count_fails() {
        let cfg = PoseConfig::default();
        let mut model = ConstPose { joints: 17, calls: 0 };
        let boxes = [BoundingBox::new(0.0, 0.0, 10.0, 10.0)];
        assert!(estimate_poses(&mut model, &boxes, &[patch()], &[root(1.0)], &cfg).is_err());
    }

    #[test]
    fn test_order_preserved() {
        let cfg = PoseConfig {
            joint_num: 1,
            ..PoseConfig::default()
        };
        let mut model = ConstPose { joints: 1, calls: 0 };
        let boxes = [
            BoundingBox::new(0.0, 0.0, 64.0, 64.0),
            BoundingBox::new(500.0, 0.0, 64.0, 64.0),
        ];
        let out = estimate_poses(
            &mut model,
            &boxes,
            &[patch(), patch()],
            &[root(3000.0), root(6000.0)],
            &cfg,
        )
        .unwrap();
        assert_eq!(model.calls, 1);
        assert_eq!(out[0].joints[0].x, 32.0);
        assert_eq!(out[1].joints[0].x, 532.0);
        assert_eq!(out[1].root.depth, 6000.0);
    }

    #[test]
    fn test_camera_joints() {
        let k = CameraIntrinsics::new([1000.0, 1000.0], [0.0, 0.0]);
        let pose = PoseEstimate {
            root: root(2000.0),
            joints: vec![Joint { x: 100.0, y: 50.0, z: 2000.0 }],
            camera_joints: None,
        }
        .with_camera(&k);
        let cam = pose.camera_joints.unwrap();
        assert_eq!(cam[0], Joint { x: 200.0, y: 100.0, z: 2000.0 });
        assert_eq!(pose.root.camera, Some([0.0, 0.0, 2000.0]));
    }
}
