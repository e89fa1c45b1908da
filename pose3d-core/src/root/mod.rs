//! root — pelvis location and depth per person
//!
//! The root model predicts, per patch, a position on its fixed output grid
//! plus an absolute depth. `to_image_space` rescales the grid position into
//! the person's crop window and offsets it into frame pixels. Converting to
//! camera space is a separate, explicit step.

use anyhow::{ensure, Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::RootConfig;
use crate::geometry::{BoundingBox, CameraIntrinsics};
use crate::patch::{stack_patches, Patch, PersonCandidate};
use crate::runtime;

/// Root model output for one person, in output-grid space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRoot {
    pub x: f32,
    pub y: f32,
    pub depth: f32,
}

/// Pelvis position in frame pixels plus camera depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootEstimate {
    pub image_x: f32,
    pub image_y: f32,
    pub depth: f32,
    /// Camera-space `[X, Y, Z]`, present only after `with_camera`.
    pub camera: Option<[f32; 3]>,
}

impl RootEstimate {
    /// Attach the camera-space position of this root.
    pub fn with_camera(self, intrinsics: &CameraIntrinsics) -> Self {
        let p = intrinsics.pixel_to_camera(self.image_x, self.image_y, self.depth);
        Self {
            camera: Some([p.x, p.y, p.z]),
            ..self
        }
    }
}

/// Root-depth model capability: a batch of patches with their depth priors
/// in, one raw root per patch out.
pub trait RootEstimator {
    fn infer(&mut self, patches: &[Patch], depth_priors: &[f32]) -> Result<Vec<RawRoot>>;
}

impl<T: RootEstimator + ?Sized> RootEstimator for Box<T> {
    fn infer(&mut self, patches: &[Patch], depth_priors: &[f32]) -> Result<Vec<RawRoot>> {
        (**self).infer(patches, depth_priors)
    }
}

/// Map raw roots back into frame pixels. `raw[i]` is paired with
/// `boxes[i]` and nothing else.
pub fn to_image_space(
    raw: &[RawRoot],
    boxes: &[BoundingBox],
    cfg: &RootConfig,
) -> Result<Vec<RootEstimate>> {
    ensure!(
        raw.len() == boxes.len(),
        "root output count {} does not match box count {}",
        raw.len(),
        boxes.len()
    );
    let out_w = cfg.output_width as f32;
    let out_h = cfg.output_height as f32;
    Ok(raw
        .iter()
        .zip(boxes)
        .map(|(r, b)| RootEstimate {
            image_x: r.x / out_w * b.width + b.x,
            image_y: r.y / out_h * b.height + b.y,
            depth: r.depth,
            camera: None,
        })
        .collect())
}

/// Run the root model over `candidates` and map the result into frame space.
pub fn estimate_roots<R: RootEstimator + ?Sized>(
    model: &mut R,
    candidates: &[PersonCandidate],
    cfg: &RootConfig,
) -> Result<Vec<RootEstimate>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let patches: Vec<Patch> = candidates.iter().map(|c| c.patch.clone()).collect();
    let priors: Vec<f32> = candidates.iter().map(|c| c.depth_prior).collect();
    let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();

    let raw = model.infer(&patches, &priors)?;
    to_image_space(&raw, &boxes, cfg)
}

// ── ONNX root model ──────────────────────────────────────────────────────────

/// RootNet exported to ONNX: inputs `image` `[N, 3, H, W]` and `k_value`
/// `[N, 1]`, output `[N, 3]` as `(x, y, depth)`.
pub struct OrtRootNet {
    session: Session,
}

impl OrtRootNet {
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let session = runtime::build_session(model_path.as_ref(), runtime::default_intra_threads())
            .context("failed to load root model")?;
        Ok(Self { session })
    }
}

impl RootEstimator for OrtRootNet {
    fn infer(&mut self, patches: &[Patch], depth_priors: &[f32]) -> Result<Vec<RawRoot>> {
        ensure!(
            patches.len() == depth_priors.len(),
            "{} patches but {} depth priors",
            patches.len(),
            depth_priors.len()
        );
        let (shape, data) = stack_patches(patches)?;
        let image = Tensor::from_array((shape, data.into_boxed_slice()))
            .context("failed to create root input tensor")?;
        let k_value = Tensor::from_array((
            [depth_priors.len(), 1usize],
            depth_priors.to_vec().into_boxed_slice(),
        ))
        .context("failed to create k_value tensor")?;

        let outputs = self
            .session
            .run(ort::inputs!["image" => image, "k_value" => k_value])
            .context("root inference failed")?;
        let (out_shape, out) = runtime::first_output(&outputs)?;
        ensure!(
            out.len() == patches.len() * 3,
            "unexpected root output shape {out_shape:?} for {} people",
            patches.len()
        );

        Ok(out
            .chunks_exact(3)
            .map(|v| RawRoot {
                x: v[0],
                y: v[1],
                depth: v[2],
            })
            .collect())
    }
}
