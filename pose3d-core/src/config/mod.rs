//! config — explicit pipeline configuration
//!
//! Every stage takes its section of `PipelineConfig` as an argument; nothing
//! reads thresholds from global state. Missing keys in a TOML file fall back
//! to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::geometry::CameraIntrinsics;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(default)]
    pub root: RootConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    /// Camera intrinsics. When absent, results stay in image space.
    #[serde(default)]
    pub camera: Option<CameraConfig>,
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Intrinsics for a frame of the given size, if a camera is configured.
    pub fn intrinsics_for(&self, width: u32, height: u32) -> Option<CameraIntrinsics> {
        self.camera.as_ref().map(|c| c.intrinsics(width, height))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// COCO category of "person".
    #[serde(default = "default_person_class")]
    pub person_class_id: usize,
    /// Score floor used by the detector itself when generating candidates.
    #[serde(default = "default_candidate_score")]
    pub candidate_score: f32,
    /// Score floor applied to person candidates.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Boxes whose area ratio to the frame is at or below this are dropped.
    #[serde(default = "default_min_area_ratio")]
    pub min_area_ratio: f32,
    /// IoU threshold for detector-side NMS.
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f32,
    /// Square detector input size.
    #[serde(default = "default_detector_input")]
    pub input_size: u32,
}

fn default_person_class() -> usize { 0 }
fn default_candidate_score() -> f32 { 0.5 }
fn default_min_score() -> f32 { 0.9 }
fn default_min_area_ratio() -> f32 { 0.01 }
fn default_nms_iou() -> f32 { 0.45 }
fn default_detector_input() -> u32 { 640 }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            person_class_id: default_person_class(),
            candidate_score: default_candidate_score(),
            min_score: default_min_score(),
            min_area_ratio: default_min_area_ratio(),
            nms_iou: default_nms_iou(),
            input_size: default_detector_input(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    #[serde(default = "default_input_side")]
    pub input_width: u32,
    #[serde(default = "default_input_side")]
    pub input_height: u32,
    /// Per-channel (RGB) mean of `[0, 1]` pixel values.
    #[serde(default = "default_pixel_mean")]
    pub pixel_mean: [f32; 3],
    #[serde(default = "default_pixel_std")]
    pub pixel_std: [f32; 3],
    /// Assumed real-world box size (width, height) in millimetres.
    #[serde(default = "default_bbox_real")]
    pub bbox_real: [f32; 2],
    /// Extra scale applied to the aspect-corrected crop window.
    #[serde(default = "default_box_scale")]
    pub box_scale: f32,
}

fn default_input_side() -> u32 { 256 }
fn default_pixel_mean() -> [f32; 3] { [0.485, 0.456, 0.406] }
fn default_pixel_std() -> [f32; 3] { [0.229, 0.224, 0.225] }
fn default_bbox_real() -> [f32; 2] { [2000.0, 2000.0] }
fn default_box_scale() -> f32 { 1.0 }

impl PatchConfig {
    pub fn aspect_ratio(&self) -> f32 {
        self.input_width as f32 / self.input_height as f32
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            input_width: default_input_side(),
            input_height: default_input_side(),
            pixel_mean: default_pixel_mean(),
            pixel_std: default_pixel_std(),
            bbox_real: default_bbox_real(),
            box_scale: default_box_scale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default = "default_output_side")]
    pub output_width: u32,
    #[serde(default = "default_output_side")]
    pub output_height: u32,
}

fn default_output_side() -> u32 { 64 }

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            output_width: default_output_side(),
            output_height: default_output_side(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_output_side")]
    pub output_width: u32,
    #[serde(default = "default_output_side")]
    pub output_height: u32,
    /// Number of depth bins in the pose model's volumetric output.
    #[serde(default = "default_output_side")]
    pub depth_dim: u32,
    /// Depth extent (mm) covered by the depth bins, centred on the root.
    #[serde(default = "default_bbox_3d_depth")]
    pub bbox_3d_depth: f32,
    #[serde(default = "default_joint_num")]
    pub joint_num: usize,
}

fn default_bbox_3d_depth() -> f32 { 2000.0 }
fn default_joint_num() -> usize { 21 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            output_width: default_output_side(),
            output_height: default_output_side(),
            depth_dim: default_output_side(),
            bbox_3d_depth: default_bbox_3d_depth(),
            joint_num: default_joint_num(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Focal length (fx, fy) in pixels.
    pub focal: [f32; 2],
    /// Principal point; the frame centre when omitted.
    #[serde(default)]
    pub principal: Option<[f32; 2]>,
}

impl CameraConfig {
    pub fn intrinsics(&self, width: u32, height: u32) -> CameraIntrinsics {
        match self.principal {
            Some(principal) => CameraIntrinsics::new(self.focal, principal),
            None => CameraIntrinsics::centered(self.focal, width, height),
        }
    }
}

/// Dataset preparation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Target `width / height` of training boxes.
    #[serde(default = "default_dataset_aspect")]
    pub aspect_ratio: f32,
    #[serde(default = "default_box_expansion")]
    pub box_expansion: f32,
    /// Minimum root separation (mm) between a kept person and anyone else.
    #[serde(default = "default_min_separation")]
    pub min_separation: f32,
}

fn default_dataset_aspect() -> f32 { 1.0 }
fn default_box_expansion() -> f32 { 1.25 }
fn default_min_separation() -> f32 { 500.0 }

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: default_dataset_aspect(),
            box_expansion: default_box_expansion(),
            min_separation: default_min_separation(),
        }
    }
}
