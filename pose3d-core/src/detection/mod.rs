//! detection — person boxes for the rest of the pipeline
//!
//! `Detector` is the capability any object detector provides: one frame in,
//! scored and classed corner boxes out. `filter_person_boxes` then keeps
//! confident, reasonably large people. `OrtDetector` is the bundled
//! YOLOv8-style ONNX implementation.

use anyhow::{ensure, Context, Result};
use fast_image_resize as fr;
use ort::session::Session;
use ort::value::Tensor;
use rayon::prelude::*;
use std::path::Path;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::geometry::{BoundingBox, CornerBox};
use crate::runtime;
use crate::video::RgbFrame;

// ── Public types ─────────────────────────────────────────────────────────────

/// One detector candidate in original-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: CornerBox,
    pub class_id: usize,
    pub score: f32,
}

/// Object detector capability.
pub trait Detector {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>>;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

// ── Box filter ───────────────────────────────────────────────────────────────

/// Keep person detections with `score >= min_score` whose area is strictly
/// more than `min_area_ratio` of the frame, as `(x, y, w, h)` boxes clipped
/// to the frame. Order follows the detector's output order.
pub fn filter_person_boxes(
    detections: &[Detection],
    frame_width: u32,
    frame_height: u32,
    cfg: &DetectionConfig,
) -> Vec<BoundingBox> {
    let frame_area = frame_width as f32 * frame_height as f32;
    if frame_area <= 0.0 {
        return Vec::new();
    }

    detections
        .iter()
        .filter(|d| d.class_id == cfg.person_class_id && d.score >= cfg.min_score)
        .filter(|d| d.bbox.area() / frame_area > cfg.min_area_ratio)
        .filter_map(|d| {
            let clipped = d.bbox.clip(frame_width, frame_height).to_xywh();
            (clipped.width > 0.0 && clipped.height > 0.0).then_some(clipped)
        })
        .collect()
}

// ── ONNX detector ────────────────────────────────────────────────────────────

/// Wraps a YOLOv8-layout ONNX session: input `images` `[1, 3, S, S]`,
/// output `[1, 4 + C, N]` with `(cx, cy, w, h)` followed by class scores.
pub struct OrtDetector {
    session: Session,
    input_size: u32,
    candidate_score: f32,
    nms_iou: f32,
    resizer: fr::Resizer,
    resize_buf: Vec<u8>,
}

impl OrtDetector {
    pub fn load<P: AsRef<Path>>(model_path: P, cfg: &DetectionConfig) -> Result<Self> {
        let session = runtime::build_session(model_path.as_ref(), runtime::default_intra_threads())
            .context("failed to load detector model")?;
        Ok(Self {
            session,
            input_size: cfg.input_size,
            candidate_score: cfg.candidate_score,
            nms_iou: cfg.nms_iou,
            resizer: fr::Resizer::new(),
            resize_buf: vec![0u8; (cfg.input_size * cfg.input_size * 3) as usize],
        })
    }

    fn preprocess(&mut self, frame: &RgbFrame) -> Result<ort::value::DynValue> {
        let size = self.input_size;
        let src = fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
            .context("failed to create detector resize source")?;

        let mut dst = fr::images::Image::from_vec_u8(
            size,
            size,
            std::mem::take(&mut self.resize_buf),
            fr::PixelType::U8x3,
        )
        .context("failed to create detector resize destination")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .context("detector input resize failed")?;

        self.resize_buf = dst.into_vec();
        let raw = &self.resize_buf;

        // NCHW float tensor: [1, 3, S, S].
        let plane = (size * size) as usize;
        let mut tensor_data = vec![0f32; 3 * plane];
        tensor_data
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(c, out)| {
                for (idx, v) in out.iter_mut().enumerate() {
                    *v = raw[idx * 3 + c] as f32 / 255.0;
                }
            });

        let shape = [1usize, 3, size as usize, size as usize];
        Ok(Tensor::from_array((shape, tensor_data.into_boxed_slice()))
            .context("failed to create detector input tensor")?
            .into_dyn())
    }
}

impl Detector for OrtDetector {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        let input_tensor = self.preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input_tensor])
            .context("detector inference failed")?;

        let (shape, data) = runtime::first_output(&outputs)?;
        ensure!(
            shape.len() == 3 && shape[1] > 4,
            "unexpected detector output shape {shape:?}"
        );
        let rows = shape[1] as usize;
        let num_proposals = shape[2] as usize;
        let num_classes = rows - 4;

        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        let candidate_score = self.candidate_score;

        let candidates: Vec<Detection> = (0..num_proposals)
            .into_par_iter()
            .filter_map(|i| {
                // Stored column-major across the rows.
                let cx = data[i];
                let cy = data[num_proposals + i];
                let w = data[2 * num_proposals + i];
                let h = data[3 * num_proposals + i];

                let (class_id, score) = (0..num_classes)
                    .map(|c| (c, data[(4 + c) * num_proposals + i]))
                    .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

                if score < candidate_score {
                    return None;
                }

                Some(Detection {
                    bbox: CornerBox::new(
                        (cx - w / 2.0) * scale_x,
                        (cy - h / 2.0) * scale_y,
                        (cx + w / 2.0) * scale_x,
                        (cy + h / 2.0) * scale_y,
                    ),
                    class_id,
                    score,
                })
            })
            .collect();

        let kept = nms(candidates, self.nms_iou);
        debug!(detections = kept.len(), "detector output");
        Ok(kept)
    }
}

// ── Non-Maximum Suppression ──────────────────────────────────────────────────

/// Greedy class-aware NMS: sort by score descending, suppress same-class
/// boxes that overlap a kept one by more than `iou_thresh`.
pub fn nms(mut detections: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(detections[i]);
        for j in (i + 1)..detections.len() {
            if detections[i].class_id == detections[j].class_id
                && detections[i].bbox.iou(&detections[j].bbox) > iou_thresh
            {
                suppressed[j] = true;
            }
        }
    }

    kept
}
