//! patch — per-person crops for the root and pose models
//!
//! Each person box is turned into a crop window with the model's input
//! aspect ratio, sampled out of the frame (zero outside the frame), resized
//! to the model input, and normalized channel-wise into a CHW float buffer.
//! The depth prior `k` is derived from the detected box itself, not the
//! window.

use anyhow::{ensure, Context, Result};
use fast_image_resize as fr;
use rayon::prelude::*;

use crate::config::PatchConfig;
use crate::geometry::BoundingBox;
use crate::video::RgbFrame;

/// Normalized CHW model input for one person.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub width: u32,
    pub height: u32,
    /// `3 × height × width` values, channel-major (R, G, B planes).
    pub data: Vec<f32>,
}

impl Patch {
    pub fn plane_len(&self) -> usize {
        (self.width * self.height) as usize
    }
}

/// A detected person ready for the root model.
#[derive(Debug, Clone)]
pub struct PersonCandidate {
    /// The frame window the patch was sampled from.
    pub bbox: BoundingBox,
    pub patch: Patch,
    pub depth_prior: f32,
}

/// Build one candidate per box, in box order.
pub fn extract_candidates(
    frame: &RgbFrame,
    boxes: &[BoundingBox],
    cfg: &PatchConfig,
) -> Result<Vec<PersonCandidate>> {
    ensure!(
        cfg.input_width > 0 && cfg.input_height > 0,
        "patch input size must be positive"
    );
    boxes
        .par_iter()
        .map(|bbox| extract_candidate(frame, bbox, cfg))
        .collect()
}

fn extract_candidate(
    frame: &RgbFrame,
    bbox: &BoundingBox,
    cfg: &PatchConfig,
) -> Result<PersonCandidate> {
    let window = crop_window(bbox, cfg);
    let patch = sample_patch(frame, &window, cfg)?;
    let depth_prior = depth_prior(bbox, frame.width, frame.height, cfg.bbox_real);
    Ok(PersonCandidate {
        bbox: window,
        patch,
        depth_prior,
    })
}

/// Aspect-corrected crop window around `bbox`, snapped to whole pixels.
pub fn crop_window(bbox: &BoundingBox, cfg: &PatchConfig) -> BoundingBox {
    let expanded = bbox.expand_to_aspect(cfg.aspect_ratio(), cfg.box_scale);
    let x = expanded.x.round();
    let y = expanded.y.round();
    let width = expanded.width.round().max(1.0);
    let height = expanded.height.round().max(1.0);
    BoundingBox::new(x, y, width, height)
}

/// Scale cue: `sqrt(real_w * real_h * (W/2) * (H/2) / (w * h))`.
///
/// Smaller boxes for the same real-world size mean a more distant person.
pub fn depth_prior(bbox: &BoundingBox, frame_width: u32, frame_height: u32, bbox_real: [f32; 2]) -> f32 {
    let half_w = frame_width as f32 / 2.0;
    let half_h = frame_height as f32 / 2.0;
    let area = bbox.area().max(f32::EPSILON);
    (bbox_real[0] * bbox_real[1] * half_w * half_h / area).sqrt()
}

fn sample_patch(frame: &RgbFrame, window: &BoundingBox, cfg: &PatchConfig) -> Result<Patch> {
    let win_w = window.width as u32;
    let win_h = window.height as u32;
    let crop = copy_window(frame, window.x as i64, window.y as i64, win_w, win_h);

    let src = fr::images::ImageRef::new(win_w, win_h, &crop, fr::PixelType::U8x3)
        .context("failed to create patch resize source")?;
    let mut dst = fr::images::Image::new(cfg.input_width, cfg.input_height, fr::PixelType::U8x3);

    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("patch resize failed")?;

    Ok(normalize(
        dst.buffer(),
        cfg.input_width,
        cfg.input_height,
        cfg.pixel_mean,
        cfg.pixel_std,
    ))
}

/// Copy a `w × h` window whose top-left corner is `(x0, y0)` out of the
/// frame. The window may extend past the frame; those pixels stay black.
fn copy_window(frame: &RgbFrame, x0: i64, y0: i64, w: u32, h: u32) -> Vec<u8> {
    let dst_stride = w as usize * 3;
    let src_stride = frame.width as usize * 3;
    let mut crop = vec![0u8; dst_stride * h as usize];

    let ix1 = x0.max(0);
    let ix2 = (x0 + w as i64).min(frame.width as i64);
    let iy1 = y0.max(0);
    let iy2 = (y0 + h as i64).min(frame.height as i64);
    if ix2 <= ix1 || iy2 <= iy1 {
        return crop;
    }

    let row_len = (ix2 - ix1) as usize * 3;
    for sy in iy1..iy2 {
        let src_start = sy as usize * src_stride + ix1 as usize * 3;
        let dst_start = (sy - y0) as usize * dst_stride + (ix1 - x0) as usize * 3;
        crop[dst_start..dst_start + row_len]
            .copy_from_slice(&frame.data[src_start..src_start + row_len]);
    }
    crop
}

/// Packed RGB8 → CHW `(v / 255 - mean) / std`.
fn normalize(raw: &[u8], width: u32, height: u32, mean: [f32; 3], std: [f32; 3]) -> Patch {
    let size = (width * height) as usize;
    let mut data = vec![0f32; 3 * size];
    for (c, plane) in data.chunks_exact_mut(size).enumerate() {
        for (idx, out) in plane.iter_mut().enumerate() {
            *out = (raw[idx * 3 + c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
    Patch {
        width,
        height,
        data,
    }
}

/// Stack patches into one NCHW buffer. All patches must share a size.
pub fn stack_patches(patches: &[Patch]) -> Result<([usize; 4], Vec<f32>)> {
    let first = patches.first().context("cannot stack an empty patch batch")?;
    let (w, h) = (first.width, first.height);
    let mut data = Vec::with_capacity(patches.len() * first.data.len());
    for p in patches {
        ensure!(
            p.width == w && p.height == h,
            "patch size mismatch in batch: {}x{} vs {}x{}",
            p.width,
            p.height,
            w,
            h
        );
        data.extend_from_slice(&p.data);
    }
    Ok(([patches.len(), 3, h as usize, w as usize], data))
}
