//! render — debug visualization of estimated poses

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::info;

use crate::geometry::BoundingBox;
use crate::pipeline::FrameResult;
use crate::pose::{Joint, PoseEstimate};
use crate::skeleton;
use crate::video::RgbFrame;

const PALETTE: [[u8; 3]; 6] = [
    [0, 255, 0],
    [255, 128, 0],
    [0, 160, 255],
    [255, 0, 200],
    [255, 255, 0],
    [0, 255, 255],
];

const JOINT_RADIUS: i32 = 3;

/// Draw every pose in `result` onto a copy of `frame`.
pub fn render_frame(frame: &RgbFrame, result: &FrameResult) -> Result<RgbImage> {
    let mut img = frame.to_image()?;
    draw_poses(&mut img, &result.poses);
    Ok(img)
}

/// Draw each person's joint extent, bones and joints. People are coloured by
/// their position in `poses`.
pub fn draw_poses(img: &mut RgbImage, poses: &[PoseEstimate]) {
    for (i, pose) in poses.iter().enumerate() {
        let color = Rgb(PALETTE[i % PALETTE.len()]);

        if let Some(rect) = joint_extent(&pose.joints).and_then(to_rect) {
            draw_hollow_rect_mut(img, rect, color);
        }

        if let Some(skel) = skeleton::for_joint_count(pose.joints.len()) {
            for &(a, b) in skel.bones {
                let (ja, jb) = (pose.joints[a], pose.joints[b]);
                draw_line_segment_mut(img, (ja.x, ja.y), (jb.x, jb.y), color);
            }
        }
        for j in &pose.joints {
            draw_filled_circle_mut(img, (j.x.round() as i32, j.y.round() as i32), JOINT_RADIUS, color);
        }

        // root marker
        let root = (pose.root.image_x.round() as i32, pose.root.image_y.round() as i32);
        draw_filled_circle_mut(img, root, JOINT_RADIUS + 2, Rgb([255, 0, 0]));
    }
}

/// Render and write a PNG (or any format `image` infers from the extension).
pub fn save_visualization<P: AsRef<Path>>(frame: &RgbFrame, result: &FrameResult, path: P) -> Result<()> {
    let path = path.as_ref();
    let img = render_frame(frame, result)?;
    img.save(path)
        .with_context(|| format!("failed to write visualization: {}", path.display()))?;
    info!(path = %path.display(), persons = result.poses.len(), "saved visualization");
    Ok(())
}

fn joint_extent(joints: &[Joint]) -> Option<BoundingBox> {
    let first = joints.first()?;
    let (mut x1, mut y1, mut x2, mut y2) = (first.x, first.y, first.x, first.y);
    for j in &joints[1..] {
        x1 = x1.min(j.x);
        y1 = y1.min(j.y);
        x2 = x2.max(j.x);
        y2 = y2.max(j.y);
    }
    Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1))
}

fn to_rect(b: BoundingBox) -> Option<Rect> {
    let (w, h) = (b.width.round() as u32, b.height.round() as u32);
    (w > 0 && h > 0).then(|| Rect::at(b.x.round() as i32, b.y.round() as i32).of_size(w, h))
}
