//! geometry — boxes, box normalization and camera intrinsics
//!
//! Two box forms are used: `CornerBox` (x1, y1, x2, y2) as produced by the
//! detector and during sanitization, and `BoundingBox` (x, y, w, h) which
//! every later stage consumes.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in corner form, original-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl CornerBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Signed area; negative when the corners are inverted.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// IoU (intersection over union) with another box.
    pub fn iou(&self, other: &CornerBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        inter / union
    }

    pub fn to_xywh(&self) -> BoundingBox {
        BoundingBox {
            x: self.x1,
            y: self.y1,
            width: self.width(),
            height: self.height(),
        }
    }

    /// Clamp the corners into `[0, width-1] × [0, height-1]`.
    pub fn clip(&self, width: u32, height: u32) -> CornerBox {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        CornerBox {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }
}

/// Box in `(x, y, width, height)` form, original-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Recenter the box, grow its shorter side until `width / height`
    /// equals `aspect_ratio`, then scale both sides by `scale`.
    pub fn expand_to_aspect(&self, aspect_ratio: f32, scale: f32) -> BoundingBox {
        let (cx, cy) = self.center();
        let mut w = self.width;
        let mut h = self.height;
        if w > aspect_ratio * h {
            h = w / aspect_ratio;
        } else if w < aspect_ratio * h {
            w = h * aspect_ratio;
        }
        let width = w * scale;
        let height = h * scale;
        BoundingBox {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    /// Dataset-side sanitization of an annotated `(x, y, w, h)` box.
    ///
    /// Returns `None` when the annotated area is not positive or the clipped
    /// corners end up inverted. Boxes are dropped, never repaired.
    pub fn sanitize(&self, image_width: u32, image_height: u32) -> Option<BoundingBox> {
        if self.width * self.height <= 0.0 {
            return None;
        }
        let x1 = self.x.max(0.0);
        let y1 = self.y.max(0.0);
        let x2 = (image_width as f32 - 1.0).min(x1 + (self.width - 1.0).max(0.0));
        let y2 = (image_height as f32 - 1.0).min(y1 + (self.height - 1.0).max(0.0));
        if x2 < x1 || y2 < y1 {
            return None;
        }
        Some(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }
}

/// Pinhole intrinsics: focal length and principal point, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub focal: [f32; 2],
    pub principal: [f32; 2],
}

impl CameraIntrinsics {
    pub fn new(focal: [f32; 2], principal: [f32; 2]) -> Self {
        Self { focal, principal }
    }

    /// Intrinsics with the principal point at the image centre.
    pub fn centered(focal: [f32; 2], image_width: u32, image_height: u32) -> Self {
        Self {
            focal,
            principal: [image_width as f32 / 2.0, image_height as f32 / 2.0],
        }
    }

    /// Back-project a pixel `(x, y)` at camera depth `z` into camera space.
    pub fn pixel_to_camera(&self, x: f32, y: f32, z: f32) -> Point3<f32> {
        Point3::new(
            (x - self.principal[0]) / self.focal[0] * z,
            (y - self.principal[1]) / self.focal[1] * z,
            z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn project(k: &CameraIntrinsics, p: &Point3<f32>) -> (f32, f32) {
        let m = Matrix3::new(
            k.focal[0], 0.0, k.principal[0],
            0.0, k.focal[1], k.principal[1],
            0.0, 0.0, 1.0,
        );
        let uvw = m * p.coords;
        (uvw.x / uvw.z, uvw.y / uvw.z)
    }

    #[test]
    fn test_expand_to_square() {
        let b = BoundingBox::new(0.0, 0.0, 100.0, 50.0);
        let out = b.expand_to_aspect(1.0, 1.25);
        assert!((out.width - out.height).abs() < 1e-4);
        assert!((out.width - 125.0).abs() < 1e-4);
        assert!(out.area() >= b.area());
        // centre is preserved
        let (cx, cy) = out.center();
        assert!((cx - 50.0).abs() < 1e-4);
        assert!((cy - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_expand_tall_box_grows_width() {
        let b = BoundingBox::new(10.0, 10.0, 40.0, 120.0);
        let out = b.expand_to_aspect(0.75, 1.0);
        assert!((out.height - 120.0).abs() < 1e-4);
        assert!((out.width - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_sanitize_clips_to_image() {
        let b = BoundingBox::new(-10.0, 5.0, 200.0, 50.0);
        let s = b.sanitize(100, 100).unwrap();
        assert_eq!(s.x, 0.0);
        assert_eq!(s.y, 5.0);
        assert_eq!(s.width, 99.0);
        assert_eq!(s.height, 49.0);
    }

    #[test]
    fn test_sanitize_drops_degenerate() {
        assert!(BoundingBox::new(10.0, 10.0, 0.0, 30.0)
            .sanitize(100, 100)
            .is_none());
        assert!(BoundingBox::new(10.0, 10.0, -5.0, -5.0)
            .sanitize(100, 100)
            .is_none());
        // starts beyond the right edge: x2 clamps below x1
        assert!(BoundingBox::new(150.0, 10.0, 20.0, 20.0)
            .sanitize(100, 100)
            .is_none());
    }

    #[test]
    fn test_corner_iou() {
        let a = CornerBox::new(0.0, 0.0, 10.0, 10.0);
        let b = CornerBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        let c = CornerBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_pixel_camera_round_trip() {
        let k = CameraIntrinsics::centered([1500.0, 1500.0], 640, 480);
        let p = k.pixel_to_camera(400.0, 300.0, 3000.0);
        assert!((p.x - 160.0).abs() < 1e-3);
        assert!((p.y - 120.0).abs() < 1e-3);
        let (u, v) = project(&k, &p);
        assert!((u - 400.0).abs() < 1e-3);
        assert!((v - 300.0).abs() < 1e-3);
    }
}
