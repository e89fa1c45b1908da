//! COCO-style annotation files as shipped with MuCo-3DHP and MPII.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct AnnotationFile {
    pub images: Vec<ImageRecord>,
    pub annotations: Vec<AnnotationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    /// Focal length (MuCo only).
    #[serde(default)]
    pub f: Option<[f32; 2]>,
    /// Principal point (MuCo only).
    #[serde(default)]
    pub c: Option<[f32; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct AnnotationRecord {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    /// `[x, y, w, h]`.
    pub bbox: [f32; 4],
    #[serde(default)]
    pub area: Option<f32>,
    #[serde(default)]
    pub iscrowd: Option<Flag>,
    #[serde(default)]
    pub num_keypoints: Option<u32>,
    /// Flat `[x, y, v] × J` (MPII).
    #[serde(default)]
    pub keypoints: Vec<f32>,
    /// Per-joint camera coordinates in mm (MuCo).
    #[serde(default)]
    pub keypoints_cam: Vec<[f32; 3]>,
    /// Per-joint image coordinates (MuCo).
    #[serde(default)]
    pub keypoints_img: Vec<[f32; 2]>,
    #[serde(default)]
    pub keypoints_vis: Vec<Flag>,
}

/// A value that some exports write as a boolean and others as a number.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Num(f32),
}

impl Flag {
    pub fn value(self) -> f32 {
        match self {
            Flag::Bool(b) => b as u8 as f32,
            Flag::Num(n) => n,
        }
    }

    pub fn is_set(self) -> bool {
        self.value() != 0.0
    }
}

impl AnnotationFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open annotations: {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse annotations: {}", path.display()))
    }

    /// Annotations grouped by image id, each group in file order.
    pub fn annotations_by_image(&self) -> HashMap<u64, Vec<&AnnotationRecord>> {
        let mut map: HashMap<u64, Vec<&AnnotationRecord>> = HashMap::new();
        for ann in &self.annotations {
            map.entry(ann.image_id).or_default().push(ann);
        }
        map
    }
}
