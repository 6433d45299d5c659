use serde::{Deserialize, Serialize};

use crate::error::PoseError;

/// COCO style visibility flag of an annotated keypoint.
///
/// Both labeled states take part in target generation, only `NotLabeled`
/// keypoints are masked out with a zero target weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Visibility {
    /// `v = 0`
    NotLabeled,
    /// `v = 1`, labeled but occluded
    Invisible,
    /// `v = 2`
    Visible,
}

impl Visibility {
    pub fn is_labeled(&self) -> bool {
        !matches!(self, Visibility::NotLabeled)
    }

    /// Target weight derived from the flag (`min(v, 1)`).
    pub fn weight(&self) -> f32 {
        if self.is_labeled() { 1.0 } else { 0.0 }
    }
}

impl TryFrom<u8> for Visibility {
    type Error = PoseError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Visibility::NotLabeled),
            1 => Ok(Visibility::Invisible),
            2 => Ok(Visibility::Visible),
            other => Err(PoseError::Config(format!(
                "visibility flag must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<Visibility> for u8 {
    fn from(v: Visibility) -> Self {
        match v {
            Visibility::NotLabeled => 0,
            Visibility::Invisible => 1,
            Visibility::Visible => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub visibility: Visibility,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, visibility: Visibility) -> Self {
        Self { x, y, visibility }
    }

    pub fn visible(x: f32, y: f32) -> Self {
        Self::new(x, y, Visibility::Visible)
    }
}

/// Top-down crop of one instance: bbox center and size in original image pixels.
///
/// The data pipeline warps this box onto the model input, so keypoints in a
/// [`PoseSample`] live in input space and [`BBoxMeta::to_image`] undoes the warp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBoxMeta {
    pub center: [f32; 2],
    pub scale: [f32; 2],
}

impl BBoxMeta {
    /// Maps a point from model input space (`input_size = [w, h]`) to image pixels.
    ///
    /// ```text
    ///  image = kp / input_size * scale + center - scale / 2
    /// ```
    pub fn to_image(&self, point: [f32; 2], input_size: [usize; 2]) -> [f32; 2] {
        let mut out = [0.0; 2];
        for axis in 0..2 {
            out[axis] = point[axis] / input_size[axis] as f32 * self.scale[axis]
                + self.center[axis]
                - self.scale[axis] * 0.5;
        }
        out
    }
}

/// Standardized record produced by the external data pipeline for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub keypoints: Vec<Keypoint>,
    pub bbox: BBoxMeta,
}

impl PoseSample {
    pub fn new(keypoints: Vec<Keypoint>, bbox: BBoxMeta) -> Self {
        Self { keypoints, bbox }
    }

    pub fn num_keypoints(&self) -> usize {
        self.keypoints.len()
    }
}

/// Decoded keypoints of one instance together with a confidence per keypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseInstance {
    pub keypoints: Vec<[f32; 2]>,
    pub scores: Vec<f32>,
}

impl PoseInstance {
    pub fn num_keypoints(&self) -> usize {
        self.keypoints.len()
    }

    /// Returns a copy with every keypoint mapped back to image pixels.
    pub fn to_image_space(&self, bbox: &BBoxMeta, input_size: [usize; 2]) -> PoseInstance {
        PoseInstance {
            keypoints: self
                .keypoints
                .iter()
                .map(|kp| bbox.to_image(*kp, input_size))
                .collect(),
            scores: self.scores.clone(),
        }
    }
}
