//! Keypoint codecs.
//!
//! A codec turns the annotated keypoints of one instance into the training
//! target of a head (encode) and turns the head output back into keypoint
//! coordinates in model input space (decode). The encode and decode side of a
//! codec share one immutable configuration so both agree on the geometry.
//!
//! ```text
//!   PoseSample ──encode──► EncodedTarget ──PoseBatcher──► TargetBatch ──► loss
//!                                                                   ▲
//!   features ──head──► HeadOutput ──────────────────────────────────┘
//!                          │
//!                          └──decode──► PoseInstance (input space)
//! ```

pub mod combined;
pub(crate) mod heatmap_ops;
pub mod megvii;
pub mod msra;
pub mod regression;
pub mod simcc;

use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{PoseError, Result};
use crate::keypoints::{PoseInstance, PoseSample};

pub use combined::{CombinedTarget, CombinedTargetConfig};
pub use megvii::{MegviiHeatmap, MegviiHeatmapConfig};
pub use msra::{MsraHeatmap, MsraHeatmapConfig};
pub use regression::{RegressionLabel, RegressionLabelConfig};
pub use simcc::{SimCCLabel, SimCCLabelConfig};

/// Training target of one instance, kept on the host until batching.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Row-major maps of shape `[channels, height, width]`.
    Heatmaps {
        data: Vec<f32>,
        channels: usize,
        height: usize,
        width: usize,
    },
    /// 1D label distributions `[K, x_bins]` and `[K, y_bins]`.
    SimCC {
        x: Vec<f32>,
        y: Vec<f32>,
        x_bins: usize,
        y_bins: usize,
    },
    /// Normalized coordinates `[K, 2]`.
    Coordinates { data: Vec<f32> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTarget {
    pub target: Target,
    /// One weight per keypoint, `0` masks the keypoint out of the loss.
    pub weights: Vec<f32>,
}

impl EncodedTarget {
    pub fn num_keypoints(&self) -> usize {
        self.weights.len()
    }
}

/// Raw output of a head, in the layout its codec decodes.
#[derive(Debug, Clone)]
pub enum HeadOutput<B: Backend> {
    /// `[B, C, H, W]`
    Heatmaps(Tensor<B, 4>),
    /// `[B, K, x_bins]` and `[B, K, y_bins]`
    SimCC { x: Tensor<B, 3>, y: Tensor<B, 3> },
    /// `[B, K, 2]`
    Coordinates(Tensor<B, 3>),
}

/// Kind of target a codec produces, used to check head/codec/loss combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Heatmap,
    CombinedHeatmap,
    SimCC,
    Coordinates,
}

pub trait KeypointCodec {
    /// Model input size `[w, h]` in pixels.
    fn input_size(&self) -> [usize; 2];

    fn target_kind(&self) -> TargetKind;

    /// Encodes the keypoints of one instance. Pure function of the sample and the config.
    fn encode(&self, sample: &PoseSample) -> EncodedTarget;

    /// Decodes a batched head output into one instance per sample, in input space.
    fn decode<B: Backend>(&self, output: HeadOutput<B>) -> Result<Vec<PoseInstance>>;
}

/// Codec configuration resolved from its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CodecConfig {
    #[serde(rename = "MSRAHeatmap")]
    MsraHeatmap(MsraHeatmapConfig),
    MegviiHeatmap(MegviiHeatmapConfig),
    SimCCLabel(SimCCLabelConfig),
    RegressionLabel(RegressionLabelConfig),
    CombinedTarget(CombinedTargetConfig),
}

impl CodecConfig {
    pub fn init(&self) -> Result<Codec> {
        let codec = match self {
            CodecConfig::MsraHeatmap(c) => Codec::MsraHeatmap(c.init()?),
            CodecConfig::MegviiHeatmap(c) => Codec::MegviiHeatmap(c.init()?),
            CodecConfig::SimCCLabel(c) => Codec::SimCCLabel(c.init()?),
            CodecConfig::RegressionLabel(c) => Codec::RegressionLabel(c.init()?),
            CodecConfig::CombinedTarget(c) => Codec::CombinedTarget(c.init()?),
        };
        log::debug!("built codec {:?}", codec.target_kind());
        Ok(codec)
    }
}

#[derive(Debug, Clone)]
pub enum Codec {
    MsraHeatmap(MsraHeatmap),
    MegviiHeatmap(MegviiHeatmap),
    SimCCLabel(SimCCLabel),
    RegressionLabel(RegressionLabel),
    CombinedTarget(CombinedTarget),
}

macro_rules! dispatch {
    ($self:expr, $codec:ident => $body:expr) => {
        match $self {
            Codec::MsraHeatmap($codec) => $body,
            Codec::MegviiHeatmap($codec) => $body,
            Codec::SimCCLabel($codec) => $body,
            Codec::RegressionLabel($codec) => $body,
            Codec::CombinedTarget($codec) => $body,
        }
    };
}

impl KeypointCodec for Codec {
    fn input_size(&self) -> [usize; 2] {
        dispatch!(self, c => c.input_size())
    }

    fn target_kind(&self) -> TargetKind {
        dispatch!(self, c => c.target_kind())
    }

    fn encode(&self, sample: &PoseSample) -> EncodedTarget {
        dispatch!(self, c => c.encode(sample))
    }

    fn decode<B: Backend>(&self, output: HeadOutput<B>) -> Result<Vec<PoseInstance>> {
        dispatch!(self, c => c.decode(output))
    }
}

impl Codec {
    /// `[w, h]` of the heatmaps for heatmap codecs.
    pub fn heatmap_size(&self) -> Option<[usize; 2]> {
        match self {
            Codec::MsraHeatmap(c) => Some(c.heatmap_size()),
            Codec::MegviiHeatmap(c) => Some(c.heatmap_size()),
            Codec::CombinedTarget(c) => Some(c.heatmap_size()),
            Codec::SimCCLabel(_) | Codec::RegressionLabel(_) => None,
        }
    }

    /// `[x_bins, y_bins]` for the SimCC codec.
    pub fn simcc_bins(&self) -> Option<[usize; 2]> {
        match self {
            Codec::SimCCLabel(c) => Some(c.bins()),
            _ => None,
        }
    }
}

/// Copies a tensor to the host as `f32` values in row-major order.
pub(crate) fn host_data<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PoseError::TensorData(format!("{e:?}")))
}

pub(crate) fn check_size(codec: &'static str, name: &str, size: [usize; 2]) -> Result<()> {
    if size[0] == 0 || size[1] == 0 {
        return Err(PoseError::Config(format!(
            "{codec}: {name} must be positive, got {size:?}"
        )));
    }
    Ok(())
}

pub(crate) fn check_positive(codec: &'static str, name: &str, value: f32) -> Result<()> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(PoseError::Config(format!(
            "{codec}: {name} must be a positive number, got {value}"
        )));
    }
    Ok(())
}

/// Unwraps a heatmap output and checks its spatial size against the codec geometry.
pub(crate) fn heatmap_output<B: Backend>(
    codec: &'static str,
    output: HeadOutput<B>,
    heatmap_size: [usize; 2],
) -> Result<Tensor<B, 4>> {
    let heatmaps = match output {
        HeadOutput::Heatmaps(t) => t,
        _ => {
            return Err(PoseError::shape(codec, "heatmap output [B, C, H, W]", "non heatmap output"));
        }
    };

    let [batch, channels, height, width] = heatmaps.dims();
    if [width, height] != heatmap_size {
        return Err(PoseError::shape(
            codec,
            format!("heatmaps of size {heatmap_size:?} (w, h)"),
            format!("{:?}", [width, height]),
        ));
    }
    if batch == 0 || channels == 0 {
        return Err(PoseError::Empty {
            op: codec,
            what: "heatmap batch",
        });
    }

    Ok(heatmaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_config_from_tagged_json() {
        let json = r#"{
            "type": "MSRAHeatmap",
            "input_size": [192, 256],
            "heatmap_size": [48, 64],
            "sigma": 2.0,
            "unbiased": false,
            "blur_kernel_size": 11
        }"#;

        let config: CodecConfig = serde_json::from_str(json).unwrap();
        let codec = config.init().unwrap();

        assert_eq!(codec.target_kind(), TargetKind::Heatmap);
        assert_eq!(codec.input_size(), [192, 256]);
        assert_eq!(codec.heatmap_size(), Some([48, 64]));
        assert_eq!(codec.simcc_bins(), None);
    }

    #[test]
    fn test_codec_config_rejects_unknown_type() {
        let json = r#"{"type": "IntegralRegressionLabel", "input_size": [256, 256]}"#;
        assert!(serde_json::from_str::<CodecConfig>(json).is_err());
    }

    #[test]
    fn test_codec_config_rejects_zero_sizes() {
        let config = CodecConfig::SimCCLabel(SimCCLabelConfig::new([0, 256], 6.0));
        assert!(matches!(config.init(), Err(PoseError::Config(_))));
    }
}
