//! Keypoint heads.
//!
//! A head owns its layers (a burn [`Module`](burn::module::Module)) together
//! with the codec that decodes its output and the loss that supervises it.
//! The combination is checked once when the head is built.

pub mod heatmap_head;
pub mod regression_head;
pub mod simcc_head;

use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::codecs::{Codec, HeadOutput, KeypointCodec, TargetKind};
use crate::data::TargetBatch;
use crate::error::{PoseError, Result};
use crate::keypoints::{BBoxMeta, PoseInstance};
use crate::losses::Loss;

pub use heatmap_head::{HeatmapHead, HeatmapHeadConfig, HeatmapNet};
pub use regression_head::{RegressionHead, RegressionHeadConfig, RegressionNet};
pub use simcc_head::{SimCCHead, SimCCHeadConfig, SimCCNet};

pub trait KeypointHead<B: Backend> {
    fn name(&self) -> &'static str;

    fn codec(&self) -> &Codec;

    fn loss_fn(&self) -> &Loss;

    /// Runs the layers on backbone features `[B, C, H, W]`.
    fn forward(&self, feats: Tensor<B, 4>) -> Result<HeadOutput<B>>;

    /// Loss of the head output against a collated target batch.
    fn loss(&self, feats: Tensor<B, 4>, batch: &TargetBatch<B>) -> Result<Tensor<B, 1>> {
        self.loss_levels(feats, std::slice::from_ref(batch))
    }

    /// Loss of the head output against targets collated at several levels.
    fn loss_levels(&self, feats: Tensor<B, 4>, levels: &[TargetBatch<B>]) -> Result<Tensor<B, 1>> {
        let output = self.forward(feats)?;
        let loss = self.loss_fn().forward_levels(output, levels)?;
        log::debug!(
            "{} loss computed over {} target levels for a batch of {}",
            self.name(),
            levels.len(),
            levels.first().map_or(0, |l| l.batch_size())
        );
        Ok(loss)
    }

    /// Decodes the head output and maps every instance back to image pixels.
    fn predict(&self, feats: Tensor<B, 4>, bboxes: &[BBoxMeta]) -> Result<Vec<PoseInstance>> {
        let [batch, _, _, _] = feats.dims();
        if batch != bboxes.len() {
            return Err(PoseError::shape(
                self.name(),
                format!("{batch} bounding boxes"),
                bboxes.len(),
            ));
        }

        let codec = self.codec();
        let instances = codec.decode(self.forward(feats)?)?;
        let input_size = codec.input_size();

        Ok(instances
            .iter()
            .zip(bboxes)
            .map(|(instance, bbox)| instance.to_image_space(bbox, input_size))
            .collect())
    }
}

/// Fails with a shape error when the feature channels differ from `in_channels`.
pub(crate) fn check_features<B: Backend>(head: &'static str, feats: &Tensor<B, 4>, in_channels: usize) -> Result<()> {
    let [batch, channels, _, _] = feats.dims();
    if channels != in_channels {
        return Err(PoseError::shape(
            head,
            format!("{in_channels} feature channels"),
            format!("{:?}", feats.dims()),
        ));
    }
    if batch == 0 {
        return Err(PoseError::Empty {
            op: head,
            what: "feature batch",
        });
    }
    Ok(())
}

/// Checks that the codec is one the head can decode and that the loss reads
/// the target the codec produces.
pub(crate) fn check_combination(head: &'static str, accepts: &[TargetKind], codec: &Codec, loss: &Loss) -> Result<()> {
    let kind = codec.target_kind();
    if !accepts.contains(&kind) {
        return Err(PoseError::Config(format!("{head} does not accept {kind:?} codecs")));
    }
    if loss.target_kind() != kind {
        return Err(PoseError::Config(format!(
            "{head}: {} expects {:?} targets but the codec produces {kind:?}",
            loss.name(),
            loss.target_kind()
        )));
    }
    Ok(())
}

/// Head configuration resolved from its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HeadConfig {
    HeatmapHead(HeatmapHeadConfig),
    SimCCHead(SimCCHeadConfig),
    RegressionHead(RegressionHeadConfig),
}

impl HeadConfig {
    pub fn init<B: Backend>(&self, codec: Codec, loss: Loss, device: &B::Device) -> Result<PoseHead<B>> {
        let head = match self {
            HeadConfig::HeatmapHead(c) => PoseHead::Heatmap(c.init(codec, loss, device)?),
            HeadConfig::SimCCHead(c) => PoseHead::SimCC(c.init(codec, loss, device)?),
            HeadConfig::RegressionHead(c) => PoseHead::Regression(c.init(codec, loss, device)?),
        };
        log::info!(
            "built {} with {} and {:?} targets",
            head.name(),
            head.loss_fn().name(),
            head.codec().target_kind()
        );
        Ok(head)
    }
}

#[derive(Debug)]
pub enum PoseHead<B: Backend> {
    Heatmap(HeatmapHead<B>),
    SimCC(SimCCHead<B>),
    Regression(RegressionHead<B>),
}

impl<B: Backend> KeypointHead<B> for PoseHead<B> {
    fn name(&self) -> &'static str {
        match self {
            PoseHead::Heatmap(h) => h.name(),
            PoseHead::SimCC(h) => h.name(),
            PoseHead::Regression(h) => h.name(),
        }
    }

    fn codec(&self) -> &Codec {
        match self {
            PoseHead::Heatmap(h) => h.codec(),
            PoseHead::SimCC(h) => h.codec(),
            PoseHead::Regression(h) => h.codec(),
        }
    }

    fn loss_fn(&self) -> &Loss {
        match self {
            PoseHead::Heatmap(h) => h.loss_fn(),
            PoseHead::SimCC(h) => h.loss_fn(),
            PoseHead::Regression(h) => h.loss_fn(),
        }
    }

    fn forward(&self, feats: Tensor<B, 4>) -> Result<HeadOutput<B>> {
        match self {
            PoseHead::Heatmap(h) => h.forward(feats),
            PoseHead::SimCC(h) => h.forward(feats),
            PoseHead::Regression(h) => h.forward(feats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{CodecConfig, MsraHeatmapConfig, RegressionLabelConfig};
    use crate::losses::{KeypointMSELossConfig, LossConfig, WingLossConfig};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    fn msra() -> Codec {
        CodecConfig::MsraHeatmap(MsraHeatmapConfig::new([32, 32], [8, 8], 2.0)).init().unwrap()
    }

    #[test]
    fn test_combination_rules() {
        let mse = LossConfig::KeypointMSELoss(KeypointMSELossConfig::new()).init().unwrap();
        let wing = LossConfig::WingLoss(WingLossConfig::new()).init().unwrap();
        let regression = CodecConfig::RegressionLabel(RegressionLabelConfig::new([32, 32])).init().unwrap();

        assert!(check_combination("HeatmapHead", &[TargetKind::Heatmap], &msra(), &mse).is_ok());
        assert!(matches!(
            check_combination("HeatmapHead", &[TargetKind::Heatmap], &msra(), &wing),
            Err(PoseError::Config(_))
        ));
        assert!(matches!(
            check_combination("HeatmapHead", &[TargetKind::Heatmap], &regression, &wing),
            Err(PoseError::Config(_))
        ));
    }

    #[test]
    fn test_tagged_head_config() {
        let device = NdArrayDevice::default();
        let json = r#"{"type": "HeatmapHead", "in_channels": 4, "out_channels": 2, "deconv_out_channels": []}"#;
        let config: HeadConfig = serde_json::from_str(json).unwrap();
        let mse = LossConfig::KeypointMSELoss(KeypointMSELossConfig::new()).init().unwrap();

        let head = config.init::<B>(msra(), mse, &device).unwrap();

        assert_eq!(head.name(), "HeatmapHead");
        let feats = Tensor::<B, 4>::zeros([1, 3, 8, 8], &device);
        assert!(matches!(head.forward(feats), Err(PoseError::Shape { .. })));
    }

    #[test]
    fn test_predict_requires_one_box_per_sample() {
        let device = NdArrayDevice::default();
        let mse = LossConfig::KeypointMSELoss(KeypointMSELossConfig::new()).init().unwrap();
        let head = HeatmapHeadConfig::new(4, 2).init::<B>(msra(), mse, &device).unwrap();

        let feats = Tensor::<B, 4>::zeros([2, 4, 8, 8], &device);
        let bbox = BBoxMeta {
            center: [16.0, 16.0],
            scale: [32.0, 32.0],
        };

        assert!(matches!(head.predict(feats, &[bbox]), Err(PoseError::Shape { .. })));
    }
}
