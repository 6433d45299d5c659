use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::Backend;
use burn::tensor::{Tensor, activation};

use super::{KeypointHead, check_combination, check_features};
use crate::codecs::{Codec, HeadOutput, KeypointCodec, TargetKind};
use crate::error::{PoseError, Result};
use crate::losses::Loss;

/// Top-down heatmap head of "Simple Baselines for Human Pose Estimation and
/// Tracking" (Xiao et al., ECCV 2018).
///
/// ```text
///  feats ─► [deconv 4x4 s2 ─► BN ─► ReLU] x N ─► conv 1x1 ─► heatmaps
/// ```
#[derive(Config, Debug)]
pub struct HeatmapHeadConfig {
    pub in_channels: usize,
    /// `K` for plain heatmaps, `3K` for combined targets.
    pub out_channels: usize,
    /// Output channels of each upsampling block, empty for none.
    #[config(default = "Vec::new()")]
    pub deconv_out_channels: Vec<usize>,
}

impl HeatmapHeadConfig {
    pub fn init<B: Backend>(&self, codec: Codec, loss: Loss, device: &B::Device) -> Result<HeatmapHead<B>> {
        check_combination(
            "HeatmapHead",
            &[TargetKind::Heatmap, TargetKind::CombinedHeatmap],
            &codec,
            &loss,
        )?;
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(PoseError::Config("HeatmapHead: channel counts must be positive".to_string()));
        }
        if codec.target_kind() == TargetKind::CombinedHeatmap && self.out_channels % 3 != 0 {
            return Err(PoseError::Config(format!(
                "HeatmapHead: combined targets need 3 channels per keypoint, got out_channels = {}",
                self.out_channels
            )));
        }

        let mut deconv = Vec::with_capacity(self.deconv_out_channels.len());
        let mut channels = self.in_channels;
        for &out in &self.deconv_out_channels {
            deconv.push(DeconvBlock::new(channels, out, device));
            channels = out;
        }

        let net = HeatmapNet {
            deconv,
            final_layer: Conv2dConfig::new([channels, self.out_channels], [1, 1]).init(device),
            in_channels: self.in_channels,
        };

        Ok(HeatmapHead { net, codec, loss })
    }
}

/// Doubles the spatial resolution.
#[derive(Module, Debug)]
pub struct DeconvBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> DeconvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            // (H - 1) * 2 - 2 * 1 + 4 = 2H
            deconv: ConvTranspose2dConfig::new([in_channels, out_channels], [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.forward(x);
        let x = self.bn.forward(x);
        activation::relu(x)
    }
}

#[derive(Module, Debug)]
pub struct HeatmapNet<B: Backend> {
    deconv: Vec<DeconvBlock<B>>,
    final_layer: Conv2d<B>,
    in_channels: usize,
}

impl<B: Backend> HeatmapNet<B> {
    pub fn forward(&self, feats: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.iter().fold(feats, |x, block| block.forward(x));
        self.final_layer.forward(x)
    }
}

#[derive(Debug)]
pub struct HeatmapHead<B: Backend> {
    pub net: HeatmapNet<B>,
    codec: Codec,
    loss: Loss,
}

impl<B: Backend> KeypointHead<B> for HeatmapHead<B> {
    fn name(&self) -> &'static str {
        "HeatmapHead"
    }

    fn codec(&self) -> &Codec {
        &self.codec
    }

    fn loss_fn(&self) -> &Loss {
        &self.loss
    }

    fn forward(&self, feats: Tensor<B, 4>) -> Result<HeadOutput<B>> {
        check_features(self.name(), &feats, self.net.in_channels)?;
        Ok(HeadOutput::Heatmaps(self.net.forward(feats)))
    }
}
