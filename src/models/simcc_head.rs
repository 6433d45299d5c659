use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;

use super::{KeypointHead, check_combination, check_features};
use crate::codecs::{Codec, HeadOutput, TargetKind};
use crate::error::{PoseError, Result};
use crate::losses::Loss;

/// Coordinate classification head: a 1x1 conv to one channel per keypoint,
/// then one linear classifier per axis over the flattened feature map.
#[derive(Config, Debug)]
pub struct SimCCHeadConfig {
    pub in_channels: usize,
    /// Number of keypoints.
    pub out_channels: usize,
    /// Backbone feature map size `[w, h]`.
    pub in_featuremap_size: [usize; 2],
}

impl SimCCHeadConfig {
    pub fn init<B: Backend>(&self, codec: Codec, loss: Loss, device: &B::Device) -> Result<SimCCHead<B>> {
        check_combination("SimCCHead", &[TargetKind::SimCC], &codec, &loss)?;
        let [x_bins, y_bins] = codec
            .simcc_bins()
            .ok_or_else(|| PoseError::Config("SimCCHead requires a SimCCLabel codec".to_string()))?;

        let [w, h] = self.in_featuremap_size;
        if self.in_channels == 0 || self.out_channels == 0 || w == 0 || h == 0 {
            return Err(PoseError::Config(format!("SimCCHead: invalid config {self}")));
        }

        let net = SimCCNet {
            final_layer: Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1]).init(device),
            mlp_head_x: LinearConfig::new(w * h, x_bins).init(device),
            mlp_head_y: LinearConfig::new(w * h, y_bins).init(device),
            in_channels: self.in_channels,
            in_width: w,
            in_height: h,
        };

        Ok(SimCCHead { net, codec, loss })
    }
}

#[derive(Module, Debug)]
pub struct SimCCNet<B: Backend> {
    final_layer: Conv2d<B>,
    mlp_head_x: Linear<B>,
    mlp_head_y: Linear<B>,
    in_channels: usize,
    in_width: usize,
    in_height: usize,
}

impl<B: Backend> SimCCNet<B> {
    /// Returns the x and y bin logits, `[B, K, Wx]` and `[B, K, Hy]`.
    pub fn forward(&self, feats: Tensor<B, 4>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let x = self.final_layer.forward(feats);
        let [batch, keypoints, h, w] = x.dims();
        let x = x.reshape([batch, keypoints, h * w]);

        (self.mlp_head_x.forward(x.clone()), self.mlp_head_y.forward(x))
    }
}

#[derive(Debug)]
pub struct SimCCHead<B: Backend> {
    pub net: SimCCNet<B>,
    codec: Codec,
    loss: Loss,
}

impl<B: Backend> KeypointHead<B> for SimCCHead<B> {
    fn name(&self) -> &'static str {
        "SimCCHead"
    }

    fn codec(&self) -> &Codec {
        &self.codec
    }

    fn loss_fn(&self) -> &Loss {
        &self.loss
    }

    fn forward(&self, feats: Tensor<B, 4>) -> Result<HeadOutput<B>> {
        check_features(self.name(), &feats, self.net.in_channels)?;
        let [_, _, h, w] = feats.dims();
        let expected = [self.net.in_width, self.net.in_height];
        if [w, h] != expected {
            return Err(PoseError::shape(
                self.name(),
                format!("feature map of size {expected:?} (w, h)"),
                format!("{:?}", [w, h]),
            ));
        }

        let (x, y) = self.net.forward(feats);
        Ok(HeadOutput::SimCC { x, y })
    }
}
