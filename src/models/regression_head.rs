use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;

use super::{KeypointHead, check_combination, check_features};
use crate::codecs::{Codec, HeadOutput, TargetKind};
use crate::error::{PoseError, Result};
use crate::losses::Loss;

/// Global average pooling followed by a linear layer regressing `[x, y]` per joint.
#[derive(Config, Debug)]
pub struct RegressionHeadConfig {
    pub in_channels: usize,
    pub num_joints: usize,
}

impl RegressionHeadConfig {
    pub fn init<B: Backend>(&self, codec: Codec, loss: Loss, device: &B::Device) -> Result<RegressionHead<B>> {
        check_combination("RegressionHead", &[TargetKind::Coordinates], &codec, &loss)?;
        if self.in_channels == 0 || self.num_joints == 0 {
            return Err(PoseError::Config(format!("RegressionHead: invalid config {self}")));
        }

        let net = RegressionNet {
            fc: LinearConfig::new(self.in_channels, self.num_joints * 2).init(device),
            in_channels: self.in_channels,
            num_joints: self.num_joints,
        };

        Ok(RegressionHead { net, codec, loss })
    }
}

#[derive(Module, Debug)]
pub struct RegressionNet<B: Backend> {
    fc: Linear<B>,
    in_channels: usize,
    num_joints: usize,
}

impl<B: Backend> RegressionNet<B> {
    /// `[B, C, H, W]` features to `[B, K, 2]` normalized coordinates.
    pub fn forward(&self, feats: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, channels, h, w] = feats.dims();
        let pooled = feats.reshape([batch, channels, h * w]).mean_dim(2).reshape([batch, channels]);

        self.fc.forward(pooled).reshape([batch, self.num_joints, 2])
    }
}

#[derive(Debug)]
pub struct RegressionHead<B: Backend> {
    pub net: RegressionNet<B>,
    codec: Codec,
    loss: Loss,
}

impl<B: Backend> KeypointHead<B> for RegressionHead<B> {
    fn name(&self) -> &'static str {
        "RegressionHead"
    }

    fn codec(&self) -> &Codec {
        &self.codec
    }

    fn loss_fn(&self) -> &Loss {
        &self.loss
    }

    fn forward(&self, feats: Tensor<B, 4>) -> Result<HeadOutput<B>> {
        check_features(self.name(), &feats, self.net.in_channels)?;
        Ok(HeadOutput::Coordinates(self.net.forward(feats)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{CodecConfig, RegressionLabelConfig};
    use crate::data::PoseBatcher;
    use crate::keypoints::{BBoxMeta, Keypoint, PoseSample};
    use crate::losses::{LossConfig, WingLossConfig};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::cast::ToElement;

    type B = NdArray<f32>;

    fn head(device: &NdArrayDevice) -> RegressionHead<B> {
        let codec = CodecConfig::RegressionLabel(RegressionLabelConfig::new([64, 64])).init().unwrap();
        let loss = LossConfig::WingLoss(WingLossConfig::new().with_use_target_weight(true))
            .init()
            .unwrap();
        RegressionHeadConfig::new(16, 5).init(codec, loss, device).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let device = NdArrayDevice::default();
        let HeadOutput::Coordinates(out) = head(&device).forward(Tensor::zeros([3, 16, 7, 5], &device)).unwrap() else {
            panic!("expected coordinates");
        };
        assert_eq!(out.dims(), [3, 5, 2]);
    }

    #[test]
    fn test_wrong_channels_fail() {
        let device = NdArrayDevice::default();
        assert!(matches!(
            head(&device).forward(Tensor::zeros([1, 8, 4, 4], &device)),
            Err(PoseError::Shape { .. })
        ));
    }

    #[test]
    fn test_loss_and_predict_in_image_space() {
        let device = NdArrayDevice::default();
        let head = head(&device);
        let bbox = BBoxMeta {
            center: [132.0, 232.0],
            scale: [64.0, 64.0],
        };
        let keypoints = (0..5).map(|i| Keypoint::visible(10.0 * i as f32, 5.0)).collect();
        let batch = PoseBatcher::<B>::new(head.codec().clone())
            .batch(&[PoseSample::new(keypoints, bbox)], &device)
            .unwrap();

        let feats = Tensor::<B, 4>::zeros([1, 16, 4, 4], &device);
        let loss = head.loss(feats.clone(), &batch).unwrap().into_scalar().to_f32();
        assert!(loss.is_finite() && loss >= 0.0);

        // zero features give the fc bias as coordinates
        let instances = head.predict(feats, &[bbox]).unwrap();
        assert_eq!(instances[0].num_keypoints(), 5);
        assert!(instances[0].keypoints.iter().all(|kp| kp[0].is_finite() && kp[1].is_finite()));
        assert_eq!(instances[0].scores, vec![1.0; 5]);
    }
}
