use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

use super::{check_loss_weight, check_pair, keypoint_weights};
use crate::error::Result;
use crate::tensor_ops::spatial_weights;

/// Mean squared error between predicted and target heatmaps.
#[derive(Config, Debug)]
pub struct KeypointMSELossConfig {
    /// Scale both heatmaps by the per-keypoint target weight.
    #[config(default = false)]
    pub use_target_weight: bool,
    #[config(default = 1.0)]
    pub loss_weight: f32,
}

impl KeypointMSELossConfig {
    pub fn init(&self) -> Result<KeypointMSELoss> {
        check_loss_weight("KeypointMSELoss", self.loss_weight)?;

        Ok(KeypointMSELoss {
            use_target_weight: self.use_target_weight,
            loss_weight: self.loss_weight,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeypointMSELoss {
    use_target_weight: bool,
    loss_weight: f32,
}

impl KeypointMSELoss {
    /// # Arguments
    /// * `output` - Predicted heatmaps `[B, K, H, W]`.
    /// * `target` - Target heatmaps `[B, K, H, W]`.
    /// * `weights` - Keypoint weights `[B, K]`, required when `use_target_weight` is set.
    ///
    /// # Returns
    /// The loss as a single element tensor.
    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        weights: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>> {
        let [batch, keypoints, height, width] = check_pair("KeypointMSELoss", &output, &target)?;
        let weights = keypoint_weights("KeypointMSELoss", self.use_target_weight, weights, [batch, keypoints])?;

        let (output, target) = match weights {
            Some(w) => {
                let w = spatial_weights(w, height, width);
                (output * w.clone(), target * w)
            }
            None => (output, target),
        };

        //              1   ___
        //  loss = λ ⋅ ───  ╲   (w ⋅ p - w ⋅ t)²
        //              N   ╱
        //                  ‾‾‾
        let loss = (output - target).powf_scalar(2.0).mean();
        log::trace!("KeypointMSELoss over [{batch}, {keypoints}, {height}, {width}]");

        Ok(loss.mul_scalar(self.loss_weight))
    }
}
