use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

use super::{check_loss_weight, check_pair, keypoint_weights};
use crate::error::{PoseError, Result};
use crate::tensor_ops::spatial_weights;

/// Heatmap MSE with online hard keypoint mining.
///
/// “Cascaded Pyramid Network for Multi-Person Pose Estimation”
/// Authors: Yilun Chen, Zhicheng Wang, Yuxiang Peng, Zhiqiang Zhang, Gang Yu, Jian Sun
/// Link (official): https://arxiv.org/abs/1711.07319
///
/// Online hard keypoints mining - Section 3.3
///
/// During training, we select only a part of the keypoints with the highest
/// losses and backpropagate the gradients from them. Each sample keeps the
/// `topk` keypoints with the largest heatmap loss.
#[derive(Config, Debug)]
pub struct KeypointOHKMMSELossConfig {
    #[config(default = false)]
    pub use_target_weight: bool,
    /// Number of hardest keypoints kept per sample.
    #[config(default = 8)]
    pub topk: usize,
    #[config(default = 1.0)]
    pub loss_weight: f32,
}

impl KeypointOHKMMSELossConfig {
    pub fn init(&self) -> Result<KeypointOHKMMSELoss> {
        if self.topk == 0 {
            return Err(PoseError::Config("KeypointOHKMMSELoss: topk must be positive".to_string()));
        }
        check_loss_weight("KeypointOHKMMSELoss", self.loss_weight)?;

        Ok(KeypointOHKMMSELoss {
            use_target_weight: self.use_target_weight,
            topk: self.topk,
            loss_weight: self.loss_weight,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeypointOHKMMSELoss {
    use_target_weight: bool,
    topk: usize,
    loss_weight: f32,
}

/// Mean over the batch of the average of the `topk` largest values of every row.
///
/// `losses` is the `[B, K]` matrix of per-keypoint losses, `topk <= K`.
pub fn hard_keypoint_mean<B: Backend>(losses: Tensor<B, 2>, topk: usize) -> Tensor<B, 1> {
    let (_vals, order) = losses.clone().sort_descending_with_indices(1);
    let hardest = order.narrow(1, 0, topk);

    losses.gather(1, hardest).sum_dim(1).div_scalar(topk as f32).mean()
}

impl KeypointOHKMMSELoss {
    pub fn topk(&self) -> usize {
        self.topk
    }

    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        weights: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>> {
        let [batch, keypoints, height, width] = output.dims();
        if keypoints < self.topk {
            return Err(PoseError::Config(format!(
                "KeypointOHKMMSELoss: topk must not exceed num_keypoints ({} > {keypoints})",
                self.topk
            )));
        }
        check_pair("KeypointOHKMMSELoss", &output, &target)?;
        let weights = keypoint_weights("KeypointOHKMMSELoss", self.use_target_weight, weights, [batch, keypoints])?;

        let (output, target) = match weights {
            Some(w) => {
                let w = spatial_weights(w, height, width);
                (output * w.clone(), target * w)
            }
            None => (output, target),
        };

        // [B, K] spatial mean of the squared error
        let losses = (output - target)
            .powf_scalar(2.0)
            .reshape([batch, keypoints, height * width])
            .mean_dim(2)
            .reshape([batch, keypoints]);

        log::trace!("KeypointOHKMMSELoss keeps {} of {keypoints} keypoints", self.topk);

        Ok(hard_keypoint_mean(losses, self.topk).mul_scalar(self.loss_weight))
    }
}
