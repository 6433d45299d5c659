use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::{log_softmax, softmax};

use super::{check_loss_weight, check_pair, keypoint_weights};
use crate::error::{PoseError, Result};

/// Kullback-Leibler divergence between SimCC label distributions and the
/// softmax of the predicted bins, summed over both axes.
#[derive(Config, Debug)]
pub struct KLDiscretLossConfig {
    /// Temperature applied to the logits (and to the labels with `label_softmax`).
    #[config(default = 1.0)]
    pub beta: f32,
    /// Turn the labels into a distribution with `softmax(labels * beta)`.
    #[config(default = false)]
    pub label_softmax: bool,
    #[config(default = true)]
    pub use_target_weight: bool,
    #[config(default = 1.0)]
    pub loss_weight: f32,
}

impl KLDiscretLossConfig {
    pub fn init(&self) -> Result<KLDiscretLoss> {
        if !(self.beta > 0.0 && self.beta.is_finite()) {
            return Err(PoseError::Config(format!("KLDiscretLoss: beta must be positive, got {}", self.beta)));
        }
        check_loss_weight("KLDiscretLoss", self.loss_weight)?;

        Ok(KLDiscretLoss {
            config: self.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct KLDiscretLoss {
    config: KLDiscretLossConfig,
}

impl KLDiscretLoss {
    /// `KL(labels || softmax(pred * beta))` averaged over the bins, `[B, K]`.
    fn divergence<B: Backend>(&self, pred: Tensor<B, 3>, labels: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, keypoints, _] = pred.dims();
        let beta = self.config.beta;

        let log_pt = log_softmax(pred.mul_scalar(beta), 2);
        let labels = if self.config.label_softmax {
            softmax(labels.mul_scalar(beta), 2)
        } else {
            labels
        };

        // t ln t with 0 ln 0 = 0
        let entropy = labels.clone() * labels.clone().clamp_min(1e-12).log();

        (entropy - labels * log_pt).mean_dim(2).reshape([batch, keypoints])
    }

    /// # Arguments
    /// * `output` - Predicted `[x, y]` bins, `[B, K, Wx]` and `[B, K, Hy]`.
    /// * `target` - Label distributions with the same shapes.
    /// * `weights` - Keypoint weights `[B, K]`.
    pub fn forward<B: Backend>(
        &self,
        output: [Tensor<B, 3>; 2],
        target: [Tensor<B, 3>; 2],
        weights: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>> {
        let op = "KLDiscretLoss";
        let [pred_x, pred_y] = output;
        let [gt_x, gt_y] = target;

        let [batch, keypoints, _] = check_pair(op, &pred_x, &gt_x)?;
        let [y_batch, y_keypoints, _] = check_pair(op, &pred_y, &gt_y)?;
        if [y_batch, y_keypoints] != [batch, keypoints] {
            return Err(PoseError::shape(
                op,
                format!("y bins of [{batch}, {keypoints}, _]"),
                format!("{:?}", pred_y.dims()),
            ));
        }
        let weights = keypoint_weights(op, self.config.use_target_weight, weights, [batch, keypoints])?;

        let mut losses = self.divergence(pred_x, gt_x) + self.divergence(pred_y, gt_y);
        if let Some(w) = weights {
            losses = losses * w;
        }

        Ok(losses
            .sum()
            .div_scalar(keypoints as f32)
            .mul_scalar(self.config.loss_weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Distribution, cast::ToElement};

    type B = NdArray<f32>;

    #[test]
    fn test_matching_distribution_has_zero_divergence() {
        let device = &NdArrayDevice::default();
        let logits = Tensor::<B, 3>::random([2, 3, 16], Distribution::Uniform(-2.0, 2.0), device);
        let labels = softmax(logits.clone(), 2);

        let loss = KLDiscretLossConfig::new()
            .init()
            .unwrap()
            .forward(
                [logits.clone(), logits],
                [labels.clone(), labels],
                Some(Tensor::ones([2, 3], device)),
            )
            .unwrap();

        assert!(loss.into_scalar().to_f32().abs() < 1e-5);
    }

    #[test]
    fn test_reference_value() {
        let device = &NdArrayDevice::default();
        // uniform prediction over two bins against a one-hot label: KL = ln 2, mean over bins = ln 2 / 2
        let pred = Tensor::<B, 3>::zeros([1, 1, 2], device);
        let labels = Tensor::<B, 3>::from_floats([[[1.0, 0.0]]], device);

        let loss = KLDiscretLossConfig::new()
            .with_use_target_weight(false)
            .init()
            .unwrap()
            .forward([pred.clone(), pred], [labels.clone(), labels], None)
            .unwrap();

        assert!((loss.into_scalar().to_f32() - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_zero_weights_and_scaling() {
        let device = &NdArrayDevice::default();
        let pred = Tensor::<B, 3>::random([2, 4, 8], Distribution::Uniform(-1.0, 1.0), device);
        let labels = Tensor::<B, 3>::random([2, 4, 8], Distribution::Uniform(0.0, 1.0), device);

        let run = |loss_weight: f32, weights: Tensor<B, 2>| {
            KLDiscretLossConfig::new()
                .with_label_softmax(true)
                .with_loss_weight(loss_weight)
                .init()
                .unwrap()
                .forward([pred.clone(), pred.clone()], [labels.clone(), labels.clone()], Some(weights))
                .unwrap()
                .into_scalar()
                .to_f32()
        };

        assert_eq!(run(1.0, Tensor::zeros([2, 4], device)), 0.0);
        let ones = Tensor::<B, 2>::ones([2, 4], device);
        assert_eq!(run(2.0, ones.clone()), 2.0 * run(1.0, ones));
    }

    #[test]
    fn test_gradients_are_finite() {
        type AB = Autodiff<B>;
        let device = &NdArrayDevice::default();
        let pred = Tensor::<AB, 3>::random([2, 3, 8], Distribution::Uniform(-1.0, 1.0), device).require_grad();
        let labels = Tensor::<AB, 3>::from_floats([[[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]; 3]; 2], device);

        let loss = KLDiscretLossConfig::new()
            .init()
            .unwrap()
            .forward([pred.clone(), pred.clone()], [labels.clone(), labels], Some(Tensor::ones([2, 3], device)))
            .unwrap();
        let grad = pred.grad(&loss.backward()).unwrap().into_data().to_vec::<f32>().unwrap();

        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_non_positive_beta_is_rejected() {
        assert!(KLDiscretLossConfig::new().with_beta(0.0).init().is_err());
    }

    #[test]
    fn test_weights_of_another_keypoint_count_fail() {
        let device = &NdArrayDevice::default();
        let loss = KLDiscretLossConfig::new().init().unwrap();
        let bins = || Tensor::<B, 3>::zeros([2, 4, 8], device);

        let result = loss.forward([bins(), bins()], [bins(), bins()], Some(Tensor::ones([2, 5], device)));

        assert!(matches!(result, Err(PoseError::Shape { .. })));
    }
}
