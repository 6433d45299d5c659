use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

use super::{check_loss_weight, check_pair, keypoint_weights};
use crate::error::{PoseError, Result};

/// Wing loss of "Wing Loss for Robust Facial Landmark Localisation with
/// Convolutional Neural Networks" (Feng et al., CVPR 2018).
///
/// ```text
///          ⎧ ω ⋅ ln(1 + |x| / ε)    if |x| < ω
///  wing(x) ⎨
///          ⎩ |x| - C                 otherwise,   C = ω - ω ⋅ ln(1 + ω / ε)
/// ```
#[derive(Config, Debug)]
pub struct WingLossConfig {
    /// Width of the non-linear part.
    #[config(default = 10.0)]
    pub omega: f32,
    /// Curvature of the non-linear part.
    #[config(default = 2.0)]
    pub epsilon: f32,
    #[config(default = false)]
    pub use_target_weight: bool,
    #[config(default = 1.0)]
    pub loss_weight: f32,
}

impl WingLossConfig {
    pub fn init(&self) -> Result<WingLoss> {
        if !(self.omega > 0.0 && self.epsilon > 0.0) {
            return Err(PoseError::Config(format!(
                "WingLoss: omega and epsilon must be positive, got {} and {}",
                self.omega, self.epsilon
            )));
        }
        check_loss_weight("WingLoss", self.loss_weight)?;

        let c = self.omega - self.omega * (1.0 + self.omega / self.epsilon).ln();
        Ok(WingLoss {
            config: self.clone(),
            c,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WingLoss {
    config: WingLossConfig,
    /// Joins the two pieces continuously at `|x| = omega`.
    c: f32,
}

impl WingLoss {
    /// # Arguments
    /// * `output` - Predicted coordinates `[B, K, 2]`.
    /// * `target` - Target coordinates `[B, K, 2]`.
    /// * `weights` - Keypoint weights `[B, K]`, required when `use_target_weight` is set.
    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 3>,
        target: Tensor<B, 3>,
        weights: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>> {
        let [batch, keypoints, dims] = check_pair("WingLoss", &output, &target)?;
        let weights = keypoint_weights("WingLoss", self.config.use_target_weight, weights, [batch, keypoints])?;

        let (output, target) = match weights {
            Some(w) => {
                let w = w.reshape([batch, keypoints, 1]).repeat_dim(2, dims);
                (output * w.clone(), target * w)
            }
            None => (output, target),
        };

        let WingLossConfig { omega, epsilon, .. } = self.config;
        let delta = (target - output).abs();

        let near = delta.clone().lower_elem(omega);
        let log_part = delta.clone().div_scalar(epsilon).log1p().mul_scalar(omega);
        let losses = delta.sub_scalar(self.c).mask_where(near, log_part);

        // sum over keypoints and axes, mean over the batch
        Ok(losses
            .sum_dim(2)
            .sum_dim(1)
            .mean()
            .mul_scalar(self.config.loss_weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};
    use burn::tensor::cast::ToElement;

    type B = NdArray<f32>;

    fn wing(delta: f32) -> f32 {
        let (omega, epsilon) = (10.0f32, 2.0f32);
        if delta < omega {
            omega * (1.0 + delta / epsilon).ln()
        } else {
            delta - (omega - omega * (1.0 + omega / epsilon).ln())
        }
    }

    #[test]
    fn test_reference_value() {
        let device = &NdArrayDevice::default();
        let output = Tensor::<B, 3>::from_floats([[[0.0, 1.0], [4.0, 20.0]], [[0.0, 0.0], [0.0, 0.0]]], device);
        let target = Tensor::<B, 3>::from_floats([[[0.0, 0.0], [0.0, 0.0]], [[2.0, 0.0], [0.0, 0.0]]], device);

        let loss = WingLossConfig::new().init().unwrap().forward(output, target, None).unwrap();

        let expected = ((wing(1.0) + wing(4.0) + wing(20.0)) + wing(2.0)) / 2.0;
        assert!((loss.into_scalar().to_f32() - expected).abs() < 1e-4);
    }

    #[test]
    fn test_pieces_join_at_omega() {
        let loss = WingLossConfig::new().init().unwrap();
        let left = 10.0 * (1.0f32 + 10.0 / 2.0).ln();
        assert!((left - (10.0 - loss.c)).abs() < 1e-4);
    }

    #[test]
    fn test_zero_weights_give_zero() {
        let device = &NdArrayDevice::default();
        let output = Tensor::<B, 3>::ones([2, 5, 2], device);
        let target = Tensor::<B, 3>::zeros([2, 5, 2], device);

        let loss = WingLossConfig::new()
            .with_use_target_weight(true)
            .init()
            .unwrap()
            .forward(output, target, Some(Tensor::zeros([2, 5], device)))
            .unwrap();

        assert_eq!(loss.into_scalar().to_f32(), 0.0);
    }

    #[test]
    fn test_gradient_sign() {
        type AB = Autodiff<B>;
        let device = &NdArrayDevice::default();
        let output = Tensor::<AB, 3>::from_floats([[[1.0, -30.0]]], device).require_grad();
        let target = Tensor::<AB, 3>::zeros([1, 1, 2], device);

        let loss = WingLossConfig::new().init().unwrap().forward(output.clone(), target, None).unwrap();
        let grad = output.grad(&loss.backward()).unwrap().into_data().to_vec::<f32>().unwrap();

        // ω / (ε + |x|) inside the wing, unit slope outside
        assert!((grad[0] - 10.0 / 3.0).abs() < 1e-4);
        assert!((grad[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_loss_weight_scales_exactly() {
        let device = &NdArrayDevice::default();
        let output = Tensor::<B, 3>::from_floats([[[0.5, -3.0], [12.0, 1.0]]], device);
        let target = Tensor::<B, 3>::zeros([1, 2, 2], device);

        let run = |loss_weight: f32| {
            WingLossConfig::new()
                .with_loss_weight(loss_weight)
                .init()
                .unwrap()
                .forward(output.clone(), target.clone(), None)
                .unwrap()
                .into_scalar()
                .to_f32()
        };

        assert_eq!(run(2.0), 2.0 * run(1.0));
    }

    #[test]
    fn test_weights_of_another_keypoint_count_fail() {
        let device = &NdArrayDevice::default();
        let loss = WingLossConfig::new().with_use_target_weight(true).init().unwrap();

        let result = loss.forward(
            Tensor::<B, 3>::zeros([2, 5, 2], device),
            Tensor::<B, 3>::zeros([2, 5, 2], device),
            Some(Tensor::ones([2, 4], device)),
        );

        assert!(matches!(result, Err(crate::error::PoseError::Shape { .. })));
    }
}
