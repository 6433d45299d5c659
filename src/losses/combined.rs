//! Losses of the combined classification and offset target.
//!
//! The output packs three channels per keypoint (classification, x offset,
//! y offset). Both losses view it as `[B, K, 3, H * W]` and work on all
//! keypoints at once.

use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use super::{check_loss_weight, check_pair, keypoint_weights};
use crate::boxes::{GIOU_EPS, aligned_giou, offset_boxes};
use crate::error::{PoseError, Result};
use crate::tensor_ops::pixel_grid;

/// Per keypoint channels of a combined target, each `[B, K, H * W]`.
struct Channels<B: Backend> {
    cls: Tensor<B, 3>,
    off_x: Tensor<B, 3>,
    off_y: Tensor<B, 3>,
}

impl<B: Backend> Channels<B> {
    fn split(maps: Tensor<B, 4>) -> Self {
        let [batch, channels, height, width] = maps.dims();
        let keypoints = channels / 3;
        let maps = maps.reshape([batch, keypoints, 3, height * width]);

        let channel = |i: usize| maps.clone().narrow(2, i, 1).reshape([batch, keypoints, height * width]);

        Self {
            cls: channel(0),
            off_x: channel(1),
            off_y: channel(2),
        }
    }
}

/// Validates a combined output/target pair and returns `[B, K, H, W]`.
fn check_combined<B: Backend>(op: &'static str, output: &Tensor<B, 4>, target: &Tensor<B, 4>) -> Result<[usize; 4]> {
    let [batch, channels, height, width] = check_pair(op, output, target)?;
    if channels % 3 != 0 {
        return Err(PoseError::shape(op, "3 channels per keypoint", format!("{channels} channels")));
    }
    Ok([batch, channels / 3, height, width])
}

/// Weighted classification channels, both masked by the per-keypoint weight.
fn weighted_cls<B: Backend>(
    pred: Tensor<B, 3>,
    gt: Tensor<B, 3>,
    weights: Option<Tensor<B, 2>>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    match weights {
        Some(w) => {
            let [batch, keypoints, len] = pred.dims();
            let w = w.reshape([batch, keypoints, 1]).repeat_dim(2, len);
            (pred * w.clone(), gt * w)
        }
        None => (pred, gt),
    }
}

/// `0.5 * MSE(gt * pred, gt * target)` for one offset channel.
fn masked_offset_mse<B: Backend>(mask: Tensor<B, 3>, pred: Tensor<B, 3>, gt: Tensor<B, 3>) -> Tensor<B, 1> {
    (mask.clone() * pred - mask * gt).powf_scalar(2.0).mean().mul_scalar(0.5)
}

#[derive(Config, Debug)]
pub struct CombinedTargetMSELossConfig {
    #[config(default = false)]
    pub use_target_weight: bool,
    #[config(default = 1.0)]
    pub loss_weight: f32,
}

impl CombinedTargetMSELossConfig {
    pub fn init(&self) -> Result<CombinedTargetMSELoss> {
        check_loss_weight("CombinedTargetMSELoss", self.loss_weight)?;

        Ok(CombinedTargetMSELoss {
            use_target_weight: self.use_target_weight,
            loss_weight: self.loss_weight,
        })
    }
}

/// MSE on the classification maps plus MSE on the offsets inside the
/// ground-truth classification disk.
#[derive(Debug, Clone)]
pub struct CombinedTargetMSELoss {
    use_target_weight: bool,
    loss_weight: f32,
}

impl CombinedTargetMSELoss {
    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        weights: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>> {
        let op = "CombinedTargetMSELoss";
        let [batch, keypoints, _, _] = check_combined(op, &output, &target)?;
        let weights = keypoint_weights(op, self.use_target_weight, weights, [batch, keypoints])?;

        let pred = Channels::split(output);
        let gt = Channels::split(target);

        let (cls_pred, cls_gt) = weighted_cls(pred.cls, gt.cls, weights);

        // Summing per-keypoint means over [B, H * W] and dividing by K is the
        // mean over [B, K, H * W].
        let cls_loss = (cls_pred - cls_gt.clone()).powf_scalar(2.0).mean().mul_scalar(0.5);
        let x_loss = masked_offset_mse(cls_gt.clone(), pred.off_x, gt.off_x);
        let y_loss = masked_offset_mse(cls_gt, pred.off_y, gt.off_y);

        Ok((cls_loss + x_loss + y_loss).mul_scalar(self.loss_weight))
    }
}

/// Reduction of the GIoU losses of the active locations of one keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IouReduction {
    #[default]
    Mean,
    Sum,
}

#[derive(Config, Debug)]
pub struct CombinedTargetIOULossConfig {
    #[config(default = false)]
    pub use_target_weight: bool,
    #[config(default = 1.0)]
    pub loss_weight: f32,
    #[config(default = "IouReduction::Mean")]
    pub iou_reduction: IouReduction,
    /// Also add the masked offset MSE of [`CombinedTargetMSELoss`].
    #[config(default = false)]
    pub offset_mse: bool,
}

impl CombinedTargetIOULossConfig {
    pub fn init(&self) -> Result<CombinedTargetIOULoss> {
        check_loss_weight("CombinedTargetIOULoss", self.loss_weight)?;

        Ok(CombinedTargetIOULoss {
            use_target_weight: self.use_target_weight,
            loss_weight: self.loss_weight,
            iou_reduction: self.iou_reduction,
            offset_mse: self.offset_mse,
        })
    }
}

/// Classification MSE plus a GIoU loss between the boxes spanned by the
/// predicted and the ground-truth offsets at every active location.
///
/// A location is active when its (weighted) ground-truth classification is
/// non zero. The box of a location has one corner on the location and the
/// other on the location moved by the offset, see [`offset_boxes`].
#[derive(Debug, Clone)]
pub struct CombinedTargetIOULoss {
    use_target_weight: bool,
    loss_weight: f32,
    iou_reduction: IouReduction,
    offset_mse: bool,
}

impl CombinedTargetIOULoss {
    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        weights: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>> {
        let op = "CombinedTargetIOULoss";
        let device = output.device();
        let [batch, keypoints, height, width] = check_combined(op, &output, &target)?;
        let weights = keypoint_weights(op, self.use_target_weight, weights, [batch, keypoints])?;

        let pred = Channels::split(output);
        let gt = Channels::split(target);

        let (cls_pred, cls_gt) = weighted_cls(pred.cls, gt.cls, weights);
        let mut loss = (cls_pred - cls_gt.clone()).powf_scalar(2.0).mean().mul_scalar(0.5);

        if self.offset_mse {
            loss = loss
                + masked_offset_mse(cls_gt.clone(), pred.off_x.clone(), gt.off_x.clone())
                + masked_offset_mse(cls_gt.clone(), pred.off_y.clone(), gt.off_y.clone());
        }

        let len = height * width;
        let (xs, ys) = pixel_grid::<B>(height, width, &device);
        let xs = xs.reshape([1, 1, len]).repeat_dim(0, batch).repeat_dim(1, keypoints);
        let ys = ys.reshape([1, 1, len]).repeat_dim(0, batch).repeat_dim(1, keypoints);

        let pred_boxes = offset_boxes(xs.clone(), ys.clone(), pred.off_x, pred.off_y);
        let gt_boxes = offset_boxes(xs, ys, gt.off_x, gt.off_y);
        let giou_loss = aligned_giou(pred_boxes, gt_boxes, GIOU_EPS).neg().add_scalar(1.0);

        // [B, K, H * W] -> [K], reduced over the active locations of the whole batch
        let active = cls_gt.not_equal_elem(0.0).float();
        let per_keypoint = (giou_loss * active.clone()).sum_dim(2).sum_dim(0).reshape([keypoints]);

        let per_keypoint = match self.iou_reduction {
            IouReduction::Sum => per_keypoint,
            IouReduction::Mean => {
                // a keypoint without active locations has a zero sum
                let count = active.sum_dim(2).sum_dim(0).reshape([keypoints]).clamp_min(1.0);
                per_keypoint / count
            }
        };

        loss = loss + per_keypoint.sum().div_scalar(keypoints as f32);
        log::trace!("{op} over {keypoints} keypoints with {:?} reduction", self.iou_reduction);

        Ok(loss.mul_scalar(self.loss_weight))
    }
}
