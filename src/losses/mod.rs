//! Keypoint losses.
//!
//! Every loss reduces to a single element tensor `[1]` and is built from a
//! typed config. [`LossConfig`] resolves the `type` tag of a serialized loss
//! and [`Loss`] dispatches a head output against the matching target layout.
//! A [`CompoundLoss`] sums several losses, each over its own target level.

pub mod combined;
pub mod compound;
pub mod kl_discret;
pub mod mse;
pub mod ohkm;
pub mod wing;

use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::codecs::{HeadOutput, TargetKind};
use crate::data::TargetBatch;
use crate::error::{PoseError, Result};

pub use combined::{
    CombinedTargetIOULoss, CombinedTargetIOULossConfig, CombinedTargetMSELoss,
    CombinedTargetMSELossConfig, IouReduction,
};
pub use compound::{CompoundLoss, CompoundLossConfig};
pub use kl_discret::{KLDiscretLoss, KLDiscretLossConfig};
pub use mse::{KeypointMSELoss, KeypointMSELossConfig};
pub use ohkm::{KeypointOHKMMSELoss, KeypointOHKMMSELossConfig, hard_keypoint_mean};
pub use wing::{WingLoss, WingLossConfig};

/// Loss configuration resolved from its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LossConfig {
    KeypointMSELoss(KeypointMSELossConfig),
    KeypointOHKMMSELoss(KeypointOHKMMSELossConfig),
    CombinedTargetMSELoss(CombinedTargetMSELossConfig),
    CombinedTargetIOULoss(CombinedTargetIOULossConfig),
    KLDiscretLoss(KLDiscretLossConfig),
    WingLoss(WingLossConfig),
    CompoundLoss(CompoundLossConfig),
}

impl LossConfig {
    pub fn init(&self) -> Result<Loss> {
        let loss = match self {
            LossConfig::KeypointMSELoss(c) => Loss::KeypointMse(c.init()?),
            LossConfig::KeypointOHKMMSELoss(c) => Loss::KeypointOhkm(c.init()?),
            LossConfig::CombinedTargetMSELoss(c) => Loss::CombinedTargetMse(c.init()?),
            LossConfig::CombinedTargetIOULoss(c) => Loss::CombinedTargetIou(c.init()?),
            LossConfig::KLDiscretLoss(c) => Loss::KlDiscret(c.init()?),
            LossConfig::WingLoss(c) => Loss::Wing(c.init()?),
            LossConfig::CompoundLoss(c) => Loss::Compound(c.init()?),
        };
        log::debug!("built loss {}", loss.name());
        Ok(loss)
    }
}

#[derive(Debug, Clone)]
pub enum Loss {
    KeypointMse(KeypointMSELoss),
    KeypointOhkm(KeypointOHKMMSELoss),
    CombinedTargetMse(CombinedTargetMSELoss),
    CombinedTargetIou(CombinedTargetIOULoss),
    KlDiscret(KLDiscretLoss),
    Wing(WingLoss),
    Compound(CompoundLoss),
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::KeypointMse(_) => "KeypointMSELoss",
            Loss::KeypointOhkm(_) => "KeypointOHKMMSELoss",
            Loss::CombinedTargetMse(_) => "CombinedTargetMSELoss",
            Loss::CombinedTargetIou(_) => "CombinedTargetIOULoss",
            Loss::KlDiscret(_) => "KLDiscretLoss",
            Loss::Wing(_) => "WingLoss",
            Loss::Compound(_) => "CompoundLoss",
        }
    }

    /// Kind of codec target this loss consumes.
    pub fn target_kind(&self) -> TargetKind {
        match self {
            Loss::KeypointMse(_) | Loss::KeypointOhkm(_) => TargetKind::Heatmap,
            Loss::CombinedTargetMse(_) | Loss::CombinedTargetIou(_) => TargetKind::CombinedHeatmap,
            Loss::KlDiscret(_) => TargetKind::SimCC,
            Loss::Wing(_) => TargetKind::Coordinates,
            Loss::Compound(l) => l.target_kind(),
        }
    }

    /// Highest target level the loss reads explicitly.
    pub fn max_level(&self) -> Option<usize> {
        match self {
            Loss::Compound(l) => l.max_level(),
            _ => None,
        }
    }

    /// Compares a head output with a collated target batch.
    pub fn forward<B: Backend>(&self, output: HeadOutput<B>, batch: &TargetBatch<B>) -> Result<Tensor<B, 1>> {
        self.forward_levels(output, std::slice::from_ref(batch))
    }

    /// Compares a head output with targets collated at several levels.
    ///
    /// Single losses read the last level.
    pub fn forward_levels<B: Backend>(&self, output: HeadOutput<B>, levels: &[TargetBatch<B>]) -> Result<Tensor<B, 1>> {
        if let Loss::Compound(l) = self {
            return l.forward(output, levels);
        }
        let batch = levels.last().ok_or(PoseError::Empty {
            op: self.name(),
            what: "target levels",
        })?;
        let weights = Some(batch.weights.clone());

        match (self, output, &batch.target) {
            (Loss::KeypointMse(l), HeadOutput::Heatmaps(o), HeadOutput::Heatmaps(t)) => {
                l.forward(o, t.clone(), weights)
            }
            (Loss::KeypointOhkm(l), HeadOutput::Heatmaps(o), HeadOutput::Heatmaps(t)) => {
                l.forward(o, t.clone(), weights)
            }
            (Loss::CombinedTargetMse(l), HeadOutput::Heatmaps(o), HeadOutput::Heatmaps(t)) => {
                l.forward(o, t.clone(), weights)
            }
            (Loss::CombinedTargetIou(l), HeadOutput::Heatmaps(o), HeadOutput::Heatmaps(t)) => {
                l.forward(o, t.clone(), weights)
            }
            (Loss::KlDiscret(l), HeadOutput::SimCC { x, y }, HeadOutput::SimCC { x: tx, y: ty }) => {
                l.forward([x, y], [tx.clone(), ty.clone()], weights)
            }
            (Loss::Wing(l), HeadOutput::Coordinates(o), HeadOutput::Coordinates(t)) => {
                l.forward(o, t.clone(), weights)
            }
            _ => Err(PoseError::shape(
                self.name(),
                "output and target in the layout of the loss",
                "mismatched layouts",
            )),
        }
    }
}

/// Checks that output and target agree and are not empty, returns their dims.
pub(crate) fn check_pair<B: Backend, const D: usize>(
    op: &'static str,
    output: &Tensor<B, D>,
    target: &Tensor<B, D>,
) -> Result<[usize; D]> {
    let dims = output.dims();
    if dims != target.dims() {
        return Err(PoseError::shape(
            op,
            format!("target of shape {dims:?}"),
            format!("{:?}", target.dims()),
        ));
    }
    if dims.contains(&0) {
        return Err(PoseError::Empty {
            op,
            what: "batch, keypoint or spatial dimension",
        });
    }
    Ok(dims)
}

/// Resolves the per-keypoint weights a loss should apply.
///
/// Returns `None` when weighting is disabled. With weighting enabled the
/// weights are required and must be `[B, K]`.
pub(crate) fn keypoint_weights<B: Backend>(
    op: &'static str,
    use_target_weight: bool,
    weights: Option<Tensor<B, 2>>,
    expected: [usize; 2],
) -> Result<Option<Tensor<B, 2>>> {
    if !use_target_weight {
        return Ok(None);
    }
    let weights = weights.ok_or_else(|| PoseError::shape(op, format!("weights {expected:?}"), "no weights"))?;
    if weights.dims() != expected {
        return Err(PoseError::shape(
            op,
            format!("weights {expected:?}"),
            format!("{:?}", weights.dims()),
        ));
    }
    Ok(Some(weights))
}

pub(crate) fn check_loss_weight(op: &'static str, loss_weight: f32) -> Result<()> {
    if !loss_weight.is_finite() {
        return Err(PoseError::Config(format!("{op}: loss_weight must be finite, got {loss_weight}")));
    }
    Ok(())
}
