use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

use super::{Loss, LossConfig};
use crate::codecs::{HeadOutput, TargetKind};
use crate::data::TargetBatch;
use crate::error::{PoseError, Result};

/// Sum of several losses over one head output, each member reading its own
/// target level.
///
/// Multi-stage heads supervise every unit with a differently blurred target,
/// e.g. three weighted MSE terms followed by an OHKM term.
#[derive(Config, Debug)]
pub struct CompoundLossConfig {
    pub losses: Vec<LossConfig>,
    /// Target level of every member. Empty reads the last level for all.
    #[config(default = "Vec::new()")]
    pub levels: Vec<usize>,
}

impl CompoundLossConfig {
    pub fn init(&self) -> Result<CompoundLoss> {
        if self.losses.is_empty() {
            return Err(PoseError::Config("CompoundLoss: no member losses".to_string()));
        }
        if !self.levels.is_empty() && self.levels.len() != self.losses.len() {
            return Err(PoseError::Config(format!(
                "CompoundLoss: {} levels for {} losses",
                self.levels.len(),
                self.losses.len()
            )));
        }

        let mut members = Vec::with_capacity(self.losses.len());
        for (i, config) in self.losses.iter().enumerate() {
            if matches!(config, LossConfig::CompoundLoss(_)) {
                return Err(PoseError::Config("CompoundLoss: members cannot be compound".to_string()));
            }
            members.push((config.init()?, self.levels.get(i).copied()));
        }

        let target_kind = members[0].0.target_kind();
        if let Some((other, _)) = members.iter().find(|(l, _)| l.target_kind() != target_kind) {
            return Err(PoseError::Config(format!(
                "CompoundLoss: {} reads {:?} targets, expected {target_kind:?}",
                other.name(),
                other.target_kind()
            )));
        }

        Ok(CompoundLoss { members, target_kind })
    }
}

#[derive(Debug, Clone)]
pub struct CompoundLoss {
    /// member and its target level, `None` for the last one
    members: Vec<(Loss, Option<usize>)>,
    target_kind: TargetKind,
}

impl CompoundLoss {
    pub fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Highest explicit target level, if any member names one.
    pub fn max_level(&self) -> Option<usize> {
        self.members.iter().filter_map(|(_, level)| *level).max()
    }

    /// # Arguments
    /// * `output` - Head output, shared by every member.
    /// * `levels` - Collated targets, one batch per level.
    pub fn forward<B: Backend>(&self, output: HeadOutput<B>, levels: &[TargetBatch<B>]) -> Result<Tensor<B, 1>> {
        let mut total: Option<Tensor<B, 1>> = None;

        for (loss, level) in &self.members {
            let batch = match level {
                Some(l) => levels.get(*l).ok_or_else(|| {
                    PoseError::shape(
                        "CompoundLoss",
                        format!("target level {l}"),
                        format!("{} levels", levels.len()),
                    )
                })?,
                None => levels.last().ok_or(PoseError::Empty {
                    op: "CompoundLoss",
                    what: "target levels",
                })?,
            };

            let value = loss.forward(output.clone(), batch)?;
            log::trace!("CompoundLoss member {} at level {level:?}", loss.name());
            total = Some(match total {
                Some(t) => t + value,
                None => value,
            });
        }

        total.ok_or(PoseError::Empty {
            op: "CompoundLoss",
            what: "member losses",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::losses::{KLDiscretLossConfig, KeypointMSELossConfig, KeypointOHKMMSELossConfig};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::cast::ToElement;

    type B = NdArray<f32>;

    fn mse(loss_weight: f32) -> LossConfig {
        LossConfig::KeypointMSELoss(
            KeypointMSELossConfig::new()
                .with_use_target_weight(true)
                .with_loss_weight(loss_weight),
        )
    }

    fn level(fill: f32) -> TargetBatch<B> {
        let device = &NdArrayDevice::default();
        TargetBatch {
            target: HeadOutput::Heatmaps(Tensor::full([1, 2, 2, 2], fill, device)),
            weights: Tensor::ones([1, 2], device),
        }
    }

    #[test]
    fn test_members_read_their_own_level() {
        let device = &NdArrayDevice::default();
        let loss = CompoundLossConfig::new(vec![mse(0.25), mse(1.0)])
            .with_levels(vec![0, 2])
            .init()
            .unwrap();
        assert_eq!(loss.max_level(), Some(2));

        let output = HeadOutput::Heatmaps(Tensor::<B, 4>::zeros([1, 2, 2, 2], device));
        let value = loss.forward(output, &[level(1.0), level(5.0), level(2.0)]).unwrap();

        // 0.25 * 1 + 1.0 * 4
        assert!((value.into_scalar().to_f32() - 4.25).abs() < 1e-6);
    }

    #[test]
    fn test_default_level_is_the_last_one() {
        let device = &NdArrayDevice::default();
        let ohkm = LossConfig::KeypointOHKMMSELoss(KeypointOHKMMSELossConfig::new().with_topk(1));
        let loss = CompoundLossConfig::new(vec![mse(1.0), ohkm]).init().unwrap();
        assert_eq!(loss.max_level(), None);

        let output = HeadOutput::Heatmaps(Tensor::<B, 4>::zeros([1, 2, 2, 2], device));
        let value = loss.forward(output, &[level(3.0), level(1.0)]).unwrap();

        // both members read the fill of 1
        assert!((value.into_scalar().to_f32() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_level_is_a_shape_error() {
        let device = &NdArrayDevice::default();
        let loss = CompoundLossConfig::new(vec![mse(1.0)])
            .with_levels(vec![3])
            .init()
            .unwrap();

        let output = HeadOutput::Heatmaps(Tensor::<B, 4>::zeros([1, 2, 2, 2], device));
        assert!(matches!(loss.forward(output.clone(), &[level(1.0)]), Err(PoseError::Shape { .. })));

        let loss = CompoundLossConfig::new(vec![mse(1.0)]).init().unwrap();
        assert!(matches!(loss.forward(output, &[]), Err(PoseError::Empty { .. })));
    }

    #[test]
    fn test_invalid_member_lists_are_rejected() {
        assert!(matches!(CompoundLossConfig::new(vec![]).init(), Err(PoseError::Config(_))));

        let mixed = CompoundLossConfig::new(vec![mse(1.0), LossConfig::KLDiscretLoss(KLDiscretLossConfig::new())]);
        assert!(matches!(mixed.init(), Err(PoseError::Config(_))));

        let short = CompoundLossConfig::new(vec![mse(1.0), mse(1.0)]).with_levels(vec![0]);
        assert!(matches!(short.init(), Err(PoseError::Config(_))));

        let nested = CompoundLossConfig::new(vec![LossConfig::CompoundLoss(CompoundLossConfig::new(vec![mse(1.0)]))]);
        assert!(matches!(nested.init(), Err(PoseError::Config(_))));
    }
}
