use std::marker::PhantomData;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::Backend;
use burn::tensor::{Device, Tensor, TensorData};

use crate::codecs::{Codec, EncodedTarget, HeadOutput, KeypointCodec, Target};
use crate::error::{PoseError, Result};
use crate::keypoints::PoseSample;

/// Collated training targets of a batch.
///
/// `target` has the layout of the head output it supervises.
#[derive(Debug, Clone)]
pub struct TargetBatch<B: Backend> {
    pub target: HeadOutput<B>,
    /// `[B, K]`
    pub weights: Tensor<B, 2>,
}

impl<B: Backend> TargetBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.weights.dims()[0]
    }

    pub fn num_keypoints(&self) -> usize {
        self.weights.dims()[1]
    }
}

/// Encodes samples and stacks the targets on a device.
///
/// A multi-level batcher encodes every sample once per codec, producing one
/// [`TargetBatch`] per level for heads supervised at several blur levels.
/// Single level batching uses the last codec.
#[derive(Debug, Clone)]
pub struct PoseBatcher<B: Backend> {
    levels: Vec<Codec>,
    _backend: PhantomData<B>,
}

impl<B: Backend> PoseBatcher<B> {
    pub fn new(codec: Codec) -> Self {
        Self {
            levels: vec![codec],
            _backend: PhantomData,
        }
    }

    /// One codec per target level. Every level must produce the same layout.
    pub fn multilevel(levels: Vec<Codec>) -> Result<Self> {
        let Some(first) = levels.first() else {
            return Err(PoseError::Empty {
                op: "PoseBatcher",
                what: "codec levels",
            });
        };
        if let Some(other) = levels.iter().find(|c| !same_layout(first, c)) {
            return Err(PoseError::Config(format!(
                "PoseBatcher: {:?} level with input size {:?} does not match the first level",
                other.target_kind(),
                other.input_size()
            )));
        }

        Ok(Self {
            levels,
            _backend: PhantomData,
        })
    }

    /// Codec of the last level.
    pub fn codec(&self) -> &Codec {
        // never empty
        &self.levels[self.levels.len() - 1]
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Targets of the last level.
    pub fn batch(&self, samples: &[PoseSample], device: &Device<B>) -> Result<TargetBatch<B>> {
        let keypoints = check_samples(samples)?;
        self.encode(self.codec(), samples, keypoints, device)
    }

    /// Targets of every level, in level order.
    pub fn batch_levels(&self, samples: &[PoseSample], device: &Device<B>) -> Result<Vec<TargetBatch<B>>> {
        let keypoints = check_samples(samples)?;
        self.levels
            .iter()
            .map(|codec| self.encode(codec, samples, keypoints, device))
            .collect()
    }

    fn encode(&self, codec: &Codec, samples: &[PoseSample], keypoints: usize, device: &Device<B>) -> Result<TargetBatch<B>> {
        let encoded: Vec<EncodedTarget> = samples.iter().map(|s| codec.encode(s)).collect();
        log::trace!("encoded {} samples with {:?} targets", encoded.len(), codec.target_kind());

        collate(encoded, keypoints, device)
    }
}

impl<B: Backend> Batcher<B, PoseSample, Result<Vec<TargetBatch<B>>>> for PoseBatcher<B> {
    fn batch(&self, items: Vec<PoseSample>, device: &Device<B>) -> Result<Vec<TargetBatch<B>>> {
        self.batch_levels(&items, device)
    }
}

/// Whether two codecs produce targets of the same kind and shape.
pub(crate) fn same_layout(a: &Codec, b: &Codec) -> bool {
    a.target_kind() == b.target_kind()
        && a.input_size() == b.input_size()
        && a.heatmap_size() == b.heatmap_size()
        && a.simcc_bins() == b.simcc_bins()
}

/// Returns the shared keypoint count of a non-empty batch.
fn check_samples(samples: &[PoseSample]) -> Result<usize> {
    let Some(first) = samples.first() else {
        return Err(PoseError::Empty {
            op: "PoseBatcher",
            what: "sample batch",
        });
    };

    let keypoints = first.num_keypoints();
    if keypoints == 0 {
        return Err(PoseError::Empty {
            op: "PoseBatcher",
            what: "keypoint list",
        });
    }
    if let Some(other) = samples.iter().find(|s| s.num_keypoints() != keypoints) {
        return Err(PoseError::shape(
            "PoseBatcher",
            format!("{keypoints} keypoints per sample"),
            format!("{} keypoints", other.num_keypoints()),
        ));
    }
    Ok(keypoints)
}

fn collate<B: Backend>(encoded: Vec<EncodedTarget>, keypoints: usize, device: &Device<B>) -> Result<TargetBatch<B>> {
    let batch = encoded.len();

    let mut weights = Vec::with_capacity(batch * keypoints);
    let mut targets = Vec::with_capacity(batch);
    for e in encoded {
        weights.extend(e.weights);
        targets.push(e.target);
    }

    let target = match targets.first() {
        Some(Target::Heatmaps {
            channels, height, width, ..
        }) => {
            let shape = [batch, *channels, *height, *width];
            let mut data = Vec::with_capacity(shape.iter().product());
            for t in targets {
                if let Target::Heatmaps { data: d, .. } = t {
                    data.extend(d);
                }
            }
            HeadOutput::Heatmaps(Tensor::from_data(TensorData::new(data, shape), device))
        }
        Some(Target::SimCC { x_bins, y_bins, .. }) => {
            let (x_shape, y_shape) = ([batch, keypoints, *x_bins], [batch, keypoints, *y_bins]);
            let mut xs = Vec::with_capacity(x_shape.iter().product());
            let mut ys = Vec::with_capacity(y_shape.iter().product());
            for t in targets {
                if let Target::SimCC { x, y, .. } = t {
                    xs.extend(x);
                    ys.extend(y);
                }
            }
            HeadOutput::SimCC {
                x: Tensor::from_data(TensorData::new(xs, x_shape), device),
                y: Tensor::from_data(TensorData::new(ys, y_shape), device),
            }
        }
        Some(Target::Coordinates { .. }) => {
            let mut data = Vec::with_capacity(batch * keypoints * 2);
            for t in targets {
                if let Target::Coordinates { data: d } = t {
                    data.extend(d);
                }
            }
            HeadOutput::Coordinates(Tensor::from_data(TensorData::new(data, [batch, keypoints, 2]), device))
        }
        None => {
            return Err(PoseError::Empty {
                op: "PoseBatcher",
                what: "sample batch",
            });
        }
    };

    Ok(TargetBatch {
        target,
        weights: Tensor::from_data(TensorData::new(weights, [batch, keypoints]), device),
    })
}
