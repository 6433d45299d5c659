use burn::config::Config;
use burn::prelude::Backend;

use super::{EncodedTarget, HeadOutput, KeypointCodec, Target, TargetKind, check_positive, check_size, host_data};
use crate::error::{PoseError, Result};
use crate::keypoints::{PoseInstance, PoseSample};

/// Coordinate classification codec of "SimCC: a Simple Coordinate
/// Classification Perspective for Human Pose Estimation" (Li et al., ECCV 2022).
///
/// Each axis is split into `size * simcc_split_ratio` bins and a keypoint is
/// encoded as a 1D gaussian over the bins of each axis.
#[derive(Config, Debug)]
pub struct SimCCLabelConfig {
    /// Model input size `[w, h]`.
    pub input_size: [usize; 2],
    /// Standard deviation of the label gaussian in bins.
    pub sigma: f32,
    #[config(default = 2.0)]
    pub simcc_split_ratio: f32,
    /// Divide the labels by `sigma * sqrt(2 pi)`.
    #[config(default = false)]
    pub normalize: bool,
}

impl SimCCLabelConfig {
    pub fn init(&self) -> Result<SimCCLabel> {
        check_size("SimCCLabel", "input_size", self.input_size)?;
        check_positive("SimCCLabel", "sigma", self.sigma)?;
        check_positive("SimCCLabel", "simcc_split_ratio", self.simcc_split_ratio)?;

        let bins = [
            (self.input_size[0] as f32 * self.simcc_split_ratio).round() as usize,
            (self.input_size[1] as f32 * self.simcc_split_ratio).round() as usize,
        ];
        check_size("SimCCLabel", "bins", bins)?;

        Ok(SimCCLabel {
            config: self.clone(),
            bins,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimCCLabel {
    config: SimCCLabelConfig,
    bins: [usize; 2],
}

impl SimCCLabel {
    /// `[x_bins, y_bins]`
    pub fn bins(&self) -> [usize; 2] {
        self.bins
    }

    fn gaussian(&self, mu: f32, bins: usize) -> Vec<f32> {
        let sigma = self.config.sigma;
        let norm = if self.config.normalize {
            sigma * (2.0 * std::f32::consts::PI).sqrt()
        } else {
            1.0
        };
        (0..bins)
            .map(|i| {
                let d = i as f32 - mu;
                (-(d * d) / (2.0 * sigma * sigma)).exp() / norm
            })
            .collect()
    }
}

/// Argmax and max value of every row of a row-major `[rows, len]` buffer.
fn row_maximum(data: &[f32], len: usize) -> Vec<(usize, f32)> {
    data.chunks(len)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, v)| if *v > best.1 { (i, *v) } else { best })
        })
        .collect()
}

impl KeypointCodec for SimCCLabel {
    fn input_size(&self) -> [usize; 2] {
        self.config.input_size
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::SimCC
    }

    fn encode(&self, sample: &PoseSample) -> EncodedTarget {
        let [x_bins, y_bins] = self.bins;
        let ratio = self.config.simcc_split_ratio;
        let radius = 3.0 * self.config.sigma;
        let num_keypoints = sample.num_keypoints();

        let mut x = vec![0.0; num_keypoints * x_bins];
        let mut y = vec![0.0; num_keypoints * y_bins];
        let mut weights = vec![0.0; num_keypoints];

        for (k, kp) in sample.keypoints.iter().enumerate() {
            if !kp.visibility.is_labeled() {
                continue;
            }
            let mu = [kp.x * ratio, kp.y * ratio];

            if mu[0] - radius >= x_bins as f32
                || mu[1] - radius >= y_bins as f32
                || mu[0] + radius + 1.0 < 0.0
                || mu[1] + radius + 1.0 < 0.0
            {
                log::trace!("keypoint {k} at {mu:?} falls outside the simcc bins");
                continue;
            }

            x[k * x_bins..(k + 1) * x_bins].copy_from_slice(&self.gaussian(mu[0], x_bins));
            y[k * y_bins..(k + 1) * y_bins].copy_from_slice(&self.gaussian(mu[1], y_bins));
            weights[k] = kp.visibility.weight();
        }

        EncodedTarget {
            target: Target::SimCC { x, y, x_bins, y_bins },
            weights,
        }
    }

    fn decode<B: Backend>(&self, output: HeadOutput<B>) -> Result<Vec<PoseInstance>> {
        let (x, y) = match output {
            HeadOutput::SimCC { x, y } => (x, y),
            _ => return Err(PoseError::shape("SimCCLabel", "simcc output", "non simcc output")),
        };

        let [batch, num_keypoints, x_bins] = x.dims();
        let [y_batch, y_keypoints, y_bins] = y.dims();
        if [batch, num_keypoints] != [y_batch, y_keypoints] || [x_bins, y_bins] != self.bins {
            return Err(PoseError::shape(
                "SimCCLabel",
                format!("[B, K, {}] and [B, K, {}]", self.bins[0], self.bins[1]),
                format!("{:?} and {:?}", x.dims(), y.dims()),
            ));
        }
        if batch == 0 || num_keypoints == 0 {
            return Err(PoseError::Empty {
                op: "SimCCLabel",
                what: "simcc batch",
            });
        }

        let ratio = self.config.simcc_split_ratio;
        let x_max = row_maximum(&host_data(x)?, x_bins);
        let y_max = row_maximum(&host_data(y)?, y_bins);

        let instances = (0..batch)
            .map(|n| {
                let rows = n * num_keypoints..(n + 1) * num_keypoints;
                let (keypoints, scores) = x_max[rows.clone()]
                    .iter()
                    .zip(&y_max[rows])
                    .map(|(&(lx, vx), &(ly, vy))| {
                        let score = vx.min(vy);
                        let location = if score <= 0.0 {
                            [-1.0, -1.0]
                        } else {
                            [lx as f32, ly as f32]
                        };
                        ([location[0] / ratio, location[1] / ratio], score)
                    })
                    .unzip();
                PoseInstance { keypoints, scores }
            })
            .collect();

        Ok(instances)
    }
}
