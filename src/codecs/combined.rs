use burn::config::Config;
use burn::prelude::Backend;

use super::heatmap_ops::{Border, gaussian_blur, heatmap_maximum};
use super::{
    EncodedTarget, HeadOutput, KeypointCodec, Target, TargetKind, check_positive, check_size,
    heatmap_output, host_data,
};
use crate::error::{PoseError, Result};
use crate::keypoints::{PoseInstance, PoseSample};

/// Combined classification and offset target of "The Devil is in the Details:
/// Delving into Unbiased Data Processing for Human Pose Estimation" (Huang et al., CVPR 2020).
///
/// Every keypoint owns three channels: a binary disk of radius `R` around the
/// keypoint and the x / y offsets from each pixel to the keypoint divided by `R`.
#[derive(Config, Debug)]
pub struct CombinedTargetConfig {
    /// Model input size `[w, h]`.
    pub input_size: [usize; 2],
    /// Heatmap size `[w, h]`, at least 2 along each axis.
    pub heatmap_size: [usize; 2],
    /// Disk radius as a fraction of the longer heatmap side.
    #[config(default = 0.0546875)]
    pub radius_factor: f32,
    /// The classification maps are smoothed with a `2 * blur_kernel_size + 1`
    /// gaussian before the peak search.
    #[config(default = 11)]
    pub blur_kernel_size: usize,
}

impl CombinedTargetConfig {
    pub fn init(&self) -> Result<CombinedTarget> {
        check_size("CombinedTarget", "input_size", self.input_size)?;
        check_positive("CombinedTarget", "radius_factor", self.radius_factor)?;
        if self.heatmap_size.iter().any(|s| *s < 2) {
            return Err(PoseError::Config(format!(
                "CombinedTarget: heatmap_size must be at least 2 along each axis, got {:?}",
                self.heatmap_size
            )));
        }

        let [w, h] = self.heatmap_size;
        let scale = [
            (self.input_size[0] as f32 - 1.0) / (w as f32 - 1.0),
            (self.input_size[1] as f32 - 1.0) / (h as f32 - 1.0),
        ];
        let radius = self.radius_factor * w.max(h) as f32;

        Ok(CombinedTarget {
            config: self.clone(),
            scale,
            radius,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CombinedTarget {
    config: CombinedTargetConfig,
    scale: [f32; 2],
    radius: f32,
}

impl CombinedTarget {
    pub fn heatmap_size(&self) -> [usize; 2] {
        self.config.heatmap_size
    }

    /// Disk radius `R` in heatmap pixels.
    pub fn radius(&self) -> f32 {
        self.radius
    }
}

impl KeypointCodec for CombinedTarget {
    fn input_size(&self) -> [usize; 2] {
        self.config.input_size
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::CombinedHeatmap
    }

    fn encode(&self, sample: &PoseSample) -> EncodedTarget {
        let [w, h] = self.config.heatmap_size;
        let r = self.radius;
        let num_keypoints = sample.num_keypoints();

        let mut data = vec![0.0; num_keypoints * 3 * h * w];
        let mut weights = vec![0.0; num_keypoints];

        for (k, kp) in sample.keypoints.iter().enumerate() {
            if !kp.visibility.is_labeled() {
                continue;
            }

            let mu = [kp.x / self.scale[0], kp.y / self.scale[1]];
            if mu[0] - r >= w as f32 || mu[1] - r >= h as f32 || mu[0] + r + 1.0 < 0.0 || mu[1] + r + 1.0 < 0.0 {
                log::trace!("keypoint {k} at {mu:?} falls outside the heatmap");
                continue;
            }

            let maps = &mut data[k * 3 * h * w..(k + 1) * 3 * h * w];
            let (cls, offsets) = maps.split_at_mut(h * w);
            let (off_x, off_y) = offsets.split_at_mut(h * w);

            for y in 0..h {
                for x in 0..w {
                    let i = y * w + x;
                    let dx = (mu[0] - x as f32) / r;
                    let dy = (mu[1] - y as f32) / r;
                    off_x[i] = dx;
                    off_y[i] = dy;
                    cls[i] = if dx * dx + dy * dy <= 1.0 { 1.0 } else { 0.0 };
                }
            }
            weights[k] = kp.visibility.weight();
        }

        EncodedTarget {
            target: Target::Heatmaps {
                data,
                channels: num_keypoints * 3,
                height: h,
                width: w,
            },
            weights,
        }
    }

    fn decode<B: Backend>(&self, output: HeadOutput<B>) -> Result<Vec<PoseInstance>> {
        let heatmaps = heatmap_output("CombinedTarget", output, self.config.heatmap_size)?;
        let [batch, channels, h, w] = heatmaps.dims();
        if channels % 3 != 0 {
            return Err(PoseError::shape(
                "CombinedTarget",
                "3 channels per keypoint",
                format!("{channels} channels"),
            ));
        }
        let num_keypoints = channels / 3;
        let hw = h * w;

        let cls = heatmaps
            .clone()
            .reshape([batch, num_keypoints, 3, hw])
            .narrow(2, 0, 1)
            .reshape([batch, num_keypoints, h, w]);
        let kernel_size = 2 * self.config.blur_kernel_size + 1;
        let cls = host_data(gaussian_blur(cls, kernel_size, Border::Reflect101))?;
        // offsets are read unsmoothed
        let data = host_data(heatmaps)?;
        let r = self.radius;

        let mut instances = Vec::with_capacity(batch);
        for n in 0..batch {
            let mut keypoints = Vec::with_capacity(num_keypoints);
            let mut scores = Vec::with_capacity(num_keypoints);

            for k in 0..num_keypoints {
                let map = n * num_keypoints + k;
                let peak = heatmap_maximum(&cls[map * hw..(map + 1) * hw], w);

                let location = if peak.value <= 0.0 {
                    [-1.0, -1.0]
                } else {
                    let i = map * 3 * hw + peak.y * w + peak.x;
                    [
                        peak.x as f32 + data[i + hw] * r,
                        peak.y as f32 + data[i + 2 * hw] * r,
                    ]
                };

                keypoints.push([location[0] * self.scale[0], location[1] * self.scale[1]]);
                scores.push(peak.value);
            }

            instances.push(PoseInstance { keypoints, scores });
        }

        Ok(instances)
    }
}
