use burn::config::Config;
use burn::prelude::Backend;

use super::heatmap_ops::{blur_keep_max, dark_offset, heatmap_maximum, quarter_offset};
use super::{
    EncodedTarget, HeadOutput, KeypointCodec, Target, TargetKind, check_positive, check_size,
    heatmap_output, host_data,
};
use crate::error::Result;
use crate::keypoints::{PoseInstance, PoseSample};

/// Range the smoothed heatmaps are clipped to before taking the log.
const LOG_MIN: f32 = 1e-3;
const LOG_MAX: f32 = 50.0;

/// Gaussian heatmap codec of "Simple Baselines for Human Pose Estimation and Tracking"
/// (Xiao et al., ECCV 2018).
///
/// With `unbiased` the gaussian is centered on the exact sub-pixel location and
/// decoding uses the distribution aware refinement of "Distribution-Aware
/// Coordinate Representation for Human Pose Estimation" (Zhang et al., CVPR 2020).
#[derive(Config, Debug)]
pub struct MsraHeatmapConfig {
    /// Model input size `[w, h]`.
    pub input_size: [usize; 2],
    /// Heatmap size `[w, h]`.
    pub heatmap_size: [usize; 2],
    /// Standard deviation of the gaussian in heatmap pixels.
    pub sigma: f32,
    #[config(default = false)]
    pub unbiased: bool,
    /// Kernel used to smooth the heatmaps before the unbiased refinement.
    #[config(default = 11)]
    pub blur_kernel_size: usize,
}

impl MsraHeatmapConfig {
    pub fn init(&self) -> Result<MsraHeatmap> {
        check_size("MSRAHeatmap", "input_size", self.input_size)?;
        check_size("MSRAHeatmap", "heatmap_size", self.heatmap_size)?;
        check_positive("MSRAHeatmap", "sigma", self.sigma)?;
        if self.unbiased && self.blur_kernel_size % 2 == 0 {
            return Err(crate::error::PoseError::Config(format!(
                "MSRAHeatmap: blur_kernel_size must be odd, got {}",
                self.blur_kernel_size
            )));
        }

        let scale = [
            self.input_size[0] as f32 / self.heatmap_size[0] as f32,
            self.input_size[1] as f32 / self.heatmap_size[1] as f32,
        ];

        Ok(MsraHeatmap {
            config: self.clone(),
            scale,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MsraHeatmap {
    config: MsraHeatmapConfig,
    /// input pixels per heatmap pixel
    scale: [f32; 2],
}

impl MsraHeatmap {
    pub fn heatmap_size(&self) -> [usize; 2] {
        self.config.heatmap_size
    }

    pub fn scale(&self) -> [f32; 2] {
        self.scale
    }

    /// Writes a gaussian truncated to `3 sigma` around the rounded center.
    ///
    /// Returns `false` when the window misses the heatmap entirely.
    fn draw_gaussian(&self, map: &mut [f32], mu: [f32; 2]) -> bool {
        let [w, h] = self.config.heatmap_size;
        let sigma = self.config.sigma;
        let radius = (3.0 * sigma) as i64;

        let mx = (mu[0] + 0.5).floor() as i64;
        let my = (mu[1] + 0.5).floor() as i64;

        let (left, top) = (mx - radius, my - radius);
        let (right, bottom) = (mx + radius + 1, my + radius + 1);

        if left >= w as i64 || top >= h as i64 || right < 0 || bottom < 0 {
            return false;
        }

        for y in top.max(0)..bottom.min(h as i64) {
            for x in left.max(0)..right.min(w as i64) {
                let dx = (x - mx) as f32;
                let dy = (y - my) as f32;
                map[y as usize * w + x as usize] = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            }
        }
        true
    }

    /// Writes a gaussian centered on the exact location over the whole heatmap.
    fn draw_unbiased_gaussian(&self, map: &mut [f32], mu: [f32; 2]) -> bool {
        let [w, h] = self.config.heatmap_size;
        let sigma = self.config.sigma;
        let radius = 3.0 * sigma;

        if mu[0] - radius >= w as f32
            || mu[1] - radius >= h as f32
            || mu[0] + radius + 1.0 < 0.0
            || mu[1] + radius + 1.0 < 0.0
        {
            return false;
        }

        for y in 0..h {
            for x in 0..w {
                let dx = x as f32 - mu[0];
                let dy = y as f32 - mu[1];
                map[y * w + x] = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            }
        }
        true
    }
}

impl KeypointCodec for MsraHeatmap {
    fn input_size(&self) -> [usize; 2] {
        self.config.input_size
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Heatmap
    }

    fn encode(&self, sample: &PoseSample) -> EncodedTarget {
        let [w, h] = self.config.heatmap_size;
        let num_keypoints = sample.num_keypoints();

        let mut data = vec![0.0; num_keypoints * h * w];
        let mut weights = vec![0.0; num_keypoints];

        for (k, kp) in sample.keypoints.iter().enumerate() {
            if !kp.visibility.is_labeled() {
                continue;
            }

            let mu = [kp.x / self.scale[0], kp.y / self.scale[1]];
            let map = &mut data[k * h * w..(k + 1) * h * w];

            let inside = if self.config.unbiased {
                self.draw_unbiased_gaussian(map, mu)
            } else {
                self.draw_gaussian(map, mu)
            };

            if inside {
                weights[k] = kp.visibility.weight();
            } else {
                log::trace!("keypoint {k} at {mu:?} falls outside the heatmap");
            }
        }

        EncodedTarget {
            target: Target::Heatmaps {
                data,
                channels: num_keypoints,
                height: h,
                width: w,
            },
            weights,
        }
    }

    fn decode<B: Backend>(&self, output: HeadOutput<B>) -> Result<Vec<PoseInstance>> {
        let heatmaps = heatmap_output("MSRAHeatmap", output, self.config.heatmap_size)?;
        let [batch, num_keypoints, h, w] = heatmaps.dims();

        // the refinement reads the log of the smoothed maps, the peak comes from the raw ones
        let log_maps = if self.config.unbiased {
            let smoothed = blur_keep_max(heatmaps.clone(), self.config.blur_kernel_size);
            Some(host_data(smoothed.clamp(LOG_MIN, LOG_MAX).log())?)
        } else {
            None
        };
        let data = host_data(heatmaps)?;

        let mut instances = Vec::with_capacity(batch);
        for n in 0..batch {
            let mut keypoints = Vec::with_capacity(num_keypoints);
            let mut scores = Vec::with_capacity(num_keypoints);

            for k in 0..num_keypoints {
                let start = (n * num_keypoints + k) * h * w;
                let map = &data[start..start + h * w];
                let peak = heatmap_maximum(map, w);

                let location = if peak.value <= 0.0 {
                    [-1.0, -1.0]
                } else {
                    let offset = match &log_maps {
                        Some(log_maps) => dark_offset(&log_maps[start..start + h * w], h, w, peak.x, peak.y),
                        None => quarter_offset(map, h, w, peak.x, peak.y),
                    };
                    [peak.x as f32 + offset[0], peak.y as f32 + offset[1]]
                };

                keypoints.push([location[0] * self.scale[0], location[1] * self.scale[1]]);
                scores.push(peak.value);
            }

            instances.push(PoseInstance { keypoints, scores });
        }

        Ok(instances)
    }
}
