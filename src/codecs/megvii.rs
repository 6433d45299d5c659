use burn::config::Config;
use burn::prelude::Backend;

use super::heatmap_ops::{Border, blur_host_maps, blur_keep_max, heatmap_maximum, sign};
use super::{
    EncodedTarget, HeadOutput, KeypointCodec, Target, TargetKind, check_size, heatmap_output,
    host_data,
};
use crate::error::{PoseError, Result};
use crate::keypoints::{PoseInstance, PoseSample};

/// Peak value of an encoded Megvii heatmap.
const PEAK: f32 = 255.0;

/// Heatmap codec of the MSPN / RSN family: a one-hot map blurred with a
/// gaussian kernel, with per-stage kernel sizes chosen by the model config.
#[derive(Config, Debug)]
pub struct MegviiHeatmapConfig {
    /// Model input size `[w, h]`.
    pub input_size: [usize; 2],
    /// Heatmap size `[w, h]`.
    pub heatmap_size: [usize; 2],
    /// Odd gaussian kernel size.
    pub kernel_size: usize,
}

impl MegviiHeatmapConfig {
    pub fn init(&self) -> Result<MegviiHeatmap> {
        check_size("MegviiHeatmap", "input_size", self.input_size)?;
        check_size("MegviiHeatmap", "heatmap_size", self.heatmap_size)?;
        if self.kernel_size % 2 == 0 {
            return Err(PoseError::Config(format!(
                "MegviiHeatmap: kernel_size must be odd, got {}",
                self.kernel_size
            )));
        }

        let scale = [
            self.input_size[0] as f32 / self.heatmap_size[0] as f32,
            self.input_size[1] as f32 / self.heatmap_size[1] as f32,
        ];

        Ok(MegviiHeatmap {
            config: self.clone(),
            scale,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MegviiHeatmap {
    config: MegviiHeatmapConfig,
    scale: [f32; 2],
}

impl MegviiHeatmap {
    pub fn heatmap_size(&self) -> [usize; 2] {
        self.config.heatmap_size
    }
}

impl KeypointCodec for MegviiHeatmap {
    fn input_size(&self) -> [usize; 2] {
        self.config.input_size
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Heatmap
    }

    fn encode(&self, sample: &PoseSample) -> EncodedTarget {
        let [w, h] = self.config.heatmap_size;
        let num_keypoints = sample.num_keypoints();

        let mut one_hot = vec![0.0; num_keypoints * h * w];
        let mut peaks = Vec::with_capacity(num_keypoints);
        let mut weights = vec![0.0; num_keypoints];

        for (k, kp) in sample.keypoints.iter().enumerate() {
            if !kp.visibility.is_labeled() {
                continue;
            }

            // truncation toward zero
            let kx = (kp.x / self.scale[0]) as i64;
            let ky = (kp.y / self.scale[1]) as i64;
            if kx < 0 || kx >= w as i64 || ky < 0 || ky >= h as i64 {
                continue;
            }

            let at = k * h * w + ky as usize * w + kx as usize;
            one_hot[at] = 1.0;
            peaks.push((k, at));
            weights[k] = kp.visibility.weight();
        }

        let mut data = if peaks.is_empty() {
            one_hot
        } else {
            blur_host_maps(one_hot, [num_keypoints, h, w], self.config.kernel_size, Border::Reflect101)
        };
        for (k, at) in peaks {
            let peak = data[at];
            for v in &mut data[k * h * w..(k + 1) * h * w] {
                *v = *v / peak * PEAK;
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
        let heatmaps = heatmap_output("MegviiHeatmap", output, self.config.heatmap_size)?;
        let [batch, num_keypoints, h, w] = heatmaps.dims();
        let data = host_data(blur_keep_max(heatmaps, self.config.kernel_size))?;

        let mut instances = Vec::with_capacity(batch);
        for n in 0..batch {
            let mut keypoints = Vec::with_capacity(num_keypoints);
            let mut scores = Vec::with_capacity(num_keypoints);

            for k in 0..num_keypoints {
                let start = (n * num_keypoints + k) * h * w;
                let map = &data[start..start + h * w];

                let peak = heatmap_maximum(map, w);
                let (px, py) = (peak.x, peak.y);

                let mut location = if peak.value <= 0.0 {
                    [-1.0, -1.0]
                } else {
                    [px as f32, py as f32]
                };

                if peak.value > 0.0 && 1 < px && px + 1 < w && 1 < py && py + 1 < h {
                    let dx = map[py * w + px + 1] - map[py * w + px - 1];
                    let dy = map[(py + 1) * w + px] - map[(py - 1) * w + px];
                    location[0] += sign(dx) * 0.25 + 0.5;
                    location[1] += sign(dy) * 0.25 + 0.5;
                }

                keypoints.push([location[0] * self.scale[0], location[1] * self.scale[1]]);
                scores.push(peak.value / PEAK + 0.5);
            }

            instances.push(PoseInstance { keypoints, scores });
        }

        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoints::{BBoxMeta, Keypoint};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Tensor, TensorData};

    type B = NdArray<f32>;

    fn sample(keypoints: Vec<Keypoint>) -> PoseSample {
        PoseSample::new(
            keypoints,
            BBoxMeta {
                center: [96.0, 128.0],
                scale: [192.0, 256.0],
            },
        )
    }

    #[test]
    fn test_encode_normalizes_peak() {
        let codec = MegviiHeatmapConfig::new([192, 256], [48, 64], 11).init().unwrap();

        let encoded = codec.encode(&sample(vec![
            Keypoint::visible(41.0, 103.0),
            Keypoint::visible(500.0, 10.0),
        ]));

        assert_eq!(encoded.weights, vec![1.0, 0.0]);
        let Target::Heatmaps { data, .. } = encoded.target else {
            panic!("expected heatmaps");
        };
        // trunc(41 / 4) = 10, trunc(103 / 4) = 25
        assert!((data[25 * 48 + 10] - 255.0).abs() < 1e-3);
        let max = data[..64 * 48].iter().cloned().fold(f32::MIN, f32::max);
        assert!((max - 255.0).abs() < 1e-3);
    }

    #[test]
    fn test_round_trip_on_cell_center() {
        let device = &NdArrayDevice::default();
        let codec = MegviiHeatmapConfig::new([192, 256], [48, 64], 7).init().unwrap();

        // cell (10, 25) has its center at (42, 102) in input space
        let encoded = codec.encode(&sample(vec![Keypoint::visible(42.0, 102.0)]));
        let Target::Heatmaps { data, .. } = encoded.target else {
            panic!("expected heatmaps");
        };

        let output = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 1, 64, 48]), device);
        let decoded = codec.decode(HeadOutput::Heatmaps(output)).unwrap();

        let out = decoded[0].keypoints[0];
        // a quarter cell at most from rounding in the blurred neighbours
        assert!((out[0] - 42.0).abs() <= 1.01, "{out:?}");
        assert!((out[1] - 102.0).abs() <= 1.01, "{out:?}");
        assert!((decoded[0].scores[0] - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_even_kernel_is_rejected() {
        assert!(MegviiHeatmapConfig::new([192, 256], [48, 64], 8).init().is_err());
    }
}
