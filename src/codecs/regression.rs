use burn::config::Config;
use burn::prelude::Backend;

use super::{EncodedTarget, HeadOutput, KeypointCodec, Target, TargetKind, check_size, host_data};
use crate::error::{PoseError, Result};
use crate::keypoints::{PoseInstance, PoseSample};

/// Direct coordinate regression of "DeepPose" (Toshev and Szegedy, CVPR 2014),
/// with keypoints normalized by the input size.
#[derive(Config, Debug)]
pub struct RegressionLabelConfig {
    /// Model input size `[w, h]`.
    pub input_size: [usize; 2],
}

impl RegressionLabelConfig {
    pub fn init(&self) -> Result<RegressionLabel> {
        check_size("RegressionLabel", "input_size", self.input_size)?;
        Ok(RegressionLabel {
            config: self.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RegressionLabel {
    config: RegressionLabelConfig,
}

impl KeypointCodec for RegressionLabel {
    fn input_size(&self) -> [usize; 2] {
        self.config.input_size
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Coordinates
    }

    fn encode(&self, sample: &PoseSample) -> EncodedTarget {
        let [w, h] = self.config.input_size.map(|v| v as f32);

        let mut data = Vec::with_capacity(sample.num_keypoints() * 2);
        let weights = sample
            .keypoints
            .iter()
            .map(|kp| {
                data.extend([kp.x / w, kp.y / h]);
                let inside = (0.0..=w - 1.0).contains(&kp.x) && (0.0..=h - 1.0).contains(&kp.y);
                if inside { kp.visibility.weight() } else { 0.0 }
            })
            .collect();

        EncodedTarget {
            target: Target::Coordinates { data },
            weights,
        }
    }

    fn decode<B: Backend>(&self, output: HeadOutput<B>) -> Result<Vec<PoseInstance>> {
        let coords = match output {
            HeadOutput::Coordinates(t) => t,
            _ => {
                return Err(PoseError::shape(
                    "RegressionLabel",
                    "coordinate output [B, K, 2]",
                    "non coordinate output",
                ));
            }
        };

        let [batch, num_keypoints, dims] = coords.dims();
        if dims < 2 {
            return Err(PoseError::shape("RegressionLabel", "[B, K, 2]", format!("{:?}", coords.dims())));
        }
        if batch == 0 || num_keypoints == 0 {
            return Err(PoseError::Empty {
                op: "RegressionLabel",
                what: "coordinate batch",
            });
        }

        let [w, h] = self.config.input_size.map(|v| v as f32);
        let data = host_data(coords)?;

        let instances = data
            .chunks(num_keypoints * dims)
            .map(|sample| PoseInstance {
                keypoints: sample.chunks(dims).map(|p| [p[0] * w, p[1] * h]).collect(),
                scores: vec![1.0; num_keypoints],
            })
            .collect();

        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoints::{BBoxMeta, Keypoint, Visibility};
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::{Tensor, TensorData};

    type B = NdArray<f32>;

    fn sample(keypoints: Vec<Keypoint>) -> PoseSample {
        PoseSample::new(
            keypoints,
            BBoxMeta {
                center: [128.0, 128.0],
                scale: [256.0, 256.0],
            },
        )
    }

    #[test]
    fn test_encode_normalizes_and_masks() {
        let codec = RegressionLabelConfig::new([256, 128]).init().unwrap();

        let encoded = codec.encode(&sample(vec![
            Keypoint::visible(64.0, 32.0),
            Keypoint::new(64.0, 32.0, Visibility::NotLabeled),
            Keypoint::visible(256.0, 32.0),
            Keypoint::new(0.0, 127.0, Visibility::Invisible),
        ]));

        assert_eq!(encoded.weights, vec![1.0, 0.0, 0.0, 1.0]);
        let Target::Coordinates { data } = encoded.target else {
            panic!("expected coordinates");
        };
        assert_eq!(&data[..2], &[0.25, 0.25]);
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn test_round_trip() {
        let device = &NdArrayDevice::default();
        let codec = RegressionLabelConfig::new([256, 128]).init().unwrap();
        let keypoints = vec![Keypoint::visible(64.0, 32.0), Keypoint::visible(200.5, 17.25)];

        let encoded = codec.encode(&sample(keypoints.clone()));
        let Target::Coordinates { data } = encoded.target else {
            panic!("expected coordinates");
        };
        let output = Tensor::<B, 3>::from_data(TensorData::new(data, [1, 2, 2]), device);

        let decoded = codec.decode(HeadOutput::Coordinates(output)).unwrap();

        for (kp, out) in keypoints.iter().zip(&decoded[0].keypoints) {
            assert!((kp.x - out[0]).abs() < 1e-4);
            assert!((kp.y - out[1]).abs() < 1e-4);
        }
        assert_eq!(decoded[0].scores, vec![1.0, 1.0]);
    }

    #[test]
    fn test_decode_rejects_heatmaps() {
        let device = &NdArrayDevice::default();
        let codec = RegressionLabelConfig::new([256, 128]).init().unwrap();

        let result = codec.decode(HeadOutput::Heatmaps(Tensor::<B, 4>::zeros([1, 1, 4, 4], device)));

        assert!(matches!(result, Err(PoseError::Shape { .. })));
    }
}
