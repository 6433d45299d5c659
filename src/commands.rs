use burn::prelude::Backend;

use crate::codecs::KeypointCodec;
use crate::config::PoseHeadConfig;
use crate::error::Result;
use crate::keypoints::{PoseInstance, PoseSample};
use crate::models::KeypointHead;

/// Builds the head described by a config file.
pub fn check<B: Backend>(config_path: &str, device: &B::Device) -> Result<()> {
    let config = PoseHeadConfig::from_file(config_path)?;
    let head = config.init::<B>(device)?;

    log::info!(
        "{config_path}: {} with {} over {:?} targets, input size {:?}",
        head.name(),
        head.loss_fn().name(),
        head.codec().target_kind(),
        head.codec().input_size()
    );
    Ok(())
}

/// Encodes the samples of a keypoint file with the configured codec and
/// decodes the collated targets back to image pixels.
pub fn roundtrip<B: Backend>(config_path: &str, samples_path: &str, device: &B::Device) -> Result<Vec<PoseInstance>> {
    let config = PoseHeadConfig::from_file(config_path)?;
    let codec = config.codec.init()?;

    let samples: Vec<PoseSample> = serde_json::from_str(&std::fs::read_to_string(samples_path)?)?;
    log::info!("loaded {} samples from {samples_path}", samples.len());

    let input_size = codec.input_size();
    let batch = config.batcher::<B>()?.batch(&samples, device)?;
    let decoded = codec.decode(batch.target)?;

    Ok(decoded
        .iter()
        .zip(&samples)
        .map(|(instance, sample)| instance.to_image_space(&sample.bbox, input_size))
        .collect())
}
