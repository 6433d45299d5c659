use burn::config::Config;
use burn::prelude::Backend;
use {argh::FromArgs, std::fmt::Debug};

use crate::codecs::CodecConfig;
use crate::data::{PoseBatcher, same_layout};
use crate::error::{PoseError, Result};
use crate::losses::LossConfig;
use crate::models::{HeadConfig, PoseHead};

pub const HEAD_CONFIG_PATH: &str = "./config/heatmap_msra_mse.json";

/// A complete keypoint head: its layers, the codec producing its targets and
/// the loss supervising it.
///
/// `target_levels` optionally lists one codec per supervision level for
/// compound losses. The head still decodes with `codec`.
///
/// ```json
/// {
///   "head": { "type": "HeatmapHead", "in_channels": 32, "out_channels": 17, "deconv_out_channels": [] },
///   "codec": { "type": "MSRAHeatmap", "input_size": [192, 256], "heatmap_size": [48, 64], ... },
///   "loss": { "type": "KeypointMSELoss", "use_target_weight": true, "loss_weight": 1.0 }
/// }
/// ```
#[derive(Config, Debug)]
pub struct PoseHeadConfig {
    pub head: HeadConfig,
    pub codec: CodecConfig,
    pub loss: LossConfig,
    #[config(default = "Vec::new()")]
    pub target_levels: Vec<CodecConfig>,
}

impl PoseHeadConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(path).map_err(|e| PoseError::Serialization(format!("{path}: {e:?}")))
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        self.save(path)?;
        Ok(())
    }

    /// Builds the codec, the loss and the head, checking that they fit together.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PoseHead<B>> {
        let codec = self.codec.init()?;
        let loss = self.loss.init()?;

        for level in &self.target_levels {
            if !same_layout(&level.init()?, &codec) {
                return Err(PoseError::Config(
                    "target_levels must produce the layout of the decoding codec".to_string(),
                ));
            }
        }
        let num_levels = self.target_levels.len().max(1);
        if let Some(level) = loss.max_level().filter(|l| *l >= num_levels) {
            return Err(PoseError::Config(format!(
                "{} reads target level {level} but only {num_levels} levels are encoded",
                loss.name()
            )));
        }

        self.head.init(codec, loss, device)
    }

    /// Batcher encoding every target level, or the decoding codec alone.
    pub fn batcher<B: Backend>(&self) -> Result<PoseBatcher<B>> {
        if self.target_levels.is_empty() {
            return Ok(PoseBatcher::new(self.codec.init()?));
        }
        let levels = self.target_levels.iter().map(|c| c.init()).collect::<Result<Vec<_>>>()?;
        PoseBatcher::multilevel(levels)
    }
}

#[derive(FromArgs, PartialEq, Debug)]
/// Top-level command.
pub struct PoseCmd {
    #[argh(subcommand)]
    pub commands: Commands,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Commands {
    Check(SubCommandCheck),
    Roundtrip(SubCommandRoundtrip),
}

#[derive(FromArgs, PartialEq, Debug)]
/// Build a head from a config file and report its codec and loss
#[argh(subcommand, name = "check")]
pub struct SubCommandCheck {
    #[argh(option)]
    /// head config path, default ./config/heatmap_msra_mse.json
    pub c: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Encode keypoints with the configured codec and decode them back to image pixels
#[argh(subcommand, name = "roundtrip")]
pub struct SubCommandRoundtrip {
    #[argh(option)]
    /// head config path, default ./config/heatmap_msra_mse.json
    pub c: Option<String>,
    #[argh(option)]
    /// JSON file holding a list of samples (keypoints in input space and bbox)
    pub k: String,
}
