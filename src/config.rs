//! Run configuration, read from TOML.
//!
//! Lookup order: an explicit path, the `LINE_NET_CONFIG` environment
//! variable, `line-net.toml` in the working directory, built in defaults.

use std::path::{Path, PathBuf};

use crate::{
    data::{frames::SequenceMode, ImageShape, ImageType, BGR_MEAN},
    model::MIN_IMAGE_SIDE,
    Float, LineNetError, Method, Result,
};

pub const DEFAULT_CONFIG_NAME: &str = "line-net.toml";
pub const CONFIG_ENV: &str = "LINE_NET_CONFIG";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub seed: Option<u64>,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: Some(123),
            data: DataConfig::default(),
            model: ModelConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// directories of frame files
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    pub test: Vec<PathBuf>,
    pub batch_size: usize,
    pub bg_classes: Vec<u32>,
    /// semantic classes are `0..class_count`
    pub class_count: u32,
    pub mode: SequenceMode,
    pub img_shape: ImageShape,
    pub min_line_count: usize,
    pub max_line_count: usize,
    pub max_cluster_count: Option<usize>,
    pub mean: Vec<Float>,
    pub pretrain: PretrainData,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train: Vec::new(),
            val: Vec::new(),
            test: Vec::new(),
            batch_size: 2,
            bg_classes: vec![0, 1, 2, 20, 22],
            class_count: 41,
            mode: SequenceMode::Lines,
            img_shape: ImageShape::default(),
            min_line_count: 30,
            max_line_count: 160,
            max_cluster_count: Some(15),
            mean: BGR_MEAN.to_vec(),
            pretrain: PretrainData::default(),
        }
    }
}

impl DataConfig {
    /// Every class below `class_count` that is not background.
    pub fn valid_classes(&self) -> Vec<u32> {
        (0..self.class_count)
            .filter(|c| !self.bg_classes.contains(c))
            .collect()
    }

    /// Background plus one output per valid class.
    pub fn num_classes(&self) -> usize {
        1 + self.valid_classes().len()
    }
}

/// Inputs of the image pretraining run: label files or line archives.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PretrainData {
    pub label_files: Vec<PathBuf>,
    pub val_label_files: Vec<PathBuf>,
    pub archives: Vec<PathBuf>,
    pub val_archives: Vec<PathBuf>,
    pub image_type: ImageType,
    pub horizontal_flip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// crop features fused with line geometry
    #[default]
    Line,
    /// crop features only
    Pretrain,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// checkpoint of a pretraining run; its image blocks are loaded by name
    pub image_weights: Option<PathBuf>,
    /// blocks that start out frozen
    pub frozen: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Line,
            image_weights: None,
            frozen: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearningRateStep {
    pub epoch: usize,
    pub learning_rate: Float,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnfreezeStep {
    pub epoch: usize,
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resume {
    pub log_dir: PathBuf,
    pub epoch: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: Float,
    pub method: Method,
    pub momentum: Float,
    pub l1_decay: Float,
    pub l2_decay: Float,
    pub workers: usize,
    pub max_queue_size: usize,
    /// defaults to `logs/cluster_<unix seconds>`
    pub log_dir: Option<PathBuf>,
    pub lr_schedule: Vec<LearningRateStep>,
    pub unfreeze: Vec<UnfreezeStep>,
    pub resume: Option<Resume>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 40,
            learning_rate: 0.00005,
            method: Method::default(),
            momentum: 0.0,
            l1_decay: 0.0,
            l2_decay: 0.0,
            workers: 4,
            max_queue_size: 16,
            log_dir: None,
            lr_schedule: vec![
                LearningRateStep {
                    epoch: 10,
                    learning_rate: 0.000025,
                },
                LearningRateStep {
                    epoch: 15,
                    learning_rate: 0.00001,
                },
                LearningRateStep {
                    epoch: 20,
                    learning_rate: 0.000005,
                },
            ],
            unfreeze: Vec::new(),
            resume: None,
        }
    }
}

impl Config {
    /// Resolves the config file (see module docs) and validates it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = path {
            Self::from_path(path)?
        } else if let Ok(path) = std::env::var(CONFIG_ENV) {
            Self::from_path(Path::new(&path))?
        } else if Path::new(DEFAULT_CONFIG_NAME).exists() {
            Self::from_path(Path::new(DEFAULT_CONFIG_NAME))?
        } else {
            tracing::info!("no config file found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| LineNetError::io(path, e))?;
        let config = toml::from_str(&raw).map_err(|source| LineNetError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        let invalid = |msg: String| Err(LineNetError::Config(msg));

        if data.batch_size == 0 {
            return invalid("data.batch_size must be positive".into());
        }
        if data.min_line_count > data.max_line_count {
            return invalid(format!(
                "data.min_line_count ({}) exceeds data.max_line_count ({})",
                data.min_line_count, data.max_line_count
            ));
        }
        if data.max_cluster_count == Some(0) {
            return invalid("data.max_cluster_count must be positive".into());
        }
        let shape = data.img_shape;
        if shape.width < MIN_IMAGE_SIDE || shape.height < MIN_IMAGE_SIDE {
            return invalid(format!(
                "data.img_shape is {}x{}, the image branch needs {m}x{m} or more",
                shape.width,
                shape.height,
                m = MIN_IMAGE_SIDE
            ));
        }
        if self.model.kind == ModelKind::Line && shape.channels != 3 {
            return invalid(format!(
                "line crops are bgr images, data.img_shape.channels is {}",
                shape.channels
            ));
        }
        if self.model.kind == ModelKind::Pretrain
            && shape.channels != data.pretrain.image_type.channels()
        {
            return invalid(format!(
                "{} images have {} channels, data.img_shape.channels is {}",
                data.pretrain.image_type,
                data.pretrain.image_type.channels(),
                shape.channels
            ));
        }
        let pretrain = &data.pretrain;
        if !pretrain.label_files.is_empty() && !pretrain.archives.is_empty() {
            return invalid("data.pretrain reads label_files or archives, not both".into());
        }
        if data.valid_classes().is_empty() {
            return invalid("every class is a background class".into());
        }
        if self.training.learning_rate <= 0.0 {
            return invalid("training.learning_rate must be positive".into());
        }
        if let Some(resume) = &self.training.resume {
            if resume.epoch > self.training.epochs {
                return invalid(format!(
                    "cannot resume at epoch {} of {}",
                    resume.epoch, self.training.epochs
                ));
            }
        }
        Ok(())
    }
}
