//! Wires a [`Config`] into sequences, a network, callbacks and [`fit`].

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    callbacks::{
        Callback, InferenceCallback, LayerUnfreeze, LearningRateSchedule, MetricsLog,
        ModelCheckpoint,
    },
    checkpoint::{checkpoint_path, load_net},
    config::{Config, ModelKind},
    data::{
        frames::{FrameConfig, FrameSequence},
        generator::{GeneratorConfig, ImageDataGenerator},
        LINE_NUM_ATTR,
    },
    fit::{evaluate, fit, EpochLogs, Evaluation, FitConfig},
    model::{image_pretrain, line_net},
    LineNetError, Net, Prefetcher, Result, Sequence, Trainer,
};

pub const METRICS_FILE: &str = "metrics.jsonl";

#[derive(Debug)]
pub struct TrainOutcome {
    pub log_dir: PathBuf,
    pub history: Vec<EpochLogs>,
}

#[derive(Debug, Clone, Copy)]
enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    fn is_train(self) -> bool {
        matches!(self, Split::Train)
    }
}

fn prefetcher(config: &Config) -> Prefetcher {
    Prefetcher {
        workers: config.training.workers,
        max_queue_size: config.training.max_queue_size,
    }
}

fn frame_config(config: &Config, split: Split) -> FrameConfig {
    let data = &config.data;
    FrameConfig {
        batch_size: data.batch_size,
        bg_classes: data.bg_classes.clone(),
        valid_classes: data.valid_classes(),
        mode: data.mode,
        shuffle: split.is_train(),
        data_augmentation: split.is_train(),
        img_shape: data.img_shape,
        min_line_count: data.min_line_count,
        max_line_count: data.max_line_count,
        max_cluster_count: data.max_cluster_count,
        mean: data.mean.clone(),
        seed: config.seed,
    }
}

fn generator_config(config: &Config, split: Split) -> GeneratorConfig {
    let data = &config.data;
    GeneratorConfig {
        horizontal_flip: split.is_train() && data.pretrain.horizontal_flip,
        shuffle: split.is_train(),
        image_type: data.pretrain.image_type,
        mean: data.mean.clone(),
        scale_size: (data.img_shape.width, data.img_shape.height),
        batch_size: data.batch_size,
        seed: config.seed,
    }
}

/// The sequence of `split`, `None` when the config names no data for it.
fn sequence(config: &Config, split: Split) -> Result<Option<Box<dyn Sequence>>> {
    match config.model.kind {
        ModelKind::Line => {
            let dirs = match split {
                Split::Train => &config.data.train,
                Split::Val => &config.data.val,
                Split::Test => &config.data.test,
            };
            if dirs.is_empty() {
                return Ok(None);
            }
            let seq = FrameSequence::new(dirs, frame_config(config, split))?;
            Ok(Some(Box::new(seq)))
        }
        ModelKind::Pretrain => {
            let pretrain = &config.data.pretrain;
            let (label_files, archives) = match split {
                Split::Train => (&pretrain.label_files, &pretrain.archives),
                Split::Val => (&pretrain.val_label_files, &pretrain.val_archives),
                Split::Test => return Ok(None),
            };
            let gen_config = generator_config(config, split);
            let generator = if !archives.is_empty() {
                ImageDataGenerator::from_archives(archives, gen_config)?
            } else if !label_files.is_empty() {
                ImageDataGenerator::from_label_files(label_files, gen_config)?
            } else {
                return Ok(None);
            };
            Ok(Some(Box::new(generator)))
        }
    }
}

/// A freshly initialized network for `config.model.kind`.
pub fn build_model(config: &Config) -> Net {
    let data = &config.data;
    match config.model.kind {
        ModelKind::Line => line_net(data.img_shape, LINE_NUM_ATTR + 1, data.num_classes()),
        ModelKind::Pretrain => image_pretrain(data.img_shape, data.class_count as usize),
    }
}

/// `(input dims, side length, classes)` of the net `config` trains.
fn expected_layout(config: &Config) -> ((usize, usize, usize), usize, usize) {
    let data = &config.data;
    let shape = data.img_shape;
    let input = (shape.width, shape.height, shape.channels);
    match config.model.kind {
        ModelKind::Line => (input, LINE_NUM_ATTR + 1, data.num_classes()),
        ModelKind::Pretrain => (input, 0, data.class_count as usize),
    }
}

/// Errors when a loaded network cannot consume what the configured
/// sequences emit.
fn check_net(net: &Net, config: &Config, path: &Path) -> Result<()> {
    let expected = expected_layout(config);
    let found = (net.input_dims(), net.side_len(), net.classes());
    if found != expected {
        return Err(LineNetError::Config(format!(
            "{} takes (input, side, classes) {found:?}, a {:?} run feeds {expected:?}",
            path.display(),
            config.model.kind
        )));
    }
    Ok(())
}

fn default_log_dir() -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    PathBuf::from("logs").join(format!("cluster_{secs}"))
}

fn log_dir(config: &Config) -> PathBuf {
    if let Some(resume) = &config.training.resume {
        return resume.log_dir.clone();
    }
    config.training.log_dir.clone().unwrap_or_else(default_log_dir)
}

/// Loads the checkpoint to resume from, or builds a new network with the
/// pretrained image weights and the configured blocks frozen.
fn initial_model(config: &Config) -> Result<(Net, usize)> {
    if let Some(resume) = &config.training.resume {
        let path = checkpoint_path(&resume.log_dir, resume.epoch);
        let net = load_net(&path)?;
        check_net(&net, config, &path)?;
        tracing::info!(path = %path.display(), epoch = resume.epoch, "resuming");
        return Ok((net, resume.epoch));
    }

    let mut net = build_model(config);
    if let Some(path) = &config.model.image_weights {
        let mut source = load_net(path)?;
        if source.input_dims() != net.input_dims() {
            return Err(LineNetError::Config(format!(
                "{} takes {:?} images, data.img_shape is {:?}",
                path.display(),
                source.input_dims(),
                net.input_dims()
            )));
        }
        let copied = net.load_weights_by_name(&mut source);
        tracing::info!(path = %path.display(), blocks = ?copied, "loaded image weights");
    }
    for block in &config.model.frozen {
        net.set_trainable(block, false)?;
    }
    Ok((net, 0))
}

fn save_config(config: &Config, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir).map_err(|e| LineNetError::io(log_dir, e))?;
    let raw = toml::to_string_pretty(config)
        .map_err(|e| LineNetError::Config(format!("cannot serialize config: {e}")))?;
    let path = log_dir.join("config.toml");
    std::fs::write(&path, raw).map_err(|e| LineNetError::io(&path, e))
}

/// Runs a full training from `config`. Checkpoints, `metrics.jsonl`, the
/// inference reports and a copy of the config end up in the log directory.
pub fn train(config: &Config) -> Result<TrainOutcome> {
    config.validate()?;
    let log_dir = log_dir(config);
    save_config(config, &log_dir)?;
    tracing::info!(log_dir = %log_dir.display(), kind = ?config.model.kind, "starting training");

    let mut train_seq = sequence(config, Split::Train)?
        .ok_or_else(|| LineNetError::EmptyDataset("no training data configured".into()))?;
    let mut val_seq = sequence(config, Split::Val)?;
    let test_seq = sequence(config, Split::Test)?;

    let (mut net, initial_epoch) = initial_model(config)?;
    let training = &config.training;
    let mut trainer = Trainer::builder()
        .learning_rate(training.learning_rate)
        .method(training.method)
        .momentum(training.momentum)
        .l1_decay(training.l1_decay)
        .l2_decay(training.l2_decay)
        .build();

    let prefetcher = prefetcher(config);
    let mut callbacks: Vec<Box<dyn Callback>> = Vec::new();
    if !training.lr_schedule.is_empty() {
        callbacks.push(Box::new(LearningRateSchedule::new(
            training
                .lr_schedule
                .iter()
                .map(|step| (step.epoch, step.learning_rate)),
        )));
    }
    if !training.unfreeze.is_empty() {
        callbacks.push(Box::new(LayerUnfreeze::new(
            training
                .unfreeze
                .iter()
                .map(|step| (step.epoch, step.layers.clone())),
        )));
    }
    callbacks.push(Box::new(ModelCheckpoint::new(&log_dir)));
    callbacks.push(Box::new(MetricsLog::new(log_dir.join(METRICS_FILE))));
    if let Some(test_seq) = test_seq {
        callbacks.push(Box::new(InferenceCallback::new(
            test_seq,
            &log_dir,
            prefetcher,
        )));
    }

    let fit_config = FitConfig {
        epochs: training.epochs,
        initial_epoch,
        prefetcher,
    };
    let validation: Option<&mut dyn Sequence> = match val_seq.as_mut() {
        Some(seq) => Some(seq.as_mut()),
        None => None,
    };
    let history = fit(
        &mut net,
        &mut trainer,
        train_seq.as_mut(),
        validation,
        &mut callbacks,
        &fit_config,
    )?;

    Ok(TrainOutcome { log_dir, history })
}

/// Evaluates a saved network on the test data, or the validation data when
/// no test data is configured.
pub fn evaluate_checkpoint(config: &Config, checkpoint: &Path) -> Result<Evaluation> {
    config.validate()?;
    let mut net = load_net(checkpoint)?;
    check_net(&net, config, checkpoint)?;
    let seq = match sequence(config, Split::Test)? {
        Some(seq) => seq,
        None => sequence(config, Split::Val)?
            .ok_or_else(|| LineNetError::EmptyDataset("no test or validation data".into()))?,
    };
    evaluate(&mut net, seq.as_ref(), &prefetcher(config))
}
