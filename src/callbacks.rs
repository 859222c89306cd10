//! Hooks run by [`fit`](crate::fit::fit) around every epoch.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    checkpoint::{checkpoint_path, save_net},
    fit::{evaluate, EpochLogs, Evaluation},
    Float, LineNetError, Net, Prefetcher, Result, Sequence, Trainer,
};

pub trait Callback {
    fn on_epoch_begin(
        &mut self,
        _epoch: usize,
        _net: &mut Net,
        _trainer: &mut Trainer,
    ) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _epoch: usize,
        _logs: &EpochLogs,
        _net: &mut Net,
        _trainer: &mut Trainer,
    ) -> Result<()> {
        Ok(())
    }
}

/// Sets the learning rate at the beginning of every epoch. At epoch `e` the
/// rate of the largest key `k <= e + 1` applies, so a new rate takes effect
/// one epoch before its key.
pub struct LearningRateSchedule {
    schedule: BTreeMap<usize, Float>,
}

impl LearningRateSchedule {
    pub fn new(schedule: impl IntoIterator<Item = (usize, Float)>) -> Self {
        Self {
            schedule: schedule.into_iter().collect(),
        }
    }

    pub fn rate_at(&self, epoch: usize) -> Option<Float> {
        self.schedule
            .range(..=epoch + 1)
            .next_back()
            .map(|(_, rate)| *rate)
    }
}

impl Callback for LearningRateSchedule {
    fn on_epoch_begin(
        &mut self,
        epoch: usize,
        _net: &mut Net,
        trainer: &mut Trainer,
    ) -> Result<()> {
        if let Some(rate) = self.rate_at(epoch) {
            if rate != trainer.learning_rate() {
                tracing::info!(epoch = epoch + 1, learning_rate = rate, "setting learning rate");
                trainer.set_learning_rate(rate);
            }
        }
        Ok(())
    }
}

/// Makes blocks trainable again at the end of the listed epochs. The
/// optimizer starts over afterwards, as after recompiling the model.
pub struct LayerUnfreeze {
    schedule: BTreeMap<usize, Vec<String>>,
}

impl LayerUnfreeze {
    pub fn new(schedule: impl IntoIterator<Item = (usize, Vec<String>)>) -> Self {
        Self {
            schedule: schedule.into_iter().collect(),
        }
    }
}

impl Callback for LayerUnfreeze {
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        _logs: &EpochLogs,
        net: &mut Net,
        trainer: &mut Trainer,
    ) -> Result<()> {
        let Some(blocks) = self.schedule.get(&epoch) else {
            return Ok(());
        };
        for block in blocks {
            net.set_trainable(block, true)?;
            tracing::info!(block = %block, "unfreezing layer");
        }
        trainer.reset_state();
        Ok(())
    }
}

/// Saves the network after every epoch as `weights_only.<epoch + 1>.bin`.
pub struct ModelCheckpoint {
    dir: PathBuf,
}

impl ModelCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Callback for ModelCheckpoint {
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        _logs: &EpochLogs,
        net: &mut Net,
        _trainer: &mut Trainer,
    ) -> Result<()> {
        let path = checkpoint_path(&self.dir, epoch + 1);
        save_net(&path, net)?;
        tracing::info!(path = %path.display(), "saved checkpoint");
        Ok(())
    }
}

/// Appends the logs of every epoch as one JSON line.
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Callback for MetricsLog {
    fn on_epoch_end(
        &mut self,
        _epoch: usize,
        logs: &EpochLogs,
        _net: &mut Net,
        _trainer: &mut Trainer,
    ) -> Result<()> {
        let line = serde_json::to_string(logs).map_err(|source| LineNetError::Json {
            path: self.path.clone(),
            source,
        })?;
        append_line(&self.path, &line)
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| LineNetError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LineNetError::io(path, e))?;
    writeln!(file, "{line}").map_err(|e| LineNetError::io(path, e))
}

#[derive(Debug, serde::Serialize)]
struct InferenceReport<'a> {
    epoch: usize,
    #[serde(flatten)]
    evaluation: &'a Evaluation,
}

/// Evaluates a held out test sequence after every epoch and writes the result
/// to `inference_<epoch + 1>.json` in the log directory.
pub struct InferenceCallback {
    sequence: Box<dyn Sequence>,
    log_dir: PathBuf,
    prefetcher: Prefetcher,
}

impl InferenceCallback {
    pub fn new(
        sequence: Box<dyn Sequence>,
        log_dir: impl Into<PathBuf>,
        prefetcher: Prefetcher,
    ) -> Self {
        Self {
            sequence,
            log_dir: log_dir.into(),
            prefetcher,
        }
    }
}

impl Callback for InferenceCallback {
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        _logs: &EpochLogs,
        net: &mut Net,
        _trainer: &mut Trainer,
    ) -> Result<()> {
        tracing::info!("inference on test set");
        let evaluation = evaluate(net, self.sequence.as_ref(), &self.prefetcher)?;
        self.sequence.on_epoch_end();

        let path = self.log_dir.join(format!("inference_{:02}.json", epoch + 1));
        fs::create_dir_all(&self.log_dir).map_err(|e| LineNetError::io(&self.log_dir, e))?;
        let report = InferenceReport {
            epoch: epoch + 1,
            evaluation: &evaluation,
        };
        let json = serde_json::to_string_pretty(&report).map_err(|source| LineNetError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|e| LineNetError::io(&path, e))?;
        tracing::info!(
            path = %path.display(),
            loss = evaluation.loss,
            accuracy = evaluation.accuracy,
            "inference done"
        );
        Ok(())
    }
}
