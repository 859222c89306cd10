//! Epoch loop driving a [`Net`] over [`Sequence`]s.

use crate::{
    callbacks::Callback, BatchStats, Float, LineNetError, Net, Prefetcher, Result, Sequence,
    Trainer,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    /// last epoch (exclusive)
    pub epochs: usize,
    /// first epoch, greater than 0 when resuming
    pub initial_epoch: usize,
    pub prefetcher: Prefetcher,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EpochLogs {
    pub epoch: usize,
    pub loss: Float,
    pub accuracy: Float,
    pub val_loss: Option<Float>,
    pub val_accuracy: Option<Float>,
    pub learning_rate: Float,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct ClassCount {
    pub samples: usize,
    pub correct: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Evaluation {
    pub loss: Float,
    pub accuracy: Float,
    pub samples: usize,
    /// indexed by target class
    pub classes: Vec<ClassCount>,
}

/// Mean loss and accuracy of `net` over every batch of `seq`.
pub fn evaluate<S>(net: &mut Net, seq: &S, prefetcher: &Prefetcher) -> Result<Evaluation>
where
    S: Sequence + ?Sized,
{
    let mut stats = BatchStats::default();
    let mut classes = vec![ClassCount::default(); net.classes()];
    prefetcher.for_each_batch(seq, |_, batch| {
        for sample in &batch {
            net.check_sample(&sample.image, &sample.side, sample.target)?;
            stats.loss += net.cost_loss(&sample.image, &sample.side, sample.target);
            let correct = net.prediction() == sample.target;
            if correct {
                stats.correct += 1;
            }
            stats.samples += 1;

            let count = &mut classes[sample.target];
            count.samples += 1;
            count.correct += correct as usize;
        }
        Ok(())
    })?;

    Ok(Evaluation {
        loss: stats.mean_loss(),
        accuracy: stats.accuracy(),
        samples: stats.samples,
        classes,
    })
}

/// Trains `net` from `config.initial_epoch` up to `config.epochs`.
///
/// Per epoch: callbacks' `on_epoch_begin`, one pass over `train`, the
/// sequences' `on_epoch_end`, a validation pass and the callbacks'
/// `on_epoch_end` with the epoch's logs.
pub fn fit(
    net: &mut Net,
    trainer: &mut Trainer,
    train: &mut dyn Sequence,
    mut validation: Option<&mut dyn Sequence>,
    callbacks: &mut [Box<dyn Callback>],
    config: &FitConfig,
) -> Result<Vec<EpochLogs>> {
    if train.is_empty() {
        return Err(LineNetError::EmptyDataset(
            "training sequence has no batches".into(),
        ));
    }

    let mut history = Vec::new();
    for epoch in config.initial_epoch..config.epochs {
        for callback in callbacks.iter_mut() {
            callback.on_epoch_begin(epoch, net, trainer)?;
        }
        tracing::info!(
            epoch = epoch + 1,
            epochs = config.epochs,
            learning_rate = trainer.learning_rate(),
            "epoch start"
        );

        let mut stats = BatchStats::default();
        let batches = train.len();
        config.prefetcher.for_each_batch(&*train, |index, mut batch| {
            for sample in &batch {
                net.check_sample(&sample.image, &sample.side, sample.target)?;
            }
            let batch_stats = trainer.train_batch(net, &mut batch);
            tracing::debug!(
                batch = index + 1,
                batches,
                loss = batch_stats.mean_loss(),
                accuracy = batch_stats.accuracy(),
                "batch done"
            );
            stats.merge(batch_stats);
            Ok(())
        })?;
        train.on_epoch_end();

        let validation_result = match validation.as_deref_mut() {
            Some(seq) => {
                let result = evaluate(net, seq, &config.prefetcher)?;
                seq.on_epoch_end();
                Some(result)
            }
            None => None,
        };

        let logs = EpochLogs {
            epoch,
            loss: stats.mean_loss(),
            accuracy: stats.accuracy(),
            val_loss: validation_result.as_ref().map(|v| v.loss),
            val_accuracy: validation_result.as_ref().map(|v| v.accuracy),
            learning_rate: trainer.learning_rate(),
            samples: stats.samples,
        };
        tracing::info!(
            epoch = epoch + 1,
            loss = logs.loss,
            accuracy = logs.accuracy,
            val_loss = ?logs.val_loss,
            val_accuracy = ?logs.val_accuracy,
            "epoch done"
        );

        for callback in callbacks.iter_mut() {
            callback.on_epoch_end(epoch, &logs, net, trainer)?;
        }
        history.push(logs);
    }

    Ok(history)
}
