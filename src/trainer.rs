use crate::{net::Net, sequence::TrainSample, utils::zeros, Float};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Method {
    Sgd,
    Adadelta { ro: Float, eps: Float },
    Adam { eps: Float, beta1: Float, beta2: Float },
}

impl Default for Method {
    fn default() -> Self {
        Method::Adam {
            eps: 1e-8,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

/// Loss and accuracy accumulated over the samples of one or more batches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub loss: Float,
    pub decay_loss: Float,
    pub correct: usize,
    pub samples: usize,
}

impl BatchStats {
    pub fn merge(&mut self, other: BatchStats) {
        self.loss += other.loss;
        self.decay_loss += other.decay_loss;
        self.correct += other.correct;
        self.samples += other.samples;
    }

    pub fn mean_loss(&self) -> Float {
        if self.samples == 0 {
            0.0
        } else {
            self.loss / self.samples as Float
        }
    }

    pub fn accuracy(&self) -> Float {
        if self.samples == 0 {
            0.0
        } else {
            self.correct as Float / self.samples as Float
        }
    }
}

pub struct Trainer {
    learning_rate: Float,
    l1_decay: Float,
    l2_decay: Float,
    method: Method,
    momentum: Float,

    /// update counter
    k: usize,

    // last iteration gradients (used for momentum calculations)
    gsum: Vec<Vec<Float>>,

    // used in adam or adadelta
    xsum: Vec<Vec<Float>>,
}

impl Trainer {
    pub fn builder() -> TrainerBuilder {
        TrainerBuilder::new()
    }

    pub fn learning_rate(&self) -> Float {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, value: Float) {
        self.learning_rate = value;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Forgets momentum and moment estimates, as after recompiling a model.
    pub fn reset_state(&mut self) {
        self.k = 0;
        self.gsum.clear();
        self.xsum.clear();
    }

    /// Forward and backward pass for every sample, then one parameter update
    /// with the gradient averaged over the batch.
    pub fn train_batch(&mut self, net: &mut Net, samples: &mut [TrainSample]) -> BatchStats {
        let mut stats = BatchStats::default();
        for sample in samples.iter_mut() {
            net.forward(&sample.image, &sample.side, true);
            if net.prediction() == sample.target {
                stats.correct += 1;
            }
            stats.loss += net.backward(sample.target, &mut sample.image);
            stats.samples += 1;
        }

        if stats.samples > 0 {
            stats.decay_loss = self.update(net, stats.samples);
        }
        stats
    }

    fn update(&mut self, net: &mut Net, batch_size: usize) -> Float {
        let mut l1_decay_loss = 0.0;
        let mut l2_decay_loss = 0.0;

        self.k += 1;
        let mut pg_list = net.params_and_grads();

        // initialize lists for accumulators. Will only be done once on first iteration
        if self.gsum.is_empty() && (self.method != Method::Sgd || self.momentum > 0.0) {
            // only vanilla sgd doesnt need either lists
            // momentum needs gsum
            // adam and adadelta needs gsum and xsum
            for pg in &pg_list {
                self.gsum.push(zeros(pg.params.len()));
                if matches!(self.method, Method::Adam { .. } | Method::Adadelta { .. }) {
                    self.xsum.push(zeros(pg.params.len()));
                } else {
                    // conserve memory
                    self.xsum.push(Vec::new());
                }
            }
        }

        // perform an update for all sets of weights
        for (i, pg) in pg_list.iter_mut().enumerate() {
            if !pg.trainable {
                pg.grads.fill(0.0);
                continue;
            }

            let l2_decay = self.l2_decay * pg.l2_decay_mul;
            let l1_decay = self.l1_decay * pg.l1_decay_mul;

            for j in 0..pg.params.len() {
                let p = pg.params[j];
                // accumulate weight decay loss
                l2_decay_loss += l2_decay * p * p / 2.0;
                l1_decay_loss += l1_decay * p.abs();

                let l1grad = l1_decay * if p > 0.0 { 1.0 } else { -1.0 };
                let l2grad = l2_decay * p;

                // raw batch gradient
                let gij = (l2grad + l1grad + pg.grads[j]) / batch_size as Float;

                match self.method {
                    Method::Adam { eps, beta1, beta2 } => {
                        let gsumi = &mut self.gsum[i];
                        let xsumi = &mut self.xsum[i];
                        // update biased first and second moment estimates
                        gsumi[j] = gsumi[j] * beta1 + (1.0 - beta1) * gij;
                        xsumi[j] = xsumi[j] * beta2 + (1.0 - beta2) * gij * gij;
                        // correct bias
                        let bias_corr1 = gsumi[j] / (1.0 - beta1.powi(self.k as i32));
                        let bias_corr2 = xsumi[j] / (1.0 - beta2.powi(self.k as i32));
                        let dx = -self.learning_rate * bias_corr1 / (bias_corr2.sqrt() + eps);
                        pg.params[j] += dx;
                    }
                    Method::Adadelta { ro, eps } => {
                        let gsumi = &mut self.gsum[i];
                        let xsumi = &mut self.xsum[i];
                        gsumi[j] = ro * gsumi[j] + (1.0 - ro) * gij * gij;
                        let dx = -((xsumi[j] + eps) / (gsumi[j] + eps)).sqrt() * gij;
                        // yes, xsum lags behind gsum by 1.
                        xsumi[j] = ro * xsumi[j] + (1.0 - ro) * dx * dx;
                        pg.params[j] += dx;
                    }
                    Method::Sgd if self.momentum > 0.0 => {
                        let gsumi = &mut self.gsum[i];
                        let dx = self.momentum * gsumi[j] - self.learning_rate * gij;
                        gsumi[j] = dx;
                        pg.params[j] += dx;
                    }
                    Method::Sgd => {
                        // vanilla sgd
                        pg.params[j] += -self.learning_rate * gij;
                    }
                }
                pg.grads[j] = 0.0;
            }
        }

        l1_decay_loss + l2_decay_loss
    }
}

pub struct TrainerBuilder {
    learning_rate: Float,
    l1_decay: Float,
    l2_decay: Float,
    method: Method,
    momentum: Float,
}

impl TrainerBuilder {
    fn new() -> Self {
        Self {
            learning_rate: 0.01,
            l1_decay: 0.0,
            l2_decay: 0.0,
            method: Method::Sgd,
            momentum: 0.9,
        }
    }

    pub fn learning_rate(mut self, value: Float) -> Self {
        self.learning_rate = value;
        self
    }

    pub fn l1_decay(mut self, value: Float) -> Self {
        self.l1_decay = value;
        self
    }

    pub fn l2_decay(mut self, value: Float) -> Self {
        self.l2_decay = value;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn momentum(mut self, value: Float) -> Self {
        self.momentum = value;
        self
    }

    pub fn build(self) -> Trainer {
        Trainer {
            learning_rate: self.learning_rate,
            l1_decay: self.l1_decay,
            l2_decay: self.l2_decay,
            method: self.method,
            momentum: self.momentum,
            k: 0,
            gsum: vec![],
            xsum: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Activation, EndLayer, Layer, Net, TrainSample, Vol};

    use super::*;

    fn net() -> Net {
        let mut net = Net::new(
            &[
                Layer::Input {
                    width: 1,
                    height: 1,
                    depth: 2,
                },
                Layer::Fuse { extra: 1 },
                Layer::Dense {
                    neurons: 4,
                    activation: Activation::Relu,
                },
            ],
            EndLayer::Softmax { classes: 2 },
        );
        // fixed small weights; dense1 biases keep every relu active
        for (j, details) in net.params_and_grads().into_iter().enumerate() {
            for (i, w) in details.params.iter_mut().enumerate() {
                *w = if j == 4 {
                    0.5
                } else {
                    0.1 * (((i + j) % 3) as Float - 1.0)
                };
            }
        }
        net
    }

    fn samples() -> Vec<TrainSample> {
        vec![
            TrainSample::new(Vol::from(vec![1.0, 0.0]), vec![1.0], 0),
            TrainSample::new(Vol::from(vec![0.0, 1.0]), vec![-1.0], 1),
        ]
    }

    fn params(net: &mut Net) -> Vec<Vec<Float>> {
        net.params_and_grads()
            .into_iter()
            .map(|d| d.params.to_vec())
            .collect()
    }

    #[test]
    fn every_method_lowers_the_loss() {
        let methods = [
            (Method::Sgd, 0.1),
            (
                Method::Adadelta {
                    ro: 0.95,
                    eps: 1e-6,
                },
                1.0,
            ),
            (Method::default(), 0.01),
        ];
        for (method, lr) in methods {
            let mut net = net();
            let mut trainer = Trainer::builder().method(method).learning_rate(lr).build();

            let first = trainer.train_batch(&mut net, &mut samples());
            let mut last = first;
            for _ in 0..200 {
                last = trainer.train_batch(&mut net, &mut samples());
            }
            assert_eq!(last.samples, 2);
            assert!(
                last.mean_loss() < first.mean_loss(),
                "{method:?}: {} !< {}",
                last.mean_loss(),
                first.mean_loss()
            );
        }
    }

    #[test]
    fn frozen_blocks_keep_their_weights() {
        let mut net = net();
        net.set_trainable("dense1", false).unwrap();
        let before = params(&mut net);

        let mut trainer = Trainer::builder().learning_rate(0.1).build();
        trainer.train_batch(&mut net, &mut samples());
        let after = params(&mut net);

        // dense1: 4 filters + biases, frozen
        assert_eq!(before[..5], after[..5]);
        assert_ne!(before[5..], after[5..]);
        // gradients of frozen blocks are discarded
        assert!(net
            .params_and_grads()
            .iter()
            .all(|d| d.grads.iter().all(|g| *g == 0.0)));
    }

    #[test]
    fn stats_average_over_samples() {
        let mut stats = BatchStats::default();
        stats.merge(BatchStats {
            loss: 3.0,
            decay_loss: 0.0,
            correct: 1,
            samples: 2,
        });
        stats.merge(BatchStats {
            loss: 1.0,
            decay_loss: 0.0,
            correct: 2,
            samples: 2,
        });
        assert_eq!(stats.mean_loss(), 1.0);
        assert_eq!(stats.accuracy(), 0.75);
        assert_eq!(BatchStats::default().accuracy(), 0.0);
    }
}
