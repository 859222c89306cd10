use crate::{vol::Vol, Float};

use super::{dot, LayerDetails, NetLayer};

/// Fully connected layer over the flattened input.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DenseLayer {
    num_inputs: usize,
    l2_decay_mul: Float,
    filters: Vec<Vol>,
    biases: Vol,
}

impl DenseLayer {
    pub fn new(neurons: usize, in_sx: usize, in_sy: usize, in_depth: usize, bias: Float) -> Self {
        let num_inputs = in_sx * in_sy * in_depth;
        Self {
            num_inputs,
            l2_decay_mul: 1.0,
            filters: (0..neurons).map(|_| Vol::new(1, 1, num_inputs)).collect(),
            biases: Vol::with_constant(1, 1, neurons, bias),
        }
    }
}

#[typetag::serde]
impl NetLayer for DenseLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.len(), self.num_inputs);
        let neurons = self.filters.iter().zip(&self.biases.w);
        for (out, (filter, bias)) in out_act.w.iter_mut().zip(neurons) {
            *out = bias + dot(&filter.w, &in_act.w);
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.dw.fill(0.0);
        let neurons = self.filters.iter_mut().zip(&mut self.biases.dw);
        for ((filter, bias_grad), grad) in neurons.zip(&out_act.dw) {
            let inputs = in_act.w.iter().zip(in_act.dw.iter_mut());
            let weights = filter.w.iter().zip(filter.dw.iter_mut());
            for ((x, dx), (w, dw)) in inputs.zip(weights) {
                *dx += w * grad;
                *dw += x * grad;
            }
            *bias_grad += grad;
        }
    }

    fn out_sx(&self) -> usize {
        1
    }
    fn out_sy(&self) -> usize {
        1
    }
    fn out_depth(&self) -> usize {
        self.filters.len()
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let l2 = self.l2_decay_mul;
        self.filters
            .iter_mut()
            .map(|filter| LayerDetails::of(filter, 0.0, l2))
            .chain(std::iter::once(LayerDetails::of(&mut self.biases, 0.0, 0.0)))
            .collect()
    }
}
