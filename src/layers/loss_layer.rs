use crate::{vol::Vol, Float};

use super::{FinalLayer, LayerDetails};

/// Softmax over the incoming activations with a negative log likelihood
/// loss against one class index. Ends every classification net.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct SoftmaxLayer {
    out_depth: usize,

    #[serde(skip)]
    es: Vec<Float>,
}

impl SoftmaxLayer {
    pub fn new(in_sx: usize, in_sy: usize, in_depth: usize) -> Self {
        let num_inputs = in_sx * in_sy * in_depth;
        Self {
            out_depth: num_inputs,
            es: vec![0.0; num_inputs],
        }
    }
}

#[typetag::serde]
impl FinalLayer for SoftmaxLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(out_act.depth(), self.out_depth);

        let logits = &in_act.w[..self.out_depth];
        // shift by the max so exp never overflows
        let amax = logits.iter().copied().fold(Float::NEG_INFINITY, Float::max);
        self.es.clear();
        self.es.extend(logits.iter().map(|l| (l - amax).exp()));

        let esum: Float = self.es.iter().sum();
        for (e, out) in self.es.iter_mut().zip(out_act.w.iter_mut()) {
            *e /= esum;
            *out = *e;
        }
    }

    fn backward(&mut self, y: usize, in_act: &mut Vol, _out_act: &Vol) -> Float {
        assert!(
            y < self.out_depth,
            "class {y} out of range for {} outputs",
            self.out_depth
        );

        in_act.dw.fill(0.0);
        for (i, (dw, p)) in in_act.dw.iter_mut().zip(&self.es).enumerate() {
            *dw = p - Float::from(i == y);
        }

        -self.es[y].max(Float::MIN_POSITIVE).ln()
    }

    fn out_sx(&self) -> usize {
        1
    }
    fn out_sy(&self) -> usize {
        1
    }
    fn out_depth(&self) -> usize {
        self.out_depth
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_sum_to_one_and_gradient_points_at_target() {
        let mut layer = SoftmaxLayer::new(1, 1, 3);
        let mut input = Vol::zeros(1, 1, 3);
        input.w.copy_from_slice(&[1.0, 2.0, 1000.0]);
        let mut out = Vol::zeros(1, 1, 3);

        layer.forward(&input, &mut out, true);
        let sum: Float = out.w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out.w[2] > 0.99);

        let loss = layer.backward(0, &mut input, &out);
        assert!(loss.is_finite() && loss > 10.0);
        assert!(input.dw[0] < 0.0);
        assert!(input.dw[2] > 0.0);
    }
}
