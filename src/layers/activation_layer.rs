use crate::{vol::Vol, Activation};

use super::{LayerDetails, NetLayer};

/// Elementwise nonlinearity, shape preserving.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ActivationLayer {
    kind: Activation,
    out_sx: usize,
    out_sy: usize,
    out_depth: usize,
}

impl ActivationLayer {
    pub fn new(kind: Activation, in_sx: usize, in_sy: usize, in_depth: usize) -> Self {
        Self {
            kind,
            out_sx: in_sx,
            out_sy: in_sy,
            out_depth: in_depth,
        }
    }
}

#[typetag::serde]
impl NetLayer for ActivationLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.len(), out_act.len());
        let values = in_act.w.iter().zip(out_act.w.iter_mut());
        match self.kind {
            Activation::Relu => values.for_each(|(x, y)| *y = x.max(0.0)),
            Activation::Tanh => values.for_each(|(x, y)| *y = x.tanh()),
        }
    }

    // both derivatives are expressed through the output
    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        let grads = in_act.dw.iter_mut().zip(out_act.w.iter().zip(&out_act.dw));
        match self.kind {
            Activation::Relu => {
                grads.for_each(|(dx, (y, dy))| *dx = if *y > 0.0 { *dy } else { 0.0 })
            }
            Activation::Tanh => grads.for_each(|(dx, (y, dy))| *dx = (1.0 - y * y) * dy),
        }
    }

    fn out_depth(&self) -> usize {
        self.out_depth
    }
    fn out_sx(&self) -> usize {
        self.out_sx
    }
    fn out_sy(&self) -> usize {
        self.out_sy
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_blocks_negative_gradient() {
        let mut relu = ActivationLayer::new(Activation::Relu, 1, 1, 3);
        let mut input = Vol::from(vec![-1.0, 0.5, 2.0]);
        let mut out = Vol::zeros(1, 1, 3);
        relu.forward(&input, &mut out, true);
        assert_eq!(out.w, vec![0.0, 0.5, 2.0]);

        out.dw = vec![1.0, 1.0, -2.0];
        relu.backward(&mut input, &out);
        assert_eq!(input.dw, vec![0.0, 1.0, -2.0]);
    }

    #[test]
    fn tanh_scales_gradient_by_derivative() {
        let mut tanh = ActivationLayer::new(Activation::Tanh, 1, 1, 2);
        let mut input = Vol::from(vec![0.0, 100.0]);
        let mut out = Vol::zeros(1, 1, 2);
        tanh.forward(&input, &mut out, true);
        assert_eq!(out.w, vec![0.0, 1.0]);

        out.dw = vec![2.0, 2.0];
        tanh.backward(&mut input, &out);
        assert_eq!(input.dw, vec![2.0, 0.0]);
    }
}
