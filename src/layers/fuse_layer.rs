use crate::{vol::Vol, Float};

use super::{LayerDetails, NetLayer};

/// Flattens the incoming activations and appends the side vector of the
/// current sample (line geometry, label features, line type).
/// Gradients only flow back into the flattened part.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct FuseLayer {
    num_inputs: usize,
    extra: usize,
    out_depth: usize,

    #[serde(skip)]
    side: Vec<Float>,
}

impl FuseLayer {
    pub fn new(extra: usize, in_sx: usize, in_sy: usize, in_depth: usize) -> Self {
        let num_inputs = in_sx * in_sy * in_depth;
        Self {
            num_inputs,
            extra,
            out_depth: num_inputs + extra,
            side: vec![0.0; extra],
        }
    }

    pub fn extra(&self) -> usize {
        self.extra
    }
}

#[typetag::serde]
impl NetLayer for FuseLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.len(), self.num_inputs);
        debug_assert_eq!(out_act.len(), self.out_depth);

        out_act.w[..self.num_inputs].copy_from_slice(&in_act.w);
        // a missing side input (e.g. after deserialization) fuses as zeros
        self.side.resize(self.extra, 0.0);
        out_act.w[self.num_inputs..].copy_from_slice(&self.side);
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.dw.copy_from_slice(&out_act.dw[..self.num_inputs]);
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }

    fn set_side_input(&mut self, side: &[Float]) {
        assert_eq!(
            side.len(),
            self.extra,
            "side input length does not match the fuse layer"
        );
        self.side.clear();
        self.side.extend_from_slice(side);
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
}
