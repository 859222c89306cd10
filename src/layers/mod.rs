mod activation_layer;
mod conv_layer;
mod dense_layer;
mod fuse_layer;
mod input_layer;
mod loss_layer;
mod pool_layer;
mod window;

pub use activation_layer::*;
pub use conv_layer::*;
pub use dense_layer::*;
pub use fuse_layer::*;
pub use input_layer::*;
pub use loss_layer::*;
pub use pool_layer::*;
pub use window::*;

use crate::{vol::Vol, Float};

#[typetag::serde]
pub trait NetLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool);
    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol);
    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>>;

    /// Per-sample values that join the activations after the image branch.
    /// Only the fuse layer consumes them.
    fn set_side_input(&mut self, _side: &[Float]) {}

    fn out_sx(&self) -> usize;
    fn out_sy(&self) -> usize;
    fn out_depth(&self) -> usize;
}

#[typetag::serde]
pub trait FinalLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool);
    fn backward(&mut self, y: usize, in_act: &mut Vol, out_act: &Vol) -> Float;
    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>>;

    fn out_sx(&self) -> usize;
    fn out_sy(&self) -> usize;
    fn out_depth(&self) -> usize;
}

#[derive(Debug)]
pub struct LayerDetails<'a> {
    pub params: &'a mut [Float],
    pub grads: &'a mut [Float],
    pub l1_decay_mul: Float,
    pub l2_decay_mul: Float,
    /// Cleared by the net for frozen blocks.
    pub trainable: bool,
}

impl<'a> LayerDetails<'a> {
    /// Weights and gradients of `vol`, trainable until the net says otherwise.
    pub(crate) fn of(vol: &'a mut Vol, l1_decay_mul: Float, l2_decay_mul: Float) -> Self {
        Self {
            params: &mut vol.w,
            grads: &mut vol.dw,
            l1_decay_mul,
            l2_decay_mul,
            trainable: true,
        }
    }
}

pub(crate) fn dot(a: &[Float], b: &[Float]) -> Float {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
