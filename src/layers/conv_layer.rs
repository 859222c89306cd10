use crate::{vol::Vol, Float};

use super::{dot, LayerDetails, NetLayer, Window};

/// Spatial convolution with one bias per filter. Filters span the full
/// input depth.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ConvLayer {
    window: Window,
    out_sx: usize,
    out_sy: usize,
    l2_decay_mul: Float,
    filters: Vec<Vol>,
    biases: Vol,
}

impl ConvLayer {
    pub fn builder(
        filters: usize,
        sx: usize,
        in_depth: usize,
        in_sx: usize,
        in_sy: usize,
    ) -> ConvLayerBuilder {
        ConvLayerBuilder {
            filters,
            sx,
            in_depth,
            in_sx,
            in_sy,
            stride: 1,
            padding: 0,
            bias: 0.0,
        }
    }
}

pub struct ConvLayerBuilder {
    filters: usize,
    sx: usize,
    in_depth: usize,
    in_sx: usize,
    in_sy: usize,

    stride: usize,
    padding: usize,
    bias: Float,
}

impl ConvLayerBuilder {
    /// default: 1
    pub fn stride(mut self, value: usize) -> Self {
        self.stride = value;
        self
    }

    /// Zero padding around the input. default: 0
    pub fn padding(mut self, value: usize) -> Self {
        self.padding = value;
        self
    }

    /// default: 0.0
    pub fn bias(mut self, value: Float) -> Self {
        self.bias = value;
        self
    }

    pub fn build(self) -> ConvLayer {
        let window = Window::new(
            self.sx,
            self.sx,
            self.stride,
            self.padding,
            self.in_sx,
            self.in_sy,
        );
        let (out_sx, out_sy) = window.out_dims();
        ConvLayer {
            window,
            out_sx,
            out_sy,
            l2_decay_mul: 1.0,
            filters: (0..self.filters)
                .map(|_| Vol::new(self.sx, self.sx, self.in_depth))
                .collect(),
            biases: Vol::with_constant(1, 1, self.filters, self.bias),
        }
    }
}

#[typetag::serde]
impl NetLayer for ConvLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        let depth = in_act.depth();
        for (d, filter) in self.filters.iter().enumerate() {
            for ay in 0..self.out_sy {
                for ax in 0..self.out_sx {
                    let mut sum = self.biases.w[d];
                    for ((fx, fy), (x, y)) in self.window.taps(ax, ay) {
                        let f = filter.index(fx, fy, 0);
                        let v = in_act.index(x, y, 0);
                        sum += dot(&filter.w[f..f + depth], &in_act.w[v..v + depth]);
                    }
                    out_act.set(ax, ay, d, sum);
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.dw.fill(0.0);
        let depth = in_act.depth();
        for (d, filter) in self.filters.iter_mut().enumerate() {
            for ay in 0..self.out_sy {
                for ax in 0..self.out_sx {
                    let grad = out_act.dw[out_act.index(ax, ay, d)];
                    for ((fx, fy), (x, y)) in self.window.taps(ax, ay) {
                        let f = filter.index(fx, fy, 0);
                        let v = in_act.index(x, y, 0);
                        for k in 0..depth {
                            filter.dw[f + k] += in_act.w[v + k] * grad;
                            in_act.dw[v + k] += filter.w[f + k] * grad;
                        }
                    }
                    self.biases.dw[d] += grad;
                }
            }
        }
    }

    fn out_depth(&self) -> usize {
        self.filters.len()
    }
    fn out_sx(&self) -> usize {
        self.out_sx
    }
    fn out_sy(&self) -> usize {
        self.out_sy
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
