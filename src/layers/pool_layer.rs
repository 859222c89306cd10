use crate::{vol::Vol, Float};

use super::{LayerDetails, NetLayer, Window};

/// Max pooling per channel.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PoolLayer {
    window: Window,
    out_sx: usize,
    out_sy: usize,
    depth: usize,

    // input position of the maximum behind every output
    #[serde(skip)]
    switches: Vec<usize>,
}

impl PoolLayer {
    pub fn new(sx: usize, stride: usize, in_sx: usize, in_sy: usize, depth: usize) -> Self {
        let window = Window::new(sx, sx, stride, 0, in_sx, in_sy);
        let (out_sx, out_sy) = window.out_dims();
        Self {
            window,
            out_sx,
            out_sy,
            depth,
            switches: vec![0; out_sx * out_sy * depth],
        }
    }
}

#[typetag::serde]
impl NetLayer for PoolLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        // switches are not stored in checkpoints
        self.switches.resize(out_act.len(), 0);

        for ay in 0..self.out_sy {
            for ax in 0..self.out_sx {
                for d in 0..self.depth {
                    let mut best = Float::NEG_INFINITY;
                    let mut at = in_act.index(ax, ay, d);
                    for (_, (x, y)) in self.window.taps(ax, ay) {
                        let i = in_act.index(x, y, d);
                        if in_act.w[i] > best {
                            best = in_act.w[i];
                            at = i;
                        }
                    }
                    let o = out_act.index(ax, ay, d);
                    out_act.w[o] = best;
                    self.switches[o] = at;
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.dw.fill(0.0);
        for (grad, &at) in out_act.dw.iter().zip(&self.switches) {
            in_act.dw[at] += grad;
        }
    }

    fn out_depth(&self) -> usize {
        self.depth
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
    fn picks_window_maximum_and_routes_gradient_back() {
        let mut pool = PoolLayer::new(2, 2, 4, 2, 1);
        assert_eq!((pool.out_sx(), pool.out_sy()), (2, 1));

        let mut input = Vol::from_hwc(
            4,
            2,
            1,
            vec![
                1.0, 5.0, 0.0, -1.0, //
                2.0, 3.0, 4.0, -2.0,
            ],
        );
        let mut out = Vol::zeros(2, 1, 1);
        pool.forward(&input, &mut out, true);
        assert_eq!(out.w, vec![5.0, 4.0]);

        out.dw = vec![1.0, 2.0];
        pool.backward(&mut input, &out);
        assert_eq!(input.dw, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn pools_channels_independently() {
        let mut pool = PoolLayer::new(2, 2, 2, 2, 2);
        let input = Vol::from_hwc(
            2,
            2,
            2,
            vec![
                1.0, 8.0, 2.0, 0.0, //
                3.0, 1.0, 0.5, 7.0,
            ],
        );
        let mut out = Vol::zeros(1, 1, 2);
        pool.forward(&input, &mut out, false);
        assert_eq!(out.w, vec![3.0, 8.0]);
    }
}
