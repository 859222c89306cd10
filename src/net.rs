mod serde;

use crate::{
    error::{LineNetError, Result},
    layers::{
        ActivationLayer, ConvLayer, DenseLayer, FinalLayer, FuseLayer, InputLayer, LayerDetails,
        NetLayer, PoolLayer, SoftmaxLayer,
    },
    utils::argmax,
    vol::Vol,
    Float,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ::serde::Serialize, ::serde::Deserialize)]
pub enum Activation {
    Relu,
    Tanh,
}

#[derive(Debug, Clone, Copy)]
pub enum Layer {
    Input {
        width: usize,
        height: usize,
        depth: usize,
    },
    Conv {
        sx: usize,
        filters: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
    },
    Pool {
        sx: usize,
        stride: usize,
    },
    /// Flattens the image branch and appends `extra` side values per sample.
    Fuse {
        extra: usize,
    },
    Dense {
        neurons: usize,
        activation: Activation,
    },
}

pub enum EndLayer {
    Softmax { classes: usize },
}

/// A named group of layers, e.g. a convolution and its activation.
/// Freezing and weight transfer work on whole blocks.
#[derive(Debug, Clone, PartialEq, Eq, ::serde::Serialize, ::serde::Deserialize)]
pub struct Block {
    pub name: String,
    pub trainable: bool,
}

/// A linear stack of layers ending in a loss layer. The input layer comes
/// first; a fuse layer may join side values after the image branch.
#[derive(::serde::Serialize, ::serde::Deserialize)]
#[serde(try_from = "serde::StoredNet")]
pub struct Net {
    layers: Vec<Box<dyn NetLayer>>,
    final_layer: Box<dyn FinalLayer>,
    blocks: Vec<Block>,
    // block index of every entry in `layers`
    layer_block: Vec<usize>,
    side_len: usize,
    #[serde(skip)]
    acts: Vec<Vol>,
}

struct Builder {
    layers: Vec<Box<dyn NetLayer>>,
    blocks: Vec<Block>,
    layer_block: Vec<usize>,
    counters: [usize; 3],
}

impl Builder {
    fn block(&mut self, prefix: &str, counter: Option<usize>) -> usize {
        let name = match counter {
            Some(i) => {
                self.counters[i] += 1;
                format!("{prefix}{}", self.counters[i])
            }
            None => prefix.to_string(),
        };
        self.blocks.push(Block {
            name,
            trainable: true,
        });
        self.blocks.len() - 1
    }

    fn push(&mut self, block: usize, layer: Box<dyn NetLayer>) -> (usize, usize, usize) {
        let dim = (layer.out_sx(), layer.out_sy(), layer.out_depth());
        self.layers.push(layer);
        self.layer_block.push(block);
        dim
    }

    fn activation(
        &mut self,
        block: usize,
        activation: Activation,
        (sx, sy, depth): (usize, usize, usize),
    ) -> (usize, usize, usize) {
        self.push(
            block,
            Box::new(ActivationLayer::new(activation, sx, sy, depth)),
        )
    }
}

// small positive bias so relu units start out active
fn initial_bias(activation: Activation) -> Float {
    if activation == Activation::Relu {
        0.1
    } else {
        0.0
    }
}

impl Net {
    /// Desugars layer definitions into layers grouped by named blocks:
    /// `input`, `conv1..`, `pool1..`, `fuse`, `dense1..` and `output`.
    ///
    /// Panics if the first definition is not an input layer or if a second
    /// input or fuse layer is given.
    pub fn new(def_layers: &[Layer], def_final_layer: EndLayer) -> Self {
        let mut b = Builder {
            layers: Vec::new(),
            blocks: Vec::new(),
            layer_block: Vec::new(),
            counters: [0; 3],
        };

        let mut dim: Option<(usize, usize, usize)> = None;
        let mut side_len = 0;
        for def in def_layers {
            let (in_sx, in_sy, in_depth) = match (*def, dim) {
                (Layer::Input { .. }, Some(_)) => panic!("input layer must be the first"),
                (Layer::Input { .. }, None) => (0, 0, 0),
                (_, None) => panic!("dim must be specified"),
                (_, Some(dim)) => dim,
            };

            let out = match *def {
                Layer::Input {
                    width,
                    height,
                    depth,
                } => {
                    let block = b.block("input", None);
                    b.push(
                        block,
                        Box::new(InputLayer::with_dimensions(depth, width, height)),
                    )
                }
                Layer::Conv {
                    sx,
                    filters,
                    stride,
                    padding,
                    activation,
                } => {
                    let block = b.block("conv", Some(0));
                    let layer = ConvLayer::builder(filters, sx, in_depth, in_sx, in_sy)
                        .padding(padding)
                        .stride(stride)
                        .bias(initial_bias(activation))
                        .build();
                    let out = b.push(block, Box::new(layer));
                    b.activation(block, activation, out)
                }
                Layer::Pool { sx, stride } => {
                    let block = b.block("pool", Some(1));
                    let layer = PoolLayer::new(sx, stride, in_sx, in_sy, in_depth);
                    b.push(block, Box::new(layer))
                }
                Layer::Fuse { extra } => {
                    if side_len > 0 {
                        panic!("only one fuse layer is supported");
                    }
                    side_len = extra;
                    let block = b.block("fuse", None);
                    b.push(
                        block,
                        Box::new(FuseLayer::new(extra, in_sx, in_sy, in_depth)),
                    )
                }
                Layer::Dense {
                    neurons,
                    activation,
                } => {
                    let block = b.block("dense", Some(2));
                    let bias = initial_bias(activation);
                    let layer = DenseLayer::new(neurons, in_sx, in_sy, in_depth, bias);
                    let out = b.push(block, Box::new(layer));
                    b.activation(block, activation, out)
                }
            };
            dim = Some(out);
        }

        let Some((in_sx, in_sy, in_depth)) = dim else {
            panic!("dim must be specified for final layer");
        };

        let final_layer: Box<dyn FinalLayer> = match def_final_layer {
            EndLayer::Softmax { classes } => {
                // add an fc layer here, there is no reason the user should
                // have to worry about this and we almost always want to
                let block = b.block("output", None);
                let layer = DenseLayer::new(classes, in_sx, in_sy, in_depth, 0.1);
                let (sx, sy, depth) = b.push(block, Box::new(layer));
                Box::new(SoftmaxLayer::new(sx, sy, depth))
            }
        };

        Self::from_parts(b.layers, final_layer, b.blocks, b.layer_block, side_len)
    }

    pub(crate) fn from_parts(
        layers: Vec<Box<dyn NetLayer>>,
        final_layer: Box<dyn FinalLayer>,
        blocks: Vec<Block>,
        layer_block: Vec<usize>,
        side_len: usize,
    ) -> Self {
        let mut acts: Vec<Vol> = layers
            .iter()
            .map(|l| Vol::zeros(l.out_sx(), l.out_sy(), l.out_depth()))
            .collect();
        acts.push(Vol::zeros(
            final_layer.out_sx(),
            final_layer.out_sy(),
            final_layer.out_depth(),
        ));

        Self {
            layers,
            final_layer,
            blocks,
            layer_block,
            side_len,
            acts,
        }
    }

    /// `(acts[at - 1], acts[at])`, both mutable.
    fn adjacent(acts: &mut [Vol], at: usize) -> (&mut Vol, &mut Vol) {
        let (before, from) = acts.split_at_mut(at);
        (&mut before[at - 1], &mut from[0])
    }

    /// Number of side values the fuse layer expects per sample (0 without one).
    pub fn side_len(&self) -> usize {
        self.side_len
    }

    /// Number of classes of the softmax output.
    pub fn classes(&self) -> usize {
        self.final_layer.out_depth()
    }

    /// `(width, height, depth)` of the image volumes the net takes.
    pub fn input_dims(&self) -> (usize, usize, usize) {
        let input = &self.layers[0];
        (input.out_sx(), input.out_sy(), input.out_depth())
    }

    /// Errors when a sample cannot be fed to [`Net::forward`] and
    /// [`Net::backward`]. The side vector is ignored by nets without a fuse
    /// layer.
    pub fn check_sample(&self, image: &Vol, side: &[Float], target: usize) -> Result<()> {
        let dims = (image.sx(), image.sy(), image.depth());
        if dims != self.input_dims() {
            return Err(LineNetError::SampleMismatch(format!(
                "image is {dims:?}, the input layer takes {:?}",
                self.input_dims()
            )));
        }
        if self.side_len > 0 && side.len() != self.side_len {
            return Err(LineNetError::SampleMismatch(format!(
                "{} side values for a fuse layer of {}",
                side.len(),
                self.side_len
            )));
        }
        if target >= self.classes() {
            return Err(LineNetError::SampleMismatch(format!(
                "target {target} out of range for {} classes",
                self.classes()
            )));
        }
        Ok(())
    }

    // forward prop the network.
    // The trainer passes is_training = true, prediction passes false
    pub fn forward(&mut self, vol: &Vol, side: &[Float], is_training: bool) -> Vol {
        debug_assert_eq!(self.layers.len() + 1, self.acts.len());

        if self.side_len > 0 {
            for layer in &mut self.layers {
                layer.set_side_input(side);
            }
        }

        let n = self.acts.len();

        self.layers[0].forward(vol, &mut self.acts[0], is_training);
        for i in 1..self.layers.len() {
            let (a, b) = Self::adjacent(&mut self.acts, i);
            self.layers[i].forward(a, b, is_training);
        }

        let (a, b) = Self::adjacent(&mut self.acts, n - 1);
        self.final_layer.forward(a, b, is_training);

        b.clone()
    }

    // backprop: compute gradients wrt all parameters, returns the loss
    pub fn backward(&mut self, y: usize, vol: &mut Vol) -> Float {
        let n = self.acts.len();

        let (a, b) = Self::adjacent(&mut self.acts, n - 1);
        let loss = self.final_layer.backward(y, a, b);

        for i in (1..self.layers.len()).rev() {
            let (a, b) = Self::adjacent(&mut self.acts, i);
            self.layers[i].backward(a, b);
        }

        self.layers[0].backward(vol, &self.acts[0]);

        loss
    }

    /// Argmax of the last forward pass, assuming softmax output.
    pub fn prediction(&self) -> usize {
        let probabilities = &self.acts[self.acts.len() - 1].w;
        argmax(probabilities).unwrap_or(0)
    }

    pub fn cost_loss(&mut self, vol: &Vol, side: &[Float], y: usize) -> Float {
        self.forward(vol, side, false);

        let n = self.acts.len();
        let (in_act, out_act) = Self::adjacent(&mut self.acts, n - 1);

        self.final_layer.backward(y, in_act, out_act)
    }

    pub fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let mut result = Vec::new();
        for (layer, block) in self.layers.iter_mut().zip(&self.layer_block) {
            let trainable = self.blocks[*block].trainable;
            for mut response in layer.params_and_grads() {
                response.trainable = trainable;
                result.push(response);
            }
        }
        result.extend(self.final_layer.params_and_grads());
        result
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_trainable(&self, name: &str) -> Option<bool> {
        self.blocks
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.trainable)
    }

    pub fn set_trainable(&mut self, name: &str, trainable: bool) -> Result<()> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| LineNetError::UnknownLayer(name.to_string()))?;
        block.trainable = trainable;
        Ok(())
    }

    pub fn freeze_all(&mut self) {
        self.blocks.iter_mut().for_each(|b| b.trainable = false);
    }

    pub fn unfreeze_all(&mut self) {
        self.blocks.iter_mut().for_each(|b| b.trainable = true);
    }

    fn block_params(&mut self, block: usize) -> Vec<&mut [Float]> {
        self.layers
            .iter_mut()
            .zip(&self.layer_block)
            .filter(|(_, b)| **b == block)
            .flat_map(|(layer, _)| layer.params_and_grads())
            .map(|details| details.params)
            .collect()
    }

    /// Copies the parameters of every block of `source` into the block with
    /// the same name here. Blocks whose parameter shapes differ are skipped.
    /// Returns the names of the blocks that were copied.
    pub fn load_weights_by_name(&mut self, source: &mut Net) -> Vec<String> {
        let mut copied = Vec::new();
        for (index, block) in self.blocks.clone().into_iter().enumerate() {
            let Some(src_index) = source.blocks.iter().position(|b| b.name == block.name) else {
                continue;
            };

            let src = source.block_params(src_index);
            let mut dst = self.block_params(index);

            let same_shape = src.len() == dst.len()
                && src.iter().zip(dst.iter()).all(|(s, d)| s.len() == d.len());
            if !same_shape {
                tracing::warn!(block = %block.name, "skipping weights with mismatched shape");
                continue;
            }
            if src.is_empty() {
                continue;
            }

            for (d, s) in dst.iter_mut().zip(src) {
                d.copy_from_slice(s);
            }
            copied.push(block.name);
        }
        copied
    }
}
