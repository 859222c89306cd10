//! Network definitions used for training.

use crate::{data::ImageShape, Activation, EndLayer, Layer, Net};

/// Number of 2x2, stride 2 pools in the image branch.
const POOLS: u32 = 3;

/// Smallest image width and height the image branch accepts. Every pool
/// halves the plane and needs at least two rows and columns.
pub const MIN_IMAGE_SIDE: usize = 1 << POOLS;

fn image_branch(shape: ImageShape) -> Vec<Layer> {
    let conv = |filters| Layer::Conv {
        sx: 3,
        filters,
        stride: 1,
        padding: 1,
        activation: Activation::Relu,
    };
    let pool = Layer::Pool { sx: 2, stride: 2 };

    let mut layers = vec![Layer::Input {
        width: shape.width,
        height: shape.height,
        depth: shape.channels,
    }];
    for filters in (0..POOLS).map(|i| 8 << i) {
        layers.push(conv(filters));
        layers.push(pool);
    }
    layers
}

/// Classifies single lines: image features of the crop fused with the
/// line's side vector (geometry and line type).
///
/// Blocks: `conv1..conv3`, `pool1..pool3`, `fuse`, `dense1`, `output`.
pub fn line_net(shape: ImageShape, side_len: usize, num_classes: usize) -> Net {
    let mut layers = image_branch(shape);
    layers.push(Layer::Fuse { extra: side_len });
    layers.push(Layer::Dense {
        neurons: 64,
        activation: Activation::Relu,
    });
    Net::new(&layers, EndLayer::Softmax {
        classes: num_classes,
    })
}

/// Image only classifier. Shares the block names of the image branch with
/// [`line_net`] so its weights can be loaded by name.
pub fn image_pretrain(shape: ImageShape, num_classes: usize) -> Net {
    let mut layers = image_branch(shape);
    layers.push(Layer::Dense {
        neurons: 64,
        activation: Activation::Relu,
    });
    Net::new(&layers, EndLayer::Softmax {
        classes: num_classes,
    })
}

/// Block names of the image branch.
pub const IMAGE_BLOCKS: [&str; 3] = ["conv1", "conv2", "conv3"];
