use super::{Block, Net};
use crate::layers::{FinalLayer, NetLayer};

/// Stored form of a [`Net`]. Activation buffers are rebuilt on load.
#[derive(serde::Deserialize)]
#[serde(rename = "Net")]
pub(super) struct StoredNet {
    layers: Vec<Box<dyn NetLayer>>,
    final_layer: Box<dyn FinalLayer>,
    blocks: Vec<Block>,
    layer_block: Vec<usize>,
    #[serde(default)]
    side_len: usize,
}

impl TryFrom<StoredNet> for Net {
    type Error = String;

    fn try_from(stored: StoredNet) -> Result<Self, Self::Error> {
        let StoredNet {
            layers,
            final_layer,
            blocks,
            layer_block,
            side_len,
        } = stored;

        if layers.is_empty() {
            return Err("a net needs at least one layer".into());
        }
        if layer_block.len() != layers.len() {
            return Err(format!(
                "{} layers but {} block indices",
                layers.len(),
                layer_block.len()
            ));
        }
        if let Some(block) = layer_block.iter().find(|b| **b >= blocks.len()) {
            return Err(format!("layer refers to missing block {block}"));
        }
        Ok(Net::from_parts(
            layers,
            final_layer,
            blocks,
            layer_block,
            side_len,
        ))
    }
}
