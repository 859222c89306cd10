use super::Vol;
use crate::Float;

/// Stored form of a [`Vol`]. Gradients are not kept and come back zeroed.
#[derive(serde::Deserialize)]
#[serde(rename = "Vol")]
pub(super) struct StoredVol {
    sx: usize,
    sy: usize,
    depth: usize,
    w: Vec<Float>,
}

impl TryFrom<StoredVol> for Vol {
    type Error = String;

    fn try_from(stored: StoredVol) -> Result<Self, Self::Error> {
        let StoredVol { sx, sy, depth, w } = stored;
        let n = sx * sy * depth;
        if w.len() != n {
            return Err(format!(
                "a {sx}x{sy}x{depth} volume needs {n} weights, found {}",
                w.len()
            ));
        }
        Ok(Vol {
            sx,
            sy,
            depth,
            w,
            dw: vec![0.0; n],
        })
    }
}
