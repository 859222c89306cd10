use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use crate::{LineNetError, Net, Result};

/// `<dir>/weights_only.<epoch>.bin`, epoch zero padded to two digits.
pub fn checkpoint_path(dir: impl AsRef<Path>, epoch: usize) -> PathBuf {
    dir.as_ref().join(format!("weights_only.{epoch:02}.bin"))
}

pub fn save_net(path: impl AsRef<Path>, net: &Net) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LineNetError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| LineNetError::io(path, e))?;
    bincode::serialize_into(BufWriter::new(file), net).map_err(|source| LineNetError::Archive {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "saved network");
    Ok(())
}

pub fn load_net(path: impl AsRef<Path>) -> Result<Net> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LineNetError::io(path, e))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|source| LineNetError::Archive {
        path: path.to_path_buf(),
        source,
    })
}
