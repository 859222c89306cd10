use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LineNetError>;

#[derive(Debug, Error)]
pub enum LineNetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("archive error at {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config parse error at {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("parse error at {path}:{line}: {msg}")]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("images should be 'bgr' or 'bgr-d', got '{0}'")]
    InvalidImageType(String),
    #[error("line type must be one of 0, 1, 2, 3, got {0}")]
    InvalidLineType(f32),
    #[error("label shape mismatch: expected {expected} values, found {found}")]
    LabelShape { expected: usize, found: usize },
    #[error("class label must be a non-negative integer, got {0}")]
    InvalidClass(f32),
    #[error("sample does not fit the network: {0}")]
    SampleMismatch(String),
    #[error("no depth image for sample {0}")]
    MissingDepth(String),
    #[error("batch of {batch_size} at pointer {pointer} exceeds data size {len}")]
    EndOfData {
        pointer: usize,
        batch_size: usize,
        len: usize,
    },
    #[error("no layer named '{0}'")]
    UnknownLayer(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("dataset is empty: {0}")]
    EmptyDataset(String),
}

impl LineNetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            msg: msg.into(),
        }
    }
}
