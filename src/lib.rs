pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod data;
mod error;
pub mod fit;
mod layers;
pub mod model;
mod net;
pub mod run;
mod sequence;
mod trainer;
mod utils;
mod vol;

pub use error::*;
pub use layers::*;
pub use net::*;
pub use sequence::*;
pub use trainer::*;
pub use utils::*;
pub use vol::*;

pub type Float = f32;
