//! MUSH Core - Fundamental types shared by the engine crates

mod error;
mod types;
mod idgen;
mod markup;
mod positions;

pub use error::*;
pub use types::*;
pub use idgen::*;
pub use markup::*;
pub use positions::*;
