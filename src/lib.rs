#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod reader;
mod cog;
pub mod decoder;
pub mod error;
pub mod geo;
mod ifd;
pub mod metadata;
pub mod predictor;
pub mod tiff;
mod tile;

pub use cog::{OpenOptions, DEFAULT_DECODING_BUFFER_SIZE, TIFF};
pub use ifd::ImageFileDirectory;
pub use tile::Tile;
