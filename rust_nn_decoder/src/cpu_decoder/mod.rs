//! CPU implementation of the transformer decoder.

pub mod blocks;
pub mod config;
pub mod decoder;

pub use blocks::DecoderLayer;
pub use config::{DecoderConfig, DecoderLayerConfig};
pub use decoder::TransformerDecoder;
