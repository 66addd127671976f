pub mod activation;
pub mod cpu_decoder;
mod cpu_utils;
pub mod error;
pub mod mask;
pub mod tensor;

pub use cpu_decoder::{DecoderConfig, DecoderLayer, DecoderLayerConfig, TransformerDecoder};
pub use error::{DecoderError, Result};
pub use mask::Mask;
pub use tensor::Tensor3;
