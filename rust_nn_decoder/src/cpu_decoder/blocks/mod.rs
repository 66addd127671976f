pub mod decoder_layer;
pub mod dropout;
pub mod feedforward;
pub mod layernorm;
pub mod linear;
pub mod multihead_attention;
pub mod sublayer;

pub use decoder_layer::DecoderLayer;
pub use dropout::Dropout;
pub use feedforward::FeedForward;
pub use layernorm::LayerNorm;
pub use linear::Linear;
pub use multihead_attention::MultiHeadAttention;
pub use sublayer::{Attention, PositionWise};
