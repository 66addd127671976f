//! Operator contracts consumed by [`DecoderLayer`](super::DecoderLayer).

use crate::error::Result;
use crate::mask::Mask;
use crate::tensor::Tensor3;

/// Attention from `query` rows over `key`/`value` rows. The result has the
/// same batch and sequence length as `query` and the operator's model width.
pub trait Attention {
    fn attend(
        &self,
        query: &Tensor3,
        key: &Tensor3,
        value: &Tensor3,
        mask: Option<&Mask>,
    ) -> Result<Tensor3>;
}

/// An operator applied to each position independently; output has the same
/// shape as the input.
pub trait PositionWise {
    fn forward(&self, x: &Tensor3) -> Result<Tensor3>;
}
