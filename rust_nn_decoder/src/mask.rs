//! Boolean attention masks.
//!
//! A [`Mask`] has shape `[batch, q_len, k_len]`; `true` means the query
//! position may attend to the key position. A mask built with `batch == 1`
//! broadcasts over every batch element of the attended tensors.

use crate::error::{DecoderError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MaskParts")]
pub struct Mask {
    batch: usize,
    q_len: usize,
    k_len: usize,
    allowed: Vec<bool>,
}

#[derive(Deserialize)]
struct MaskParts {
    batch: usize,
    q_len: usize,
    k_len: usize,
    allowed: Vec<bool>,
}

impl TryFrom<MaskParts> for Mask {
    type Error = DecoderError;

    fn try_from(parts: MaskParts) -> Result<Self> {
        let expected = parts.batch * parts.q_len * parts.k_len;
        if parts.allowed.len() != expected {
            return Err(DecoderError::shape(
                "Mask",
                format!("{expected} entries"),
                format!("{} entries", parts.allowed.len()),
            ));
        }
        Ok(Mask {
            batch: parts.batch,
            q_len: parts.q_len,
            k_len: parts.k_len,
            allowed: parts.allowed,
        })
    }
}

impl Mask {
    /// Every query may attend to every key.
    pub fn allow_all(batch: usize, q_len: usize, k_len: usize) -> Self {
        Mask {
            batch,
            q_len,
            k_len,
            allowed: vec![true; batch * q_len * k_len],
        }
    }

    /// Query `q` may attend to keys `0..=q + (k_len - q_len)`.
    ///
    /// When `k_len > q_len` the queries line up with the most recent keys.
    pub fn causal(batch: usize, q_len: usize, k_len: usize) -> Self {
        let offset = k_len.saturating_sub(q_len);
        Mask::from_fn((batch, q_len, k_len), |_, q, k| k <= q + offset)
    }

    /// Key padding mask: for batch element `b`, keys at or beyond
    /// `key_lengths[b]` are forbidden.
    pub fn padding(key_lengths: &[usize], q_len: usize, k_len: usize) -> Self {
        Mask::from_fn((key_lengths.len(), q_len, k_len), |b, _, k| {
            k < key_lengths[b].min(k_len)
        })
    }

    pub fn from_fn<F>(shape: (usize, usize, usize), mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        let (batch, q_len, k_len) = shape;
        let mut allowed = Vec::with_capacity(batch * q_len * k_len);
        for b in 0..batch {
            for q in 0..q_len {
                for k in 0..k_len {
                    allowed.push(f(b, q, k));
                }
            }
        }
        Mask {
            batch,
            q_len,
            k_len,
            allowed,
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.q_len, self.k_len)
    }

    /// Positions allowed by both masks. A `batch == 1` side broadcasts.
    pub fn intersect(&self, other: &Mask) -> Result<Mask> {
        if self.q_len != other.q_len || self.k_len != other.k_len {
            return Err(DecoderError::shape(
                "Mask::intersect",
                format!("{:?}", self.shape()),
                format!("{:?}", other.shape()),
            ));
        }
        let batch = match (self.batch, other.batch) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(DecoderError::shape(
                    "Mask::intersect",
                    format!("{:?}", self.shape()),
                    format!("{:?}", other.shape()),
                ));
            }
        };
        Ok(Mask::from_fn((batch, self.q_len, self.k_len), |b, q, k| {
            self.is_allowed(b, q, k) && other.is_allowed(b, q, k)
        }))
    }

    /// Forbid query `q` from attending to key `k` in batch element `b`.
    pub fn forbid(&mut self, b: usize, q: usize, k: usize) {
        let idx = self.index(b, q, k);
        self.allowed[idx] = false;
    }

    pub fn allow(&mut self, b: usize, q: usize, k: usize) {
        let idx = self.index(b, q, k);
        self.allowed[idx] = true;
    }

    pub fn is_allowed(&self, b: usize, q: usize, k: usize) -> bool {
        self.allowed[self.index(b, q, k)]
    }

    /// Whether this mask can be applied to attention of shape
    /// `[batch, q_len, k_len]`.
    pub fn check_compatible(&self, batch: usize, q_len: usize, k_len: usize) -> Result<()> {
        let batch_ok = self.batch == batch || self.batch == 1;
        if !batch_ok || self.q_len != q_len || self.k_len != k_len {
            return Err(DecoderError::shape(
                "Mask",
                format!("broadcastable to {:?}", (batch, q_len, k_len)),
                format!("{:?}", self.shape()),
            ));
        }
        Ok(())
    }

    fn index(&self, b: usize, q: usize, k: usize) -> usize {
        let b = if self.batch == 1 { 0 } else { b };
        (b * self.q_len + q) * self.k_len + k
    }
}
