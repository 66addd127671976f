use super::linear::Linear;
use super::sublayer::Attention;
use crate::cpu_utils::{dot, softmax};
use crate::error::{DecoderError, Result};
use crate::mask::Mask;
use crate::tensor::Tensor3;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Attention weights indexed `[batch][head][query][key]`.
pub type AttentionWeights = Vec<Vec<Vec<Vec<f32>>>>;

/// Scaled dot-product attention split over `num_heads` heads, with query,
/// key, value and output projections of width `num_heads * head_dim`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiHeadAttention {
    pub num_heads: usize,
    pub head_dim: usize,
    pub w_q: Linear,
    pub w_k: Linear,
    pub w_v: Linear,
    pub w_o: Linear,
}

fn check_heads(model_dim: usize, num_heads: usize) -> Result<usize> {
    if num_heads == 0 || model_dim % num_heads != 0 {
        return Err(DecoderError::InvalidConfig(format!(
            "{num_heads} heads do not evenly divide model width {model_dim}"
        )));
    }
    Ok(model_dim / num_heads)
}

impl MultiHeadAttention {
    pub fn new(model_dim: usize, num_heads: usize) -> Result<Self> {
        Self::with_rng(model_dim, num_heads, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        model_dim: usize,
        num_heads: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let head_dim = check_heads(model_dim, num_heads)?;
        Ok(MultiHeadAttention {
            num_heads,
            head_dim,
            w_q: Linear::with_rng(model_dim, model_dim, rng),
            w_k: Linear::with_rng(model_dim, model_dim, rng),
            w_v: Linear::with_rng(model_dim, model_dim, rng),
            w_o: Linear::with_rng(model_dim, model_dim, rng),
        })
    }

    pub fn zeros(model_dim: usize, num_heads: usize) -> Result<Self> {
        let head_dim = check_heads(model_dim, num_heads)?;
        Ok(MultiHeadAttention {
            num_heads,
            head_dim,
            w_q: Linear::zeros(model_dim, model_dim),
            w_k: Linear::zeros(model_dim, model_dim),
            w_v: Linear::zeros(model_dim, model_dim),
            w_o: Linear::zeros(model_dim, model_dim),
        })
    }

    pub fn model_dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Check the head split and all four projections against a model of
    /// width `model_dim` with `num_heads` heads.
    pub fn check_dims(&self, model_dim: usize, num_heads: usize) -> Result<()> {
        let head_dim = check_heads(model_dim, num_heads)?;
        if self.num_heads != num_heads || self.head_dim != head_dim {
            return Err(DecoderError::shape(
                "MultiHeadAttention",
                format!("{num_heads} heads of {head_dim}"),
                format!("{} heads of {}", self.num_heads, self.head_dim),
            ));
        }
        self.w_q.check_dims("MultiHeadAttention::w_q", model_dim, model_dim)?;
        self.w_k.check_dims("MultiHeadAttention::w_k", model_dim, model_dim)?;
        self.w_v.check_dims("MultiHeadAttention::w_v", model_dim, model_dim)?;
        self.w_o.check_dims("MultiHeadAttention::w_o", model_dim, model_dim)
    }

    /// Softmax weights of every head, after masking.
    pub fn attention_weights(
        &self,
        query: &Tensor3,
        key: &Tensor3,
        mask: Option<&Mask>,
    ) -> Result<AttentionWeights> {
        let q = self.w_q.forward_tensor(query)?;
        let k = self.w_k.forward_tensor(key)?;
        self.check_pair(&q, &k, mask)?;
        Ok((0..q.batch())
            .map(|b| {
                (0..self.num_heads)
                    .map(|head| {
                        (0..q.seq_len())
                            .map(|i| self.head_weights(&q, &k, b, head, i, mask))
                            .collect()
                    })
                    .collect()
            })
            .collect())
    }

    fn check_pair(&self, q: &Tensor3, k: &Tensor3, mask: Option<&Mask>) -> Result<()> {
        if q.batch() != k.batch() {
            return Err(DecoderError::shape(
                "MultiHeadAttention",
                format!("key batch {}", q.batch()),
                format!("key batch {}", k.batch()),
            ));
        }
        if let Some(mask) = mask {
            mask.check_compatible(q.batch(), q.seq_len(), k.seq_len())?;
        }
        Ok(())
    }

    fn head_weights(
        &self,
        q: &Tensor3,
        k: &Tensor3,
        b: usize,
        head: usize,
        i: usize,
        mask: Option<&Mask>,
    ) -> Vec<f32> {
        let start = head * self.head_dim;
        let end = start + self.head_dim;
        let scale = 1.0 / (self.head_dim as f32).sqrt();
        let qi = &q.row(b, i)[start..end];
        let scores: Vec<f32> = (0..k.seq_len())
            .map(|j| {
                if mask.is_some_and(|m| !m.is_allowed(b, i, j)) {
                    f32::NEG_INFINITY
                } else {
                    dot(qi, &k.row(b, j)[start..end]) * scale
                }
            })
            .collect();
        softmax(&scores)
    }
}

impl Attention for MultiHeadAttention {
    fn attend(
        &self,
        query: &Tensor3,
        key: &Tensor3,
        value: &Tensor3,
        mask: Option<&Mask>,
    ) -> Result<Tensor3> {
        let q = self.w_q.forward_tensor(query)?;
        let k = self.w_k.forward_tensor(key)?;
        let v = self.w_v.forward_tensor(value)?;
        self.check_pair(&q, &k, mask)?;
        if (v.batch(), v.seq_len()) != (k.batch(), k.seq_len()) {
            return Err(DecoderError::shape(
                "MultiHeadAttention",
                format!("value shaped like key {:?}", k.shape()),
                format!("{:?}", v.shape()),
            ));
        }

        let (batch, q_len, _) = q.shape();
        let model_dim = self.model_dim();
        let head_dim = self.head_dim;
        // One task per (batch, head) pair, each returning [q_len][head_dim]
        let head_results: Vec<Vec<Vec<f32>>> = (0..batch * self.num_heads)
            .into_par_iter()
            .map(|idx| {
                let b = idx / self.num_heads;
                let head = idx % self.num_heads;
                let start = head * head_dim;
                (0..q_len)
                    .map(|i| {
                        let weights = self.head_weights(&q, &k, b, head, i, mask);
                        let mut attn_out = vec![0.0; head_dim];
                        for (j, w) in weights.iter().enumerate() {
                            let vj = &v.row(b, j)[start..start + head_dim];
                            for d in 0..head_dim {
                                attn_out[d] += w * vj[d];
                            }
                        }
                        attn_out
                    })
                    .collect()
            })
            .collect();

        // Merge heads back into [batch][q_len][model_dim]
        let mut heads_out = vec![0.0; batch * q_len * model_dim];
        for (idx, rows) in head_results.into_iter().enumerate() {
            let b = idx / self.num_heads;
            let start = (idx % self.num_heads) * head_dim;
            for (i, row) in rows.iter().enumerate() {
                let base = (b * q_len + i) * model_dim + start;
                heads_out[base..base + head_dim].copy_from_slice(row);
            }
        }
        let concat = Tensor3::from_vec(heads_out, (batch, q_len, model_dim))?;
        self.w_o.forward_tensor(&concat)
    }
}
