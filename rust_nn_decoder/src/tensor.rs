//! Dense activation storage for the CPU decoder.
//!
//! A [`Tensor3`] holds `batch * seq_len` rows of `width` values each, stored
//! row-major in one flat buffer. Operators read rows with [`Tensor3::row`]
//! and build new tensors; nothing mutates an input in place.

use crate::error::{DecoderError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Tensor3Parts")]
pub struct Tensor3 {
    batch: usize,
    seq_len: usize,
    width: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct Tensor3Parts {
    batch: usize,
    seq_len: usize,
    width: usize,
    data: Vec<f32>,
}

impl TryFrom<Tensor3Parts> for Tensor3 {
    type Error = DecoderError;

    fn try_from(parts: Tensor3Parts) -> Result<Self> {
        Tensor3::from_vec(parts.data, (parts.batch, parts.seq_len, parts.width))
    }
}

impl Tensor3 {
    pub fn zeros(batch: usize, seq_len: usize, width: usize) -> Self {
        Tensor3 {
            batch,
            seq_len,
            width,
            data: vec![0.0; batch * seq_len * width],
        }
    }

    pub fn from_vec(data: Vec<f32>, shape: (usize, usize, usize)) -> Result<Self> {
        let (batch, seq_len, width) = shape;
        let expected = batch * seq_len * width;
        if data.len() != expected {
            return Err(DecoderError::shape(
                "Tensor3::from_vec",
                format!("{expected} elements for {shape:?}"),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Tensor3 {
            batch,
            seq_len,
            width,
            data,
        })
    }

    /// Build from nested `[batch][seq_len][width]` vectors. Every sequence
    /// must have the same length and every row the same width.
    pub fn from_nested(rows: &[Vec<Vec<f32>>]) -> Result<Self> {
        let batch = rows.len();
        let seq_len = rows.first().map_or(0, |s| s.len());
        let width = rows
            .first()
            .and_then(|s| s.first())
            .map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(batch * seq_len * width);
        for seq in rows {
            if seq.len() != seq_len {
                return Err(DecoderError::shape("Tensor3::from_nested", seq_len, seq.len()));
            }
            for row in seq {
                if row.len() != width {
                    return Err(DecoderError::shape("Tensor3::from_nested", width, row.len()));
                }
                data.extend_from_slice(row);
            }
        }
        Tensor3::from_vec(data, (batch, seq_len, width))
    }

    pub fn from_fn<F>(shape: (usize, usize, usize), mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let (batch, seq_len, width) = shape;
        let mut data = Vec::with_capacity(batch * seq_len * width);
        for b in 0..batch {
            for t in 0..seq_len {
                for d in 0..width {
                    data.push(f(b, t, d));
                }
            }
        }
        Tensor3 {
            batch,
            seq_len,
            width,
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.seq_len, self.width)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Row `t` of sequence `b`. Panics when either index is out of range,
    /// like slice indexing.
    pub fn row(&self, b: usize, t: usize) -> &[f32] {
        let start = (b * self.seq_len + t) * self.width;
        &self.data[start..start + self.width]
    }

    pub fn get(&self, b: usize, t: usize, d: usize) -> f32 {
        self.row(b, t)[d]
    }

    pub fn check_width(&self, op: &'static str, width: usize) -> Result<()> {
        if self.width != width {
            return Err(DecoderError::shape(
                op,
                format!("width {width}"),
                format!("{:?}", self.shape()),
            ));
        }
        Ok(())
    }

    /// Element-wise sum; both operands must have the same shape.
    pub fn add(&self, other: &Tensor3) -> Result<Tensor3> {
        if self.shape() != other.shape() {
            return Err(DecoderError::shape(
                "Tensor3::add",
                format!("{:?}", self.shape()),
                format!("{:?}", other.shape()),
            ));
        }
        let data = self
            .data
            .par_iter()
            .zip(other.data.par_iter())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Tensor3 {
            batch: self.batch,
            seq_len: self.seq_len,
            width: self.width,
            data,
        })
    }

    /// Apply `f` to every row in parallel. `f` must return rows of
    /// `out_width` values.
    pub fn map_rows<F>(&self, op: &'static str, out_width: usize, f: F) -> Result<Tensor3>
    where
        F: Fn(&[f32]) -> Vec<f32> + Sync + Send,
    {
        let width = self.width;
        let rows: Vec<Vec<f32>> = (0..self.batch * self.seq_len)
            .into_par_iter()
            .map(|i| f(&self.data[i * width..(i + 1) * width]))
            .collect();
        let mut data = Vec::with_capacity(rows.len() * out_width);
        for row in rows {
            if row.len() != out_width {
                return Err(DecoderError::shape(op, out_width, row.len()));
            }
            data.extend(row);
        }
        Ok(Tensor3 {
            batch: self.batch,
            seq_len: self.seq_len,
            width: out_width,
            data,
        })
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Largest absolute element difference, or `None` when shapes differ.
    pub fn max_abs_diff(&self, other: &Tensor3) -> Option<f32> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}
