use crate::error::{DecoderError, Result};
use crate::tensor::Tensor3;
use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    pub in_dim: usize,
    pub weight: Vec<Vec<f32>>, // shape: [out_dim][in_dim]
    pub bias: Vec<f32>,        // shape: [out_dim]
}

impl Linear {
    pub fn with_rng<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        // Xavier/Glorot uniform initialization
        let limit = (6.0f32 / (in_dim as f32 + out_dim as f32)).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        let weight: Vec<Vec<f32>> = (0..out_dim)
            .map(|_| (0..in_dim).map(|_| dist.sample(rng)).collect())
            .collect();
        let bias: Vec<f32> = (0..out_dim).map(|_| rng.gen_range(-1e-2..1e-2)).collect();
        Linear {
            in_dim,
            weight,
            bias,
        }
    }

    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Linear {
            in_dim,
            weight: vec![vec![0.0; in_dim]; out_dim],
            bias: vec![0.0; out_dim],
        }
    }

    /// Wrap existing parameters; every weight row must have the same length
    /// and there must be one bias per row.
    pub fn from_weights(weight: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self> {
        let in_dim = weight.first().map_or(0, |row| row.len());
        if let Some(row) = weight.iter().find(|row| row.len() != in_dim) {
            return Err(DecoderError::shape("Linear::from_weights", in_dim, row.len()));
        }
        if bias.len() != weight.len() {
            return Err(DecoderError::shape(
                "Linear::from_weights",
                format!("{} biases", weight.len()),
                bias.len(),
            ));
        }
        Ok(Linear {
            in_dim,
            weight,
            bias,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.weight.len()
    }

    /// Check that this projection maps `in_dim` values to `out_dim` values
    /// and that every weight row and the bias agree with that.
    pub fn check_dims(&self, op: &'static str, in_dim: usize, out_dim: usize) -> Result<()> {
        if self.in_dim != in_dim || self.out_dim() != out_dim || self.bias.len() != out_dim {
            return Err(DecoderError::shape(
                op,
                format!("{in_dim} -> {out_dim}"),
                format!(
                    "{} -> {} with {} biases",
                    self.in_dim,
                    self.out_dim(),
                    self.bias.len()
                ),
            ));
        }
        if let Some(row) = self.weight.iter().find(|row| row.len() != in_dim) {
            return Err(DecoderError::shape(op, format!("rows of {in_dim}"), row.len()));
        }
        Ok(())
    }

    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        // input: [in_dim]
        // output: [out_dim]
        self.weight
            .par_iter()
            .zip(self.bias.par_iter())
            .map(|(w_row, b)| {
                w_row
                    .iter()
                    .zip(input.iter())
                    .map(|(w, i)| w * i)
                    .sum::<f32>()
                    + b
            })
            .collect()
    }

    /// Project every row of `x`; `x.width()` must equal `in_dim`.
    pub fn forward_tensor(&self, x: &Tensor3) -> Result<Tensor3> {
        x.check_width("Linear", self.in_dim)?;
        x.map_rows("Linear", self.out_dim(), |row| self.forward(row))
    }

    pub fn num_parameters(&self) -> usize {
        self.in_dim * self.out_dim() + self.bias.len()
    }
}
