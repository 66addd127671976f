use super::linear::Linear;
use super::sublayer::PositionWise;
use crate::activation::Activation;
use crate::error::Result;
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Position-wise `d_model -> d_ff -> d_model` projection with a
/// nonlinearity in between.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedForward {
    pub linear1: Linear,
    pub linear2: Linear,
    pub activation: Activation,
}

impl FeedForward {
    pub fn with_rng<R: Rng + ?Sized>(
        model_dim: usize,
        hidden_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        FeedForward {
            linear1: Linear::with_rng(model_dim, hidden_dim, rng),
            linear2: Linear::with_rng(hidden_dim, model_dim, rng),
            activation,
        }
    }

    pub fn zeros(model_dim: usize, hidden_dim: usize, activation: Activation) -> Self {
        FeedForward {
            linear1: Linear::zeros(model_dim, hidden_dim),
            linear2: Linear::zeros(hidden_dim, model_dim),
            activation,
        }
    }

    pub fn model_dim(&self) -> usize {
        self.linear1.in_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.linear1.out_dim()
    }

    /// Check both projections against `model_dim -> hidden_dim -> model_dim`.
    pub fn check_dims(&self, model_dim: usize, hidden_dim: usize) -> Result<()> {
        self.linear1.check_dims("FeedForward::linear1", model_dim, hidden_dim)?;
        self.linear2.check_dims("FeedForward::linear2", hidden_dim, model_dim)
    }

    /// Forward for a single row.
    pub fn forward_row(&self, x: &[f32]) -> Vec<f32> {
        let h: Vec<f32> = self
            .linear1
            .forward(x)
            .into_iter()
            .map(|v| self.activation.apply(v))
            .collect();
        self.linear2.forward(&h)
    }
}

impl PositionWise for FeedForward {
    fn forward(&self, x: &Tensor3) -> Result<Tensor3> {
        x.check_width("FeedForward", self.model_dim())?;
        x.map_rows("FeedForward", self.linear2.out_dim(), |row| {
            self.forward_row(row)
        })
    }
}
