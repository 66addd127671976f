use crate::cpu_utils::mean_var;
use crate::error::{DecoderError, Result};
use crate::tensor::Tensor3;
use serde::{Deserialize, Serialize};

/// Normalizes each row to zero mean and unit variance, then scales by
/// `gamma` and shifts by `beta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerNorm {
    pub gamma: Vec<f32>, // scale
    pub beta: Vec<f32>,  // shift
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        LayerNorm {
            gamma: vec![1.0; dim],
            beta: vec![0.0; dim],
            eps,
        }
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    /// Check that both `gamma` and `beta` hold `dim` values.
    pub fn check_dim(&self, dim: usize) -> Result<()> {
        if self.gamma.len() != dim || self.beta.len() != dim {
            return Err(DecoderError::shape(
                "LayerNorm",
                format!("gamma and beta of {dim}"),
                format!("gamma {} and beta {}", self.gamma.len(), self.beta.len()),
            ));
        }
        Ok(())
    }

    /// Normalize a single row of `dim` values.
    pub fn normalize(&self, input: &[f32]) -> Vec<f32> {
        let (mean, var) = mean_var(input);
        let inv_std = 1.0 / (var + self.eps).sqrt();
        input
            .iter()
            .zip(self.gamma.iter().zip(self.beta.iter()))
            .map(|(x, (g, b))| g * (x - mean) * inv_std + b)
            .collect()
    }

    pub fn forward(&self, x: &Tensor3) -> Result<Tensor3> {
        x.check_width("LayerNorm", self.dim())?;
        x.map_rows("LayerNorm", self.dim(), |row| self.normalize(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_utils::mean_var;

    #[test]
    fn rows_come_out_standardized() -> Result<()> {
        let norm = LayerNorm::new(4, 1e-5);
        let x = Tensor3::from_fn((2, 3, 4), |b, t, d| (b * 7 + t * 3) as f32 + d as f32 * 1.5);
        let y = norm.forward(&x)?;
        for b in 0..2 {
            for t in 0..3 {
                let (mean, var) = mean_var(y.row(b, t));
                assert!(mean.abs() < 1e-5);
                assert!((var - 1.0).abs() < 1e-3);
            }
        }
        Ok(())
    }

    #[test]
    fn zero_row_maps_to_beta() -> Result<()> {
        let mut norm = LayerNorm::new(3, 1e-5);
        norm.beta = vec![0.5, -0.5, 0.0];
        let y = norm.forward(&Tensor3::zeros(1, 1, 3))?;
        assert!(y.is_finite());
        assert_eq!(y.row(0, 0), &[0.5, -0.5, 0.0]);
        Ok(())
    }

    #[test]
    fn gamma_scales_output() {
        let mut norm = LayerNorm::new(2, 0.0);
        norm.gamma = vec![2.0, 2.0];
        let y = norm.normalize(&[1.0, 3.0]);
        assert!((y[0] + 2.0).abs() < 1e-6);
        assert!((y[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_wrong_width() {
        let norm = LayerNorm::new(8, 1e-5);
        assert!(norm.forward(&Tensor3::zeros(1, 2, 4)).is_err());
    }

    #[test]
    fn check_dim_needs_matching_beta() -> Result<()> {
        let mut norm = LayerNorm::new(4, 1e-5);
        norm.check_dim(4)?;
        norm.beta.pop();
        assert!(matches!(
            norm.check_dim(4),
            Err(DecoderError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
