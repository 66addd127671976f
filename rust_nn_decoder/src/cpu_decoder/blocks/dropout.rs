use crate::error::{DecoderError, Result};
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inverted dropout: in training mode every element is zeroed with
/// probability `rate` and survivors are scaled by `1 / (1 - rate)`.
/// Inference mode is the identity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DropoutParams")]
pub struct Dropout {
    rate: f32,
}

#[derive(Deserialize)]
struct DropoutParams {
    rate: f32,
}

impl TryFrom<DropoutParams> for Dropout {
    type Error = DecoderError;

    fn try_from(params: DropoutParams) -> Result<Self> {
        Dropout::new(params.rate)
    }
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(DecoderError::InvalidConfig(format!(
                "dropout rate {rate} outside [0, 1)"
            )));
        }
        Ok(Dropout { rate })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward<R: Rng + ?Sized>(
        &self,
        x: &Tensor3,
        training: bool,
        rng: &mut R,
    ) -> Result<Tensor3> {
        if !training || self.rate == 0.0 {
            return Ok(x.clone());
        }
        let scale = 1.0 / (1.0 - self.rate);
        let p = f64::from(self.rate);
        let data: Vec<f32> = x
            .data()
            .iter()
            .map(|v| if rng.gen_bool(p) { 0.0 } else { v * scale })
            .collect();
        Tensor3::from_vec(data, x.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn inference_mode_is_identity() -> Result<()> {
        let dropout = Dropout::new(0.5)?;
        let x = Tensor3::from_fn((2, 3, 4), |b, t, d| (b + t + d) as f32);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(dropout.forward(&x, false, &mut rng)?, x);
        Ok(())
    }

    #[test]
    fn zero_rate_is_identity_while_training() -> Result<()> {
        let dropout = Dropout::new(0.0)?;
        let x = Tensor3::from_fn((1, 4, 4), |_, t, d| (t * d) as f32);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(dropout.forward(&x, true, &mut rng)?, x);
        Ok(())
    }

    #[test]
    fn training_drops_and_rescales() -> Result<()> {
        let dropout = Dropout::new(0.25)?;
        let x = Tensor3::from_fn((4, 50, 50), |_, _, _| 1.0);
        let mut rng = StdRng::seed_from_u64(42);
        let y = dropout.forward(&x, true, &mut rng)?;
        let dropped = y.data().iter().filter(|&&v| v == 0.0).count();
        let frac = dropped as f32 / y.data().len() as f32;
        assert!((frac - 0.25).abs() < 0.03, "dropped fraction {frac}");
        let scale = 1.0 / 0.75;
        assert!(
            y.data()
                .iter()
                .all(|&v| v == 0.0 || (v - scale).abs() < 1e-6)
        );
        Ok(())
    }

    #[test]
    fn same_seed_same_pattern() -> Result<()> {
        let dropout = Dropout::new(0.5)?;
        let x = Tensor3::from_fn((1, 8, 8), |_, t, d| (t + d) as f32 + 1.0);
        let a = dropout.forward(&x, true, &mut StdRng::seed_from_u64(9))?;
        let b = dropout.forward(&x, true, &mut StdRng::seed_from_u64(9))?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn deserializes_valid_rate() -> std::result::Result<(), serde_json::Error> {
        let dropout: Dropout = serde_json::from_str(r#"{"rate":0.25}"#)?;
        assert_eq!(dropout.rate(), 0.25);
        Ok(())
    }

    #[test]
    fn rejects_invalid_rate() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.5).is_err());
        assert!(serde_json::from_str::<Dropout>(r#"{"rate":1.5}"#).is_err());
    }
}
