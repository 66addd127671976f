use crate::cpu_decoder::blocks::DecoderLayer;
use crate::cpu_decoder::config::DecoderConfig;
use crate::error::{DecoderError, Result};
use crate::mask::Mask;
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A stack of independently parameterized decoder layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformerDecoder {
    pub config: DecoderConfig,
    pub layers: Vec<DecoderLayer>,
}

impl TransformerDecoder {
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(config: &DecoderConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let layers = (0..config.num_layers)
            .map(|_| DecoderLayer::with_rng(&config.layer, rng))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("TransformerDecoder: {} layers", layers.len());
        Ok(TransformerDecoder {
            config: config.clone(),
            layers,
        })
    }

    /// Each layer's output becomes the next layer's target; every layer
    /// sees the same `source` and masks.
    pub fn forward(
        &self,
        target: &Tensor3,
        source: &Tensor3,
        cross_mask: &Mask,
        self_mask: &Mask,
        training: bool,
    ) -> Result<Tensor3> {
        let mut rng = rand::thread_rng();
        self.forward_with_rng(target, source, cross_mask, self_mask, training, &mut rng)
    }

    pub fn forward_with_rng<R: Rng + ?Sized>(
        &self,
        target: &Tensor3,
        source: &Tensor3,
        cross_mask: &Mask,
        self_mask: &Mask,
        training: bool,
        rng: &mut R,
    ) -> Result<Tensor3> {
        let mut x = target.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward_with_rng(&x, source, cross_mask, self_mask, training, rng)?;
            tracing::trace!("layer {}/{} done", i + 1, self.layers.len());
        }
        Ok(x)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let decoder: TransformerDecoder = serde_json::from_reader(reader)?;
        decoder.config.validate()?;
        if decoder.layers.len() != decoder.config.num_layers {
            return Err(DecoderError::InvalidConfig(format!(
                "{} layers stored, {} configured",
                decoder.layers.len(),
                decoder.config.num_layers
            )));
        }
        for (i, layer) in decoder.layers.iter().enumerate() {
            if layer.config() != &decoder.config.layer {
                return Err(DecoderError::InvalidConfig(format!(
                    "layer {i} config differs from the stack config"
                )));
            }
            layer.check_parameters()?;
        }
        Ok(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_decoder::config::DecoderLayerConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn config(num_layers: usize) -> DecoderConfig {
        DecoderConfig {
            layer: DecoderLayerConfig::new(8, 16, 2, 0.0, 1e-5),
            num_layers,
        }
    }

    fn inputs() -> (Tensor3, Tensor3, Mask, Mask) {
        let mut rng = StdRng::seed_from_u64(100);
        let target = Tensor3::from_fn((2, 3, 8), |_, _, _| rng.gen_range(-1.0..1.0));
        let source = Tensor3::from_fn((2, 4, 8), |_, _, _| rng.gen_range(-1.0..1.0));
        (
            target,
            source,
            Mask::padding(&[4, 2], 3, 4),
            Mask::causal(1, 3, 3),
        )
    }

    #[test]
    fn stack_chains_layers_in_order() -> TestResult {
        let decoder = TransformerDecoder::with_rng(&config(3), &mut StdRng::seed_from_u64(1))?;
        assert_eq!(decoder.layers.len(), 3);
        let (target, source, cross, causal) = inputs();

        let out = decoder.forward(&target, &source, &cross, &causal, false)?;
        let mut expected = target;
        for layer in &decoder.layers {
            expected = layer.forward(&expected, &source, &cross, &causal, false)?;
        }
        assert_eq!(out, expected);
        assert_eq!(out.shape(), (2, 3, 8));
        Ok(())
    }

    #[test]
    fn layers_are_independent() -> TestResult {
        let decoder = TransformerDecoder::with_rng(&config(2), &mut StdRng::seed_from_u64(2))?;
        assert_ne!(
            decoder.layers[0].self_attention.w_v.weight,
            decoder.layers[1].self_attention.w_v.weight
        );
        Ok(())
    }

    #[test]
    fn rejects_empty_stack() {
        assert!(TransformerDecoder::new(&config(0)).is_err());
    }

    #[test]
    fn json_round_trip() -> TestResult {
        let decoder = TransformerDecoder::with_rng(&config(2), &mut StdRng::seed_from_u64(3))?;
        let path = std::env::temp_dir().join(format!(
            "rust_nn_decoder_stack_{}.json",
            std::process::id()
        ));
        decoder.save_json(&path)?;
        let loaded = TransformerDecoder::load_json(&path);
        std::fs::remove_file(&path)?;
        let loaded = loaded?;
        assert_eq!(loaded.config, decoder.config);

        let (target, source, cross, causal) = inputs();
        let a = decoder.forward(&target, &source, &cross, &causal, false)?;
        let b = loaded.forward(&target, &source, &cross, &causal, false)?;
        assert!(a.max_abs_diff(&b).is_some_and(|d| d < 1e-5));
        Ok(())
    }

    #[test]
    fn load_checks_every_layer() -> TestResult {
        let decoder = TransformerDecoder::with_rng(&config(2), &mut StdRng::seed_from_u64(4))?;
        let edits: [(&str, fn(&mut serde_json::Value)); 3] = [
            ("rate", |v| v["layers"][1]["dropout_self_attention"]["rate"] = serde_json::json!(1.5)),
            ("heads", |v| v["layers"][0]["cross_attention"]["num_heads"] = serde_json::json!(4)),
            ("count", |v| v["config"]["num_layers"] = serde_json::json!(3)),
        ];
        for (name, edit) in edits {
            let mut value = serde_json::to_value(&decoder)?;
            edit(&mut value);
            let path = std::env::temp_dir().join(format!(
                "rust_nn_decoder_stack_{name}_{}.json",
                std::process::id()
            ));
            std::fs::write(&path, serde_json::to_vec(&value)?)?;
            let loaded = TransformerDecoder::load_json(&path);
            std::fs::remove_file(&path)?;
            assert!(loaded.is_err(), "edited {name} still loaded");
        }
        Ok(())
    }
}
