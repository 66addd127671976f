//! Configuration for a decoder layer and for a stack of them.

use crate::activation::Activation;
use crate::error::{DecoderError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderLayerConfig {
    pub d_model: usize,
    pub d_ff: usize,
    pub heads_num: usize,
    pub dropout_rate: f32,
    pub layer_norm_eps: f32,
    #[serde(default)]
    pub activation: Activation,
}

impl Default for DecoderLayerConfig {
    fn default() -> Self {
        DecoderLayerConfig {
            d_model: 512,
            d_ff: 2048,
            heads_num: 8,
            dropout_rate: 0.1,
            layer_norm_eps: 1e-5,
            activation: Activation::Relu,
        }
    }
}

impl DecoderLayerConfig {
    pub fn new(
        d_model: usize,
        d_ff: usize,
        heads_num: usize,
        dropout_rate: f32,
        layer_norm_eps: f32,
    ) -> Self {
        DecoderLayerConfig {
            d_model,
            d_ff,
            heads_num,
            dropout_rate,
            layer_norm_eps,
            activation: Activation::default(),
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.heads_num.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 {
            return Err(DecoderError::InvalidConfig("d_model must be > 0".into()));
        }
        if self.d_ff == 0 {
            return Err(DecoderError::InvalidConfig("d_ff must be > 0".into()));
        }
        if self.heads_num == 0 || self.d_model % self.heads_num != 0 {
            return Err(DecoderError::InvalidConfig(format!(
                "heads_num {} must evenly divide d_model {}",
                self.heads_num, self.d_model
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(DecoderError::InvalidConfig(format!(
                "dropout_rate {} outside [0, 1)",
                self.dropout_rate
            )));
        }
        if !(self.layer_norm_eps.is_finite() && self.layer_norm_eps > 0.0) {
            return Err(DecoderError::InvalidConfig(format!(
                "layer_norm_eps {} must be a positive finite number",
                self.layer_norm_eps
            )));
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: DecoderLayerConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        tracing::debug!("loaded decoder layer config from {}", path.as_ref().display());
        Ok(config)
    }
}

/// A stack of identically configured layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub layer: DecoderLayerConfig,
    pub num_layers: usize,
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_layers == 0 {
            return Err(DecoderError::InvalidConfig("num_layers must be > 0".into()));
        }
        self.layer.validate()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: DecoderConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        tracing::debug!("loaded decoder config from {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() -> Result<()> {
        DecoderLayerConfig::default().validate()
    }

    #[test]
    fn rejects_heads_that_do_not_divide_width() {
        let config = DecoderLayerConfig::new(10, 32, 3, 0.0, 1e-5);
        assert!(matches!(
            config.validate(),
            Err(DecoderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_dropout_and_eps() {
        assert!(DecoderLayerConfig::new(8, 32, 2, 1.0, 1e-5).validate().is_err());
        assert!(DecoderLayerConfig::new(8, 32, 2, -0.1, 1e-5).validate().is_err());
        assert!(DecoderLayerConfig::new(8, 32, 2, f32::NAN, 1e-5).validate().is_err());
        assert!(DecoderLayerConfig::new(8, 32, 2, 0.1, 0.0).validate().is_err());
        assert!(DecoderLayerConfig::new(8, 32, 2, 0.1, f32::INFINITY).validate().is_err());
    }

    #[test]
    fn rejects_zero_widths() {
        assert!(DecoderLayerConfig::new(0, 32, 1, 0.0, 1e-5).validate().is_err());
        assert!(DecoderLayerConfig::new(8, 0, 2, 0.0, 1e-5).validate().is_err());
        assert!(DecoderLayerConfig::new(8, 32, 0, 0.0, 1e-5).validate().is_err());
    }

    #[test]
    fn activation_defaults_to_relu_in_json() -> std::result::Result<(), serde_json::Error> {
        let json = r#"{"d_model":8,"d_ff":32,"heads_num":2,"dropout_rate":0.0,"layer_norm_eps":1e-5}"#;
        let config: DecoderLayerConfig = serde_json::from_str(json)?;
        assert_eq!(config.activation, Activation::Relu);
        assert_eq!(config.head_dim(), 4);
        Ok(())
    }

    #[test]
    fn loads_stack_config_from_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!(
            "rust_nn_decoder_config_{}.json",
            std::process::id()
        ));
        let config = DecoderConfig {
            layer: DecoderLayerConfig::new(16, 64, 4, 0.1, 1e-6).with_activation(Activation::Gelu),
            num_layers: 3,
        };
        std::fs::write(&path, serde_json::to_string(&config)?)?;
        let loaded = DecoderConfig::from_json_file(&path);
        std::fs::remove_file(&path)?;
        assert_eq!(loaded?, config);
        Ok(())
    }

    #[test]
    fn stack_config_needs_layers() {
        let config = DecoderConfig {
            layer: DecoderLayerConfig::default(),
            num_layers: 0,
        };
        assert!(config.validate().is_err());
    }
}
