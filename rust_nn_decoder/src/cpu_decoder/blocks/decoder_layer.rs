use super::sublayer::{Attention, PositionWise};
use super::{Dropout, FeedForward, LayerNorm, MultiHeadAttention};
use crate::cpu_decoder::config::DecoderLayerConfig;
use crate::error::{DecoderError, Result};
use crate::mask::Mask;
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One decoder layer: masked self-attention, cross-attention over the
/// encoder output, then a position-wise feed-forward network.
///
/// Every sublayer is wrapped as `norm(x + dropout(sublayer(x)))`, i.e. the
/// normalization comes after the residual sum (post-LN).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecoderLayer<A = MultiHeadAttention, F = FeedForward> {
    config: DecoderLayerConfig,
    pub self_attention: A,
    pub dropout_self_attention: Dropout,
    pub norm_self_attention: LayerNorm,
    pub cross_attention: A,
    pub dropout_cross_attention: Dropout,
    pub norm_cross_attention: LayerNorm,
    pub feed_forward: F,
    pub dropout_feed_forward: Dropout,
    pub norm_feed_forward: LayerNorm,
}

impl DecoderLayer {
    pub fn new(config: &DecoderLayerConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(config: &DecoderLayerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let self_attention = MultiHeadAttention::with_rng(config.d_model, config.heads_num, rng)?;
        let cross_attention = MultiHeadAttention::with_rng(config.d_model, config.heads_num, rng)?;
        let feed_forward =
            FeedForward::with_rng(config.d_model, config.d_ff, config.activation, rng);
        Self::from_parts(config, self_attention, cross_attention, feed_forward)
    }

    /// All operators with zero weights and biases.
    pub fn zeros(config: &DecoderLayerConfig) -> Result<Self> {
        config.validate()?;
        Self::from_parts(
            config,
            MultiHeadAttention::zeros(config.d_model, config.heads_num)?,
            MultiHeadAttention::zeros(config.d_model, config.heads_num)?,
            FeedForward::zeros(config.d_model, config.d_ff, config.activation),
        )
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let layer: DecoderLayer = serde_json::from_reader(reader)?;
        layer.check_parameters()?;
        Ok(layer)
    }

    /// Check every operator against the stored config: dropout rates, norm
    /// widths, head split and projection shapes. Loaded parameters go
    /// through this before any forward pass.
    pub fn check_parameters(&self) -> Result<()> {
        let config = &self.config;
        config.validate()?;
        let dropouts = [
            &self.dropout_self_attention,
            &self.dropout_cross_attention,
            &self.dropout_feed_forward,
        ];
        if let Some(dropout) = dropouts.iter().find(|d| d.rate() != config.dropout_rate) {
            return Err(DecoderError::InvalidConfig(format!(
                "dropout rate {} differs from configured {}",
                dropout.rate(),
                config.dropout_rate
            )));
        }
        for norm in [
            &self.norm_self_attention,
            &self.norm_cross_attention,
            &self.norm_feed_forward,
        ] {
            norm.check_dim(config.d_model)?;
        }
        self.self_attention
            .check_dims(config.d_model, config.heads_num)?;
        self.cross_attention
            .check_dims(config.d_model, config.heads_num)?;
        self.feed_forward.check_dims(config.d_model, config.d_ff)?;
        if self.feed_forward.activation != config.activation {
            return Err(DecoderError::InvalidConfig(format!(
                "feed-forward activation {:?} differs from configured {:?}",
                self.feed_forward.activation, config.activation
            )));
        }
        Ok(())
    }
}

impl<A: Attention, F: PositionWise> DecoderLayer<A, F> {
    /// Wire caller-provided operators; norms and dropouts are built fresh
    /// from `config`.
    pub fn from_parts(
        config: &DecoderLayerConfig,
        self_attention: A,
        cross_attention: A,
        feed_forward: F,
    ) -> Result<Self> {
        config.validate()?;
        let layer = DecoderLayer {
            config: config.clone(),
            self_attention,
            dropout_self_attention: Dropout::new(config.dropout_rate)?,
            norm_self_attention: LayerNorm::new(config.d_model, config.layer_norm_eps),
            cross_attention,
            dropout_cross_attention: Dropout::new(config.dropout_rate)?,
            norm_cross_attention: LayerNorm::new(config.d_model, config.layer_norm_eps),
            feed_forward,
            dropout_feed_forward: Dropout::new(config.dropout_rate)?,
            norm_feed_forward: LayerNorm::new(config.d_model, config.layer_norm_eps),
        };
        tracing::debug!(
            "DecoderLayer: d_model={}, d_ff={}, heads={}, dropout={}, eps={}",
            config.d_model,
            config.d_ff,
            config.heads_num,
            config.dropout_rate,
            config.layer_norm_eps
        );
        Ok(layer)
    }

    pub fn config(&self) -> &DecoderLayerConfig {
        &self.config
    }

    pub fn d_model(&self) -> usize {
        self.config.d_model
    }

    /// Run the layer. `target` is `(B, T, d_model)`, `source` is the encoder
    /// output `(B, S, d_model)`; `cross_mask` covers `(B, T, S)` and
    /// `self_mask` covers `(B, T, T)`. Dropout draws from the thread RNG
    /// when `training` is set.
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
        let attended = self.self_attention_block(target, self_mask, training, rng)?;
        let target = self.norm_self_attention.forward(&target.add(&attended)?)?;
        tracing::trace!("self-attention stage done: {:?}", target.shape());

        let attended = self.cross_attention_block(source, &target, cross_mask, training, rng)?;
        let x = self.norm_cross_attention.forward(&target.add(&attended)?)?;
        tracing::trace!("cross-attention stage done: {:?}", x.shape());

        let projected = self.feed_forward_block(&x, training, rng)?;
        let x = self.norm_feed_forward.forward(&x.add(&projected)?)?;
        tracing::trace!("feed-forward stage done: {:?}", x.shape());
        Ok(x)
    }

    fn self_attention_block<R: Rng + ?Sized>(
        &self,
        x: &Tensor3,
        mask: &Mask,
        training: bool,
        rng: &mut R,
    ) -> Result<Tensor3> {
        let attended = self.self_attention.attend(x, x, x, Some(mask))?;
        self.dropout_self_attention.forward(&attended, training, rng)
    }

    fn cross_attention_block<R: Rng + ?Sized>(
        &self,
        source: &Tensor3,
        target: &Tensor3,
        mask: &Mask,
        training: bool,
        rng: &mut R,
    ) -> Result<Tensor3> {
        let attended = self
            .cross_attention
            .attend(target, source, source, Some(mask))?;
        self.dropout_cross_attention.forward(&attended, training, rng)
    }

    fn feed_forward_block<R: Rng + ?Sized>(
        &self,
        x: &Tensor3,
        training: bool,
        rng: &mut R,
    ) -> Result<Tensor3> {
        let projected = self.feed_forward.forward(x)?;
        self.dropout_feed_forward.forward(&projected, training, rng)
    }
}
