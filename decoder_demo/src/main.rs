use rand::Rng;
use rust_nn_decoder::{DecoderConfig, DecoderLayerConfig, Mask, Tensor3, TransformerDecoder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Optional path to a JSON `DecoderConfig`
    let config = match std::env::args().nth(1) {
        Some(path) => DecoderConfig::from_json_file(path)?,
        None => DecoderConfig {
            layer: DecoderLayerConfig::new(64, 256, 4, 0.1, 1e-5),
            num_layers: 6,
        },
    };
    let d_model = config.layer.d_model;
    let decoder = TransformerDecoder::new(&config)?;

    let batch_size = 4;
    let target_len = 12;
    let source_len = 16;
    let mut rng = rand::thread_rng();
    let target = Tensor3::from_fn((batch_size, target_len, d_model), |_, _, _| {
        rng.gen_range(-1.0..1.0)
    });
    let source = Tensor3::from_fn((batch_size, source_len, d_model), |_, _, _| {
        rng.gen_range(-1.0..1.0)
    });
    let source_lengths: Vec<usize> = (0..batch_size)
        .map(|_| rng.gen_range(1..=source_len))
        .collect();
    let cross_mask = Mask::padding(&source_lengths, target_len, source_len);
    let self_mask = Mask::causal(1, target_len, target_len);

    for training in [true, false] {
        let out = decoder.forward(&target, &source, &cross_mask, &self_mask, training)?;
        let mean_abs = out.data().iter().map(|v| v.abs()).sum::<f32>() / out.data().len() as f32;
        tracing::info!(
            "training={} output shape {:?}, mean |x| = {:.4}, finite = {}",
            training,
            out.shape(),
            mean_abs,
            out.is_finite()
        );
    }
    Ok(())
}
