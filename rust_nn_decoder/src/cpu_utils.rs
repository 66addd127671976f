//! Shared CPU math helpers for the decoder operators.

/// Softmax over a slice. Entries equal to `-inf` get zero weight; a slice
/// made only of `-inf` yields NaN.
pub fn softmax(xs: &[f32]) -> Vec<f32> {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = xs.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Population mean and variance of a row.
pub fn mean_var(xs: &[f32]) -> (f32, f32) {
    let n = xs.len() as f32;
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let mean = xs.iter().sum::<f32>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one_and_ignores_neg_inf() {
        let p = softmax(&[1.0, f32::NEG_INFINITY, 1.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert_eq!(p[1], 0.0);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn softmax_of_all_masked_is_nan() {
        let p = softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY]);
        assert!(p.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn mean_var_of_constant_row() {
        let (mean, var) = mean_var(&[2.0, 2.0, 2.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(var, 0.0);
        assert_eq!(mean_var(&[]), (0.0, 0.0));
    }
}
