//! Classification performance measures.

/// Fraction of `predicted` equal to `observed`. `NaN` when empty.
pub(crate) fn accuracy(predicted: &[usize], observed: &[usize]) -> f64 {
    if observed.is_empty() {
        return f64::NAN;
    }
    let hits = predicted
        .iter()
        .zip(observed)
        .filter(|(p, o)| p == o)
        .count();
    hits as f64 / observed.len() as f64
}

/// Cohen's kappa over `n_classes` classes. `NaN` when chance agreement is 1
/// (a single class present in both vectors) or the input is empty.
pub(crate) fn kappa(predicted: &[usize], observed: &[usize], n_classes: usize) -> f64 {
    let n = observed.len();
    if n == 0 {
        return f64::NAN;
    }
    let mut predicted_counts = vec![0usize; n_classes];
    let mut observed_counts = vec![0usize; n_classes];
    for (&p, &o) in predicted.iter().zip(observed) {
        predicted_counts[p] += 1;
        observed_counts[o] += 1;
    }
    let total = n as f64;
    let expected: f64 = predicted_counts
        .iter()
        .zip(&observed_counts)
        .map(|(&p, &o)| (p as f64 / total) * (o as f64 / total))
        .sum();
    if (1.0 - expected).abs() < 1e-12 {
        return f64::NAN;
    }
    (accuracy(predicted, observed) - expected) / (1.0 - expected)
}

/// Mean of the finite values; `NaN` when there are none.
pub(crate) fn finite_mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        f64::NAN
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
        assert!(accuracy(&[], &[]).is_nan());
    }

    #[test]
    fn test_kappa_perfect_and_chance() {
        assert!((kappa(&[0, 1, 0, 1], &[0, 1, 0, 1], 2) - 1.0).abs() < 1e-12);
        // all predictions one class on balanced data: no better than chance
        assert!(kappa(&[0, 0, 0, 0], &[0, 1, 0, 1], 2).abs() < 1e-12);
    }

    #[test]
    fn test_kappa_undefined_for_single_class() {
        assert!(kappa(&[1, 1], &[1, 1], 3).is_nan());
    }

    #[test]
    fn test_finite_mean_skips_nan() {
        assert_eq!(finite_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(finite_mean(&[f64::NAN]).is_nan());
    }
}
