//! Statistics for error analysis and model selection.

use crate::domain::Criterion;

/// Sample standard deviation (n - 1) over the selected values.
///
/// Values are shifted by the first selected value before accumulating, so
/// identical values give exactly zero. Fewer than two selected values give
/// zero.
pub fn std_dev(values: &[f64], selected: &[bool]) -> f64 {
    let picked: Vec<f64> = values
        .iter()
        .enumerate()
        .filter(|(i, v)| selected.get(*i).copied().unwrap_or(true) && v.is_finite())
        .map(|(_, v)| *v)
        .collect();
    if picked.len() < 2 {
        return 0.0;
    }
    let shift = picked[0];
    let n = picked.len() as f64;
    let (sum, sum_sq) = picked.iter().fold((0.0, 0.0), |(s, ss), v| {
        let d = v - shift;
        (s + d, ss + d * d)
    });
    let var = (sum_sq - sum * sum / n) / (n - 1.0);
    var.max(0.0).sqrt()
}

/// Akaike information criterion `chi2 + 2k`.
pub fn aic(chi2: f64, k: usize) -> f64 {
    chi2 + 2.0 * k as f64
}

/// Small-sample corrected AIC.
///
/// Undefined when `n <= k + 1`; returns `+∞` so such models never win.
pub fn aicc(chi2: f64, k: usize, n: usize) -> f64 {
    let (k, n) = (k as f64, n as f64);
    let denom = n - k - 1.0;
    if denom <= 0.0 {
        return f64::INFINITY;
    }
    chi2 + 2.0 * k + 2.0 * k * (k + 1.0) / denom
}

/// Bayesian information criterion `chi2 + k·ln(n)`.
pub fn bic(chi2: f64, k: usize, n: usize) -> f64 {
    chi2 + k as f64 * (n.max(1) as f64).ln()
}

pub fn criterion_score(criterion: Criterion, chi2: f64, k: usize, n: usize) -> f64 {
    match criterion {
        Criterion::Aic => aic(chi2, k),
        Criterion::Aicc => aicc(chi2, k, n),
        Criterion::Bic => bic(chi2, k, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_dev_matches_textbook() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = std_dev(&v, &[]);
        let expect = (32.0_f64 / 7.0).sqrt();
        assert!((sd - expect).abs() < 1e-12);
    }

    #[test]
    fn std_dev_of_identical_values_is_exactly_zero() {
        let v = [0.123456789; 50];
        assert_eq!(std_dev(&v, &[]), 0.0);
    }

    #[test]
    fn std_dev_skips_unselected() {
        let v = [1.0, 1000.0, 3.0];
        let sd = std_dev(&v, &[true, false, true]);
        assert!((sd - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn aic_prefers_simpler_model_in_example() {
        // (k=3, chi2=10) vs (k=5, chi2=9)
        assert!(aic(10.0, 3) < aic(9.0, 5));
        assert_eq!(aic(10.0, 3), 16.0);
    }

    #[test]
    fn aicc_and_bic_penalise_more() {
        assert!(aicc(10.0, 3, 20) > aic(10.0, 3));
        assert!((bic(10.0, 3, 20) - (10.0 + 3.0 * 20.0_f64.ln())).abs() < 1e-12);
        assert_eq!(aicc(1.0, 5, 6), f64::INFINITY);
    }
}
