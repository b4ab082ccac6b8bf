use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::RatingsError;

/// Arithmetic mean; `None` for an empty sample.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1); `None` below two observations.
pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let sum_of_squares: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some((sum_of_squares / (values.len() - 1) as f64).sqrt())
}

/// Mean absolute error of a set of residuals.
pub fn mean_absolute_error(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64)
}

/// Weighted mean; `None` when the weights sum to zero.
pub fn weighted_mean(values: &[(f64, f64)]) -> Option<f64> {
    let total_weight: f64 = values.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return None;
    }
    Some(values.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    // Unit normal parameters are always valid.
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(x),
        Err(_) => 0.5,
    }
}

/// Probability that a normal outcome centred on `model_value` lands above `line`.
///
/// A degenerate (zero) stddev collapses to a step at the line.
pub fn cover_probability(model_value: f64, line: f64, stddev: f64) -> f64 {
    let edge = model_value - line;
    if stddev <= 0.0 || !stddev.is_finite() {
        return if edge > 0.0 {
            1.0
        } else if edge < 0.0 {
            0.0
        } else {
            0.5
        };
    }
    normal_cdf(edge / stddev)
}

/// √(a² + b²)
pub fn quadrature(a: f64, b: f64) -> f64 {
    a.hypot(b)
}

/// Weighted, optionally ridge-regularised least squares.
///
/// Solves the normal equations `(AᵀWA + αI) x = AᵀWb` through an SVD
/// pseudo-inverse, so rank-deficient designs yield the minimum-norm solution.
pub fn solve_least_squares(
    rows: &[Vec<f64>],
    targets: &[f64],
    weights: Option<&[f64]>,
    ridge_alpha: f64,
) -> Result<Vec<f64>, RatingsError> {
    if rows.len() != targets.len() {
        return Err(RatingsError::Solver(format!(
            "{} rows but {} targets",
            rows.len(),
            targets.len()
        )));
    }
    if let Some(w) = weights {
        if w.len() != targets.len() {
            return Err(RatingsError::Solver(format!(
                "Weights size ({}) does not match target size ({})",
                w.len(),
                targets.len()
            )));
        }
    }
    let Some(columns) = rows.first().map(|row| row.len()) else {
        return Ok(Vec::new());
    };

    let a = DMatrix::from_fn(rows.len(), columns, |i, j| rows[i].get(j).copied().unwrap_or(0.0));
    let b = DVector::from_column_slice(targets);
    let w = DVector::from_fn(rows.len(), |i, _| weights.map_or(1.0, |w| w[i]));

    let weighted_a = DMatrix::from_fn(rows.len(), columns, |i, j| a[(i, j)] * w[i]);
    let mut normal = a.transpose() * &weighted_a;
    for k in 0..columns {
        normal[(k, k)] += ridge_alpha;
    }
    let rhs = weighted_a.transpose() * b;

    let svd = normal.svd(true, true);
    let solution = svd
        .solve(&rhs, 1e-10)
        .map_err(|e| RatingsError::Solver(e.to_string()))?;

    Ok(solution.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(sample_stddev(&[4.0]), None);
        let sd = sample_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138089935).abs() < 1e-6);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!(normal_cdf(-8.0) < 1e-6);
    }

    #[test]
    fn test_cover_probability() {
        assert_eq!(cover_probability(3.0, 3.0, 10.0), 0.5);
        assert!(cover_probability(7.0, 3.0, 10.0) > 0.5);
        assert_eq!(cover_probability(7.0, 3.0, 0.0), 1.0);
        assert_eq!(cover_probability(3.0, 3.0, 0.0), 0.5);
    }

    #[test]
    fn test_quadrature_dominates_components() {
        let combined = quadrature(3.0, 4.0);
        assert_eq!(combined, 5.0);
        assert!(combined >= 3.0_f64.max(4.0));
    }

    #[test]
    fn test_least_squares_recovers_exact_fit() {
        // y = 2a + 3b
        let rows = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, 1.0],
        ];
        let targets = vec![2.0, 3.0, 5.0, 7.0];
        let x = solve_least_squares(&rows, &targets, None, 0.0).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-8);
        assert!((x[1] - 3.0).abs() < 1e-8);
    }

    #[test]
    fn test_least_squares_rank_deficient_is_minimum_norm() {
        // Only the sum a + b is identified.
        let rows = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let targets = vec![4.0, 4.0];
        let x = solve_least_squares(&rows, &targets, None, 0.0).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-8);
        assert!((x[1] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_least_squares_rejects_mismatched_weights() {
        let rows = vec![vec![1.0]];
        let err = solve_least_squares(&rows, &[1.0], Some(&[1.0, 2.0]), 0.0);
        assert!(err.is_err());
    }
}
