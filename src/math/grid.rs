//! Exhaustive grid search.
//!
//! Points are enumerated lexicographically (first dimension slowest) and
//! evaluated in parallel. The minimum is picked deterministically: lowest
//! value, ties broken by enumeration index, so the result matches a serial
//! first-minimum scan.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::error::AppError;

/// `inc` evenly spaced values from `lower` to `upper` inclusive.
///
/// Degenerate bounds (`lower == upper`) or `inc == 1` give a single value.
pub fn axis(lower: f64, upper: f64, inc: usize) -> Vec<f64> {
    if inc <= 1 || lower == upper {
        return vec![lower];
    }
    let step = (upper - lower) / (inc as f64 - 1.0);
    (0..inc).map(|i| lower + step * i as f64).collect()
}

#[derive(Debug, Clone)]
pub struct GridResult {
    pub x: DVector<f64>,
    pub f: f64,
    /// Enumeration index of the winning point.
    pub index: u64,
    /// Number of feasible points evaluated.
    pub evaluated: u64,
}

pub fn point_count(axes: &[Vec<f64>]) -> u128 {
    axes.iter().map(|a| a.len() as u128).product()
}

fn point_at(axes: &[Vec<f64>], mut idx: u64) -> DVector<f64> {
    let mut x = DVector::zeros(axes.len());
    for (d, a) in axes.iter().enumerate().rev() {
        let len = a.len() as u64;
        x[d] = a[(idx % len) as usize];
        idx /= len;
    }
    x
}

/// Evaluate `f` on every feasible grid point and return the best one.
///
/// `label` names the model in error messages.
pub fn grid_search<F, C>(
    label: &str,
    axes: &[Vec<f64>],
    f: F,
    feasible: C,
    max_points: u64,
) -> Result<GridResult, AppError>
where
    F: Fn(&DVector<f64>) -> f64 + Sync,
    C: Fn(&DVector<f64>) -> bool + Sync,
{
    let total = point_count(axes);
    if total > max_points as u128 {
        return Err(AppError::GridTooLarge {
            model: label.to_string(),
            points: total,
            limit: max_points,
        });
    }
    let total = total as u64;

    let best = (0..total)
        .into_par_iter()
        .filter_map(|idx| {
            let x = point_at(axes, idx);
            if !feasible(&x) {
                return None;
            }
            let v = f(&x);
            if v.is_nan() {
                return None;
            }
            Some((idx, v, 1u64))
        })
        .reduce_with(|a, b| {
            let count = a.2 + b.2;
            let pick_b = b.1 < a.1 || (b.1 == a.1 && b.0 < a.0);
            if pick_b { (b.0, b.1, count) } else { (a.0, a.1, count) }
        });

    match best {
        Some((index, f, evaluated)) => Ok(GridResult {
            x: point_at(axes, index),
            f,
            index,
            evaluated,
        }),
        None => Err(AppError::invalid(format!(
            "The grid search for model '{label}' found no feasible point."
        ))),
    }
}
