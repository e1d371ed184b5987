use nalgebra::*;
use crate::error::{MixtureError, Result};

/// Numerically stable ln(sum(exp(v))). The largest entry is factored out before
/// exponentiating; an empty slice or a slice of negative infinities yields negative
/// infinity instead of NaN.
pub fn log_sum_exp(vals : &[f64]) -> f64 {
    let max = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum : f64 = vals.iter().map(|v| (v - max).exp() ).sum();
    max + sum.ln()
}

/// ln(exp(a) + exp(b)), safe when either side is negative infinity.
pub fn log_add_exp(a : f64, b : f64) -> f64 {
    let max = a.max(b);
    if !max.is_finite() {
        return max;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Shifts v in place so that exp(v) sums to one. Returns the log-normalizer
/// that was subtracted. If every entry is negative infinity nothing is changed
/// and negative infinity is returned.
pub fn log_normalize(v : &mut DVector<f64>) -> f64 {
    let norm = log_sum_exp(v.as_slice());
    if norm.is_finite() {
        v.add_scalar_mut(-norm);
    }
    norm
}

/// Row-wise log-softmax of a (batch x classes) matrix of scores.
pub fn log_softmax_rows(scores : &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = scores.clone();
    for mut row in out.row_iter_mut() {
        let vals : Vec<f64> = row.iter().cloned().collect();
        let norm = log_sum_exp(&vals[..]);
        row.add_scalar_mut(-norm);
    }
    out
}

/// Index of the largest entry of each row. Ties resolve to the first index.
pub fn argmax_rows(m : &DMatrix<f64>) -> Vec<usize> {
    m.row_iter().map(|row| {
        let mut best = (0, f64::NEG_INFINITY);
        for (j, v) in row.iter().enumerate() {
            if *v > best.1 {
                best = (j, *v);
            }
        }
        best.0
    }).collect()
}

/// Labels must align with the batch rows and index an existing class.
pub fn check_labels(y : &[usize], nrows : usize, ncols : usize) -> Result<()> {
    if y.len() != nrows {
        return Err(MixtureError::LabelCount { expected : nrows, actual : y.len() });
    }
    match y.iter().find(|label| **label >= ncols ) {
        Some(label) => Err(MixtureError::LabelOutOfRange { label : *label, nclasses : ncols }),
        None => Ok(())
    }
}
