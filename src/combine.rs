//! Response combination: merging two partial results into one.
//!
//! The set of combination strategies is closed, so it is a sum type rather
//! than a trait hierarchy; only the corrected overlay carries extra data (the
//! caller-supplied correction).

use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigError, ConsistencyError, EvalResult};
use crate::request::RequestSpec;
use crate::response::Response;

/// A caller-supplied bias/scale correction applied to the approximate side
/// before a corrected overlay.
pub trait Correction: Send + Sync {
    /// Produces the corrected response.
    fn correct(&self, response: &Response) -> EvalResult<Response>;
}

/// Affine correction: `scale * f + bias` on values, `scale` on derivatives.
#[derive(Debug, Clone, Copy)]
pub struct AffineCorrection {
    /// Multiplicative factor.
    pub scale: f64,
    /// Additive offset (values only).
    pub bias: f64,
}

impl Correction for AffineCorrection {
    fn correct(&self, response: &Response) -> EvalResult<Response> {
        let active = response.active().clone();
        let mut out = Response::new(active);
        for i in 0..response.len() {
            let code = response.active().code(i);
            if code.wants_value() {
                if let Some(v) = response.value(i) {
                    out.set_value(i, self.scale * v + self.bias)?;
                }
            }
            if code.wants_gradient() {
                if let Some(row) = response.gradient(i) {
                    out.set_gradient(i, row.iter().map(|g| self.scale * g).collect())?;
                }
            }
            if code.wants_hessian() {
                if let Some(matrix) = response.hessian(i) {
                    let scaled = matrix
                        .iter()
                        .map(|row| row.iter().map(|h| self.scale * h).collect())
                        .collect();
                    out.set_hessian(i, scaled)?;
                }
            }
        }
        Ok(out)
    }
}

/// How two partial results are merged into one logical result.
#[derive(Clone, Default)]
pub enum CombineMode {
    /// Per-output union; sides must be disjoint in output coverage.
    #[default]
    Overlay,
    /// `actual - approx` on values, gradients, and Hessians.
    Discrepancy,
    /// Side-by-side concatenation of both full output vectors.
    Aggregate,
    /// Overlay after the approximate side is passed through a correction.
    CorrectedOverlay(Arc<dyn Correction>),
}

impl CombineMode {
    /// Short mode name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Overlay => "overlay",
            Self::Discrepancy => "discrepancy",
            Self::Aggregate => "aggregate",
            Self::CorrectedOverlay(_) => "corrected_overlay",
        }
    }
}

impl fmt::Debug for CombineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Merges two partial results.
///
/// `actual` is the truth/actual half, `approx` the approximate half; for
/// overlays the roles only matter in that the correction (if any) applies to
/// `approx`. `whole` is the original request both halves were split from:
/// every bit it asks for must be present in the merged result.
///
/// # Errors
/// - `ConsistencyError::OutputMissing` if a requested output is covered by
///   neither side (fatal; callers must be able to trust every requested bit).
/// - `ConsistencyError::OutputOverlap` if both sides computed the same output
///   in an overlay.
/// - `ConfigError::DimensionMismatch` if the sides disagree on lengths or
///   derivative coordinates.
pub fn combine(
    whole: &RequestSpec,
    actual: &Response,
    approx: &Response,
    mode: &CombineMode,
) -> EvalResult<Response> {
    match mode {
        CombineMode::Overlay => overlay(whole, actual, approx),
        CombineMode::Discrepancy => discrepancy(whole, actual, approx),
        CombineMode::Aggregate => aggregate(whole, actual, approx),
        CombineMode::CorrectedOverlay(correction) => {
            let corrected = correction.correct(approx)?;
            overlay(whole, actual, &corrected)
        }
    }
}

fn check_len(whole: &RequestSpec, side: &Response, context: &'static str) -> EvalResult<()> {
    if side.len() != whole.len() {
        return Err(ConfigError::DimensionMismatch {
            context,
            expected: whole.len(),
            actual: side.len(),
        }
        .into());
    }
    Ok(())
}

/// Derivative-coordinate list for a merged response.
///
/// Sides that carry derivatives must agree on the coordinate order, otherwise
/// gradient columns from the two halves would silently misalign.
fn merged_deriv_vars(a: &Response, b: &Response) -> EvalResult<Vec<usize>> {
    let a_vars = a.active().deriv_vars();
    let b_vars = b.active().deriv_vars();
    let a_used = a.active().wants_derivatives();
    let b_used = b.active().wants_derivatives();
    match (a_used, b_used) {
        (true, true) if a_vars != b_vars => Err(ConfigError::DimensionMismatch {
            context: "derivative coordinates of combined halves",
            expected: a_vars.len(),
            actual: b_vars.len(),
        }
        .into()),
        (_, true) if !a_used => Ok(b_vars.to_vec()),
        _ => Ok(a_vars.to_vec()),
    }
}

fn copy_output(dst: &mut Response, src: &Response, index: usize) -> EvalResult<()> {
    if let Some(v) = src.value(index) {
        dst.set_value(index, v)?;
    }
    if let Some(row) = src.gradient(index) {
        dst.set_gradient(index, row.to_vec())?;
    }
    if let Some(matrix) = src.hessian(index) {
        dst.set_hessian(index, matrix.to_vec())?;
    }
    Ok(())
}

fn overlay(whole: &RequestSpec, actual: &Response, approx: &Response) -> EvalResult<Response> {
    check_len(whole, actual, "overlay actual half")?;
    check_len(whole, approx, "overlay approx half")?;

    let deriv_vars = merged_deriv_vars(actual, approx)?;
    let codes = (0..whole.len())
        .map(|i| actual.active().code(i).union(approx.active().code(i)))
        .collect();
    let mut out = Response::new(RequestSpec::with_deriv_vars(codes, deriv_vars));

    for i in 0..whole.len() {
        let from_actual = actual.active().code(i);
        let from_approx = approx.active().code(i);
        if !from_actual.is_none() && !from_approx.is_none() {
            return Err(ConsistencyError::OutputOverlap { index: i }.into());
        }
        let covered = from_actual.union(from_approx);
        if !covered.contains(whole.code(i)) {
            return Err(ConsistencyError::OutputMissing { index: i }.into());
        }
        if !from_actual.is_none() {
            copy_output(&mut out, actual, i)?;
        } else if !from_approx.is_none() {
            copy_output(&mut out, approx, i)?;
        }
    }
    Ok(out)
}

fn discrepancy(whole: &RequestSpec, actual: &Response, approx: &Response) -> EvalResult<Response> {
    check_len(whole, actual, "discrepancy actual half")?;
    check_len(whole, approx, "discrepancy approx half")?;

    let deriv_vars = merged_deriv_vars(actual, approx)?;
    // The discrepancy exists only where both sides computed the datum.
    let codes: Vec<_> = (0..whole.len())
        .map(|i| {
            let a = actual.active().code(i);
            let b = approx.active().code(i);
            crate::request::RequestCode::new(a.bits() & b.bits())
        })
        .collect();
    for i in 0..whole.len() {
        if !codes[i].contains(whole.code(i)) {
            return Err(ConsistencyError::OutputMissing { index: i }.into());
        }
    }

    let mut out = Response::new(RequestSpec::with_deriv_vars(codes, deriv_vars));
    for i in 0..whole.len() {
        let code = out.active().code(i);
        if code.wants_value() {
            let (Some(t), Some(s)) = (actual.value(i), approx.value(i)) else {
                return Err(ConsistencyError::OutputMissing { index: i }.into());
            };
            out.set_value(i, t - s)?;
        }
        if code.wants_gradient() {
            let (Some(t), Some(s)) = (actual.gradient(i), approx.gradient(i)) else {
                return Err(ConsistencyError::OutputMissing { index: i }.into());
            };
            out.set_gradient(i, t.iter().zip(s).map(|(x, y)| x - y).collect())?;
        }
        if code.wants_hessian() {
            let (Some(t), Some(s)) = (actual.hessian(i), approx.hessian(i)) else {
                return Err(ConsistencyError::OutputMissing { index: i }.into());
            };
            let diff = t
                .iter()
                .zip(s)
                .map(|(tr, sr)| tr.iter().zip(sr).map(|(x, y)| x - y).collect())
                .collect();
            out.set_hessian(i, diff)?;
        }
    }
    Ok(out)
}

fn aggregate(whole: &RequestSpec, actual: &Response, approx: &Response) -> EvalResult<Response> {
    check_len(whole, actual, "aggregate actual half")?;
    check_len(whole, approx, "aggregate approx half")?;

    // Both sides travel downstream, so both must satisfy the whole request.
    for i in 0..whole.len() {
        if !actual.active().code(i).contains(whole.code(i))
            || !approx.active().code(i).contains(whole.code(i))
        {
            return Err(ConsistencyError::OutputMissing { index: i }.into());
        }
    }

    let deriv_vars = merged_deriv_vars(actual, approx)?;
    let n = whole.len();
    let mut codes = Vec::with_capacity(2 * n);
    codes.extend_from_slice(actual.active().codes());
    codes.extend_from_slice(approx.active().codes());
    let mut out = Response::new(RequestSpec::with_deriv_vars(codes, deriv_vars));

    for i in 0..n {
        copy_output(&mut out, actual, i)?;
    }
    for i in 0..n {
        // Shift the approx half past the actual block.
        if let Some(v) = approx.value(i) {
            out.set_value(n + i, v)?;
        }
        if let Some(row) = approx.gradient(i) {
            out.set_gradient(n + i, row.to_vec())?;
        }
        if let Some(matrix) = approx.hessian(i) {
            out.set_hessian(n + i, matrix.to_vec())?;
        }
    }
    Ok(out)
}
