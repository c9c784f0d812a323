//! Request descriptors: which outputs are wanted, and at what depth.
//!
//! A [`RequestSpec`] is an immutable description of one evaluation request:
//! an ordered sequence of per-output bitmask codes plus the ordered set of
//! input coordinates that derivatives are taken with respect to. Containment
//! between specs (one spec satisfying another) is the relation the evaluation
//! cache is built on.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-output request code: a bitmask over value, gradient, and Hessian.
///
/// A code of 0 means "output not requested". Bit presence implies the
/// corresponding datum must be populated in any satisfying response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestCode(u8);

impl RequestCode {
    /// No data requested for this output.
    pub const NONE: Self = Self(0);
    /// Function value requested.
    pub const VALUE: Self = Self(1);
    /// First derivative (gradient row) requested.
    pub const GRADIENT: Self = Self(2);
    /// Second derivative (Hessian) requested.
    pub const HESSIAN: Self = Self(4);

    const MASK: u8 = 0x7;

    /// Creates a code from raw bits; bits outside the value/gradient/Hessian
    /// mask are dropped.
    #[must_use]
    pub const fn new(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Raw bitmask.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if no data is requested.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the function value is requested.
    #[must_use]
    pub const fn wants_value(self) -> bool {
        self.0 & Self::VALUE.0 != 0
    }

    /// Returns true if the gradient is requested.
    #[must_use]
    pub const fn wants_gradient(self) -> bool {
        self.0 & Self::GRADIENT.0 != 0
    }

    /// Returns true if the Hessian is requested.
    #[must_use]
    pub const fn wants_hessian(self) -> bool {
        self.0 & Self::HESSIAN.0 != 0
    }

    /// Returns true if any derivative (gradient or Hessian) is requested.
    #[must_use]
    pub const fn wants_derivatives(self) -> bool {
        self.0 & (Self::GRADIENT.0 | Self::HESSIAN.0) != 0
    }

    /// Returns true if every bit set in `other` is also set here.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bitwise union of two codes.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for RequestCode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Immutable descriptor of what a caller wants computed at one input point.
///
/// Holds one [`RequestCode`] per output plus the ordered set of
/// input-coordinate identifiers that define the derivative directions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestSpec {
    codes: Vec<RequestCode>,
    deriv_vars: Vec<usize>,
}

impl RequestSpec {
    /// Creates a spec from per-output codes, with no derivative coordinates.
    #[must_use]
    pub fn new(codes: Vec<RequestCode>) -> Self {
        Self {
            codes,
            deriv_vars: Vec::new(),
        }
    }

    /// Creates a spec with derivative coordinates.
    ///
    /// The coordinate list is kept as an ordered set: sorted ascending with
    /// duplicates removed.
    #[must_use]
    pub fn with_deriv_vars(codes: Vec<RequestCode>, mut deriv_vars: Vec<usize>) -> Self {
        deriv_vars.sort_unstable();
        deriv_vars.dedup();
        Self { codes, deriv_vars }
    }

    /// Creates an all-zero ("nothing requested") spec of the given length.
    #[must_use]
    pub fn empty(outputs: usize) -> Self {
        Self {
            codes: vec![RequestCode::NONE; outputs],
            deriv_vars: Vec::new(),
        }
    }

    /// Creates a spec requesting the same code for every output.
    #[must_use]
    pub fn uniform(outputs: usize, code: RequestCode) -> Self {
        Self {
            codes: vec![code; outputs],
            deriv_vars: Vec::new(),
        }
    }

    /// Number of outputs covered by this spec.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns true if the spec covers zero outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The code for one output, or `NONE` past the end.
    #[must_use]
    pub fn code(&self, index: usize) -> RequestCode {
        self.codes.get(index).copied().unwrap_or(RequestCode::NONE)
    }

    /// All per-output codes, in output order.
    #[must_use]
    pub fn codes(&self) -> &[RequestCode] {
        &self.codes
    }

    /// Ordered derivative-coordinate identifiers.
    #[must_use]
    pub fn deriv_vars(&self) -> &[usize] {
        &self.deriv_vars
    }

    /// Returns true if every output code is zero.
    ///
    /// An all-zero spec means "this half need not run"; callers treat it as
    /// skip, never as a no-op evaluation.
    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.codes.iter().all(|c| c.is_none())
    }

    /// Returns true if any output requests a gradient or Hessian.
    #[must_use]
    pub fn wants_derivatives(&self) -> bool {
        self.codes.iter().any(|c| c.wants_derivatives())
    }

    /// Indices of outputs with a non-zero code.
    pub fn requested_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.codes
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_none())
            .map(|(i, _)| i)
    }

    /// Superset test: can a response satisfying `self` serve `query`?
    ///
    /// True iff the lengths match, every output code in `self` contains the
    /// corresponding code in `query`, and (when `query` asks for any
    /// derivative) every derivative coordinate in `query` is present here.
    #[must_use]
    pub fn contains(&self, query: &Self) -> bool {
        if self.codes.len() != query.codes.len() {
            return false;
        }
        if !self
            .codes
            .iter()
            .zip(&query.codes)
            .all(|(mine, theirs)| mine.contains(*theirs))
        {
            return false;
        }
        if query.wants_derivatives() {
            // deriv_vars is sorted, so subset is a binary-search sweep.
            return query
                .deriv_vars
                .iter()
                .all(|v| self.deriv_vars.binary_search(v).is_ok());
        }
        true
    }

    /// Bitwise union of two specs of equal length.
    ///
    /// # Errors
    /// `ConfigError::DimensionMismatch` if the lengths differ.
    pub fn union(&self, other: &Self) -> Result<Self, ConfigError> {
        if self.codes.len() != other.codes.len() {
            return Err(ConfigError::DimensionMismatch {
                context: "request union",
                expected: self.codes.len(),
                actual: other.codes.len(),
            });
        }
        let codes = self
            .codes
            .iter()
            .zip(&other.codes)
            .map(|(a, b)| a.union(*b))
            .collect();
        let mut deriv_vars = self.deriv_vars.clone();
        deriv_vars.extend_from_slice(&other.deriv_vars);
        deriv_vars.sort_unstable();
        deriv_vars.dedup();
        Ok(Self { codes, deriv_vars })
    }

    /// Inflates the spec by a replication factor.
    ///
    /// The result has `len() * replication` outputs with
    /// `out[i + j * len()] = self[i]` for every replicate `j`. Derivative
    /// coordinates are unchanged.
    ///
    /// # Errors
    /// `ConfigError::ZeroReplication` if `replication` is 0.
    pub fn inflate(&self, replication: usize) -> Result<Self, ConfigError> {
        if replication == 0 {
            return Err(ConfigError::ZeroReplication);
        }
        let n = self.codes.len();
        let mut codes = vec![RequestCode::NONE; n * replication];
        for j in 0..replication {
            codes[j * n..(j + 1) * n].copy_from_slice(&self.codes);
        }
        Ok(Self {
            codes,
            deriv_vars: self.deriv_vars.clone(),
        })
    }

    /// Deflates the spec by a replication factor; the exact inverse of
    /// [`inflate`](Self::inflate).
    ///
    /// # Errors
    /// - `ConfigError::ZeroReplication` if `replication` is 0.
    /// - `ConfigError::IndivisibleLength` if the length is not a multiple of
    ///   `replication`.
    /// - `ConfigError::ReplicateDisagreement` if the replicates do not carry
    ///   identical codes.
    pub fn deflate(&self, replication: usize) -> Result<Self, ConfigError> {
        if replication == 0 {
            return Err(ConfigError::ZeroReplication);
        }
        if self.codes.len() % replication != 0 {
            return Err(ConfigError::IndivisibleLength {
                len: self.codes.len(),
                replication,
            });
        }
        let n = self.codes.len() / replication;
        for i in 0..n {
            for j in 1..replication {
                if self.codes[i + j * n] != self.codes[i] {
                    return Err(ConfigError::ReplicateDisagreement { output: i });
                }
            }
        }
        Ok(Self {
            codes: self.codes[..n].to_vec(),
            deriv_vars: self.deriv_vars.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vg() -> RequestCode {
        RequestCode::VALUE | RequestCode::GRADIENT
    }

    #[test]
    fn test_code_bits() {
        assert!(RequestCode::NONE.is_none());
        assert!(RequestCode::VALUE.wants_value());
        assert!(!RequestCode::VALUE.wants_derivatives());
        assert!(vg().wants_gradient());
        assert!(vg().wants_derivatives());
        assert!(!vg().wants_hessian());
        assert_eq!(RequestCode::new(0xFF).bits(), 0x7);
    }

    #[test]
    fn test_code_containment() {
        assert!(vg().contains(RequestCode::VALUE));
        assert!(vg().contains(RequestCode::NONE));
        assert!(!RequestCode::VALUE.contains(vg()));
    }

    #[test]
    fn test_deriv_vars_are_an_ordered_set() {
        let spec = RequestSpec::with_deriv_vars(vec![vg()], vec![3, 1, 3, 0]);
        assert_eq!(spec.deriv_vars(), &[0, 1, 3]);
    }

    #[test]
    fn test_spec_containment_codes() {
        let stored = RequestSpec::new(vec![vg(), RequestCode::VALUE]);
        let query = RequestSpec::new(vec![RequestCode::VALUE, RequestCode::NONE]);
        assert!(stored.contains(&query));
        assert!(!query.contains(&stored));
    }

    #[test]
    fn test_spec_containment_length_mismatch() {
        let stored = RequestSpec::uniform(3, RequestCode::VALUE);
        let query = RequestSpec::uniform(2, RequestCode::VALUE);
        assert!(!stored.contains(&query));
    }

    #[test]
    fn test_spec_containment_deriv_vars() {
        let stored = RequestSpec::with_deriv_vars(vec![vg()], vec![0, 1]);
        let narrow = RequestSpec::with_deriv_vars(vec![vg()], vec![1]);
        let wide = RequestSpec::with_deriv_vars(vec![vg()], vec![0, 1, 2]);
        assert!(stored.contains(&narrow));
        assert!(!stored.contains(&wide));

        // Value-only queries ignore the coordinate list entirely.
        let value_only = RequestSpec::with_deriv_vars(vec![RequestCode::VALUE], vec![7]);
        assert!(stored.contains(&value_only));
    }

    #[test]
    fn test_union() {
        let a = RequestSpec::with_deriv_vars(vec![RequestCode::VALUE, RequestCode::NONE], vec![0]);
        let b = RequestSpec::with_deriv_vars(vec![RequestCode::GRADIENT, RequestCode::VALUE], vec![1]);
        let u = a.union(&b).unwrap();
        assert_eq!(u.code(0), vg());
        assert_eq!(u.code(1), RequestCode::VALUE);
        assert_eq!(u.deriv_vars(), &[0, 1]);

        let short = RequestSpec::empty(1);
        assert!(a.union(&short).is_err());
    }

    #[test]
    fn test_inflate_layout() {
        let spec = RequestSpec::new(vec![vg(), RequestCode::NONE]);
        let inflated = spec.inflate(3).unwrap();
        assert_eq!(inflated.len(), 6);
        for j in 0..3 {
            assert_eq!(inflated.code(j * 2), vg());
            assert_eq!(inflated.code(1 + j * 2), RequestCode::NONE);
        }
    }

    #[test]
    fn test_deflate_is_inverse_of_inflate() {
        let spec = RequestSpec::with_deriv_vars(
            vec![vg(), RequestCode::VALUE, RequestCode::HESSIAN],
            vec![0, 2],
        );
        for k in 1..=4 {
            let round = spec.inflate(k).unwrap().deflate(k).unwrap();
            assert_eq!(round, spec);
        }
    }

    #[test]
    fn test_deflate_rejects_indivisible_length() {
        let spec = RequestSpec::uniform(5, RequestCode::VALUE);
        let err = spec.deflate(2).unwrap_err();
        assert!(matches!(err, ConfigError::IndivisibleLength { len: 5, replication: 2 }));
    }

    #[test]
    fn test_deflate_rejects_disagreeing_replicates() {
        let spec = RequestSpec::new(vec![RequestCode::VALUE, vg()]);
        let err = spec.deflate(2).unwrap_err();
        assert!(matches!(err, ConfigError::ReplicateDisagreement { output: 0 }));
    }

    #[test]
    fn test_nop_detection() {
        assert!(RequestSpec::empty(4).is_nop());
        assert!(!RequestSpec::uniform(1, RequestCode::VALUE).is_nop());
        let mixed = RequestSpec::new(vec![RequestCode::NONE, RequestCode::VALUE]);
        assert!(!mixed.is_nop());
        assert_eq!(mixed.requested_indices().collect::<Vec<_>>(), vec![1]);
    }
}
