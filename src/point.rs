//! Input points and content-addressed cache keys.
//!
//! Equality between input points is bitwise over the `f64` representation,
//! not tolerance-based: the hash index in the evaluation store is only correct
//! if equal keys are exactly equal. Callers that want tolerance-based matching
//! perform a secondary linear scan with [`InputPoint::approx_eq`].

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// An exact-value input vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPoint {
    coords: Vec<f64>,
}

impl InputPoint {
    /// Creates a point from its coordinates.
    #[must_use]
    pub fn new(coords: Vec<f64>) -> Self {
        Self { coords }
    }

    /// Coordinate values.
    #[must_use]
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    /// Number of coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    /// Returns true if the point has no coordinates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Tolerance-based comparison for secondary linear scans.
    ///
    /// Two points match if they have the same dimension and every coordinate
    /// pair differs by at most `tol`. Non-finite coordinates never match.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        self.coords.len() == other.coords.len()
            && self
                .coords
                .iter()
                .zip(&other.coords)
                .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Content digest of this point under a producer identity.
    ///
    /// The digest covers the producer id bytes and the exact bit pattern of
    /// every coordinate, so it inherits the store's bitwise equality.
    #[must_use]
    pub fn digest(&self, producer_id: &str) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(producer_id.as_bytes());
        // Separator keeps ("ab", [..]) and ("a", [b..]) style collisions out.
        hasher.update(&[0xFF]);
        for c in &self.coords {
            hasher.update(&c.to_bits().to_le_bytes());
        }
        CacheKey(*hasher.finalize().as_bytes())
    }
}

impl PartialEq for InputPoint {
    fn eq(&self, other: &Self) -> bool {
        self.coords.len() == other.coords.len()
            && self
                .coords
                .iter()
                .zip(&other.coords)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for InputPoint {}

impl Hash for InputPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in &self.coords {
            c.to_bits().hash(state);
        }
    }
}

impl From<Vec<f64>> for InputPoint {
    fn from(coords: Vec<f64>) -> Self {
        Self::new(coords)
    }
}

impl From<&[f64]> for InputPoint {
    fn from(coords: &[f64]) -> Self {
        Self::new(coords.to_vec())
    }
}

/// Stable digest of a (producer id, input point) pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Leading bytes are enough to identify a key in diagnostics.
        write!(
            f,
            "CacheKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}
