//! Response objects: computed outputs and the request they satisfy.
//!
//! A [`Response`] always carries the [`RequestSpec`] it actually satisfies
//! (its *active spec*). Per-output data slots are meaningful only where the
//! active spec sets the corresponding bit; everything else is placeholder.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::request::{RequestCode, RequestSpec};

/// How replicate slices are collapsed when deflating an inflated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateReduction {
    /// Keep the first replicate's data.
    First,
    /// Arithmetic mean across replicates.
    #[default]
    Mean,
    /// Sum across replicates.
    Sum,
}

impl ReplicateReduction {
    fn reduce(self, samples: &[f64]) -> f64 {
        match self {
            Self::First => samples[0],
            #[allow(clippy::cast_precision_loss)]
            Self::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Sum => samples.iter().sum(),
        }
    }
}

/// One computed (partial) result for a single input point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    active: RequestSpec,
    values: Vec<f64>,
    gradients: Vec<Vec<f64>>,
    hessians: Vec<Vec<Vec<f64>>>,
}

impl Response {
    /// Creates a response with zeroed placeholders for the given active spec.
    #[must_use]
    pub fn new(active: RequestSpec) -> Self {
        let n = active.len();
        Self {
            active,
            values: vec![0.0; n],
            gradients: vec![Vec::new(); n],
            hessians: vec![Vec::new(); n],
        }
    }

    /// The request this response satisfies.
    #[must_use]
    pub fn active(&self) -> &RequestSpec {
        &self.active
    }

    /// Number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true if the response covers zero outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Returns true if this response can serve `query`.
    #[must_use]
    pub fn satisfies(&self, query: &RequestSpec) -> bool {
        self.active.contains(query)
    }

    /// The value of output `index`, if the active spec carries it.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<f64> {
        if self.active.code(index).wants_value() {
            self.values.get(index).copied()
        } else {
            None
        }
    }

    /// The gradient row of output `index`, if the active spec carries it.
    ///
    /// Columns follow the active spec's derivative-coordinate order.
    #[must_use]
    pub fn gradient(&self, index: usize) -> Option<&[f64]> {
        if self.active.code(index).wants_gradient() {
            self.gradients.get(index).map(Vec::as_slice)
        } else {
            None
        }
    }

    /// The Hessian of output `index`, if the active spec carries it.
    #[must_use]
    pub fn hessian(&self, index: usize) -> Option<&[Vec<f64>]> {
        if self.active.code(index).wants_hessian() {
            self.hessians.get(index).map(Vec::as_slice)
        } else {
            None
        }
    }

    /// Sets the value of output `index`.
    ///
    /// # Errors
    /// `ConfigError::DimensionMismatch` if `index` is out of range.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<(), ConfigError> {
        if index >= self.values.len() {
            return Err(ConfigError::DimensionMismatch {
                context: "response value index",
                expected: self.values.len(),
                actual: index,
            });
        }
        self.values[index] = value;
        Ok(())
    }

    /// Sets the gradient row of output `index`.
    ///
    /// # Errors
    /// `ConfigError::DimensionMismatch` if `index` is out of range or the row
    /// length does not match the active derivative-coordinate count.
    pub fn set_gradient(&mut self, index: usize, row: Vec<f64>) -> Result<(), ConfigError> {
        if index >= self.gradients.len() {
            return Err(ConfigError::DimensionMismatch {
                context: "response gradient index",
                expected: self.gradients.len(),
                actual: index,
            });
        }
        let dims = self.active.deriv_vars().len();
        if row.len() != dims {
            return Err(ConfigError::DimensionMismatch {
                context: "gradient row length",
                expected: dims,
                actual: row.len(),
            });
        }
        self.gradients[index] = row;
        Ok(())
    }

    /// Sets the Hessian of output `index`.
    ///
    /// # Errors
    /// `ConfigError::DimensionMismatch` if `index` is out of range or the
    /// matrix is not square over the active derivative coordinates.
    pub fn set_hessian(&mut self, index: usize, matrix: Vec<Vec<f64>>) -> Result<(), ConfigError> {
        if index >= self.hessians.len() {
            return Err(ConfigError::DimensionMismatch {
                context: "response hessian index",
                expected: self.hessians.len(),
                actual: index,
            });
        }
        let dims = self.active.deriv_vars().len();
        if matrix.len() != dims || matrix.iter().any(|row| row.len() != dims) {
            return Err(ConfigError::DimensionMismatch {
                context: "hessian dimensions",
                expected: dims,
                actual: matrix.len(),
            });
        }
        self.hessians[index] = matrix;
        Ok(())
    }

    /// Checks the internal layout against the active spec.
    ///
    /// Used when re-ingesting responses from external sources (persisted
    /// logs, repaired files) where the serde layer alone cannot enforce the
    /// per-output invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.active.len();
        if self.values.len() != n {
            return Err(ConfigError::DimensionMismatch {
                context: "response value count",
                expected: n,
                actual: self.values.len(),
            });
        }
        if self.gradients.len() != n || self.hessians.len() != n {
            return Err(ConfigError::DimensionMismatch {
                context: "response derivative slots",
                expected: n,
                actual: self.gradients.len().min(self.hessians.len()),
            });
        }
        let dims = self.active.deriv_vars().len();
        for i in 0..n {
            let code = self.active.code(i);
            if code.wants_gradient() && self.gradients[i].len() != dims {
                return Err(ConfigError::DimensionMismatch {
                    context: "gradient row length",
                    expected: dims,
                    actual: self.gradients[i].len(),
                });
            }
            if code.wants_hessian()
                && (self.hessians[i].len() != dims
                    || self.hessians[i].iter().any(|row| row.len() != dims))
            {
                return Err(ConfigError::DimensionMismatch {
                    context: "hessian dimensions",
                    expected: dims,
                    actual: self.hessians[i].len(),
                });
            }
        }
        Ok(())
    }

    /// Collapses an inflated response back to its logical outputs.
    ///
    /// The active spec is deflated by `replication` (which checks that the
    /// replicates agree), then each output's replicate slices are reduced
    /// with `reduction`.
    ///
    /// # Errors
    /// Any error from [`RequestSpec::deflate`].
    pub fn deflate(
        &self,
        replication: usize,
        reduction: ReplicateReduction,
    ) -> Result<Self, ConfigError> {
        let active = self.active.deflate(replication)?;
        let n = active.len();
        let mut out = Self::new(active);

        for i in 0..n {
            let code = out.active.code(i);
            if code.wants_value() {
                let samples: Vec<f64> = (0..replication).map(|j| self.values[i + j * n]).collect();
                out.values[i] = reduction.reduce(&samples);
            }
            if code.wants_gradient() {
                let dims = out.active.deriv_vars().len();
                let mut row = vec![0.0; dims];
                for (d, slot) in row.iter_mut().enumerate() {
                    let samples: Vec<f64> = (0..replication)
                        .map(|j| self.gradients[i + j * n][d])
                        .collect();
                    *slot = reduction.reduce(&samples);
                }
                out.gradients[i] = row;
            }
            if code.wants_hessian() {
                let dims = out.active.deriv_vars().len();
                let mut matrix = vec![vec![0.0; dims]; dims];
                for (r, row) in matrix.iter_mut().enumerate() {
                    for (c, slot) in row.iter_mut().enumerate() {
                        let samples: Vec<f64> = (0..replication)
                            .map(|j| self.hessians[i + j * n][r][c])
                            .collect();
                        *slot = reduction.reduce(&samples);
                    }
                }
                out.hessians[i] = matrix;
            }
        }
        Ok(out)
    }
}
