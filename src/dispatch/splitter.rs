//! Partitioning a request between the approximate and actual producers.

use std::collections::BTreeSet;

use crate::error::ConfigError;
use crate::request::{RequestCode, RequestSpec};
use crate::response::{ReplicateReduction, Response};

/// Splits a whole request into an approximate half and an actual half.
///
/// Outputs in the approximate set go to the approximate producer verbatim;
/// the rest go to the actual producer, inflated by the replication factor
/// (the actual producer may aggregate that many internal sub-evaluations per
/// logical output). With replication 1 and an empty approximate set the
/// split degenerates to passing the request through unchanged on the actual
/// side, and with a full approximate set the actual half comes back all-zero.
/// An all-zero half means "this half need not run".
#[derive(Debug, Clone)]
pub struct DispatchSplitter {
    outputs: usize,
    approx_outputs: BTreeSet<usize>,
    replication: usize,
}

impl DispatchSplitter {
    /// Creates a splitter for `outputs` logical outputs.
    ///
    /// # Errors
    /// - `ConfigError::ZeroReplication` if `replication` is 0.
    /// - `ConfigError::ApproxIndexOutOfRange` if the approximate set names an
    ///   output past the end.
    pub fn new(
        outputs: usize,
        approx_outputs: BTreeSet<usize>,
        replication: usize,
    ) -> Result<Self, ConfigError> {
        if replication == 0 {
            return Err(ConfigError::ZeroReplication);
        }
        if let Some(&index) = approx_outputs.iter().find(|&&i| i >= outputs) {
            return Err(ConfigError::ApproxIndexOutOfRange { index, outputs });
        }
        Ok(Self {
            outputs,
            approx_outputs,
            replication,
        })
    }

    /// Number of logical outputs.
    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.outputs
    }

    /// The replication factor applied to the actual half.
    #[must_use]
    pub const fn replication(&self) -> usize {
        self.replication
    }

    /// Expected response length of the actual producer.
    #[must_use]
    pub const fn actual_len(&self) -> usize {
        self.outputs * self.replication
    }

    /// Checks the actual producer's response length against this split.
    ///
    /// # Errors
    /// - `ConfigError::ReplicationMismatch` if the replication factor does
    ///   not evenly divide the producer's length.
    /// - `ConfigError::RequestLengthMismatch` if the lengths disagree even
    ///   though the factor divides.
    pub fn validate_actual(&self, producer_id: &str, producer_len: usize) -> Result<(), ConfigError> {
        if producer_len % self.replication != 0 {
            return Err(ConfigError::ReplicationMismatch {
                producer: producer_id.to_string(),
                response_len: producer_len,
                replication: self.replication,
            });
        }
        if producer_len != self.actual_len() {
            return Err(ConfigError::RequestLengthMismatch {
                producer: producer_id.to_string(),
                request_len: self.actual_len(),
                producer_len,
            });
        }
        Ok(())
    }

    /// Checks the approximate producer's response length against this split.
    ///
    /// # Errors
    /// `ConfigError::RequestLengthMismatch` on disagreement.
    pub fn validate_approx(&self, producer_id: &str, producer_len: usize) -> Result<(), ConfigError> {
        if producer_len != self.outputs {
            return Err(ConfigError::RequestLengthMismatch {
                producer: producer_id.to_string(),
                request_len: self.outputs,
                producer_len,
            });
        }
        Ok(())
    }

    /// Partitions `whole` into (approximate half, actual half).
    ///
    /// The approximate half keeps the whole's length with non-approximate
    /// entries zeroed; the actual half zeroes the approximate entries and is
    /// then inflated, so `actual[i + j * n] = whole[i]` for every replicate
    /// `j` of a non-approximate output `i`.
    ///
    /// # Errors
    /// `ConfigError::DimensionMismatch` if `whole` does not match the
    /// configured output count.
    pub fn split(&self, whole: &RequestSpec) -> Result<(RequestSpec, RequestSpec), ConfigError> {
        if whole.len() != self.outputs {
            return Err(ConfigError::DimensionMismatch {
                context: "split request length",
                expected: self.outputs,
                actual: whole.len(),
            });
        }

        let approx_codes = (0..self.outputs)
            .map(|i| {
                if self.approx_outputs.contains(&i) {
                    whole.code(i)
                } else {
                    RequestCode::NONE
                }
            })
            .collect();
        let actual_codes = (0..self.outputs)
            .map(|i| {
                if self.approx_outputs.contains(&i) {
                    RequestCode::NONE
                } else {
                    whole.code(i)
                }
            })
            .collect();

        let deriv_vars = whole.deriv_vars().to_vec();
        let approx = RequestSpec::with_deriv_vars(approx_codes, deriv_vars.clone());
        let actual = RequestSpec::with_deriv_vars(actual_codes, deriv_vars).inflate(self.replication)?;
        Ok((approx, actual))
    }

    /// Collapses an actual-side response back to logical outputs.
    ///
    /// # Errors
    /// Any error from [`Response::deflate`].
    pub fn deflate_actual(
        &self,
        response: &Response,
        reduction: ReplicateReduction,
    ) -> Result<Response, ConfigError> {
        response.deflate(self.replication, reduction)
    }
}
