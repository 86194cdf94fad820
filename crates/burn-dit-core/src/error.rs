//! Construction-time errors
//!
//! Shape problems that only show up once tensors flow (a mask that does not
//! broadcast, mismatched batch sizes) are left to the tensor engine, which
//! panics at the first offending operation.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DitError {
    #[error("embedding dimension {dim} is not divisible by {heads} attention heads")]
    HeadsNotDivisible { dim: usize, heads: usize },

    #[error("{what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{name} must be a probability, got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Checks that `value` lies in `[0, 1)`, or `[0, 1]` when `inclusive`.
pub(crate) fn check_probability(
    name: &'static str,
    value: f64,
    inclusive: bool,
) -> Result<(), DitError> {
    let upper_ok = if inclusive { value <= 1.0 } else { value < 1.0 };
    if value >= 0.0 && upper_ok {
        Ok(())
    } else {
        Err(DitError::InvalidProbability { name, value })
    }
}
