//! Error types for supernode-core.
//!
//! Two layers, following the crate-wide policy:
//!
//! - [`ConfigError`]: rejected before any pipeline work begins. A run with
//!   a malformed configuration never starts, so no partial state exists.
//! - [`SupernodeError`]: top-level error for everything else. Per-node and
//!   per-pair anomalies (zero-norm fingerprints, NaN correlations, duplicate
//!   clusters) are absorbed locally with logged counters and never surface
//!   here; only terminal conditions do.
//!
//! Library code returns `Result` and propagates with `?`; no `unwrap()`
//! outside tests.

use thiserror::Error;

/// Configuration validation error.
///
/// Raised by [`crate::config::RunConfig::validate`] before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric field is out of its allowed range or not finite.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Name of the offending configuration field.
        field: &'static str,
        /// Human-readable constraint that was violated.
        reason: String,
    },
}

impl ConfigError {
    /// Convenience constructor used by validation code.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level error type for the supernode discovery core.
#[derive(Debug, Error)]
pub enum SupernodeError {
    /// Configuration rejected at run start.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input data violates a contract the core cannot absorb locally,
    /// e.g. a snapshot restore with the wrong universe size.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invariant violation that indicates a bug in the core itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SupernodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_field() {
        let err = ConfigError::invalid("tau_sim", "must be finite, got NaN");
        let msg = err.to_string();
        assert!(msg.contains("tau_sim"), "message must name the field: {msg}");
        assert!(msg.contains("finite"), "message must carry the reason: {msg}");
    }

    #[test]
    fn config_error_converts_to_top_level() {
        let err: SupernodeError = ConfigError::invalid("beta", "must be >= 0").into();
        assert!(matches!(err, SupernodeError::Config(_)));
        assert!(err.to_string().starts_with("configuration error"));
    }
}
