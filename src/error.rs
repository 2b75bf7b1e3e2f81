//! Build time failures.

use thiserror::Error;

/// Reasons a structure can't be built. Traversal never fails, degenerate geometry just doesn't report hits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("cannot build a hierarchy over zero primitives")]
    EmptyInput,
    #[error("invalid build parameters: {0}")]
    InvalidParams(&'static str),
    #[error("primitive {index} has non-finite bounds")]
    NonFiniteBounds { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            BuildError::NonFiniteBounds { index: 3 }.to_string(),
            "primitive 3 has non-finite bounds"
        );
        assert_eq!(
            BuildError::InvalidParams("sah_buckets must be within 2..=32").to_string(),
            "invalid build parameters: sah_buckets must be within 2..=32"
        );
    }
}
