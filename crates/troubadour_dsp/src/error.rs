//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum DspError {
    #[error("Decibel value must be finite, got {0}")]
    NonFiniteDb(f32),
}

/// Result type alias for DSP operations
pub type DspResult<T> = Result<T, DspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::NonFiniteDb(f32::NAN);
        assert!(err.to_string().contains("finite"));
        assert!(err.to_string().contains("NaN"));
    }
}
