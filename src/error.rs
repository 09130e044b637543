use thiserror::Error;

/// Errors raised by the controller and its building blocks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MppiError {
    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Noise covariance is not symmetric positive-definite.
    #[error("covariance error: {0}")]
    Covariance(String),

    /// An array did not have the shape the caller promised.
    #[error("shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    Shape {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Numerical failure inside an internal solve.
    #[error("numerical error: {0}")]
    Numerical(String),
}

pub type MppiResult<T> = Result<T, MppiError>;

// 形状チェック
pub(crate) fn check_shape(what: &'static str, expected: &[usize], got: &[usize]) -> MppiResult<()> {
    if expected == got {
        Ok(())
    } else {
        Err(MppiError::Shape {
            what,
            expected: expected.to_vec(),
            got: got.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_error_reports_both_shapes() {
        let err = check_shape("state", &[4, 2], &[4, 3]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "shape mismatch in state: expected [4, 2], got [4, 3]"
        );
        assert!(check_shape("state", &[4, 2], &[4, 2]).is_ok());
    }
}
