use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Activity type string did not match the enumerated set. Boundary
    /// validation failure, maps to a 4xx at the HTTP layer.
    #[error("invalid activity type: {0}")]
    InvalidActivityType(String),

    /// Device has no registry entry. Benign for history binding, an error
    /// for explicit device removal.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization failed: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    /// Whether the error is a client-side input problem rather than an
    /// engine fault. The HTTP layer uses this to pick a status family.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidActivityType(_) | AppError::DeviceNotFound(_) | AppError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(AppError::InvalidActivityType("BOGUS".into()).is_client_error());
        assert!(AppError::DeviceNotFound("dev-1".into()).is_client_error());
        assert!(!AppError::Storage("connection reset".into()).is_client_error());
        assert!(!AppError::Internal("oops".into()).is_client_error());
    }
}
