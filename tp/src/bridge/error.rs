//! Bridge error types

use thiserror::Error;

/// Errors talking to the page, executor or planner
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Bridge API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out")]
    Timeout,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Api { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::InvalidResponse(_) | Self::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = BridgeError::Api {
            status: 503,
            message: "planner overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "Bridge API error (503): planner overloaded");
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_errors_not_transient() {
        let err = BridgeError::Api {
            status: 400,
            message: "bad".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!BridgeError::InvalidResponse("x".to_string()).is_transient());
        assert!(BridgeError::Timeout.is_transient());
    }
}
