use thiserror::Error;

/// Terminal outcome of a failed command attempt against the actuator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// A collaborator answered but could not serve the request (5xx, unexpected body).
    #[error("fan controller unavailable: {0}")]
    Unavailable(String),

    /// The actuator refused the digest. Retrying with the same digest is pointless.
    #[error("authentication rejected ({status})")]
    AuthRejected { status: u16 },

    /// The request itself was out of range or malformed; nothing was applied.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Network-level failure or timeout.
    #[error("fan controller unreachable: {0}")]
    Unreachable(String),
}

impl CommandError {
    /// Whether the same request may simply be tried again on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Unreachable(_))
    }

    /// Short text suitable for showing to the operator.
    pub fn operator_message(&self) -> String {
        match self {
            Self::AuthRejected { .. } => "Invalid authentication code".to_string(),
            Self::Validation(message) => message.clone(),
            Self::Unavailable(_) | Self::Unreachable(_) => {
                "Cannot connect to fan controller".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(CommandError::Unreachable("timeout".into()).is_retryable());
        assert!(CommandError::Unavailable("502".into()).is_retryable());
        assert!(!CommandError::AuthRejected { status: 403 }.is_retryable());
        assert!(!CommandError::Validation("speed".into()).is_retryable());
    }

    #[test]
    fn operator_sees_auth_and_validation_distinctly() {
        assert_eq!(
            CommandError::AuthRejected { status: 403 }.operator_message(),
            "Invalid authentication code"
        );
        assert_eq!(
            CommandError::Validation("speed must be 0-100".into()).operator_message(),
            "speed must be 0-100"
        );
        assert_eq!(
            CommandError::Unreachable("connection refused".into()).operator_message(),
            "Cannot connect to fan controller"
        );
    }
}
