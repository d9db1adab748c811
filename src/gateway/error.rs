use crate::auth::AuthError;

/// Failure of a gateway session or listener.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("SSH transport error: {0}")]
    Transport(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication hit an inconsistent session binding; the session is aborted.
    #[error("Session aborted: {0}")]
    Auth(#[from] AuthError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Why a `register-worker` request was refused. The message is written to the
/// worker's stderr.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterRejection {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("a worker is already registered on this session")]
    AlreadyRegistered,

    #[error("invalid worker spec: {0}")]
    InvalidSpec(String),

    #[error("worker spec exceeds {limit} bytes")]
    SpecTooLarge { limit: usize },

    #[error("worker team does not match key team")]
    TeamMismatch,

    #[error("no forwarded port and no worker address")]
    NoForwardAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            RegisterRejection::TeamMismatch.to_string(),
            "worker team does not match key team"
        );
        assert_eq!(
            RegisterRejection::SpecTooLarge { limit: 1024 }.to_string(),
            "worker spec exceeds 1024 bytes"
        );
        assert_eq!(
            RegisterRejection::UnknownCommand("bash".to_string()).to_string(),
            "unknown command: bash"
        );
    }

    #[test]
    fn test_error_send() {
        fn assert_send<T: Send>() {}
        assert_send::<GatewayError>();
    }
}
