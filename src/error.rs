use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Ledger is locked by another writer: {0}")]
    LedgerLocked(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether a failed request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Transport(_) => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Errors that make every following API call pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Authentication(_) | Error::Config(_))
    }

    /// Map an HTTP status and response body to the matching variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Error::Authentication(message),
            404 => Error::NotFound(message),
            _ => Error::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Error::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Error::Serialization(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Ledger(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::Timeout("slow".into()).is_retryable());
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::from_status(503, "unavailable").is_retryable());
        assert!(Error::from_status(429, "slow down").is_retryable());
        assert!(!Error::from_status(400, "bad request").is_retryable());
        assert!(!Error::from_status(404, "missing").is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            Error::from_status(401, "nope"),
            Error::Authentication(_)
        ));
        assert!(Error::from_status(403, "nope").is_fatal());
        assert!(matches!(Error::from_status(404, "x"), Error::NotFound(_)));
        assert!(matches!(
            Error::from_status(422, "x"),
            Error::Api { status: 422, .. }
        ));
    }
}
