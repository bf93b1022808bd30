use nostr_fetch_relay::RelayError;
use thiserror::Error;

/// Top-level error type for the nostr-fetch crate.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("the relay '{0}' doesn't support EOSE")]
    EoseUnsupported(String),
    #[error("relay rejected request: {0}")]
    Protocol(String),
    #[error("relay transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_error_converts_transparently() {
        let error: FetchError = RelayError::Timeout {
            operation: "connect",
        }
        .into();
        assert!(matches!(error, FetchError::Relay(RelayError::Timeout { .. })));
        assert_eq!(error.to_string(), "connect timed out");
    }
}
