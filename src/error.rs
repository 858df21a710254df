//! Error types shared by pools, the registry, and the configuration loader.

/// Boxed error returned by connection factories and health probers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool and registry operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by pool construction, acquisition, and release.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed construction arguments, such as an empty endpoint list.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Not a single connection could be established while creating the pool.
    #[error("failed to establish any connection for `{0}`")]
    Fatal(String),

    /// A service has endpoints configured but no heartbeat registered.
    #[error("heartbeat missing for service `{0}`")]
    MissingHeartbeat(String),

    /// No idle connection could be handed out.
    #[error("no connection available for `{0}`")]
    PoolExhausted(String),

    /// The registry holds no pool for the requested service.
    #[error("unknown service `{0}`")]
    UnknownService(String),

    /// A connection was released into a pool that did not create it.
    #[error("connection released to `{0}` was not acquired from it")]
    ReleaseMismatch(String),

    /// A single dial attempt failed or timed out.
    #[error("failed to dial {address}: {source}")]
    Dial {
        /// Address of the endpoint being dialed.
        address: String,
        /// Underlying failure reported by the connection factory.
        #[source]
        source: BoxError,
    },

    /// The client configuration file could not be read.
    #[error("failed to read client configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The client configuration file is not valid JSON for the expected schema.
    #[error("failed to parse client configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_error_exposes_source() {
        let err = Error::Dial {
            address: "10.0.0.1:50051".to_string(),
            source: "connection refused".into(),
        };

        assert_eq!(
            err.to_string(),
            "failed to dial 10.0.0.1:50051: connection refused"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn parse_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse.into();

        assert!(matches!(err, Error::Parse(_)));
    }
}
