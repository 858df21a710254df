//! Static description of one dialable backend.

use std::path::PathBuf;

/// Describes a backend endpoint the pool dials connections against.
///
/// Descriptors are copied into the pool when it is created and never change
/// afterwards. Every pooled connection remembers the index of the descriptor
/// it was dialed against so it can be redialed after a failed heartbeat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// The backend address, either `host:port` or a full URI.
    pub address: String,

    /// Whether the connection uses transport security.
    pub tls: bool,

    /// PEM-encoded CA certificate used to verify the server.
    /// If `None`, the roots enabled through cargo features are used.
    pub ca_certificate: Option<PathBuf>,

    /// Overrides the server name checked during the TLS handshake.
    pub host_override: Option<String>,
}

impl EndpointDescriptor {
    /// Creates a plaintext endpoint descriptor for the given address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: false,
            ca_certificate: None,
            host_override: None,
        }
    }

    /// Enables or disables transport security.
    #[must_use]
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Sets the CA certificate file used to verify the server.
    #[must_use]
    pub fn ca_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_certificate = Some(path.into());
        self
    }

    /// Sets the server name expected in the server certificate.
    #[must_use]
    pub fn host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }
}

impl From<&str> for EndpointDescriptor {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for EndpointDescriptor {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_plaintext() {
        let ep = EndpointDescriptor::new("10.0.0.1:50051");

        assert_eq!(ep.address, "10.0.0.1:50051");
        assert!(!ep.tls);
        assert!(ep.ca_certificate.is_none());
        assert!(ep.host_override.is_none());
    }

    #[test]
    fn builder_sets_security_fields() {
        let ep = EndpointDescriptor::new("auth.internal:443")
            .tls(true)
            .ca_certificate("/etc/certs/ca.pem")
            .host_override("auth.example.com");

        assert!(ep.tls);
        assert_eq!(ep.ca_certificate, Some(PathBuf::from("/etc/certs/ca.pem")));
        assert_eq!(ep.host_override.as_deref(), Some("auth.example.com"));
    }

    #[test]
    fn from_str_and_string() {
        let a: EndpointDescriptor = "10.0.0.1:1".into();
        let b: EndpointDescriptor = String::from("10.0.0.1:1").into();

        assert_eq!(a, b);
    }
}
