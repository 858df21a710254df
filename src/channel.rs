//! Connection factory producing tonic [`Channel`]s.
//!
//! [`ChannelFactory`] turns an [`EndpointDescriptor`] into a tonic
//! [`Endpoint`] and connects it. Plaintext addresses are dialed over
//! `http://`, TLS ones over `https://`; addresses that already carry a scheme
//! are used as given.
//!
//! Transport security requires the `tls` cargo feature. Without it, dialing a
//! descriptor with `tls` set fails and the pool treats it like any other
//! failed dial.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tonic_conn_pool::{ChannelFactory, ConnectionPool, EndpointDescriptor, PoolConfig};
//!
//! let factory = ChannelFactory::new().connect_timeout(Duration::from_secs(5));
//! let pool = ConnectionPool::new(
//!     "greeter",
//!     vec![EndpointDescriptor::new("10.0.0.1:50051")],
//!     PoolConfig::new(4),
//!     Arc::new(factory),
//!     Arc::new(heartbeat),
//! )
//! .await?;
//! ```

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tonic::transport::{Channel, Endpoint};

use crate::connector::ConnectionFactory;
use crate::endpoint::EndpointDescriptor;
use crate::error::BoxError;

/// Dials tonic channels for endpoint descriptors.
#[derive(Clone, Debug, Default)]
pub struct ChannelFactory {
    /// Timeout for establishing the underlying connection.
    pub connect_timeout: Option<Duration>,

    /// Timeout applied to every request sent over the channel.
    pub request_timeout: Option<Duration>,

    /// Whether to return the channel without waiting for the handshake.
    pub lazy: bool,
}

impl ChannelFactory {
    /// Creates a factory that connects eagerly without timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Returns channels immediately and connects them on first use.
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    async fn dial(&self, descriptor: &EndpointDescriptor) -> Result<Channel, BoxError> {
        let mut endpoint = Endpoint::from_shared(endpoint_uri(descriptor))?;

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }

        if descriptor.tls {
            endpoint = secure(endpoint, descriptor).await?;
        }

        if self.lazy {
            return Ok(endpoint.connect_lazy());
        }

        let channel = endpoint.connect().await?;
        tracing::debug!("established new RPC connection to {}", descriptor.address);
        Ok(channel)
    }
}

impl ConnectionFactory<Channel> for ChannelFactory {
    fn connect<'a>(
        &'a self,
        endpoint: &'a EndpointDescriptor,
    ) -> BoxFuture<'a, Result<Channel, BoxError>> {
        self.dial(endpoint).boxed()
    }
}

/// Builds the URI dialed for a descriptor.
fn endpoint_uri(descriptor: &EndpointDescriptor) -> String {
    if descriptor.address.contains("://") {
        return descriptor.address.clone();
    }

    let scheme = if descriptor.tls { "https" } else { "http" };
    format!("{scheme}://{}", descriptor.address)
}

#[cfg(feature = "tls")]
async fn secure(
    endpoint: Endpoint,
    descriptor: &EndpointDescriptor,
) -> Result<Endpoint, BoxError> {
    use tonic::transport::{Certificate, ClientTlsConfig};

    let mut tls = ClientTlsConfig::new();

    if let Some(host) = &descriptor.host_override {
        tls = tls.domain_name(host.clone());
    }

    tls = match &descriptor.ca_certificate {
        Some(path) => {
            let pem = tokio::fs::read(path).await?;
            tls.ca_certificate(Certificate::from_pem(pem))
        }

        None => tls.with_enabled_roots(),
    };

    Ok(endpoint.tls_config(tls)?)
}

#[cfg(not(feature = "tls"))]
#[allow(clippy::unused_async)]
async fn secure(
    _endpoint: Endpoint,
    descriptor: &EndpointDescriptor,
) -> Result<Endpoint, BoxError> {
    Err(format!(
        "transport security requested for {} but the `tls` feature is disabled",
        descriptor.address
    )
    .into())
}
