//! Capabilities the pool depends on: producing connections and probing them.
//!
//! Both traits are object safe so pools can store them behind `Arc<dyn ...>`
//! and a registry can hold a different prober per service. Async closures
//! implement them directly:
//!
//! ```ignore
//! use tonic_conn_pool::{BoxError, EndpointDescriptor, HealthProber};
//!
//! let prober = |conn: &MyConn| {
//!     let conn = conn.clone();
//!     async move { conn.ping().await.map_err(BoxError::from) }
//! };
//! ```

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::endpoint::EndpointDescriptor;
use crate::error::BoxError;

/// Produces a live connection to an endpoint.
///
/// Transport security and authentication are the factory's concern; the pool
/// only calls it at creation time and to replace a connection that failed its
/// heartbeat.
pub trait ConnectionFactory<C>: Send + Sync {
    /// Dials `endpoint`, resolving to a live connection or the reason it failed.
    fn connect<'a>(
        &'a self,
        endpoint: &'a EndpointDescriptor,
    ) -> BoxFuture<'a, Result<C, BoxError>>;
}

/// Checks that a pooled connection is still usable.
///
/// Probes run on every acquisition, before the connection is handed out. They
/// may issue a lightweight RPC but must not otherwise change the connection.
pub trait HealthProber<C>: Send + Sync {
    /// Resolves to `Ok(())` if `connection` is healthy.
    fn probe<'a>(&'a self, connection: &'a C) -> BoxFuture<'a, Result<(), BoxError>>;
}

impl<C, F, Fut> ConnectionFactory<C> for F
where
    F: Fn(&EndpointDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, BoxError>> + Send + 'static,
{
    fn connect<'a>(
        &'a self,
        endpoint: &'a EndpointDescriptor,
    ) -> BoxFuture<'a, Result<C, BoxError>> {
        self(endpoint).boxed()
    }
}

impl<C, F, Fut> HealthProber<C> for F
where
    F: Fn(&C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn probe<'a>(&'a self, connection: &'a C) -> BoxFuture<'a, Result<(), BoxError>> {
        self(connection).boxed()
    }
}
