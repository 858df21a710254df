//! Routes acquire and release calls to the pool of a named service.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::config::ClientConfig;
use crate::connector::{ConnectionFactory, HealthProber};
use crate::endpoint::EndpointDescriptor;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};

/// Heartbeat functions keyed by service name.
pub type Heartbeats<C> = HashMap<String, Arc<dyn HealthProber<C>>>;

/// One [`ConnectionPool`] per service, built once and read-only afterwards.
pub struct ServiceRegistry<C> {
    pools: HashMap<String, ConnectionPool<C>>,
}

impl<C> ServiceRegistry<C>
where
    C: Send + Sync + 'static,
{
    /// Builds a pool for every service in `service_endpoints`.
    ///
    /// All services share `factory` and `config`; each uses its own heartbeat
    /// from `heartbeats`. Pools are created concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeartbeat`] before dialing anything if a service
    /// has no heartbeat, or the first pool creation error otherwise.
    pub async fn build(
        service_endpoints: HashMap<String, Vec<EndpointDescriptor>>,
        heartbeats: &Heartbeats<C>,
        factory: Arc<dyn ConnectionFactory<C>>,
        config: &PoolConfig,
    ) -> Result<Self> {
        let mut services = Vec::with_capacity(service_endpoints.len());

        for (service, endpoints) in service_endpoints {
            let Some(prober) = heartbeats.get(&service) else {
                return Err(Error::MissingHeartbeat(service));
            };

            services.push((service, endpoints, Arc::clone(prober)));
        }

        let pools = try_join_all(services.into_iter().map(|(service, endpoints, prober)| {
            let factory = Arc::clone(&factory);
            async move {
                let pool = ConnectionPool::new(
                    service.clone(),
                    endpoints,
                    config.clone(),
                    factory,
                    prober,
                )
                .await?;
                Ok::<_, Error>((service, pool))
            }
        }))
        .await?;

        tracing::debug!("created connection pools for {} services", pools.len());

        Ok(Self {
            pools: pools.into_iter().collect(),
        })
    }

    /// Builds a registry from the client entries of a configuration file.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceRegistry::build`].
    pub async fn from_config(
        client_config: &ClientConfig,
        heartbeats: &Heartbeats<C>,
        factory: Arc<dyn ConnectionFactory<C>>,
        config: &PoolConfig,
    ) -> Result<Self> {
        Self::build(client_config.endpoints_by_service(), heartbeats, factory, config).await
    }

    /// Takes a healthy connection from the pool of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownService`] if no pool exists for `service`, or
    /// the pool's error from [`ConnectionPool::acquire`].
    pub async fn acquire(&self, service: &str) -> Result<PooledConnection<C>> {
        self.pool_or_err(service)?.acquire().await
    }

    /// Hands a connection back to the pool of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownService`] if no pool exists for `service`, or
    /// [`Error::ReleaseMismatch`] if the connection came from another service.
    pub fn release(&self, service: &str, connection: PooledConnection<C>) -> Result<()> {
        self.pool_or_err(service)?.release(connection)
    }

    /// Returns the pool of `service`, if any.
    #[must_use]
    pub fn pool(&self, service: &str) -> Option<&ConnectionPool<C>> {
        self.pools.get(service)
    }

    /// Iterates over the registered service names.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    fn pool_or_err(&self, service: &str) -> Result<&ConnectionPool<C>> {
        self.pools.get(service).ok_or_else(|| {
            tracing::warn!("no connection pool for service `{service}`");
            Error::UnknownService(service.to_string())
        })
    }
}

impl<C> std::fmt::Debug for ServiceRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("pools", &self.pools)
            .finish()
    }
}
