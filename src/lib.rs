#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Bounded, health-checked pools of [Tonic](https://docs.rs/tonic) gRPC connections.
//!
//! A gRPC client talking to several backends of the same service usually wants
//! a fixed set of long-lived connections, a liveness check before each use, and
//! transparent replacement of connections that went bad. This crate keeps one
//! bounded pool per service and routes acquire/release calls by service name.
//!
//! # Features
//!
//! - **Eager, fault-tolerant creation**: connections are dialed up front; a pool
//!   is usable as long as at least one dial succeeded
//! - **Heartbeat on acquire**: every connection is probed before it is handed
//!   out, and redialed against the same endpoint if the probe fails
//! - **Never blocks on availability**: an empty pool is reported immediately as
//!   [`Error::PoolExhausted`]; retry and backoff are the caller's decision
//! - **Pluggable collaborators**: dialing ([`ConnectionFactory`]) and probing
//!   ([`HealthProber`]) are traits, implemented for async closures and, for
//!   tonic channels, by [`ChannelFactory`]
//!
//! # Usage
//!
//! ```ignore
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tonic::transport::Channel;
//! use tonic_conn_pool::{
//!     BoxError, ChannelFactory, ClientConfig, HealthProber, PoolConfig, ServiceRegistry,
//! };
//!
//! let client_config = ClientConfig::load("config.json")?;
//!
//! let mut heartbeats: HashMap<String, Arc<dyn HealthProber<Channel>>> = HashMap::new();
//! heartbeats.insert(
//!     "greeter".to_string(),
//!     Arc::new(|channel: &Channel| {
//!         let mut client = GreeterClient::new(channel.clone());
//!         async move {
//!             client.say_hello(HelloRequest::default()).await?;
//!             Ok::<(), BoxError>(())
//!         }
//!     }),
//! );
//!
//! let registry = ServiceRegistry::from_config(
//!     &client_config,
//!     &heartbeats,
//!     Arc::new(ChannelFactory::new()),
//!     &PoolConfig::new(4),
//! )
//! .await?;
//!
//! let channel = registry.acquire("greeter").await?;
//! let reply = GreeterClient::new(channel.clone()).say_hello(request).await;
//! registry.release("greeter", channel)?;
//! ```

mod channel;
mod config;
mod connector;
mod endpoint;
mod error;
mod pool;
mod registry;

pub use channel::ChannelFactory;
pub use config::{ClientConfig, ClientEntry};
pub use connector::{ConnectionFactory, HealthProber};
pub use endpoint::EndpointDescriptor;
pub use error::{BoxError, Error, Result};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use registry::{Heartbeats, ServiceRegistry};
