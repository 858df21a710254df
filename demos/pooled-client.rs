//! gRPC client sharing a pool of connections across concurrent workers.
//!
//! Builds a [`ServiceRegistry`] from a JSON client configuration, then runs a
//! few workers that each acquire a connection, send a request, and release the
//! connection. Every acquisition is preceded by a `SayHello` heartbeat.
//!
//! # Running locally
//!
//! Start two servers (see `greeter-server`) on ports 50051 and 50052, then:
//!
//! ```bash
//! cargo run --features examples --example pooled-client
//! ```
//!
//! # Environment Variables
//!
//! - `CLIENT_CONFIG`: Configuration file (default: demos/client.json)
//! - `CONNECTIONS_PER_ENDPOINT`: Pool size per endpoint (default: 2)
//! - `WORKERS`: Concurrent workers (default: 4)
//! - `REQUEST_COUNT`: Requests per worker (default: 10)

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tonic::transport::Channel;
use tonic_conn_pool::{
    BoxError, ChannelFactory, ClientConfig, Error, Heartbeats, PoolConfig, ServiceRegistry,
};
use tracing::{Level, error, info, warn};

pub mod greeter {
    tonic::include_proto!("greeter");
}

use greeter::HelloRequest;
use greeter::greeter_client::GreeterClient;

const SERVICE: &str = "greeter";

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let config_path =
        env::var("CLIENT_CONFIG").unwrap_or_else(|_| "demos/client.json".to_string());
    let per_endpoint: usize = env_or("CONNECTIONS_PER_ENDPOINT", 2);
    let workers: usize = env_or("WORKERS", 4);
    let request_count: u32 = env_or("REQUEST_COUNT", 10);

    let client_config = ClientConfig::load_async(&config_path).await?;

    let mut heartbeats: Heartbeats<Channel> = HashMap::new();
    heartbeats.insert(
        SERVICE.to_string(),
        Arc::new(|channel: &Channel| {
            let mut client = GreeterClient::new(channel.clone());
            async move {
                let request = HelloRequest {
                    name: "heartbeat".to_string(),
                };
                client.say_hello(request).await?;
                Ok::<(), BoxError>(())
            }
        }),
    );

    let factory = ChannelFactory::new()
        .connect_timeout(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(10));

    let pool_config = PoolConfig::new(per_endpoint)
        .dial_timeout(Duration::from_secs(5))
        .heartbeat_timeout(Duration::from_secs(2));

    let registry = Arc::new(
        ServiceRegistry::from_config(&client_config, &heartbeats, Arc::new(factory), &pool_config)
            .await?,
    );

    info!("Sending {request_count} requests from each of {workers} workers...\n");

    let mut tasks = Vec::new();
    for worker in 1..=workers {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            let mut served: HashMap<String, u32> = HashMap::new();

            for i in 1..=request_count {
                let channel = match registry.acquire(SERVICE).await {
                    Ok(channel) => channel,
                    Err(Error::PoolExhausted(_)) => {
                        warn!("Worker {worker}: pool exhausted, backing off");
                        sleep(Duration::from_millis(100)).await;
                        continue;
                    }

                    Err(e) => {
                        error!("Worker {worker}: {e}");
                        break;
                    }
                };

                let request = HelloRequest {
                    name: format!("worker-{worker}-request-{i}"),
                };

                match GreeterClient::new(channel.clone()).say_hello(request).await {
                    Ok(response) => {
                        let reply = response.into_inner();
                        info!("Worker {worker}: {} (served by: {})", reply.message, reply.served_by);
                        *served.entry(reply.served_by).or_insert(0) += 1;
                    }

                    Err(status) => error!("Worker {worker}: request {i} failed: {status}"),
                }

                if let Err(e) = registry.release(SERVICE, channel) {
                    error!("Worker {worker}: {e}");
                }
            }

            served
        }));
    }

    let mut totals: HashMap<String, u32> = HashMap::new();
    for task in tasks {
        for (server, count) in task.await? {
            *totals.entry(server).or_insert(0) += count;
        }
    }

    info!("\n=== Pooled Requests Summary ===");
    for (server, count) in &totals {
        info!("{server}: {count} requests");
    }

    if let Some(pool) = registry.pool(SERVICE) {
        info!(
            "Pool `{}`: {} live, {} idle, capacity {}",
            pool.name(),
            pool.live_connections(),
            pool.idle_connections(),
            pool.capacity()
        );
    }

    Ok(())
}
