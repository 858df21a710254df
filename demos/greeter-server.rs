//! Greeter server used as a backend for the pooled client demo.
//!
//! Each reply names the server that produced it, so running a few instances on
//! different ports shows how pooled connections spread across endpoints.
//! Setting `FAIL_EVERY` makes the server reject every Nth call, which the
//! client's heartbeat notices and answers by redialing.
//!
//! # Running locally
//!
//! ```bash
//! GRPC_PORT=50051 cargo run --features examples --example greeter-server
//! GRPC_PORT=50052 FAIL_EVERY=5 cargo run --features examples --example greeter-server
//! ```
//!
//! # Environment Variables
//!
//! - `GRPC_PORT`: Port to listen on (default: 50051)
//! - `SERVER_NAME`: Included in replies (default: `greeter-<port>`)
//! - `FAIL_EVERY`: Reject every Nth call with `UNAVAILABLE` (default: never)

use std::env;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tonic::{Request, Response, Status, transport::Server};
use tracing::{Level, info, warn};

pub mod greeter {
    tonic::include_proto!("greeter");
}

use greeter::greeter_server::{Greeter, GreeterServer};
use greeter::{HelloReply, HelloRequest};

#[derive(Debug)]
pub struct FlakyGreeter {
    name: String,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

#[tonic::async_trait]
impl Greeter for FlakyGreeter {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let name = request.into_inner().name;

        if self.fail_every.is_some_and(|n| call % n == 0) {
            warn!("Rejecting call {call} from: {name}");
            return Err(Status::unavailable("simulated outage"));
        }

        info!("Call {call} from: {name}");

        Ok(Response::new(HelloReply {
            message: format!("Hello, {name}!"),
            served_by: self.name.clone(),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let port: u16 = env::var("GRPC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(50051);

    let greeter = FlakyGreeter {
        name: env::var("SERVER_NAME").unwrap_or_else(|_| format!("greeter-{port}")),
        fail_every: env::var("FAIL_EVERY")
            .ok()
            .and_then(|n| n.parse().ok())
            .filter(|n| *n > 0),
        calls: AtomicU64::new(0),
    };

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("{} listening on {addr}", greeter.name);

    Server::builder()
        .add_service(GreeterServer::new(greeter))
        .serve(addr)
        .await?;

    Ok(())
}
