//! Client configuration file describing the endpoints of each service.
//!
//! The file is a JSON document with a `client_config` array. Each entry names
//! a service and one endpoint; a service with several endpoints simply appears
//! several times:
//!
//! ```json
//! {
//!     "client_config": [
//!         { "svc_name": "users", "server_addr": "10.0.0.1:50051" },
//!         { "svc_name": "users", "server_addr": "10.0.0.2:50051" },
//!         {
//!             "svc_name": "billing",
//!             "server_addr": "billing.internal:443",
//!             "use_tls": true,
//!             "cert_file": "/etc/certs/ca.pem",
//!             "server_host_override": "billing.example.com"
//!         }
//!     ]
//! }
//! ```
//!
//! Fields not listed here are ignored, so the section can live in a larger
//! application configuration file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::endpoint::EndpointDescriptor;
use crate::error::Result;

/// Connection settings for one endpoint of a service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ClientEntry {
    /// Name of the service this endpoint belongs to.
    #[serde(rename = "svc_name")]
    pub service: String,

    /// Endpoint address.
    #[serde(rename = "server_addr")]
    pub address: String,

    /// Use transport security.
    #[serde(rename = "use_tls", default)]
    pub tls: bool,

    /// CA certificate file used to verify the server.
    #[serde(rename = "cert_file", default, deserialize_with = "non_empty_path")]
    pub ca_certificate: Option<PathBuf>,

    /// Server name expected in the server certificate.
    #[serde(rename = "server_host_override", default, deserialize_with = "non_empty_string")]
    pub host_override: Option<String>,
}

impl From<&ClientEntry> for EndpointDescriptor {
    fn from(entry: &ClientEntry) -> Self {
        Self {
            address: entry.address.clone(),
            tls: entry.tls,
            ca_certificate: entry.ca_certificate.clone(),
            host_override: entry.host_override.clone(),
        }
    }
}

/// The client section of a configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Endpoint entries, in file order.
    #[serde(rename = "client_config", default)]
    pub entries: Vec<ClientEntry>,
}

impl ClientConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`](crate::Error::Parse) if `json` does not match
    /// the expected schema.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file, blocking the current thread.
    ///
    /// Meant for startup code that runs before or outside an async runtime;
    /// use [`ClientConfig::load_async`] from within a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read and
    /// [`Error::Parse`](crate::Error::Parse) if its content is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::parse_file(path, &json)
    }

    /// Reads and parses a configuration file without blocking the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read and
    /// [`Error::Parse`](crate::Error::Parse) if its content is invalid.
    pub async fn load_async(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        Self::parse_file(path, &json)
    }

    fn parse_file(path: &Path, json: &str) -> Result<Self> {
        let config = Self::from_json(json)?;

        tracing::debug!(
            "read {} client entries from {}",
            config.entries.len(),
            path.display()
        );

        Ok(config)
    }

    /// Returns the entries configured for `service`.
    pub fn entries_for<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a ClientEntry> {
        self.entries.iter().filter(move |e| e.service == service)
    }

    /// Groups the entries into endpoint descriptors per service, keeping file
    /// order within each service.
    #[must_use]
    pub fn endpoints_by_service(&self) -> HashMap<String, Vec<EndpointDescriptor>> {
        let mut grouped: HashMap<String, Vec<EndpointDescriptor>> = HashMap::new();

        for entry in &self.entries {
            grouped
                .entry(entry.service.clone())
                .or_default()
                .push(entry.into());
        }

        grouped
    }
}

// Empty strings in the file mean "not set".
fn non_empty_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

fn non_empty_path<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(non_empty_string(deserializer)?.map(PathBuf::from))
}
