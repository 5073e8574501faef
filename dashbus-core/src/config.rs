//! Configuration.
//!
//! Hosts usually keep these next to their own settings as JSON. Every field
//! has a default, so `{}` is a valid session configuration that talks to a
//! bus on the local machine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::protocol::DEFAULT_PORT;
use crate::bus::RetryPolicy;
use crate::error::{Error, Result};

/// Network address of a bus endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL for this endpoint, identifying as `client_name`.
    pub fn url(&self, client_name: &str) -> String {
        format!("ws://{}:{}/nt/{}", self.host, self.port, client_name)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Accepts `host` or `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::Config(format!("invalid port in endpoint {s:?}")))?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(Error::Config(format!("endpoint {s:?} has no host")));
        }
        Ok(Self::new(host, port))
    }
}

/// Settings for one bus session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Name this client reports to the endpoint.
    pub client_name: String,
    /// Upper bound on a single connect attempt.
    pub connect_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            client_name: "dashboard".to_string(),
            connect_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(Error::Config("endpoint host must not be empty".into()));
        }
        if self.endpoint.port == 0 {
            return Err(Error::Config("endpoint port must not be 0".into()));
        }
        if self.client_name.is_empty() || self.client_name.contains('/') {
            return Err(Error::Config(format!(
                "client_name {:?} must be non-empty and contain no '/'",
                self.client_name
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be positive".into()));
        }
        self.retry.validate()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for a whole [`crate::Dashboard`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub session: SessionConfig,
    /// Widget definitions registered at startup, in the widget-schema JSON
    /// format accepted by [`crate::schema::WidgetSchema::from_json`].
    pub widgets: Vec<Value>,
}

impl DashboardConfig {
    pub fn validate(&self) -> Result<()> {
        self.session.validate()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
