//! Shared setup for the demo binaries.
//!
//! Environment variables:
//! - MQTTSN_GATEWAY: gateway address (default `127.0.0.1:10000`)
//! - MQTTSN_CLIENT_ID: client identifier (default `mqttsn-demo`)
//! - MQTTSN_TOPIC: topic name to publish on (default `demo/counter`)
//! - MQTTSN_GROUP: discovery group (default `ff05::1`)
//! - MQTTSN_RADIUS: SEARCHGW hop radius (default 8)
//! - MQTTSN_INTERVAL_SECS: publish interval (default 5)
//! - MQTTSN_LOG: tracing filter (default `info`)

use std::env;
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use mqttsn_client::core::constants::{
    DEFAULT_DISCOVERY_GROUP, DEFAULT_GATEWAY_PORT, DEFAULT_SEARCH_RADIUS,
};
use tracing_subscriber::EnvFilter;

/// Boxed error for the binaries' `main`.
pub type DemoResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Gateway to connect to directly.
    pub gateway: SocketAddr,
    /// Client identifier.
    pub client_id: String,
    /// Topic to publish on.
    pub topic: String,
    /// Multicast group for gateway discovery.
    pub group: IpAddr,
    /// SEARCHGW hop radius.
    pub radius: u8,
    /// Time between publishes.
    pub interval: Duration,
}

impl Settings {
    /// Read settings, falling back to defaults for unset variables.
    pub fn from_env() -> DemoResult<Self> {
        Ok(Self {
            gateway: var_or("MQTTSN_GATEWAY", SocketAddr::from(([127, 0, 0, 1], DEFAULT_GATEWAY_PORT)))?,
            client_id: env::var("MQTTSN_CLIENT_ID").unwrap_or_else(|_| "mqttsn-demo".into()),
            topic: env::var("MQTTSN_TOPIC").unwrap_or_else(|_| "demo/counter".into()),
            group: var_or("MQTTSN_GROUP", DEFAULT_DISCOVERY_GROUP)?,
            radius: var_or("MQTTSN_RADIUS", DEFAULT_SEARCH_RADIUS)?,
            interval: Duration::from_secs(var_or("MQTTSN_INTERVAL_SECS", 5u64)?),
        })
    }

    /// Where SEARCHGW goes.
    pub fn discovery_target(&self) -> SocketAddr {
        SocketAddr::new(self.group, DEFAULT_GATEWAY_PORT)
    }
}

fn var_or<T>(name: &str, default: T) -> DemoResult<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| format!("{name}={value}: {e}").into()),
        Err(_) => Ok(default),
    }
}

/// Install the log subscriber, filtered by `MQTTSN_LOG`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("MQTTSN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
