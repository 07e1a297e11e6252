//! Per-connect configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::core::ConfigError;
use crate::core::constants::{
    DEFAULT_KEEP_ALIVE, DEFAULT_KEEP_ALIVE_MARGIN, DEFAULT_RETRANSMISSION_COUNT,
    DEFAULT_RETRANSMISSION_TIMEOUT, MAX_CLIENT_ID_LEN, MAX_KEEP_ALIVE_MARGIN,
    MAX_RETRANSMISSION_TIMEOUT,
};
use crate::transport::{QoS, RetryPolicy};

/// Last will registered with the gateway during connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    /// Topic the gateway publishes the will on.
    pub topic: String,
    /// Will payload.
    pub message: Vec<u8>,
    /// QoS of the will publish.
    pub qos: QoS,
    /// Retain flag of the will publish.
    pub retain: bool,
}

impl Will {
    /// Create a will with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    /// Set the QoS.
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set the retain flag.
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Everything needed to open a session with one gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectConfig {
    /// Client identifier, 1 to 23 bytes.
    pub client_id: String,
    /// Gateway to connect to.
    pub gateway: SocketAddr,
    /// Keep-alive interval announced in CONNECT. Zero disables keep-alive.
    pub keep_alive: Duration,
    /// Ask the gateway to discard any previous session state.
    pub clean_session: bool,
    /// Retransmissions before a request fails.
    pub retransmission_count: u8,
    /// Time between retransmissions.
    pub retransmission_timeout: Duration,
    /// Factor on `keep_alive` to wait for PINGRESP before declaring loss.
    pub keep_alive_margin: f64,
    /// Optional last will.
    pub will: Option<Will>,
}

impl ConnectConfig {
    /// Start building a configuration.
    pub fn builder(client_id: impl Into<String>) -> ConnectConfigBuilder {
        ConnectConfigBuilder::new(client_id)
    }

    /// Configuration with defaults for everything but the client id and
    /// gateway.
    pub fn new(client_id: impl Into<String>, gateway: SocketAddr) -> Result<Self, ConfigError> {
        Self::builder(client_id).gateway(gateway).build()
    }

    /// Check the configuration against protocol limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.client_id.len();
        if len == 0 {
            return Err(ConfigError::EmptyClientId);
        }
        if len > MAX_CLIENT_ID_LEN {
            return Err(ConfigError::ClientIdTooLong {
                len,
                max: MAX_CLIENT_ID_LEN,
            });
        }
        if self.keep_alive.as_secs() > u64::from(u16::MAX) {
            return Err(ConfigError::KeepAliveTooLong(self.keep_alive.as_secs()));
        }
        // CONNECT carries whole seconds and 0 turns keep-alive off
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::KeepAliveTooShort(self.keep_alive));
        }
        if self.retransmission_timeout.is_zero() {
            return Err(ConfigError::ZeroRetransmissionTimeout);
        }
        if self.retransmission_timeout > MAX_RETRANSMISSION_TIMEOUT {
            return Err(ConfigError::RetransmissionTimeoutTooLong(
                self.retransmission_timeout,
            ));
        }
        if !(self.keep_alive_margin > 0.0 && self.keep_alive_margin <= MAX_KEEP_ALIVE_MARGIN) {
            return Err(ConfigError::InvalidKeepAliveMargin(self.keep_alive_margin));
        }
        Ok(())
    }

    /// Retry policy applied to every request of the session.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retransmission_timeout, self.retransmission_count)
    }

    /// Keep-alive in whole seconds as carried in CONNECT.
    pub(crate) fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }
}

/// Builder for [`ConnectConfig`].
#[derive(Debug, Clone)]
pub struct ConnectConfigBuilder {
    client_id: String,
    gateway: Option<SocketAddr>,
    keep_alive: Duration,
    clean_session: bool,
    retransmission_count: u8,
    retransmission_timeout: Duration,
    keep_alive_margin: f64,
    will: Option<Will>,
}

impl ConnectConfigBuilder {
    /// Create a builder with protocol defaults.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            gateway: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            retransmission_count: DEFAULT_RETRANSMISSION_COUNT,
            retransmission_timeout: DEFAULT_RETRANSMISSION_TIMEOUT,
            keep_alive_margin: DEFAULT_KEEP_ALIVE_MARGIN,
            will: None,
        }
    }

    /// Set the gateway address.
    pub fn gateway(mut self, addr: SocketAddr) -> Self {
        self.gateway = Some(addr);
        self
    }

    /// Set the keep-alive interval.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the retransmission count.
    pub fn retransmission_count(mut self, count: u8) -> Self {
        self.retransmission_count = count;
        self
    }

    /// Set the retransmission timeout.
    pub fn retransmission_timeout(mut self, timeout: Duration) -> Self {
        self.retransmission_timeout = timeout;
        self
    }

    /// Set the keep-alive margin.
    pub fn keep_alive_margin(mut self, margin: f64) -> Self {
        self.keep_alive_margin = margin;
        self
    }

    /// Register a last will.
    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ConnectConfig, ConfigError> {
        let config = ConnectConfig {
            client_id: self.client_id,
            gateway: self.gateway.ok_or(ConfigError::MissingGateway)?,
            keep_alive: self.keep_alive,
            clean_session: self.clean_session,
            retransmission_count: self.retransmission_count,
            retransmission_timeout: self.retransmission_timeout,
            keep_alive_margin: self.keep_alive_margin,
            will: self.will,
        };
        config.validate()?;
        Ok(config)
    }
}
