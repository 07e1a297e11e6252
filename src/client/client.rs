//! High-level async MQTT-SN client.
//!
//! [`MqttsnClient`] runs a [`Session`] on a tokio task next to its UDP socket.
//! Every call is serialized through one job queue, so the engine is only ever
//! touched by the task that owns it.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::constants::{
    DEFAULT_DISCOVERY_GROUP, DEFAULT_GATEWAY_PORT, DEFAULT_INBOUND_QUEUE,
    DEFAULT_RECV_BUFFER_SIZE, DEFAULT_SEARCH_RADIUS, DEFAULT_SEARCH_TIMEOUT,
    DEFAULT_TICK_INTERVAL,
};
use crate::core::{
    ClientError, GatewayInfo, GatewaySelector, InboundPublish, PublishHandler, ReconnectPolicy,
    SessionState, Transport,
};
use crate::session::{
    Completion, ConnectConfig, Event, Session, Subscription, Topic, TopicFilter,
};
use crate::transport::{MqttsnSocket, MqttsnSocketBuilder, QoS, ReturnCode};

/// Work run on the driver task.
type Job = Box<dyn FnOnce(&mut Engine, Instant) + Send>;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local address to bind.
    pub bind_addr: SocketAddr,
    /// Multicast groups joined at start, for SEARCHGW answers and ADVERTISE.
    pub multicast_groups: Vec<IpAddr>,
    /// Where SEARCHGW is sent.
    pub discovery_target: SocketAddr,
    /// Hop radius of SEARCHGW.
    pub search_radius: u8,
    /// How long a search waits for GWINFO.
    pub search_timeout: Duration,
    /// Reconnect through a fresh search instead of the last gateway.
    pub rediscover_on_reconnect: bool,
    /// How often timers are advanced.
    pub tick_interval: Duration,
    /// Largest datagram accepted.
    pub recv_buffer_size: usize,
    /// Inbound publishes buffered before the gateway is told to back off.
    pub inbound_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            multicast_groups: Vec::new(),
            discovery_target: SocketAddr::new(DEFAULT_DISCOVERY_GROUP, DEFAULT_GATEWAY_PORT),
            search_radius: DEFAULT_SEARCH_RADIUS,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            rediscover_on_reconnect: false,
            tick_interval: DEFAULT_TICK_INTERVAL,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

/// Builder for creating an [`MqttsnClient`].
pub struct MqttsnClientBuilder {
    config: ClientConfig,
    session: Session,
    reconnect: Option<Box<dyn ReconnectPolicy + Send>>,
}

impl fmt::Debug for MqttsnClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttsnClientBuilder")
            .field("config", &self.config)
            .field("reconnect", &self.reconnect.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for MqttsnClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttsnClientBuilder {
    /// Create a client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            session: Session::new(),
            reconnect: None,
        }
    }

    /// Start from an existing configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Set the local bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Join a multicast group at start.
    pub fn join_multicast(mut self, group: IpAddr) -> Self {
        self.config.multicast_groups.push(group);
        self
    }

    /// Set where SEARCHGW goes.
    pub fn discovery_target(mut self, target: SocketAddr) -> Self {
        self.config.discovery_target = target;
        self
    }

    /// Set the SEARCHGW hop radius.
    pub fn search_radius(mut self, radius: u8) -> Self {
        self.config.search_radius = radius;
        self
    }

    /// Set how long a search waits for GWINFO.
    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.config.search_timeout = timeout;
        self
    }

    /// Set the timer tick interval.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the inbound publish queue capacity.
    pub fn inbound_queue(mut self, capacity: usize) -> Self {
        self.config.inbound_queue = capacity;
        self
    }

    /// Reconnect with `policy` when the session is lost.
    pub fn reconnect(mut self, policy: impl ReconnectPolicy + Send + 'static) -> Self {
        self.reconnect = Some(Box::new(policy));
        self
    }

    /// Reconnect through a fresh gateway search.
    pub fn rediscover_on_reconnect(mut self, rediscover: bool) -> Self {
        self.config.rediscover_on_reconnect = rediscover;
        self
    }

    /// Choose among gateways answering a search.
    pub fn gateway_selector(mut self, selector: impl GatewaySelector + Send + 'static) -> Self {
        self.session.set_gateway_selector(selector);
        self
    }

    /// Bind the socket and start the driver task.
    ///
    /// Returns the client handle and a receiver for inbound publishes.
    pub async fn start(self) -> Result<(MqttsnClient, MessageReceiver), ClientError> {
        let Self {
            config,
            mut session,
            reconnect,
        } = self;

        let mut socket = MqttsnSocketBuilder::new()
            .recv_buffer_size(config.recv_buffer_size)
            .bind(config.bind_addr)
            .await?;
        for group in &config.multicast_groups {
            socket.join_multicast(*group)?;
        }
        let local_addr = socket.local_addr()?;

        let (publish_tx, publish_rx) = mpsc::channel(config.inbound_queue.max(1));
        session.set_publish_handler(ChannelHandler { tx: publish_tx });

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(64);
        let (state_tx, state_rx) = watch::channel(session.state());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let engine = Engine {
            session,
            state_tx,
            policy: reconnect,
            recovery: None,
            search_deadline: None,
            config: config.clone(),
        };
        let task = tokio::spawn(run(engine, socket, jobs_rx, shutdown_rx));
        info!(%local_addr, "mqtt-sn client started");

        let client = MqttsnClient {
            jobs: jobs_tx,
            state: state_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            local_addr,
            config,
        };
        Ok((client, MessageReceiver { rx: publish_rx }))
    }
}

/// Receiver for publishes delivered by the gateway.
#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::Receiver<InboundPublish>,
}

impl MessageReceiver {
    /// Receive the next publish.
    ///
    /// Returns `None` once the client has stopped.
    pub async fn recv(&mut self) -> Option<InboundPublish> {
        self.rx.recv().await
    }

    /// Take a publish if one is queued.
    pub fn try_recv(&mut self) -> Option<InboundPublish> {
        self.rx.try_recv().ok()
    }
}

/// Forwards inbound publishes to the application channel.
struct ChannelHandler {
    tx: mpsc::Sender<InboundPublish>,
}

impl PublishHandler for ChannelHandler {
    fn on_publish(&mut self, publish: &InboundPublish) -> ReturnCode {
        match self.tx.try_send(publish.clone()) {
            Ok(()) => ReturnCode::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic_id = publish.topic_id, "inbound queue full");
                ReturnCode::Congestion
            }
            // Nobody listens; accept and drop
            Err(mpsc::error::TrySendError::Closed(_)) => ReturnCode::Accepted,
        }
    }
}

/// An MQTT-SN client.
///
/// # Example
///
/// ```no_run
/// use mqttsn_client::client::MqttsnClientBuilder;
/// use mqttsn_client::session::{ConnectConfig, Topic};
/// use mqttsn_client::transport::QoS;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let (client, mut messages) = MqttsnClientBuilder::new().start().await?;
///
/// let config = ConnectConfig::new("sensor-1", "[fd00::1]:10000".parse()?)?;
/// client.connect(config).await?;
///
/// let topic_id = client.register("sensors/temp").await?;
/// client
///     .publish(Topic::Normal(topic_id), "21.5", QoS::AtLeastOnce, false)
///     .await?;
///
/// while let Some(message) = messages.recv().await {
///     println!("{:?}", message.payload);
/// }
/// # Ok(())
/// # }
/// ```
pub struct MqttsnClient {
    jobs: mpsc::Sender<Job>,
    state: watch::Receiver<SessionState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    config: ClientConfig,
}

impl fmt::Debug for MqttsnClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttsnClient")
            .field("local_addr", &self.local_addr)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl MqttsnClient {
    /// Start building a client.
    pub fn builder() -> MqttsnClientBuilder {
        MqttsnClientBuilder::new()
    }

    /// Run `f` against the session on the driver task.
    pub async fn with_session<R, F>(&self, f: F) -> Result<R, ClientError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session, Instant) -> R + Send + 'static,
    {
        self.call(move |engine, now| f(&mut engine.session, now))
            .await
    }

    /// Connect to the gateway in `config`.
    pub async fn connect(&self, config: ConnectConfig) -> Result<(), ClientError> {
        let completion = self
            .call(move |engine, now| {
                engine.recovery = None;
                engine.session.connect(config, now)
            })
            .await?;
        settle(completion).await
    }

    /// Disconnect from the gateway. Reconnection stops until the next
    /// [`connect`](Self::connect).
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.call(|engine, now| {
            engine.recovery = None;
            engine.search_deadline = None;
            engine.session.disconnect(now);
        })
        .await
    }

    /// Search for a gateway on the configured discovery target.
    ///
    /// Gives up with [`RequestError::Timeout`](crate::core::RequestError::Timeout)
    /// after the configured search timeout.
    pub async fn search_gateway(&self) -> Result<GatewayInfo, ClientError> {
        let target = self.config.discovery_target;
        let radius = self.config.search_radius;
        let mut completion = self
            .call(move |engine, now| {
                engine.recovery = None;
                engine.search_deadline = None;
                engine.session.search_gateway(target, radius, now)
            })
            .await?;

        match tokio::time::timeout(self.config.search_timeout, &mut completion).await {
            Ok(outcome) => resolve(outcome),
            Err(_) => {
                debug!("gateway search timed out");
                self.call(|engine, _| engine.session.cancel_search())
                    .await?;
                settle(completion).await
            }
        }
    }

    /// Register a topic name and return its id.
    pub async fn register(&self, topic_name: &str) -> Result<u16, ClientError> {
        let topic_name = topic_name.to_owned();
        let completion = self
            .call(move |engine, now| engine.session.register(&topic_name, now))
            .await?;
        settle(completion).await
    }

    /// Publish a message. Returns once the gateway acknowledged it (QoS 1) or
    /// it was sent (QoS 0).
    pub async fn publish(
        &self,
        topic: Topic,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ClientError> {
        let payload = payload.into();
        let completion = self
            .call(move |engine, now| engine.session.publish(topic, payload, qos, retain, now))
            .await?;
        settle(completion).await
    }

    /// Subscribe to a topic.
    pub async fn subscribe(
        &self,
        filter: impl Into<TopicFilter>,
        qos: QoS,
    ) -> Result<Subscription, ClientError> {
        let filter = filter.into();
        let completion = self
            .call(move |engine, now| engine.session.subscribe(filter, qos, now))
            .await?;
        settle(completion).await
    }

    /// Drop a subscription.
    pub async fn unsubscribe(&self, filter: impl Into<TopicFilter>) -> Result<(), ClientError> {
        let filter = filter.into();
        let completion = self
            .call(move |engine, now| engine.session.unsubscribe(filter, now))
            .await?;
        settle(completion).await
    }

    /// Replace the will topic stored at the gateway.
    pub async fn update_will_topic(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ClientError> {
        let topic = topic.to_owned();
        let completion = self
            .call(move |engine, now| engine.session.update_will_topic(&topic, qos, retain, now))
            .await?;
        settle(completion).await
    }

    /// Delete the will stored at the gateway.
    pub async fn clear_will(&self) -> Result<(), ClientError> {
        let completion = self
            .call(|engine, now| engine.session.clear_will(now))
            .await?;
        settle(completion).await
    }

    /// Replace the will message stored at the gateway.
    pub async fn update_will_message(
        &self,
        message: impl Into<Vec<u8>>,
    ) -> Result<(), ClientError> {
        let message = message.into();
        let completion = self
            .call(move |engine, now| engine.session.update_will_message(message, now))
            .await?;
        settle(completion).await
    }

    /// Topic id bound to `topic_name` in the current session.
    pub async fn topic_id(&self, topic_name: &str) -> Result<Option<u16>, ClientError> {
        let topic_name = topic_name.to_owned();
        self.with_session(move |session, _| session.topics().resolve(&topic_name))
            .await
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state changes.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `state`.
    pub async fn wait_for_state(&self, state: SessionState) -> Result<(), ClientError> {
        let mut rx = self.state.clone();
        rx.wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Driver configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Disconnect and stop the driver task.
    pub async fn close(mut self) -> Result<(), ClientError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| ClientError::Closed)?;
        }
        Ok(())
    }

    async fn call<R, F>(&self, f: F) -> Result<R, ClientError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine, Instant) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |engine, now| {
            let value = f(engine, now);
            // Publish state changes before the caller resumes
            engine.on_events(now);
            let _ = tx.send(value);
        });
        self.jobs.send(job).await.map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}

impl Drop for MqttsnClient {
    fn drop(&mut self) {
        // Send shutdown signal if not already sent
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn settle<T>(completion: Completion<T>) -> Result<T, ClientError> {
    resolve(completion.await)
}

fn resolve<T>(outcome: Option<crate::session::Outcome<T>>) -> Result<T, ClientError> {
    match outcome {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => Err(error.into()),
        None => Err(ClientError::Abandoned),
    }
}

// =============================================================================
// Driver task
// =============================================================================

/// Reconnect attempts in progress after a lost session.
#[derive(Debug, Default)]
struct Recovery {
    attempt: u32,
    due: Option<Instant>,
}

/// State owned by the driver task.
struct Engine {
    session: Session,
    state_tx: watch::Sender<SessionState>,
    policy: Option<Box<dyn ReconnectPolicy + Send>>,
    recovery: Option<Recovery>,
    /// Deadline of a search started for reconnection.
    search_deadline: Option<Instant>,
    config: ClientConfig,
}

impl Engine {
    fn on_tick(&mut self, now: Instant) {
        self.session.handle_timeout(now);

        if self.search_deadline.is_some_and(|deadline| deadline <= now) {
            self.search_deadline = None;
            debug!("reconnect search found no gateway");
            self.session.cancel_search();
        }

        let due = self
            .recovery
            .as_ref()
            .and_then(|recovery| recovery.due)
            .is_some_and(|due| due <= now);
        if due {
            self.attempt_reconnect(now);
        }
    }

    fn on_events(&mut self, now: Instant) {
        while let Some(event) = self.session.poll_event() {
            match event {
                Event::StateChanged { previous, current } => {
                    self.state_tx.send_replace(current);
                    self.on_state_changed(previous, current, now);
                }
                Event::Disconnected(reason) => {
                    info!(%reason, "session ended");
                }
                Event::GatewayFound(gateway) => self.on_gateway_found(gateway, now),
                Event::GatewayAdvertised(_) => {}
            }
        }
    }

    fn on_state_changed(&mut self, previous: SessionState, current: SessionState, now: Instant) {
        match current {
            SessionState::Lost if self.policy.is_some() => {
                self.recovery = Some(Recovery::default());
                self.schedule_reconnect(now);
            }
            SessionState::Connected => {
                if self.recovery.take().is_some() {
                    info!("reconnected");
                    if let Some(policy) = self.policy.as_mut() {
                        policy.reset();
                    }
                }
            }
            // A reconnect attempt failed, unless the session already moved on
            SessionState::Disconnected
                if self.recovery.is_some()
                    && matches!(previous, SessionState::Connecting | SessionState::Searching)
                    && self.session.state() == SessionState::Disconnected =>
            {
                self.schedule_reconnect(now);
            }
            _ => {}
        }
    }

    fn on_gateway_found(&mut self, gateway: GatewayInfo, now: Instant) {
        if self.search_deadline.take().is_none() {
            return;
        }
        let Some(mut config) = self.session.config().cloned() else {
            return;
        };
        config.gateway = gateway.address;
        info!(gateway = %gateway.address, "reconnecting to discovered gateway");
        let _ = self.session.connect(config, now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        let (Some(recovery), Some(policy)) = (self.recovery.as_mut(), self.policy.as_mut()) else {
            return;
        };
        recovery.attempt += 1;
        match policy.next_delay(recovery.attempt) {
            Some(delay) => {
                debug!(attempt = recovery.attempt, ?delay, "reconnect scheduled");
                recovery.due = Some(now + delay);
            }
            None => {
                warn!(attempts = recovery.attempt - 1, "giving up on reconnecting");
                self.recovery = None;
            }
        }
    }

    fn attempt_reconnect(&mut self, now: Instant) {
        if let Some(recovery) = self.recovery.as_mut() {
            recovery.due = None;
        }
        let Some(config) = self.session.config().cloned() else {
            self.recovery = None;
            return;
        };

        if self.config.rediscover_on_reconnect {
            debug!("reconnect: searching for a gateway");
            self.search_deadline = Some(now + self.config.search_timeout);
            let _ = self.session.search_gateway(
                self.config.discovery_target,
                self.config.search_radius,
                now,
            );
        } else {
            debug!(gateway = %config.gateway, "reconnect: connecting");
            let _ = self.session.connect(config, now);
        }

        if !matches!(
            self.session.state(),
            SessionState::Connecting | SessionState::Searching
        ) {
            self.schedule_reconnect(now);
        }
    }
}

async fn run(
    mut engine: Engine,
    mut socket: MqttsnSocket,
    mut jobs: mpsc::Receiver<Job>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(engine.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let mut stop = false;
        tokio::select! {
            _ = &mut shutdown_rx => stop = true,
            job = jobs.recv() => match job {
                Some(job) => job(&mut engine, Instant::now()),
                None => stop = true,
            },
            received = socket.recv_from() => match received {
                Ok((data, from)) => {
                    // Rejected datagrams are logged by the session
                    let _ = engine.session.handle_datagram(Instant::now(), from, data);
                }
                Err(error) => warn!(%error, "receive failed"),
            },
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        if stop {
            engine.recovery = None;
            engine.session.disconnect(now);
            engine.session.flush(&mut socket);
            engine.on_events(now);
            debug!("driver stopped");
            return;
        }

        engine.on_tick(now);
        engine.on_events(now);
        engine.session.flush(&mut socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RequestError;
    use crate::transport::{Message, TopicIdType};

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.tick_interval, DEFAULT_TICK_INTERVAL);
        assert_eq!(config.discovery_target.port(), DEFAULT_GATEWAY_PORT);
        assert_eq!(config.search_radius, DEFAULT_SEARCH_RADIUS);
        assert!(config.multicast_groups.is_empty());
    }

    #[test]
    fn test_channel_handler_backpressure() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut handler = ChannelHandler { tx };
        let publish = InboundPublish {
            topic_id: 1,
            topic_id_type: TopicIdType::Normal,
            topic_name: None,
            payload: b"x".to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
        };
        assert_eq!(handler.on_publish(&publish), ReturnCode::Accepted);
        assert_eq!(handler.on_publish(&publish), ReturnCode::Congestion);
        assert!(rx.try_recv().is_ok());
        drop(rx);
        assert_eq!(handler.on_publish(&publish), ReturnCode::Accepted);
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let (client, _messages) = MqttsnClientBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .start()
            .await
            .unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);

        let result = client.register("sensors").await;
        assert!(matches!(
            result,
            Err(ClientError::Request(RequestError::Disconnected(_)))
        ));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_joins_configured_groups() {
        // A unicast address is not a group, so the join must fail start
        let result = MqttsnClientBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .join_multicast("127.0.0.1".parse().unwrap())
            .start()
            .await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_search_times_out() {
        // Nobody answers on this port
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (client, _messages) = MqttsnClientBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .discovery_target(silent.local_addr().unwrap())
            .search_timeout(Duration::from_millis(200))
            .start()
            .await
            .unwrap();

        let result = client.search_gateway().await;
        assert!(matches!(
            result,
            Err(ClientError::Request(RequestError::Timeout))
        ));
        assert_eq!(client.state(), SessionState::Disconnected);

        let mut buf = [0u8; 16];
        let (len, _) = silent.recv_from(&mut buf).await.unwrap();
        assert_eq!(
            Message::decode(&buf[..len]).unwrap(),
            Message::SearchGw {
                radius: DEFAULT_SEARCH_RADIUS
            }
        );
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_with_session() {
        let (client, _messages) = MqttsnClientBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .start()
            .await
            .unwrap();
        let pending = client
            .with_session(|session, _| session.pending_requests())
            .await
            .unwrap();
        assert_eq!(pending, 0);
        client.close().await.unwrap();
    }
}
