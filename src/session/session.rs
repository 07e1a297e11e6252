//! The client session state machine.
//!
//! [`Session`] performs no I/O. The host feeds it datagrams with
//! [`Session::handle_datagram`] and the passage of time with
//! [`Session::handle_timeout`], and drains what it wants sent with
//! [`Session::poll_transmit`] (or [`Session::flush`]) and what happened with
//! [`Session::poll_event`]. Operations return a [`Completion`] immediately and
//! resolve later from inside one of those calls.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::completion::{Completion, Responder};
use super::config::{ConnectConfig, Will};
use super::discovery::{Advertisement, Discovery};
use super::topics::{Topic, TopicFilter, TopicRegistry};
use crate::core::constants::{
    DEFAULT_RETRANSMISSION_COUNT, DEFAULT_RETRANSMISSION_TIMEOUT, RESERVED_MSG_ID, RESERVED_TOPIC_ID,
};
use crate::core::{
    AcceptAll, DisconnectReason, GatewayInfo, GatewaySelector, InboundPublish, PublishHandler,
    RequestError, SessionState, Transport,
};
use crate::transport::{
    Flags, KeepAlive, KeepAliveAction, Message, MsgType, QoS, RetransmitTimers, RetryPolicy,
    ReturnCode, TimerAction, TopicIdType, TransportError, TransportResult, WillTopicField,
    mark_duplicate,
};

/// Correlation key of a pending request.
///
/// CONNECT and the will updates are singular; everything else is keyed by its
/// 16-bit message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingKey {
    /// CONNECT and its will handshake.
    Connect,
    /// WILLTOPICUPD.
    WillTopicUpdate,
    /// WILLMSGUPD.
    WillMessageUpdate,
    /// REGISTER, PUBLISH, SUBSCRIBE or UNSUBSCRIBE.
    Message(u16),
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::WillTopicUpdate => f.write_str("will topic update"),
            Self::WillMessageUpdate => f.write_str("will message update"),
            Self::Message(id) => write!(f, "msg {id}"),
        }
    }
}

/// A datagram the session wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Where to send it.
    pub destination: SocketAddr,
    /// The encoded frame.
    pub contents: Vec<u8>,
    /// Multicast hop limit, set for gateway searches.
    pub hop_limit: Option<u8>,
}

/// A subscription granted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// Topic id assigned for the filter, zero for wildcard filters.
    pub topic_id: u16,
    /// QoS the gateway will deliver with.
    pub qos: QoS,
}

/// Something the host may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The session moved between states.
    StateChanged {
        /// State before.
        previous: SessionState,
        /// State now.
        current: SessionState,
    },
    /// An established session ended.
    Disconnected(DisconnectReason),
    /// A gateway search ended with this gateway.
    GatewayFound(GatewayInfo),
    /// A gateway advertised itself.
    GatewayAdvertised(Advertisement),
}

/// A request waiting for its acknowledgment.
#[derive(Debug)]
enum Pending {
    Connect(Responder<()>),
    Register {
        topic_name: String,
        responder: Responder<u16>,
    },
    Publish(Responder<()>),
    Subscribe {
        filter: TopicFilter,
        responder: Responder<Subscription>,
    },
    Unsubscribe(Responder<()>),
    WillTopicUpdate {
        will: Option<WillTopicField>,
        responder: Responder<()>,
    },
    WillMessageUpdate {
        message: Vec<u8>,
        responder: Responder<()>,
    },
}

impl Pending {
    /// Message type that resolves this request.
    fn ack_type(&self) -> MsgType {
        match self {
            Self::Connect(_) => MsgType::ConnAck,
            Self::Register { .. } => MsgType::RegAck,
            Self::Publish(_) => MsgType::PubAck,
            Self::Subscribe { .. } => MsgType::SubAck,
            Self::Unsubscribe(_) => MsgType::UnsubAck,
            Self::WillTopicUpdate { .. } => MsgType::WillTopicResp,
            Self::WillMessageUpdate { .. } => MsgType::WillMsgResp,
        }
    }

    fn fail(self, error: RequestError) {
        match self {
            Self::Connect(responder)
            | Self::Publish(responder)
            | Self::Unsubscribe(responder)
            | Self::WillTopicUpdate { responder, .. }
            | Self::WillMessageUpdate { responder, .. } => responder.fail(error),
            Self::Register { responder, .. } => responder.fail(error),
            Self::Subscribe { responder, .. } => responder.fail(error),
        }
    }
}

/// An MQTT-SN client session with one gateway.
///
/// # Example
///
/// ```
/// use std::time::Instant;
/// use mqttsn_client::session::{ConnectConfig, Session};
///
/// let mut session = Session::new();
/// let config = ConnectConfig::new("sensor-1", "127.0.0.1:10000".parse().unwrap()).unwrap();
/// let mut connected = session.connect(config, Instant::now());
///
/// // CONNECT is queued for the host to send
/// let transmit = session.poll_transmit().unwrap();
/// assert_eq!(transmit.destination.port(), 10000);
/// assert!(connected.try_outcome().is_none());
/// ```
pub struct Session {
    state: SessionState,
    config: Option<ConnectConfig>,
    timers: RetransmitTimers<PendingKey, Pending>,
    topics: TopicRegistry,
    discovery: Discovery,
    keep_alive: Option<KeepAlive>,
    next_msg_id: u16,
    /// Inbound QoS 2 message ids waiting for PUBREL.
    awaiting_release: HashSet<u16>,
    handler: Box<dyn PublishHandler + Send>,
    transmits: VecDeque<Transmit>,
    events: VecDeque<Event>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("gateway", &self.gateway())
            .field("pending", &self.timers.len())
            .field("topics", &self.topics.len())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a disconnected session that accepts and drops inbound
    /// publishes.
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            config: None,
            timers: RetransmitTimers::new(),
            topics: TopicRegistry::new(),
            discovery: Discovery::new(),
            keep_alive: None,
            next_msg_id: 1,
            awaiting_release: HashSet::new(),
            handler: Box::new(AcceptAll),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Create a session with an inbound publish handler.
    pub fn with_handler(handler: impl PublishHandler + Send + 'static) -> Self {
        let mut session = Self::new();
        session.set_publish_handler(handler);
        session
    }

    /// Replace the inbound publish handler.
    pub fn set_publish_handler(&mut self, handler: impl PublishHandler + Send + 'static) {
        self.handler = Box::new(handler);
    }

    /// Replace the policy choosing among gateways that answer a search.
    pub fn set_gateway_selector(&mut self, selector: impl GatewaySelector + Send + 'static) {
        self.discovery.set_selector(selector);
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Gateway of the current or last connect.
    pub fn gateway(&self) -> Option<SocketAddr> {
        self.config.as_ref().map(|config| config.gateway)
    }

    /// Configuration of the current or last connect.
    pub fn config(&self) -> Option<&ConnectConfig> {
        self.config.as_ref()
    }

    /// Topic bindings of the current session.
    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    /// Gateway discovery state.
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Number of requests awaiting acknowledgment.
    pub fn pending_requests(&self) -> usize {
        self.timers.len()
    }

    /// True if a request is pending under `key`.
    pub fn is_pending(&self, key: PendingKey) -> bool {
        self.timers.contains(&key)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Open a session with the gateway in `config`.
    ///
    /// Allowed while disconnected, searching (the search is superseded) or
    /// lost. Resolves on CONNACK, or with [`RequestError::Timeout`] when
    /// retries run out.
    pub fn connect(&mut self, config: ConnectConfig, now: Instant) -> Completion<()> {
        if !self.state.can_connect() {
            return Completion::ready(Err(RequestError::InvalidState(self.state)));
        }
        if let Err(error) = config.validate() {
            return Completion::ready(Err(RequestError::InvalidRequest(error.to_string())));
        }

        let flags = Flags::NONE
            .with_clean_session(config.clean_session)
            .with_will(config.will.is_some());
        let message = Message::Connect {
            flags,
            duration: config.keep_alive_secs(),
            client_id: config.client_id.clone(),
        };

        if self
            .discovery
            .cancel(RequestError::Disconnected(DisconnectReason::Superseded))
        {
            debug!("gateway search superseded by connect");
        }
        self.topics.clear();
        self.awaiting_release.clear();
        self.keep_alive = None;

        debug!(gateway = %config.gateway, client_id = %config.client_id, "connecting");
        self.config = Some(config);
        let completion = self.request(now, PendingKey::Connect, &message, Pending::Connect);
        if self.timers.contains(&PendingKey::Connect) {
            self.set_state(SessionState::Connecting);
        }
        completion
    }

    /// End the session.
    ///
    /// DISCONNECT is sent once, without retries. Pending requests fail with
    /// [`DisconnectReason::Client`] and topic bindings are dropped. A running
    /// connect or search is abandoned the same way.
    pub fn disconnect(&mut self, now: Instant) {
        match self.state {
            SessionState::Connected | SessionState::Connecting => {
                self.reply(now, &Message::Disconnect { duration: None });
                self.teardown(SessionState::Disconnected, DisconnectReason::Client);
            }
            SessionState::Searching => {
                self.discovery
                    .cancel(RequestError::Disconnected(DisconnectReason::Client));
                self.set_state(SessionState::Disconnected);
            }
            SessionState::Lost => self.set_state(SessionState::Disconnected),
            SessionState::Disconnected => {}
        }
    }

    /// Search for gateways by sending SEARCHGW to `target`, usually a
    /// multicast group on the gateway port.
    ///
    /// A search still running is superseded: its completion never resolves.
    /// The search has no retransmissions; end it with
    /// [`cancel_search`](Self::cancel_search) when the host gives up.
    pub fn search_gateway(
        &mut self,
        target: SocketAddr,
        radius: u8,
        now: Instant,
    ) -> Completion<GatewayInfo> {
        if !self.state.can_search() {
            return Completion::ready(Err(RequestError::InvalidState(self.state)));
        }
        let frame = match (Message::SearchGw { radius }).encode() {
            Ok(frame) => frame,
            Err(error) => {
                return Completion::ready(Err(RequestError::InvalidRequest(error.to_string())));
            }
        };

        let (responder, completion) = Completion::pair();
        if self.discovery.start(target, responder).is_some() {
            debug!("previous gateway search superseded");
        }
        debug!(%target, radius, "searching for gateways");
        self.transmit(now, target, frame, Some(radius));
        self.set_state(SessionState::Searching);
        completion
    }

    /// Give up on the running search. Its completion resolves with
    /// [`RequestError::Timeout`].
    pub fn cancel_search(&mut self) -> bool {
        let cancelled = self.discovery.cancel(RequestError::Timeout);
        if cancelled && self.state == SessionState::Searching {
            self.set_state(SessionState::Disconnected);
        }
        cancelled
    }

    /// Register a topic name and resolve with the id the gateway assigns.
    pub fn register(&mut self, topic_name: &str, now: Instant) -> Completion<u16> {
        if let Err(error) = self.ensure_connected() {
            return Completion::ready(Err(error));
        }
        if topic_name.is_empty() {
            return Completion::ready(Err(RequestError::InvalidRequest(
                "topic name must not be empty".into(),
            )));
        }
        let Some(msg_id) = self.allocate_msg_id() else {
            return Completion::ready(Err(RequestError::TooManyInFlight));
        };
        let message = Message::Register {
            topic_id: RESERVED_TOPIC_ID,
            msg_id,
            topic_name: topic_name.to_owned(),
        };
        self.request(now, PendingKey::Message(msg_id), &message, |responder| {
            Pending::Register {
                topic_name: topic_name.to_owned(),
                responder,
            }
        })
    }

    /// Publish `payload` on `topic`.
    ///
    /// QoS 0 resolves as soon as the frame is queued. QoS 1 resolves on
    /// PUBACK. Publishing on a normal topic id not registered in this session
    /// fails at once with [`RequestError::UnregisteredTopic`].
    pub fn publish(
        &mut self,
        topic: Topic,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> Completion<()> {
        if let Err(error) = self.ensure_connected() {
            return Completion::ready(Err(error));
        }
        if qos == QoS::ExactlyOnce {
            return Completion::ready(Err(RequestError::InvalidRequest(
                "publishing with QoS 2 is not supported".into(),
            )));
        }
        if let Topic::Normal(id) = topic {
            if !self.topics.contains_id(id) {
                debug!(topic_id = id, "publish on unregistered topic");
                return Completion::ready(Err(RequestError::UnregisteredTopic(id)));
            }
        }

        let flags = Flags::NONE
            .with_qos(qos)
            .with_retain(retain)
            .with_topic_id_type(topic.id_type());
        let topic_id = topic.wire_id();

        if qos == QoS::AtMostOnce {
            let message = Message::Publish {
                flags,
                topic_id,
                msg_id: 0,
                data: payload.into(),
            };
            return match message.encode() {
                Ok(frame) => {
                    if let Some(gateway) = self.gateway() {
                        self.transmit(now, gateway, frame, None);
                    }
                    Completion::ready(Ok(()))
                }
                Err(error) => Completion::ready(Err(RequestError::InvalidRequest(error.to_string()))),
            };
        }

        let Some(msg_id) = self.allocate_msg_id() else {
            return Completion::ready(Err(RequestError::TooManyInFlight));
        };
        let message = Message::Publish {
            flags,
            topic_id,
            msg_id,
            data: payload.into(),
        };
        self.request(now, PendingKey::Message(msg_id), &message, Pending::Publish)
    }

    /// Subscribe to a topic name, filter, predefined id or short topic.
    ///
    /// Subscribing to a plain name binds it in the topic registry, so the
    /// returned id can be published to as well.
    pub fn subscribe(
        &mut self,
        filter: impl Into<TopicFilter>,
        qos: QoS,
        now: Instant,
    ) -> Completion<Subscription> {
        let filter = filter.into();
        if let Err(error) = self.ensure_connected() {
            return Completion::ready(Err(error));
        }
        if matches!(&filter, TopicFilter::Name(name) if name.is_empty()) {
            return Completion::ready(Err(RequestError::InvalidRequest(
                "topic filter must not be empty".into(),
            )));
        }
        let Some(msg_id) = self.allocate_msg_id() else {
            return Completion::ready(Err(RequestError::TooManyInFlight));
        };
        let message = Message::Subscribe {
            flags: Flags::NONE.with_qos(qos),
            msg_id,
            topic: filter.to_field(),
        };
        self.request(now, PendingKey::Message(msg_id), &message, |responder| {
            Pending::Subscribe { filter, responder }
        })
    }

    /// Drop a subscription.
    pub fn unsubscribe(&mut self, filter: impl Into<TopicFilter>, now: Instant) -> Completion<()> {
        let filter = filter.into();
        if let Err(error) = self.ensure_connected() {
            return Completion::ready(Err(error));
        }
        let Some(msg_id) = self.allocate_msg_id() else {
            return Completion::ready(Err(RequestError::TooManyInFlight));
        };
        let message = Message::Unsubscribe {
            flags: Flags::NONE,
            msg_id,
            topic: filter.to_field(),
        };
        self.request(now, PendingKey::Message(msg_id), &message, Pending::Unsubscribe)
    }

    /// Replace the will topic stored at the gateway.
    pub fn update_will_topic(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> Completion<()> {
        let field = WillTopicField {
            flags: Flags::NONE.with_qos(qos).with_retain(retain),
            topic: topic.to_owned(),
        };
        self.send_will_topic_update(Some(field), now)
    }

    /// Delete the will at the gateway.
    pub fn clear_will(&mut self, now: Instant) -> Completion<()> {
        self.send_will_topic_update(None, now)
    }

    /// Replace the will message stored at the gateway.
    pub fn update_will_message(
        &mut self,
        message: impl Into<Vec<u8>>,
        now: Instant,
    ) -> Completion<()> {
        if let Err(error) = self.ensure_connected() {
            return Completion::ready(Err(error));
        }
        if self.timers.contains(&PendingKey::WillMessageUpdate) {
            return Completion::ready(Err(RequestError::TooManyInFlight));
        }
        let message = message.into();
        let frame = Message::WillMsgUpd {
            message: message.clone(),
        };
        self.request(now, PendingKey::WillMessageUpdate, &frame, |responder| {
            Pending::WillMessageUpdate { message, responder }
        })
    }

    fn send_will_topic_update(
        &mut self,
        will: Option<WillTopicField>,
        now: Instant,
    ) -> Completion<()> {
        if let Err(error) = self.ensure_connected() {
            return Completion::ready(Err(error));
        }
        if self.timers.contains(&PendingKey::WillTopicUpdate) {
            return Completion::ready(Err(RequestError::TooManyInFlight));
        }
        let message = Message::WillTopicUpd { will: will.clone() };
        self.request(now, PendingKey::WillTopicUpdate, &message, |responder| {
            Pending::WillTopicUpdate { will, responder }
        })
    }

    // =========================================================================
    // Driving the engine
    // =========================================================================

    /// Process one inbound datagram.
    ///
    /// Malformed frames, stale acknowledgments and frames from unknown
    /// sources are dropped and logged; the error is returned for inspection
    /// but the session is left as it was.
    pub fn handle_datagram(
        &mut self,
        now: Instant,
        from: SocketAddr,
        data: &[u8],
    ) -> TransportResult<()> {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(error) => {
                warn!(peer = %from, len = data.len(), %error, "dropping malformed frame");
                return Err(error.into());
            }
        };
        trace!(peer = %from, msg_type = %message.msg_type(), len = data.len(), "received");

        let result = self.dispatch(now, from, message);
        if let Err(error) = &result {
            debug!(peer = %from, %error, "dropped datagram");
        }
        result
    }

    /// Advance retransmission and keep-alive timers to `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        // Loss is detected first so requests due for retransmission in the
        // same tick fail instead.
        if self.state == SessionState::Connected {
            match self.keep_alive.as_mut().and_then(|keep_alive| keep_alive.poll(now)) {
                Some(KeepAliveAction::Ping) => {
                    trace!("keep-alive ping");
                    self.reply(now, &Message::PingReq { client_id: None });
                }
                Some(KeepAliveAction::Lost) => {
                    warn!(gateway = ?self.gateway(), "no PINGRESP, session lost");
                    self.teardown(SessionState::Lost, DisconnectReason::KeepAliveTimeout);
                }
                None => {}
            }
        }

        for action in self.timers.tick(now) {
            match action {
                TimerAction::Retransmit {
                    key,
                    dest,
                    mut frame,
                } => {
                    if matches!(key, PendingKey::Message(_)) {
                        mark_duplicate(&mut frame);
                    }
                    debug!(%key, "retransmitting");
                    self.transmit(now, dest, frame, None);
                }
                TimerAction::Expired { key, value } => {
                    warn!(%key, "retransmissions exhausted");
                    if key == PendingKey::Connect && self.state == SessionState::Connecting {
                        self.set_state(SessionState::Disconnected);
                    }
                    value.fail(RequestError::Timeout);
                }
            }
        }
    }

    /// Next time [`handle_timeout`](Self::handle_timeout) has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let keep_alive = self
            .keep_alive
            .as_ref()
            .filter(|_| self.state == SessionState::Connected)
            .and_then(KeepAlive::next_deadline);
        match (self.timers.next_deadline(), keep_alive) {
            (Some(timer), Some(keep_alive)) => Some(timer.min(keep_alive)),
            (timer, keep_alive) => timer.or(keep_alive),
        }
    }

    /// Next datagram to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Next event for the host.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Send every queued datagram through `transport`.
    ///
    /// Send failures are logged and otherwise treated like lost datagrams.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        while let Some(transmit) = self.transmits.pop_front() {
            if let Some(hops) = transmit.hop_limit {
                if let Err(error) = transport.set_multicast_hops(hops) {
                    warn!(hops, %error, "failed to set multicast hop limit");
                }
            }
            if let Err(error) = transport.send(transmit.destination, &transmit.contents) {
                warn!(peer = %transmit.destination, %error, "send failed");
            }
        }
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    fn dispatch(&mut self, now: Instant, from: SocketAddr, message: Message) -> TransportResult<()> {
        match message {
            Message::GwInfo { gw_id, gw_addr } => {
                self.on_gwinfo(from, gw_id, &gw_addr);
                return Ok(());
            }
            Message::Advertise { gw_id, duration } => {
                self.on_advertise(now, from, gw_id, duration);
                return Ok(());
            }
            // Another client searching
            Message::SearchGw { .. } => return Ok(()),
            _ => {}
        }

        if self.gateway() != Some(from) {
            return Err(TransportError::ForeignSource(from));
        }
        if !matches!(
            self.state,
            SessionState::Connecting | SessionState::Connected
        ) {
            return Err(TransportError::UnexpectedMessage(message.msg_type()));
        }
        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.on_receive(now);
        }

        match message {
            Message::ConnAck { return_code } => self.on_connack(now, return_code),
            Message::WillTopicReq => self.on_will_topic_req(now),
            Message::WillMsgReq => self.on_will_msg_req(now),
            Message::RegAck {
                topic_id,
                msg_id,
                return_code,
            } => self.on_regack(topic_id, msg_id, return_code),
            Message::PubAck {
                topic_id,
                msg_id,
                return_code,
            } => self.on_puback(topic_id, msg_id, return_code),
            Message::SubAck {
                flags,
                topic_id,
                msg_id,
                return_code,
            } => self.on_suback(flags, topic_id, msg_id, return_code),
            Message::UnsubAck { msg_id } => self.on_unsuback(msg_id),
            Message::WillTopicResp { return_code } => self.on_will_topic_resp(return_code),
            Message::WillMsgResp { return_code } => self.on_will_msg_resp(return_code),
            Message::Register {
                topic_id,
                msg_id,
                topic_name,
            } => self.on_register(now, topic_id, msg_id, topic_name),
            Message::Publish {
                flags,
                topic_id,
                msg_id,
                data,
            } => self.on_publish(now, flags, topic_id, msg_id, data),
            Message::PubRel { msg_id } => self.on_pubrel(now, msg_id),
            Message::PubRec { msg_id } | Message::PubComp { msg_id } => {
                Err(unexpected_ack(message.msg_type(), PendingKey::Message(msg_id)))
            }
            Message::PingReq { .. } => {
                self.expect_state(SessionState::Connected, MsgType::PingReq)?;
                self.reply(now, &Message::PingResp);
                Ok(())
            }
            Message::PingResp => {
                if let Some(keep_alive) = self.keep_alive.as_mut() {
                    keep_alive.on_ping_response(now);
                }
                Ok(())
            }
            Message::Disconnect { .. } => {
                info!(gateway = %from, "gateway closed the session");
                self.teardown(SessionState::Disconnected, DisconnectReason::Server);
                Ok(())
            }
            other => Err(TransportError::UnexpectedMessage(other.msg_type())),
        }
    }

    fn on_gwinfo(&mut self, from: SocketAddr, gw_id: u8, gw_addr: &[u8]) {
        let Some(gateway) = self.discovery.on_gwinfo(gw_id, gw_addr, from) else {
            return;
        };
        info!(gw_id = gateway.gateway_id, address = %gateway.address, "gateway found");
        self.events.push_back(Event::GatewayFound(gateway));
        if self.state == SessionState::Searching {
            self.set_state(SessionState::Disconnected);
        }
    }

    fn on_advertise(&mut self, now: Instant, from: SocketAddr, gw_id: u8, duration: u16) {
        let advertisement = self.discovery.on_advertise(gw_id, duration, from, now);
        debug!(gw_id, address = %from, duration, "gateway advertised");
        self.events.push_back(Event::GatewayAdvertised(advertisement));
    }

    fn on_connack(&mut self, now: Instant, return_code: ReturnCode) -> TransportResult<()> {
        self.expect_state(SessionState::Connecting, MsgType::ConnAck)?;
        let key = PendingKey::Connect;
        let Pending::Connect(responder) = self.take_pending(key, MsgType::ConnAck)? else {
            return Err(unexpected_ack(MsgType::ConnAck, key));
        };

        if return_code.is_accepted() {
            if let Some(config) = &self.config {
                self.keep_alive = Some(KeepAlive::new(
                    config.keep_alive,
                    config.keep_alive_margin,
                    now,
                ));
            }
            info!(gateway = ?self.gateway(), "connected");
            self.set_state(SessionState::Connected);
            responder.succeed(());
        } else {
            warn!(%return_code, "connect rejected");
            self.set_state(SessionState::Disconnected);
            responder.fail(RequestError::Rejected(return_code));
        }
        Ok(())
    }

    fn on_will_topic_req(&mut self, now: Instant) -> TransportResult<()> {
        self.expect_state(SessionState::Connecting, MsgType::WillTopicReq)?;
        let will = self
            .config
            .as_ref()
            .and_then(|config| config.will.as_ref())
            .map(|will| WillTopicField {
                flags: Flags::NONE.with_qos(will.qos).with_retain(will.retain),
                topic: will.topic.clone(),
            });
        self.continue_connect(now, &Message::WillTopic { will })
    }

    fn on_will_msg_req(&mut self, now: Instant) -> TransportResult<()> {
        self.expect_state(SessionState::Connecting, MsgType::WillMsgReq)?;
        let message = self
            .config
            .as_ref()
            .and_then(|config| config.will.as_ref())
            .map(|will| will.message.clone())
            .unwrap_or_default();
        self.continue_connect(now, &Message::WillMsg { message })
    }

    /// Send the next frame of the connect handshake and make it the one
    /// retransmitted.
    fn continue_connect(&mut self, now: Instant, message: &Message) -> TransportResult<()> {
        let key = PendingKey::Connect;
        if !self.timers.contains(&key) {
            return Err(TransportError::UnexpectedMessage(message.msg_type()));
        }
        let frame = message.encode()?;
        if let Some(gateway) = self.gateway() {
            self.transmit(now, gateway, frame.clone(), None);
        }
        self.timers.refresh(&key, frame, now);
        Ok(())
    }

    fn on_regack(&mut self, topic_id: u16, msg_id: u16, return_code: ReturnCode) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::RegAck)?;
        let key = PendingKey::Message(msg_id);
        let Pending::Register {
            topic_name,
            responder,
        } = self.take_pending(key, MsgType::RegAck)?
        else {
            return Err(unexpected_ack(MsgType::RegAck, key));
        };

        if !return_code.is_accepted() {
            debug!(topic = %topic_name, %return_code, "registration rejected");
            responder.fail(RequestError::Rejected(return_code));
        } else if topic_id == RESERVED_TOPIC_ID {
            warn!(topic = %topic_name, "gateway assigned the reserved topic id");
            responder.fail(RequestError::Rejected(ReturnCode::InvalidTopicId));
        } else {
            debug!(topic = %topic_name, topic_id, "topic registered");
            self.topics.bind(topic_name, topic_id);
            responder.succeed(topic_id);
        }
        Ok(())
    }

    fn on_puback(&mut self, topic_id: u16, msg_id: u16, return_code: ReturnCode) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::PubAck)?;
        let key = PendingKey::Message(msg_id);
        let Pending::Publish(responder) = self.take_pending(key, MsgType::PubAck)? else {
            return Err(unexpected_ack(MsgType::PubAck, key));
        };

        if return_code == ReturnCode::InvalidTopicId {
            if let Some(name) = self.topics.unbind_id(topic_id) {
                debug!(topic = %name, topic_id, "gateway dropped topic id");
            }
        }
        if return_code.is_accepted() {
            responder.succeed(());
        } else {
            debug!(topic_id, msg_id, %return_code, "publish rejected");
            responder.fail(RequestError::Rejected(return_code));
        }
        Ok(())
    }

    fn on_suback(
        &mut self,
        flags: Flags,
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    ) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::SubAck)?;
        let key = PendingKey::Message(msg_id);
        let Pending::Subscribe { filter, responder } = self.take_pending(key, MsgType::SubAck)?
        else {
            return Err(unexpected_ack(MsgType::SubAck, key));
        };

        if !return_code.is_accepted() {
            debug!(?filter, %return_code, "subscription rejected");
            responder.fail(RequestError::Rejected(return_code));
            return Ok(());
        }
        if let TopicFilter::Name(name) = &filter {
            if !filter.is_wildcard() && topic_id != RESERVED_TOPIC_ID {
                self.topics.bind(name.clone(), topic_id);
            }
        }
        let granted = Subscription {
            topic_id,
            qos: flags.qos().unwrap_or_default(),
        };
        debug!(?filter, topic_id, qos = ?granted.qos, "subscribed");
        responder.succeed(granted);
        Ok(())
    }

    fn on_unsuback(&mut self, msg_id: u16) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::UnsubAck)?;
        let key = PendingKey::Message(msg_id);
        let Pending::Unsubscribe(responder) = self.take_pending(key, MsgType::UnsubAck)? else {
            return Err(unexpected_ack(MsgType::UnsubAck, key));
        };
        responder.succeed(());
        Ok(())
    }

    fn on_will_topic_resp(&mut self, return_code: ReturnCode) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::WillTopicResp)?;
        let key = PendingKey::WillTopicUpdate;
        let Pending::WillTopicUpdate { will, responder } =
            self.take_pending(key, MsgType::WillTopicResp)?
        else {
            return Err(unexpected_ack(MsgType::WillTopicResp, key));
        };
        if !return_code.is_accepted() {
            responder.fail(RequestError::Rejected(return_code));
            return Ok(());
        }

        // Remember the new will for reconnects
        if let Some(config) = self.config.as_mut() {
            let previous = config.will.take();
            config.will = will.map(|field| Will {
                topic: field.topic,
                message: previous.map(|will| will.message).unwrap_or_default(),
                qos: field.flags.qos().unwrap_or_default(),
                retain: field.flags.retain(),
            });
        }
        responder.succeed(());
        Ok(())
    }

    fn on_will_msg_resp(&mut self, return_code: ReturnCode) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::WillMsgResp)?;
        let key = PendingKey::WillMessageUpdate;
        let Pending::WillMessageUpdate { message, responder } =
            self.take_pending(key, MsgType::WillMsgResp)?
        else {
            return Err(unexpected_ack(MsgType::WillMsgResp, key));
        };
        if !return_code.is_accepted() {
            responder.fail(RequestError::Rejected(return_code));
            return Ok(());
        }
        if let Some(will) = self.config.as_mut().and_then(|config| config.will.as_mut()) {
            will.message = message;
        }
        responder.succeed(());
        Ok(())
    }

    /// REGISTER from the gateway, announcing the id of a topic matched by a
    /// wildcard subscription.
    fn on_register(
        &mut self,
        now: Instant,
        topic_id: u16,
        msg_id: u16,
        topic_name: String,
    ) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::Register)?;
        let return_code = if topic_id == RESERVED_TOPIC_ID {
            ReturnCode::InvalidTopicId
        } else {
            debug!(topic = %topic_name, topic_id, "gateway registered topic");
            self.topics.bind(topic_name, topic_id);
            ReturnCode::Accepted
        };
        self.reply(
            now,
            &Message::RegAck {
                topic_id,
                msg_id,
                return_code,
            },
        );
        Ok(())
    }

    fn on_publish(
        &mut self,
        now: Instant,
        flags: Flags,
        topic_id: u16,
        msg_id: u16,
        data: Vec<u8>,
    ) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::Publish)?;
        let qos = flags.qos().unwrap_or_default();

        if qos == QoS::ExactlyOnce && self.awaiting_release.contains(&msg_id) {
            trace!(msg_id, "duplicate QoS 2 publish");
            self.reply(now, &Message::PubRec { msg_id });
            return Ok(());
        }

        let return_code = match self.inbound_topic(flags, topic_id) {
            Ok((topic_id_type, topic_name)) => {
                let publish = InboundPublish {
                    topic_id,
                    topic_id_type,
                    topic_name,
                    payload: data,
                    qos,
                    retain: flags.retain(),
                    dup: flags.dup(),
                };
                self.handler.on_publish(&publish)
            }
            Err(return_code) => return_code,
        };
        debug!(topic_id, msg_id, ?qos, %return_code, "inbound publish");

        let puback = Message::PubAck {
            topic_id,
            msg_id,
            return_code,
        };
        match qos {
            QoS::AtMostOnce if return_code.is_accepted() => {}
            QoS::ExactlyOnce if return_code.is_accepted() => {
                self.awaiting_release.insert(msg_id);
                self.reply(now, &Message::PubRec { msg_id });
            }
            _ => self.reply(now, &puback),
        }
        Ok(())
    }

    fn inbound_topic(
        &self,
        flags: Flags,
        topic_id: u16,
    ) -> Result<(TopicIdType, Option<String>), ReturnCode> {
        match flags.topic_id_type() {
            Some(TopicIdType::Normal) => self
                .topics
                .name_of(topic_id)
                .map(|name| (TopicIdType::Normal, Some(name.to_owned())))
                .ok_or(ReturnCode::InvalidTopicId),
            Some(TopicIdType::Predefined) => Ok((TopicIdType::Predefined, None)),
            Some(TopicIdType::Short) => {
                let name = String::from_utf8_lossy(&topic_id.to_be_bytes()).into_owned();
                Ok((TopicIdType::Short, Some(name)))
            }
            None => Err(ReturnCode::NotSupported),
        }
    }

    fn on_pubrel(&mut self, now: Instant, msg_id: u16) -> TransportResult<()> {
        self.expect_state(SessionState::Connected, MsgType::PubRel)?;
        self.awaiting_release.remove(&msg_id);
        self.reply(now, &Message::PubComp { msg_id });
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_connected(&self) -> Result<(), RequestError> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(RequestError::Disconnected(DisconnectReason::NotConnected))
        }
    }

    fn expect_state(&self, state: SessionState, msg_type: MsgType) -> TransportResult<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(TransportError::UnexpectedMessage(msg_type))
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.config
            .as_ref()
            .map(ConnectConfig::retry_policy)
            .unwrap_or_else(|| {
                RetryPolicy::new(DEFAULT_RETRANSMISSION_TIMEOUT, DEFAULT_RETRANSMISSION_COUNT)
            })
    }

    /// Next free message id, skipping zero and ids still in flight.
    fn allocate_msg_id(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX {
            let id = self.next_msg_id;
            self.next_msg_id = self.next_msg_id.wrapping_add(1);
            if id != RESERVED_MSG_ID && !self.timers.contains(&PendingKey::Message(id)) {
                return Some(id);
            }
        }
        None
    }

    /// Send `message` to the gateway and track it until acknowledged.
    fn request<T>(
        &mut self,
        now: Instant,
        key: PendingKey,
        message: &Message,
        pending: impl FnOnce(Responder<T>) -> Pending,
    ) -> Completion<T> {
        let Some(gateway) = self.gateway() else {
            return Completion::ready(Err(RequestError::Disconnected(
                DisconnectReason::NotConnected,
            )));
        };
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(error) => {
                return Completion::ready(Err(RequestError::InvalidRequest(error.to_string())));
            }
        };

        let (responder, completion) = Completion::pair();
        let policy = self.retry_policy();
        debug!(%key, msg_type = %message.msg_type(), "request sent");
        self.transmit(now, gateway, frame.clone(), None);
        self.timers
            .arm(key, now, policy, gateway, frame, pending(responder));
        completion
    }

    /// Remove the pending request under `key` if `ack` is what resolves it.
    fn take_pending(&mut self, key: PendingKey, ack: MsgType) -> TransportResult<Pending> {
        match self.timers.get(&key) {
            Some(pending) if pending.ack_type() == ack => {}
            _ => return Err(unexpected_ack(ack, key)),
        }
        self.timers
            .cancel(&key)
            .ok_or_else(|| unexpected_ack(ack, key))
    }

    /// Send an unacknowledged frame to the gateway.
    fn reply(&mut self, now: Instant, message: &Message) {
        let Some(gateway) = self.gateway() else {
            return;
        };
        match message.encode() {
            Ok(frame) => self.transmit(now, gateway, frame, None),
            Err(error) => {
                warn!(msg_type = %message.msg_type(), %error, "failed to encode reply");
            }
        }
    }

    fn transmit(&mut self, now: Instant, destination: SocketAddr, contents: Vec<u8>, hop_limit: Option<u8>) {
        trace!(peer = %destination, len = contents.len(), "queued datagram");
        if Some(destination) == self.gateway() {
            if let Some(keep_alive) = self.keep_alive.as_mut() {
                keep_alive.on_send(now);
            }
        }
        self.transmits.push_back(Transmit {
            destination,
            contents,
            hop_limit,
        });
    }

    /// End the session, failing everything still pending with `reason`.
    fn teardown(&mut self, next: SessionState, reason: DisconnectReason) {
        let was_connected = self.state == SessionState::Connected;
        let pending = self.timers.drain();
        self.topics.clear();
        self.keep_alive = None;
        self.awaiting_release.clear();
        self.set_state(next);
        if was_connected {
            self.events.push_back(Event::Disconnected(reason));
        }
        for (key, request) in pending {
            debug!(%key, %reason, "failing pending request");
            request.fail(RequestError::Disconnected(reason));
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        debug!(%previous, current = %next, "session state changed");
        self.events.push_back(Event::StateChanged {
            previous,
            current: next,
        });
    }
}

fn unexpected_ack(msg_type: MsgType, key: PendingKey) -> TransportError {
    TransportError::UnexpectedAck {
        msg_type,
        key: key.to_string(),
    }
}
