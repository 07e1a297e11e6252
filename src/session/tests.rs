//! Session behavior against a scripted gateway, on synthetic time.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::*;
use crate::core::{
    DisconnectReason, GatewayInfo, InboundPublish, RequestError, SessionState,
};
use crate::transport::{
    Flags, FrameError, Message, QoS, ReturnCode, TopicIdType, TransportError, WillTopicField,
};

fn gateway() -> SocketAddr {
    "127.0.0.1:10000".parse().unwrap()
}

fn group() -> SocketAddr {
    "[ff05::1]:10000".parse().unwrap()
}

struct Harness {
    session: Session,
    start: Instant,
}

impl Harness {
    fn new() -> Self {
        Self {
            session: Session::new(),
            start: Instant::now(),
        }
    }

    fn at(&self, secs: u64) -> Instant {
        self.start + Duration::from_secs(secs)
    }

    fn at_millis(&self, millis: u64) -> Instant {
        self.start + Duration::from_millis(millis)
    }

    /// Drain and decode everything the session queued.
    fn sent(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(transmit) = self.session.poll_transmit() {
            messages.push(Message::decode(&transmit.contents).unwrap());
        }
        messages
    }

    fn sent_raw(&mut self) -> Vec<Transmit> {
        std::iter::from_fn(|| self.session.poll_transmit()).collect()
    }

    fn events(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.session.poll_event()).collect()
    }

    fn deliver(&mut self, secs: u64, message: Message) -> Result<(), TransportError> {
        let frame = message.encode().unwrap();
        let now = self.at(secs);
        self.session.handle_datagram(now, gateway(), &frame)
    }

    fn tick(&mut self, secs: u64) {
        let now = self.at(secs);
        self.session.handle_timeout(now);
    }

    fn config() -> ConnectConfig {
        ConnectConfig::builder("sensor-1")
            .gateway(gateway())
            .keep_alive(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    /// Connected at t=0.
    fn connected() -> Self {
        Self::connected_with(Self::config())
    }

    fn connected_with(config: ConnectConfig) -> Self {
        let mut harness = Self::new();
        let now = harness.at(0);
        let mut connect = harness.session.connect(config, now);
        harness
            .deliver(0, Message::ConnAck {
                return_code: ReturnCode::Accepted,
            })
            .unwrap();
        assert_eq!(connect.try_outcome(), Some(Ok(())));
        harness.sent();
        harness.events();
        harness
    }

    fn register(&mut self, name: &str, topic_id: u16) {
        let now = self.at(0);
        let mut completion = self.session.register(name, now);
        let msg_id = match self.sent().as_slice() {
            [Message::Register { msg_id, .. }] => *msg_id,
            other => panic!("expected REGISTER, got {other:?}"),
        };
        self.deliver(0, Message::RegAck {
            topic_id,
            msg_id,
            return_code: ReturnCode::Accepted,
        })
        .unwrap();
        assert_eq!(completion.try_outcome(), Some(Ok(topic_id)));
    }
}

fn publish_msg_id(messages: &[Message]) -> u16 {
    match messages {
        [Message::Publish { msg_id, .. }] => *msg_id,
        other => panic!("expected one PUBLISH, got {other:?}"),
    }
}

// =============================================================================
// Connect
// =============================================================================

#[test]
fn test_connect_accepted() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut connect = h.session.connect(Harness::config(), now);
    assert_eq!(h.session.state(), SessionState::Connecting);

    match h.sent().as_slice() {
        [Message::Connect {
            flags,
            duration,
            client_id,
        }] => {
            assert!(flags.clean_session());
            assert!(!flags.will());
            assert_eq!(*duration, 30);
            assert_eq!(client_id, "sensor-1");
        }
        other => panic!("expected CONNECT, got {other:?}"),
    }

    // One retry before the gateway answers
    h.tick(10);
    assert!(matches!(h.sent().as_slice(), [Message::Connect { .. }]));
    assert!(connect.try_outcome().is_none());

    h.deliver(12, Message::ConnAck {
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(connect.try_outcome(), Some(Ok(())));
    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.session.pending_requests(), 0);
    assert_eq!(h.events(), vec![
        Event::StateChanged {
            previous: SessionState::Disconnected,
            current: SessionState::Connecting,
        },
        Event::StateChanged {
            previous: SessionState::Connecting,
            current: SessionState::Connected,
        },
    ]);
}

#[test]
fn test_connect_rejected() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut connect = h.session.connect(Harness::config(), now);
    h.deliver(1, Message::ConnAck {
        return_code: ReturnCode::Congestion,
    })
    .unwrap();
    assert_eq!(
        connect.try_outcome(),
        Some(Err(RequestError::Rejected(ReturnCode::Congestion)))
    );
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[test]
fn test_connect_times_out() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut connect = h.session.connect(Harness::config(), now);
    h.sent();
    for secs in [10, 20, 30] {
        h.tick(secs);
        assert_eq!(h.sent().len(), 1);
    }
    h.tick(39);
    assert!(connect.try_outcome().is_none());
    h.tick(40);
    assert_eq!(connect.try_outcome(), Some(Err(RequestError::Timeout)));
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[test]
fn test_connect_while_connected_is_invalid() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut again = h.session.connect(Harness::config(), now);
    assert_eq!(
        again.try_outcome(),
        Some(Err(RequestError::InvalidState(SessionState::Connected)))
    );
    assert!(h.sent().is_empty());
}

#[test]
fn test_connect_with_invalid_config() {
    let mut h = Harness::new();
    let mut config = Harness::config();
    config.client_id = "x".repeat(24);
    let now = h.at(0);
    let mut connect = h.session.connect(config, now);
    assert!(matches!(
        connect.try_outcome(),
        Some(Err(RequestError::InvalidRequest(_)))
    ));
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[test]
fn test_connect_refuses_unbounded_timing() {
    let mut h = Harness::new();

    let mut config = Harness::config();
    config.retransmission_timeout = Duration::MAX;
    let now = h.at(0);
    let mut connect = h.session.connect(config, now);
    assert!(matches!(
        connect.try_outcome(),
        Some(Err(RequestError::InvalidRequest(_)))
    ));

    let mut config = Harness::config();
    config.keep_alive_margin = 1e30;
    let mut connect = h.session.connect(config, now);
    assert!(matches!(
        connect.try_outcome(),
        Some(Err(RequestError::InvalidRequest(_)))
    ));

    h.tick(30);
    assert!(h.sent().is_empty());
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[test]
fn test_connect_with_will_handshake() {
    let config = ConnectConfig::builder("sensor-1")
        .gateway(gateway())
        .will(Will::new("status/sensor-1", "offline").qos(QoS::AtLeastOnce).retain(true))
        .build()
        .unwrap();
    let mut h = Harness::new();
    let now = h.at(0);
    let mut connect = h.session.connect(config, now);
    match h.sent().as_slice() {
        [Message::Connect { flags, .. }] => assert!(flags.will()),
        other => panic!("expected CONNECT, got {other:?}"),
    }

    h.deliver(1, Message::WillTopicReq).unwrap();
    match h.sent().as_slice() {
        [Message::WillTopic { will: Some(will) }] => {
            assert_eq!(will.topic, "status/sensor-1");
            assert_eq!(will.flags.qos(), Some(QoS::AtLeastOnce));
            assert!(will.flags.retain());
        }
        other => panic!("expected WILLTOPIC, got {other:?}"),
    }

    // The handshake step is what gets retransmitted now
    h.tick(11);
    assert!(matches!(h.sent().as_slice(), [Message::WillTopic { .. }]));

    h.deliver(12, Message::WillMsgReq).unwrap();
    assert_eq!(h.sent(), vec![Message::WillMsg {
        message: b"offline".to_vec()
    }]);

    h.deliver(13, Message::ConnAck {
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(connect.try_outcome(), Some(Ok(())));
    assert_eq!(h.session.state(), SessionState::Connected);
}

// =============================================================================
// Topics and publishing
// =============================================================================

#[test]
fn test_register_binds_topic() {
    let mut h = Harness::connected();
    h.register("sensors", 0x0007);
    assert_eq!(h.session.topics().resolve("sensors"), Some(0x0007));
}

#[test]
fn test_concurrent_registrations() {
    let mut h = Harness::connected();
    let now = h.at(0);
    let mut first = h.session.register("a", now);
    let mut second = h.session.register("b", now);
    let ids: Vec<u16> = h
        .sent()
        .iter()
        .map(|message| match message {
            Message::Register { msg_id, .. } => *msg_id,
            other => panic!("expected REGISTER, got {other:?}"),
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    // Answered out of order
    h.deliver(1, Message::RegAck {
        topic_id: 2,
        msg_id: ids[1],
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    h.deliver(1, Message::RegAck {
        topic_id: 1,
        msg_id: ids[0],
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(first.try_outcome(), Some(Ok(1)));
    assert_eq!(second.try_outcome(), Some(Ok(2)));
    assert_eq!(h.session.topics().resolve("a"), Some(1));
    assert_eq!(h.session.topics().resolve("b"), Some(2));
}

#[test]
fn test_regack_with_reserved_id_is_rejected() {
    let mut h = Harness::connected();
    let now = h.at(0);
    let mut completion = h.session.register("sensors", now);
    let msg_id = match h.sent().as_slice() {
        [Message::Register { msg_id, .. }] => *msg_id,
        other => panic!("expected REGISTER, got {other:?}"),
    };
    h.deliver(1, Message::RegAck {
        topic_id: 0,
        msg_id,
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(
        completion.try_outcome(),
        Some(Err(RequestError::Rejected(ReturnCode::InvalidTopicId)))
    );
    assert!(h.session.topics().is_empty());
}

#[test]
fn test_operations_need_a_session() {
    let mut h = Harness::new();
    let now = h.at(0);
    let not_connected = RequestError::Disconnected(DisconnectReason::NotConnected);
    assert_eq!(
        h.session.register("sensors", now).try_outcome(),
        Some(Err(not_connected.clone()))
    );
    assert_eq!(
        h.session
            .publish(Topic::Predefined(1), "x", QoS::AtMostOnce, false, now)
            .try_outcome(),
        Some(Err(not_connected.clone()))
    );
    assert_eq!(
        h.session.update_will_message("x", now).try_outcome(),
        Some(Err(not_connected))
    );
    assert!(h.sent().is_empty());
}

#[test]
fn test_publish_qos0_resolves_immediately() {
    let mut h = Harness::connected();
    h.register("sensors", 7);
    let now = h.at(1);
    let mut completion = h
        .session
        .publish(Topic::Normal(7), "21.5", QoS::AtMostOnce, false, now);
    assert_eq!(completion.try_outcome(), Some(Ok(())));
    match h.sent().as_slice() {
        [Message::Publish {
            flags,
            topic_id,
            msg_id,
            data,
        }] => {
            assert_eq!(flags.qos(), Some(QoS::AtMostOnce));
            assert_eq!(*topic_id, 7);
            assert_eq!(*msg_id, 0);
            assert_eq!(data, b"21.5");
        }
        other => panic!("expected PUBLISH, got {other:?}"),
    }
    assert_eq!(h.session.pending_requests(), 0);
}

#[test]
fn test_publish_qos1_acknowledged() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut completion = h.session.publish(
        Topic::Short(*b"ab"),
        "on",
        QoS::AtLeastOnce,
        true,
        now,
    );
    let sent = h.sent();
    let msg_id = publish_msg_id(&sent);
    match &sent[0] {
        Message::Publish { flags, topic_id, .. } => {
            assert_eq!(flags.topic_id_type(), Some(TopicIdType::Short));
            assert!(flags.retain());
            assert_eq!(*topic_id, 0x6162);
        }
        _ => unreachable!(),
    }
    assert!(h.session.is_pending(PendingKey::Message(msg_id)));

    h.deliver(2, Message::PubAck {
        topic_id: 0x6162,
        msg_id,
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(completion.try_outcome(), Some(Ok(())));
}

#[test]
fn test_publish_qos1_times_out() {
    let mut h = Harness::connected_with(
        ConnectConfig::builder("sensor-1")
            .gateway(gateway())
            .keep_alive(Duration::ZERO)
            .build()
            .unwrap(),
    );
    h.register("sensors", 7);
    let now = h.at(0);
    let mut completion = h
        .session
        .publish(Topic::Normal(7), "21.5", QoS::AtLeastOnce, false, now);
    let first = h.sent_raw();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].destination, gateway());

    for secs in [10, 20, 30] {
        h.tick(secs);
        let retransmitted = h.sent();
        match retransmitted.as_slice() {
            [Message::Publish { flags, .. }] => assert!(flags.dup()),
            other => panic!("expected PUBLISH retransmission, got {other:?}"),
        }
        assert!(completion.try_outcome().is_none());
    }

    h.tick(39);
    assert!(h.sent().is_empty());
    assert!(completion.try_outcome().is_none());

    h.tick(40);
    assert!(h.sent().is_empty());
    assert_eq!(completion.try_outcome(), Some(Err(RequestError::Timeout)));
    assert_eq!(h.session.pending_requests(), 0);
    assert_eq!(h.session.state(), SessionState::Connected);
}

#[test]
fn test_publish_to_unregistered_topic() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut completion = h
        .session
        .publish(Topic::Normal(9), "x", QoS::AtLeastOnce, false, now);
    assert_eq!(
        completion.try_outcome(),
        Some(Err(RequestError::UnregisteredTopic(9)))
    );
    assert!(completion.try_outcome().is_none());
    assert!(h.sent().is_empty());
}

#[test]
fn test_publish_qos2_is_refused() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut completion =
        h.session
            .publish(Topic::Predefined(1), "x", QoS::ExactlyOnce, false, now);
    assert!(matches!(
        completion.try_outcome(),
        Some(Err(RequestError::InvalidRequest(_)))
    ));
}

#[test]
fn test_puback_invalid_topic_id_unbinds() {
    let mut h = Harness::connected();
    h.register("sensors", 7);
    let now = h.at(1);
    let mut completion = h
        .session
        .publish(Topic::Normal(7), "x", QoS::AtLeastOnce, false, now);
    let msg_id = publish_msg_id(&h.sent());
    h.deliver(2, Message::PubAck {
        topic_id: 7,
        msg_id,
        return_code: ReturnCode::InvalidTopicId,
    })
    .unwrap();
    assert_eq!(
        completion.try_outcome(),
        Some(Err(RequestError::Rejected(ReturnCode::InvalidTopicId)))
    );
    assert!(completion.try_outcome().is_none());
    assert_eq!(h.session.topics().resolve("sensors"), None);
}

#[test]
fn test_stale_ack_is_dropped() {
    let mut h = Harness::connected();
    let result = h.deliver(1, Message::PubAck {
        topic_id: 7,
        msg_id: 42,
        return_code: ReturnCode::Accepted,
    });
    assert!(matches!(result, Err(TransportError::UnexpectedAck { .. })));
    assert_eq!(h.session.state(), SessionState::Connected);
}

#[test]
fn test_stale_invalid_topic_ack_keeps_binding() {
    let mut h = Harness::connected();
    h.register("sensors", 7);
    let result = h.deliver(1, Message::PubAck {
        topic_id: 7,
        msg_id: 999,
        return_code: ReturnCode::InvalidTopicId,
    });
    assert!(matches!(result, Err(TransportError::UnexpectedAck { .. })));
    assert_eq!(h.session.topics().resolve("sensors"), Some(7));
}

#[test]
fn test_ack_of_wrong_type_leaves_request_pending() {
    let mut h = Harness::connected();
    let now = h.at(0);
    let mut completion = h.session.register("sensors", now);
    let msg_id = match h.sent().as_slice() {
        [Message::Register { msg_id, .. }] => *msg_id,
        other => panic!("expected REGISTER, got {other:?}"),
    };
    let result = h.deliver(1, Message::UnsubAck { msg_id });
    assert!(matches!(result, Err(TransportError::UnexpectedAck { .. })));
    assert!(h.session.is_pending(PendingKey::Message(msg_id)));
    assert!(completion.try_outcome().is_none());
}

// =============================================================================
// Subscriptions
// =============================================================================

#[test]
fn test_subscribe_binds_name() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut completion = h.session.subscribe("sensors/1/temp", QoS::AtLeastOnce, now);
    let msg_id = match h.sent().as_slice() {
        [Message::Subscribe { msg_id, topic, .. }] => {
            assert_eq!(
                topic,
                &crate::transport::TopicField::Name("sensors/1/temp".into())
            );
            *msg_id
        }
        other => panic!("expected SUBSCRIBE, got {other:?}"),
    };
    h.deliver(2, Message::SubAck {
        flags: Flags::NONE.with_qos(QoS::AtLeastOnce),
        topic_id: 12,
        msg_id,
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(
        completion.try_outcome(),
        Some(Ok(Subscription {
            topic_id: 12,
            qos: QoS::AtLeastOnce,
        }))
    );
    assert_eq!(h.session.topics().resolve("sensors/1/temp"), Some(12));
}

#[test]
fn test_wildcard_subscription_then_gateway_register() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut completion = h.session.subscribe("sensors/#", QoS::AtMostOnce, now);
    let msg_id = match h.sent().as_slice() {
        [Message::Subscribe { msg_id, .. }] => *msg_id,
        other => panic!("expected SUBSCRIBE, got {other:?}"),
    };
    h.deliver(2, Message::SubAck {
        flags: Flags::NONE,
        topic_id: 0,
        msg_id,
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert!(matches!(completion.try_outcome(), Some(Ok(_))));
    assert!(h.session.topics().is_empty());

    h.deliver(3, Message::Register {
        topic_id: 21,
        msg_id: 500,
        topic_name: "sensors/2/temp".into(),
    })
    .unwrap();
    assert_eq!(h.sent(), vec![Message::RegAck {
        topic_id: 21,
        msg_id: 500,
        return_code: ReturnCode::Accepted,
    }]);
    assert_eq!(h.session.topics().name_of(21), Some("sensors/2/temp"));
}

#[test]
fn test_unsubscribe() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut completion = h.session.unsubscribe(TopicFilter::Predefined(4), now);
    let msg_id = match h.sent().as_slice() {
        [Message::Unsubscribe { msg_id, .. }] => *msg_id,
        other => panic!("expected UNSUBSCRIBE, got {other:?}"),
    };
    h.deliver(2, Message::UnsubAck { msg_id }).unwrap();
    assert_eq!(completion.try_outcome(), Some(Ok(())));
}

// =============================================================================
// Inbound publishes
// =============================================================================

fn recording_session(
    code: ReturnCode,
) -> (Harness, Arc<Mutex<Vec<InboundPublish>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let mut h = Harness::connected();
    h.session.set_publish_handler(move |publish: &InboundPublish| {
        sink.lock().unwrap().push(publish.clone());
        code
    });
    (h, received)
}

#[test]
fn test_inbound_qos1_publish() {
    let (mut h, received) = recording_session(ReturnCode::Accepted);
    h.register("sensors", 7);
    h.deliver(1, Message::Publish {
        flags: Flags::NONE.with_qos(QoS::AtLeastOnce),
        topic_id: 7,
        msg_id: 300,
        data: b"21.5".to_vec(),
    })
    .unwrap();

    assert_eq!(h.sent(), vec![Message::PubAck {
        topic_id: 7,
        msg_id: 300,
        return_code: ReturnCode::Accepted,
    }]);
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic_name.as_deref(), Some("sensors"));
    assert_eq!(received[0].payload, b"21.5");
}

#[test]
fn test_inbound_publish_on_unknown_topic() {
    let (mut h, received) = recording_session(ReturnCode::Accepted);
    h.deliver(1, Message::Publish {
        flags: Flags::NONE,
        topic_id: 99,
        msg_id: 0,
        data: b"x".to_vec(),
    })
    .unwrap();
    assert_eq!(h.sent(), vec![Message::PubAck {
        topic_id: 99,
        msg_id: 0,
        return_code: ReturnCode::InvalidTopicId,
    }]);
    assert!(received.lock().unwrap().is_empty());
}

#[test]
fn test_inbound_qos0_accepted_sends_nothing() {
    let (mut h, received) = recording_session(ReturnCode::Accepted);
    h.deliver(1, Message::Publish {
        flags: Flags::NONE.with_topic_id_type(TopicIdType::Predefined),
        topic_id: 5,
        msg_id: 0,
        data: b"x".to_vec(),
    })
    .unwrap();
    assert!(h.sent().is_empty());
    assert_eq!(received.lock().unwrap()[0].topic_id_type, TopicIdType::Predefined);
}

#[test]
fn test_inbound_qos1_rejected_by_handler() {
    let (mut h, _received) = recording_session(ReturnCode::Congestion);
    h.deliver(1, Message::Publish {
        flags: Flags::NONE
            .with_qos(QoS::AtLeastOnce)
            .with_topic_id_type(TopicIdType::Short),
        topic_id: u16::from_be_bytes(*b"ab"),
        msg_id: 8,
        data: Vec::new(),
    })
    .unwrap();
    assert_eq!(h.sent(), vec![Message::PubAck {
        topic_id: 0x6162,
        msg_id: 8,
        return_code: ReturnCode::Congestion,
    }]);
}

#[test]
fn test_inbound_qos2_exchange() {
    let (mut h, received) = recording_session(ReturnCode::Accepted);
    let publish = Message::Publish {
        flags: Flags::NONE
            .with_qos(QoS::ExactlyOnce)
            .with_topic_id_type(TopicIdType::Predefined),
        topic_id: 5,
        msg_id: 77,
        data: b"once".to_vec(),
    };
    h.deliver(1, publish.clone()).unwrap();
    assert_eq!(h.sent(), vec![Message::PubRec { msg_id: 77 }]);

    // A duplicate before PUBREL is acknowledged again but not delivered
    h.deliver(2, publish).unwrap();
    assert_eq!(h.sent(), vec![Message::PubRec { msg_id: 77 }]);
    assert_eq!(received.lock().unwrap().len(), 1);

    h.deliver(3, Message::PubRel { msg_id: 77 }).unwrap();
    assert_eq!(h.sent(), vec![Message::PubComp { msg_id: 77 }]);
}

#[test]
fn test_gateway_ping_is_answered() {
    let mut h = Harness::connected();
    h.deliver(1, Message::PingReq { client_id: None }).unwrap();
    assert_eq!(h.sent(), vec![Message::PingResp]);
}

// =============================================================================
// Keep-alive and disconnect
// =============================================================================

#[test]
fn test_keep_alive_ping_and_response() {
    let mut h = Harness::connected();
    assert_eq!(h.session.poll_timeout(), Some(h.at(30)));

    h.tick(29);
    assert!(h.sent().is_empty());
    h.tick(30);
    assert_eq!(h.sent(), vec![Message::PingReq { client_id: None }]);

    h.deliver(31, Message::PingResp).unwrap();
    h.tick(60);
    assert_eq!(h.session.state(), SessionState::Connected);
}

#[test]
fn test_keep_alive_loss_fails_pending_requests() {
    let mut h = Harness::connected();
    h.register("sensors", 7);

    h.tick(30);
    assert_eq!(h.sent(), vec![Message::PingReq { client_id: None }]);

    let now = h.at(40);
    let mut first = h
        .session
        .publish(Topic::Normal(7), "a", QoS::AtLeastOnce, false, now);
    let mut second = h
        .session
        .publish(Topic::Normal(7), "b", QoS::AtLeastOnce, false, now);
    assert_eq!(h.sent().len(), 2);

    h.tick(50);
    assert_eq!(h.sent().len(), 2);
    h.tick(59);
    assert_eq!(h.session.state(), SessionState::Connected);

    h.tick(60);
    assert_eq!(h.session.state(), SessionState::Lost);
    let lost = Some(Err(RequestError::Disconnected(
        DisconnectReason::KeepAliveTimeout,
    )));
    assert_eq!(first.try_outcome(), lost);
    assert_eq!(second.try_outcome(), lost);
    assert_eq!(h.session.pending_requests(), 0);
    assert!(h.session.topics().is_empty());
    assert!(h.sent().is_empty());
    assert_eq!(h.events(), vec![
        Event::StateChanged {
            previous: SessionState::Connected,
            current: SessionState::Lost,
        },
        Event::Disconnected(DisconnectReason::KeepAliveTimeout),
    ]);
}

#[test]
fn test_keep_alive_disabled() {
    let mut h = Harness::connected_with(
        ConnectConfig::builder("sensor-1")
            .gateway(gateway())
            .keep_alive(Duration::ZERO)
            .build()
            .unwrap(),
    );
    assert_eq!(h.session.poll_timeout(), None);
    h.tick(3600);
    assert!(h.sent().is_empty());
    assert_eq!(h.session.state(), SessionState::Connected);
}

#[test]
fn test_reconnect_after_loss() {
    let mut h = Harness::connected();
    h.register("sensors", 7);
    h.tick(30);
    h.tick(60);
    h.sent();
    assert_eq!(h.session.state(), SessionState::Lost);
    let generation = h.session.topics().generation();

    let now = h.at(61);
    let mut connect = h.session.connect(Harness::config(), now);
    h.deliver(61, Message::ConnAck {
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(connect.try_outcome(), Some(Ok(())));
    assert!(h.session.topics().generation() > generation);

    // Ids from the old session are gone
    let now = h.at(62);
    let mut stale = h
        .session
        .publish(Topic::Normal(7), "x", QoS::AtLeastOnce, false, now);
    assert_eq!(
        stale.try_outcome(),
        Some(Err(RequestError::UnregisteredTopic(7)))
    );
}

#[test]
fn test_client_disconnect() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut pending = h.session.subscribe("a/b", QoS::AtMostOnce, now);
    h.sent();

    let now = h.at(2);
    h.session.disconnect(now);
    assert_eq!(h.sent(), vec![Message::Disconnect { duration: None }]);
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert_eq!(
        pending.try_outcome(),
        Some(Err(RequestError::Disconnected(DisconnectReason::Client)))
    );
    assert!(h.events().contains(&Event::Disconnected(DisconnectReason::Client)));

    // Nothing left to retransmit
    h.tick(100);
    assert!(h.sent().is_empty());
}

#[test]
fn test_server_disconnect() {
    let mut h = Harness::connected();
    let now = h.at(1);
    let mut pending = h.session.register("a", now);
    h.sent();

    h.deliver(2, Message::Disconnect { duration: None }).unwrap();
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert_eq!(
        pending.try_outcome(),
        Some(Err(RequestError::Disconnected(DisconnectReason::Server)))
    );
    assert!(h.events().contains(&Event::Disconnected(DisconnectReason::Server)));
}

// =============================================================================
// Will updates
// =============================================================================

#[test]
fn test_will_updates() {
    let mut h = Harness::connected_with(
        ConnectConfig::builder("sensor-1")
            .gateway(gateway())
            .will(Will::new("status", "gone"))
            .build()
            .unwrap(),
    );
    let now = h.at(1);
    let mut topic = h
        .session
        .update_will_topic("status/new", QoS::AtLeastOnce, false, now);
    let mut busy = h.session.update_will_topic("other", QoS::AtMostOnce, false, now);
    assert_eq!(busy.try_outcome(), Some(Err(RequestError::TooManyInFlight)));
    assert_eq!(h.sent(), vec![Message::WillTopicUpd {
        will: Some(WillTopicField {
            flags: Flags::NONE.with_qos(QoS::AtLeastOnce),
            topic: "status/new".into(),
        }),
    }]);
    h.deliver(2, Message::WillTopicResp {
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(topic.try_outcome(), Some(Ok(())));

    let now = h.at(3);
    let mut message = h.session.update_will_message("bye", now);
    assert_eq!(h.sent(), vec![Message::WillMsgUpd {
        message: b"bye".to_vec()
    }]);
    h.deliver(4, Message::WillMsgResp {
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(message.try_outcome(), Some(Ok(())));

    let will = h.session.config().and_then(|c| c.will.clone()).unwrap();
    assert_eq!(will.topic, "status/new");
    assert_eq!(will.message, b"bye");
    assert_eq!(will.qos, QoS::AtLeastOnce);

    let now = h.at(5);
    let mut cleared = h.session.clear_will(now);
    assert_eq!(h.sent(), vec![Message::WillTopicUpd { will: None }]);
    h.deliver(6, Message::WillTopicResp {
        return_code: ReturnCode::Accepted,
    })
    .unwrap();
    assert_eq!(cleared.try_outcome(), Some(Ok(())));
    assert!(h.session.config().unwrap().will.is_none());
}

// =============================================================================
// Gateway discovery
// =============================================================================

#[test]
fn test_search_gateway() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut search = h.session.search_gateway(group(), 3, now);
    assert_eq!(h.session.state(), SessionState::Searching);
    let sent = h.sent_raw();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, group());
    assert_eq!(sent[0].hop_limit, Some(3));
    assert_eq!(
        Message::decode(&sent[0].contents).unwrap(),
        Message::SearchGw { radius: 3 }
    );

    let frame = Message::GwInfo {
        gw_id: 1,
        gw_addr: Vec::new(),
    }
    .encode()
    .unwrap();
    let now = h.at(1);
    h.session.handle_datagram(now, gateway(), &frame).unwrap();

    let found = GatewayInfo {
        gateway_id: 1,
        address: gateway(),
    };
    assert_eq!(search.try_outcome(), Some(Ok(found)));
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(h.events().contains(&Event::GatewayFound(found)));
}

#[test]
fn test_second_search_supersedes_first() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut first = h.session.search_gateway(group(), 1, now);
    let now = h.at_millis(50);
    let mut second = h.session.search_gateway(group(), 1, now);
    assert_eq!(h.sent().len(), 2);

    let frame = Message::GwInfo {
        gw_id: 4,
        gw_addr: Vec::new(),
    }
    .encode()
    .unwrap();
    let now = h.at(1);
    h.session.handle_datagram(now, gateway(), &frame).unwrap();

    assert!(first.is_abandoned());
    assert!(first.try_outcome().is_none());
    assert_eq!(
        second.try_outcome().map(|outcome| outcome.map(|gw| gw.gateway_id)),
        Some(Ok(4))
    );
}

#[test]
fn test_connect_supersedes_search() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut search = h.session.search_gateway(group(), 1, now);
    let _connect = h.session.connect(Harness::config(), now);
    assert_eq!(h.session.state(), SessionState::Connecting);
    assert_eq!(
        search.try_outcome(),
        Some(Err(RequestError::Disconnected(DisconnectReason::Superseded)))
    );
}

#[test]
fn test_cancel_search() {
    let mut h = Harness::new();
    let now = h.at(0);
    let mut search = h.session.search_gateway(group(), 1, now);
    assert!(h.session.cancel_search());
    assert_eq!(search.try_outcome(), Some(Err(RequestError::Timeout)));
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(!h.session.cancel_search());
}

#[test]
fn test_advertise_is_recorded() {
    let mut h = Harness::new();
    let frame = Message::Advertise {
        gw_id: 2,
        duration: 900,
    }
    .encode()
    .unwrap();
    let from: SocketAddr = "10.0.0.5:10000".parse().unwrap();
    let now = h.at(0);
    h.session.handle_datagram(now, from, &frame).unwrap();

    let ad = h.session.discovery().advertisement(2).copied().unwrap();
    assert_eq!(ad.gateway.address, from);
    assert_eq!(ad.duration, Duration::from_secs(900));
    assert_eq!(h.events(), vec![Event::GatewayAdvertised(ad)]);
}

// =============================================================================
// Malformed and foreign input
// =============================================================================

#[test]
fn test_truncated_frame_changes_nothing() {
    let mut h = Harness::connected();
    h.register("sensors", 7);
    let now = h.at(1);
    let _pending = h
        .session
        .publish(Topic::Normal(7), "x", QoS::AtLeastOnce, false, now);
    h.sent();

    // Declares eight octets, carries three
    let now = h.at(2);
    let result = h.session.handle_datagram(now, gateway(), &[0x08, 0x05, 0x00]);
    assert!(matches!(
        result,
        Err(TransportError::Frame(FrameError::LengthMismatch {
            declared: 8,
            actual: 3,
        }))
    ));
    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.session.pending_requests(), 1);
    assert_eq!(h.session.topics().resolve("sensors"), Some(7));
    assert!(h.sent().is_empty());
    assert!(h.events().is_empty());
}

#[test]
fn test_foreign_source_is_dropped() {
    let mut h = Harness::connected();
    let frame = Message::Disconnect { duration: None }.encode().unwrap();
    let stranger: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    let now = h.at(1);
    let result = h.session.handle_datagram(now, stranger, &frame);
    assert!(matches!(result, Err(TransportError::ForeignSource(_))));
    assert_eq!(h.session.state(), SessionState::Connected);
}

#[test]
fn test_flush_through_transport() {
    let mut h = Harness::new();
    let now = h.at(0);
    let _search = h.session.search_gateway(group(), 2, now);
    let mut sent: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
    h.session.flush(&mut sent);
    assert_eq!(sent, vec![(group(), vec![0x03, 0x01, 0x02])]);
    assert!(h.session.poll_transmit().is_none());
}
