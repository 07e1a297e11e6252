//! MQTT-SN v1.2 message encoding and decoding.
//!
//! Every frame has the same outer shape:
//!
//! ```text
//! ┌──────────────────┬──────┬──────────────────┐
//! │ Length (1 or 3)  │ Type │ Body             │
//! └──────────────────┴──────┴──────────────────┘
//! ```
//!
//! Length counts the whole frame including itself. Frames up to 255 bytes use
//! a single length octet; larger frames use `0x01` followed by a big-endian
//! u16. Numeric fields are big-endian, strings are not terminated and run to
//! the end of the frame.

use std::fmt;

use super::error::FrameError;
use crate::core::constants::{
    EXTENDED_LENGTH_MARKER, LONG_HEADER_SIZE, MAX_FRAME_SIZE, MAX_SHORT_FRAME_SIZE, PROTOCOL_ID,
    SHORT_HEADER_SIZE,
};

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Periodic gateway beacon.
    Advertise = 0x00,
    /// Gateway search request.
    SearchGw = 0x01,
    /// Gateway search response.
    GwInfo = 0x02,
    /// Session setup.
    Connect = 0x04,
    /// Session setup response.
    ConnAck = 0x05,
    /// Gateway asks for the will topic.
    WillTopicReq = 0x06,
    /// Will topic.
    WillTopic = 0x07,
    /// Gateway asks for the will message.
    WillMsgReq = 0x08,
    /// Will message.
    WillMsg = 0x09,
    /// Topic name registration.
    Register = 0x0A,
    /// Registration response.
    RegAck = 0x0B,
    /// Application message.
    Publish = 0x0C,
    /// QoS 1 acknowledgment or rejection.
    PubAck = 0x0D,
    /// QoS 2 completion.
    PubComp = 0x0E,
    /// QoS 2 receipt.
    PubRec = 0x0F,
    /// QoS 2 release.
    PubRel = 0x10,
    /// Subscription request.
    Subscribe = 0x12,
    /// Subscription response.
    SubAck = 0x13,
    /// Unsubscription request.
    Unsubscribe = 0x14,
    /// Unsubscription response.
    UnsubAck = 0x15,
    /// Keep-alive probe.
    PingReq = 0x16,
    /// Keep-alive response.
    PingResp = 0x17,
    /// Session end.
    Disconnect = 0x18,
    /// Will topic update.
    WillTopicUpd = 0x1A,
    /// Will topic update response.
    WillTopicResp = 0x1B,
    /// Will message update.
    WillMsgUpd = 0x1C,
    /// Will message update response.
    WillMsgResp = 0x1D,
}

impl MsgType {
    /// Parse a message type from its octet.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let msg_type = match byte {
            0x00 => Self::Advertise,
            0x01 => Self::SearchGw,
            0x02 => Self::GwInfo,
            0x04 => Self::Connect,
            0x05 => Self::ConnAck,
            0x06 => Self::WillTopicReq,
            0x07 => Self::WillTopic,
            0x08 => Self::WillMsgReq,
            0x09 => Self::WillMsg,
            0x0A => Self::Register,
            0x0B => Self::RegAck,
            0x0C => Self::Publish,
            0x0D => Self::PubAck,
            0x0E => Self::PubComp,
            0x0F => Self::PubRec,
            0x10 => Self::PubRel,
            0x12 => Self::Subscribe,
            0x13 => Self::SubAck,
            0x14 => Self::Unsubscribe,
            0x15 => Self::UnsubAck,
            0x16 => Self::PingReq,
            0x17 => Self::PingResp,
            0x18 => Self::Disconnect,
            0x1A => Self::WillTopicUpd,
            0x1B => Self::WillTopicResp,
            0x1C => Self::WillMsgUpd,
            0x1D => Self::WillMsgResp,
            _ => return None,
        };
        Some(msg_type)
    }

    /// The type octet.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Protocol name of the message type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Advertise => "ADVERTISE",
            Self::SearchGw => "SEARCHGW",
            Self::GwInfo => "GWINFO",
            Self::Connect => "CONNECT",
            Self::ConnAck => "CONNACK",
            Self::WillTopicReq => "WILLTOPICREQ",
            Self::WillTopic => "WILLTOPIC",
            Self::WillMsgReq => "WILLMSGREQ",
            Self::WillMsg => "WILLMSG",
            Self::Register => "REGISTER",
            Self::RegAck => "REGACK",
            Self::Publish => "PUBLISH",
            Self::PubAck => "PUBACK",
            Self::PubComp => "PUBCOMP",
            Self::PubRec => "PUBREC",
            Self::PubRel => "PUBREL",
            Self::Subscribe => "SUBSCRIBE",
            Self::SubAck => "SUBACK",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::UnsubAck => "UNSUBACK",
            Self::PingReq => "PINGREQ",
            Self::PingResp => "PINGRESP",
            Self::Disconnect => "DISCONNECT",
            Self::WillTopicUpd => "WILLTOPICUPD",
            Self::WillTopicResp => "WILLTOPICRESP",
            Self::WillMsgUpd => "WILLMSGUPD",
            Self::WillMsgResp => "WILLMSGRESP",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    /// Acknowledged delivery.
    AtLeastOnce = 1,
    /// Four-way handshake delivery.
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse the two QoS flag bits. `0b11` (QoS -1) yields `None`.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x03 {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// The two QoS flag bits.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// How a topic id field is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopicIdType {
    /// Id assigned by the gateway through REGISTER/REGACK or SUBACK.
    #[default]
    Normal = 0,
    /// Id agreed in advance between client and gateway.
    Predefined = 1,
    /// Two-character topic name carried in place of an id.
    Short = 2,
}

impl TopicIdType {
    /// Parse the two topic id type bits. `0b11` is reserved.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x03 {
            0 => Some(Self::Normal),
            1 => Some(Self::Predefined),
            2 => Some(Self::Short),
            _ => None,
        }
    }

    /// The two flag bits.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// The flags octet of CONNECT, PUBLISH, SUBSCRIBE and friends.
///
/// ```text
///   7     6   5      4       3        2          1   0
/// ┌─────┬───────┬────────┬──────┬──────────────┬───────────────┐
/// │ DUP │  QoS  │ Retain │ Will │ CleanSession │ TopicIdType   │
/// └─────┴───────┴────────┴──────┴──────────────┴───────────────┘
/// ```
///
/// The raw octet is kept as received so frames re-encode byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    const DUP: u8 = 0x80;
    const QOS_MASK: u8 = 0x60;
    const QOS_SHIFT: u8 = 5;
    const RETAIN: u8 = 0x10;
    const WILL: u8 = 0x08;
    const CLEAN_SESSION: u8 = 0x04;
    const TOPIC_ID_TYPE_MASK: u8 = 0x03;

    /// Create flags from a raw octet.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// The raw octet.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Message is a retransmission.
    pub fn dup(self) -> bool {
        self.0 & Self::DUP != 0
    }

    /// QoS level, `None` for QoS -1.
    pub fn qos(self) -> Option<QoS> {
        QoS::from_bits((self.0 & Self::QOS_MASK) >> Self::QOS_SHIFT)
    }

    /// Retain flag.
    pub fn retain(self) -> bool {
        self.0 & Self::RETAIN != 0
    }

    /// Will flag (CONNECT only).
    pub fn will(self) -> bool {
        self.0 & Self::WILL != 0
    }

    /// Clean session flag (CONNECT only).
    pub fn clean_session(self) -> bool {
        self.0 & Self::CLEAN_SESSION != 0
    }

    /// Topic id type, `None` for the reserved value.
    pub fn topic_id_type(self) -> Option<TopicIdType> {
        TopicIdType::from_bits(self.0 & Self::TOPIC_ID_TYPE_MASK)
    }

    /// Set or clear the DUP flag.
    pub fn with_dup(self, dup: bool) -> Self {
        self.set(Self::DUP, dup)
    }

    /// Set the QoS level.
    pub fn with_qos(self, qos: QoS) -> Self {
        Self((self.0 & !Self::QOS_MASK) | (qos.bits() << Self::QOS_SHIFT))
    }

    /// Set or clear the retain flag.
    pub fn with_retain(self, retain: bool) -> Self {
        self.set(Self::RETAIN, retain)
    }

    /// Set or clear the will flag.
    pub fn with_will(self, will: bool) -> Self {
        self.set(Self::WILL, will)
    }

    /// Set or clear the clean session flag.
    pub fn with_clean_session(self, clean: bool) -> Self {
        self.set(Self::CLEAN_SESSION, clean)
    }

    /// Set the topic id type.
    pub fn with_topic_id_type(self, kind: TopicIdType) -> Self {
        Self((self.0 & !Self::TOPIC_ID_TYPE_MASK) | kind.bits())
    }

    fn set(self, bit: u8, on: bool) -> Self {
        if on { Self(self.0 | bit) } else { Self(self.0 & !bit) }
    }
}

/// Return codes carried by CONNACK, REGACK, PUBACK, SUBACK and the will
/// update responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// Accepted.
    Accepted,
    /// Rejected: congestion.
    Congestion,
    /// Rejected: invalid topic id.
    InvalidTopicId,
    /// Rejected: not supported.
    NotSupported,
    /// Any other value, kept so the frame round-trips.
    Other(u8),
}

impl ReturnCode {
    /// Parse a return code octet.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Accepted,
            0x01 => Self::Congestion,
            0x02 => Self::InvalidTopicId,
            0x03 => Self::NotSupported,
            other => Self::Other(other),
        }
    }

    /// The return code octet.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Accepted => 0x00,
            Self::Congestion => 0x01,
            Self::InvalidTopicId => 0x02,
            Self::NotSupported => 0x03,
            Self::Other(byte) => byte,
        }
    }

    /// True for [`ReturnCode::Accepted`].
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::Congestion => f.write_str("congestion"),
            Self::InvalidTopicId => f.write_str("invalid topic id"),
            Self::NotSupported => f.write_str("not supported"),
            Self::Other(byte) => write!(f, "return code {byte:#04x}"),
        }
    }
}

/// Topic field of SUBSCRIBE and UNSUBSCRIBE.
///
/// The variant decides the topic id type bits of the flags on encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicField {
    /// Full topic name or filter.
    Name(String),
    /// Predefined topic id.
    Predefined(u16),
    /// Two-character short topic name.
    Short([u8; 2]),
}

impl TopicField {
    /// The topic id type this field encodes as.
    pub fn id_type(&self) -> TopicIdType {
        match self {
            Self::Name(_) => TopicIdType::Normal,
            Self::Predefined(_) => TopicIdType::Predefined,
            Self::Short(_) => TopicIdType::Short,
        }
    }
}

/// Will topic carried by WILLTOPIC and WILLTOPICUPD.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WillTopicField {
    /// QoS and retain bits of the will.
    pub flags: Flags,
    /// Will topic name.
    pub topic: String,
}

/// A decoded MQTT-SN message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// ADVERTISE.
    Advertise {
        /// Gateway id.
        gw_id: u8,
        /// Seconds until the next advertisement.
        duration: u16,
    },
    /// SEARCHGW.
    SearchGw {
        /// Broadcast radius in hops.
        radius: u8,
    },
    /// GWINFO.
    GwInfo {
        /// Gateway id.
        gw_id: u8,
        /// Gateway address, empty when sent by the gateway itself.
        gw_addr: Vec<u8>,
    },
    /// CONNECT.
    Connect {
        /// Will and clean session flags.
        flags: Flags,
        /// Keep-alive in seconds.
        duration: u16,
        /// Client identifier.
        client_id: String,
    },
    /// CONNACK.
    ConnAck {
        /// Result of the connect.
        return_code: ReturnCode,
    },
    /// WILLTOPICREQ.
    WillTopicReq,
    /// WILLTOPIC. `None` is the empty form that deletes the will.
    WillTopic {
        /// Will topic, if any.
        will: Option<WillTopicField>,
    },
    /// WILLMSGREQ.
    WillMsgReq,
    /// WILLMSG.
    WillMsg {
        /// Will payload.
        message: Vec<u8>,
    },
    /// REGISTER.
    Register {
        /// Zero from a client, the assigned id from a gateway.
        topic_id: u16,
        /// Message id.
        msg_id: u16,
        /// Topic name.
        topic_name: String,
    },
    /// REGACK.
    RegAck {
        /// Assigned topic id.
        topic_id: u16,
        /// Message id of the REGISTER.
        msg_id: u16,
        /// Result of the registration.
        return_code: ReturnCode,
    },
    /// PUBLISH.
    Publish {
        /// DUP, QoS, retain and topic id type.
        flags: Flags,
        /// Topic id, or the two bytes of a short topic name.
        topic_id: u16,
        /// Message id, zero for QoS 0.
        msg_id: u16,
        /// Payload.
        data: Vec<u8>,
    },
    /// PUBACK.
    PubAck {
        /// Topic id of the PUBLISH.
        topic_id: u16,
        /// Message id of the PUBLISH.
        msg_id: u16,
        /// Result of the publish.
        return_code: ReturnCode,
    },
    /// PUBCOMP.
    PubComp {
        /// Message id.
        msg_id: u16,
    },
    /// PUBREC.
    PubRec {
        /// Message id.
        msg_id: u16,
    },
    /// PUBREL.
    PubRel {
        /// Message id.
        msg_id: u16,
    },
    /// SUBSCRIBE.
    Subscribe {
        /// DUP and QoS; topic id type follows `topic`.
        flags: Flags,
        /// Message id.
        msg_id: u16,
        /// Topic to subscribe to.
        topic: TopicField,
    },
    /// SUBACK.
    SubAck {
        /// Granted QoS.
        flags: Flags,
        /// Assigned topic id, zero for wildcard filters.
        topic_id: u16,
        /// Message id of the SUBSCRIBE.
        msg_id: u16,
        /// Result of the subscription.
        return_code: ReturnCode,
    },
    /// UNSUBSCRIBE.
    Unsubscribe {
        /// Topic id type follows `topic`.
        flags: Flags,
        /// Message id.
        msg_id: u16,
        /// Topic to drop.
        topic: TopicField,
    },
    /// UNSUBACK.
    UnsubAck {
        /// Message id of the UNSUBSCRIBE.
        msg_id: u16,
    },
    /// PINGREQ.
    PingReq {
        /// Only sent by sleeping clients.
        client_id: Option<String>,
    },
    /// PINGRESP.
    PingResp,
    /// DISCONNECT.
    Disconnect {
        /// Sleep duration, only sent by sleeping clients.
        duration: Option<u16>,
    },
    /// WILLTOPICUPD. `None` deletes the will.
    WillTopicUpd {
        /// New will topic, if any.
        will: Option<WillTopicField>,
    },
    /// WILLTOPICRESP.
    WillTopicResp {
        /// Result of the update.
        return_code: ReturnCode,
    },
    /// WILLMSGUPD.
    WillMsgUpd {
        /// New will payload.
        message: Vec<u8>,
    },
    /// WILLMSGRESP.
    WillMsgResp {
        /// Result of the update.
        return_code: ReturnCode,
    },
}

impl Message {
    /// Type of this message.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Advertise { .. } => MsgType::Advertise,
            Self::SearchGw { .. } => MsgType::SearchGw,
            Self::GwInfo { .. } => MsgType::GwInfo,
            Self::Connect { .. } => MsgType::Connect,
            Self::ConnAck { .. } => MsgType::ConnAck,
            Self::WillTopicReq => MsgType::WillTopicReq,
            Self::WillTopic { .. } => MsgType::WillTopic,
            Self::WillMsgReq => MsgType::WillMsgReq,
            Self::WillMsg { .. } => MsgType::WillMsg,
            Self::Register { .. } => MsgType::Register,
            Self::RegAck { .. } => MsgType::RegAck,
            Self::Publish { .. } => MsgType::Publish,
            Self::PubAck { .. } => MsgType::PubAck,
            Self::PubComp { .. } => MsgType::PubComp,
            Self::PubRec { .. } => MsgType::PubRec,
            Self::PubRel { .. } => MsgType::PubRel,
            Self::Subscribe { .. } => MsgType::Subscribe,
            Self::SubAck { .. } => MsgType::SubAck,
            Self::Unsubscribe { .. } => MsgType::Unsubscribe,
            Self::UnsubAck { .. } => MsgType::UnsubAck,
            Self::PingReq { .. } => MsgType::PingReq,
            Self::PingResp => MsgType::PingResp,
            Self::Disconnect { .. } => MsgType::Disconnect,
            Self::WillTopicUpd { .. } => MsgType::WillTopicUpd,
            Self::WillTopicResp { .. } => MsgType::WillTopicResp,
            Self::WillMsgUpd { .. } => MsgType::WillMsgUpd,
            Self::WillMsgResp { .. } => MsgType::WillMsgResp,
        }
    }

    /// Encode into a complete frame.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut body = Vec::new();
        self.encode_body(&mut body);

        let short_len = body.len() + SHORT_HEADER_SIZE;
        let mut frame;
        if short_len <= MAX_SHORT_FRAME_SIZE {
            frame = Vec::with_capacity(short_len);
            frame.push(short_len as u8);
        } else {
            let long_len = body.len() + LONG_HEADER_SIZE;
            if long_len > MAX_FRAME_SIZE {
                return Err(FrameError::TooLarge(long_len));
            }
            frame = Vec::with_capacity(long_len);
            frame.push(EXTENDED_LENGTH_MARKER);
            frame.extend_from_slice(&(long_len as u16).to_be_bytes());
        }
        frame.push(self.msg_type().as_byte());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one complete frame. The buffer must hold exactly the frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < SHORT_HEADER_SIZE {
            return Err(FrameError::TooShort);
        }

        let (declared, header_len) = if bytes[0] == EXTENDED_LENGTH_MARKER {
            if bytes.len() < LONG_HEADER_SIZE {
                return Err(FrameError::TooShort);
            }
            let declared = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
            (declared, LONG_HEADER_SIZE)
        } else {
            (bytes[0] as usize, SHORT_HEADER_SIZE)
        };

        if declared != bytes.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        // The long form is only valid when the body would not fit the short one.
        if header_len == LONG_HEADER_SIZE
            && declared - LONG_HEADER_SIZE + SHORT_HEADER_SIZE <= MAX_SHORT_FRAME_SIZE
        {
            return Err(FrameError::NonCanonicalLength);
        }

        let type_byte = bytes[header_len - 1];
        let msg_type = MsgType::from_byte(type_byte).ok_or(FrameError::UnknownType(type_byte))?;
        let mut body = Reader::new(msg_type, &bytes[header_len..]);

        let message = match msg_type {
            MsgType::Advertise => Self::Advertise {
                gw_id: body.u8()?,
                duration: body.u16()?,
            },
            MsgType::SearchGw => Self::SearchGw { radius: body.u8()? },
            MsgType::GwInfo => Self::GwInfo {
                gw_id: body.u8()?,
                gw_addr: body.rest().to_vec(),
            },
            MsgType::Connect => {
                let flags = Flags::from_byte(body.u8()?);
                let protocol_id = body.u8()?;
                if protocol_id != PROTOCOL_ID {
                    return Err(FrameError::UnsupportedProtocol(protocol_id));
                }
                Self::Connect {
                    flags,
                    duration: body.u16()?,
                    client_id: body.string()?,
                }
            }
            MsgType::ConnAck => Self::ConnAck {
                return_code: body.return_code()?,
            },
            MsgType::WillTopicReq => Self::WillTopicReq,
            MsgType::WillTopic => Self::WillTopic {
                will: body.will_topic()?,
            },
            MsgType::WillMsgReq => Self::WillMsgReq,
            MsgType::WillMsg => Self::WillMsg {
                message: body.rest().to_vec(),
            },
            MsgType::Register => Self::Register {
                topic_id: body.u16()?,
                msg_id: body.u16()?,
                topic_name: body.string()?,
            },
            MsgType::RegAck => Self::RegAck {
                topic_id: body.u16()?,
                msg_id: body.u16()?,
                return_code: body.return_code()?,
            },
            MsgType::Publish => Self::Publish {
                flags: Flags::from_byte(body.u8()?),
                topic_id: body.u16()?,
                msg_id: body.u16()?,
                data: body.rest().to_vec(),
            },
            MsgType::PubAck => Self::PubAck {
                topic_id: body.u16()?,
                msg_id: body.u16()?,
                return_code: body.return_code()?,
            },
            MsgType::PubComp => Self::PubComp { msg_id: body.u16()? },
            MsgType::PubRec => Self::PubRec { msg_id: body.u16()? },
            MsgType::PubRel => Self::PubRel { msg_id: body.u16()? },
            MsgType::Subscribe => {
                let flags = Flags::from_byte(body.u8()?);
                Self::Subscribe {
                    flags,
                    msg_id: body.u16()?,
                    topic: body.topic_field(flags)?,
                }
            }
            MsgType::SubAck => Self::SubAck {
                flags: Flags::from_byte(body.u8()?),
                topic_id: body.u16()?,
                msg_id: body.u16()?,
                return_code: body.return_code()?,
            },
            MsgType::Unsubscribe => {
                let flags = Flags::from_byte(body.u8()?);
                Self::Unsubscribe {
                    flags,
                    msg_id: body.u16()?,
                    topic: body.topic_field(flags)?,
                }
            }
            MsgType::UnsubAck => Self::UnsubAck { msg_id: body.u16()? },
            MsgType::PingReq => Self::PingReq {
                client_id: if body.is_empty() {
                    None
                } else {
                    Some(body.string()?)
                },
            },
            MsgType::PingResp => Self::PingResp,
            MsgType::Disconnect => Self::Disconnect {
                duration: if body.is_empty() {
                    None
                } else {
                    Some(body.u16()?)
                },
            },
            MsgType::WillTopicUpd => Self::WillTopicUpd {
                will: body.will_topic()?,
            },
            MsgType::WillTopicResp => Self::WillTopicResp {
                return_code: body.return_code()?,
            },
            MsgType::WillMsgUpd => Self::WillMsgUpd {
                message: body.rest().to_vec(),
            },
            MsgType::WillMsgResp => Self::WillMsgResp {
                return_code: body.return_code()?,
            },
        };

        body.finish()?;
        Ok(message)
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            Self::Advertise { gw_id, duration } => {
                out.push(*gw_id);
                out.extend_from_slice(&duration.to_be_bytes());
            }
            Self::SearchGw { radius } => out.push(*radius),
            Self::GwInfo { gw_id, gw_addr } => {
                out.push(*gw_id);
                out.extend_from_slice(gw_addr);
            }
            Self::Connect {
                flags,
                duration,
                client_id,
            } => {
                out.push(flags.as_byte());
                out.push(PROTOCOL_ID);
                out.extend_from_slice(&duration.to_be_bytes());
                out.extend_from_slice(client_id.as_bytes());
            }
            Self::ConnAck { return_code }
            | Self::WillTopicResp { return_code }
            | Self::WillMsgResp { return_code } => out.push(return_code.as_byte()),
            Self::WillTopicReq | Self::WillMsgReq | Self::PingResp => {}
            Self::WillTopic { will } | Self::WillTopicUpd { will } => {
                if let Some(will) = will {
                    out.push(will.flags.as_byte());
                    out.extend_from_slice(will.topic.as_bytes());
                }
            }
            Self::WillMsg { message } | Self::WillMsgUpd { message } => {
                out.extend_from_slice(message)
            }
            Self::Register {
                topic_id,
                msg_id,
                topic_name,
            } => {
                out.extend_from_slice(&topic_id.to_be_bytes());
                out.extend_from_slice(&msg_id.to_be_bytes());
                out.extend_from_slice(topic_name.as_bytes());
            }
            Self::RegAck {
                topic_id,
                msg_id,
                return_code,
            }
            | Self::PubAck {
                topic_id,
                msg_id,
                return_code,
            } => {
                out.extend_from_slice(&topic_id.to_be_bytes());
                out.extend_from_slice(&msg_id.to_be_bytes());
                out.push(return_code.as_byte());
            }
            Self::Publish {
                flags,
                topic_id,
                msg_id,
                data,
            } => {
                out.push(flags.as_byte());
                out.extend_from_slice(&topic_id.to_be_bytes());
                out.extend_from_slice(&msg_id.to_be_bytes());
                out.extend_from_slice(data);
            }
            Self::PubComp { msg_id }
            | Self::PubRec { msg_id }
            | Self::PubRel { msg_id }
            | Self::UnsubAck { msg_id } => out.extend_from_slice(&msg_id.to_be_bytes()),
            Self::Subscribe {
                flags,
                msg_id,
                topic,
            }
            | Self::Unsubscribe {
                flags,
                msg_id,
                topic,
            } => {
                out.push(flags.with_topic_id_type(topic.id_type()).as_byte());
                out.extend_from_slice(&msg_id.to_be_bytes());
                match topic {
                    TopicField::Name(name) => out.extend_from_slice(name.as_bytes()),
                    TopicField::Predefined(id) => out.extend_from_slice(&id.to_be_bytes()),
                    TopicField::Short(name) => out.extend_from_slice(name),
                }
            }
            Self::SubAck {
                flags,
                topic_id,
                msg_id,
                return_code,
            } => {
                out.push(flags.as_byte());
                out.extend_from_slice(&topic_id.to_be_bytes());
                out.extend_from_slice(&msg_id.to_be_bytes());
                out.push(return_code.as_byte());
            }
            Self::PingReq { client_id } => {
                if let Some(id) = client_id {
                    out.extend_from_slice(id.as_bytes());
                }
            }
            Self::Disconnect { duration } => {
                if let Some(duration) = duration {
                    out.extend_from_slice(&duration.to_be_bytes());
                }
            }
        }
    }
}

/// Encode a message into a complete frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, FrameError> {
    message.encode()
}

/// Decode a complete frame.
pub fn decode(bytes: &[u8]) -> Result<Message, FrameError> {
    Message::decode(bytes)
}

/// Set the DUP flag of an encoded PUBLISH or SUBSCRIBE in place.
///
/// Returns false for frames without a DUP flag.
pub fn mark_duplicate(frame: &mut [u8]) -> bool {
    let header_len = if frame.first() == Some(&EXTENDED_LENGTH_MARKER) {
        LONG_HEADER_SIZE
    } else {
        SHORT_HEADER_SIZE
    };
    let Some(&type_byte) = frame.get(header_len - 1) else {
        return false;
    };
    if !matches!(
        MsgType::from_byte(type_byte),
        Some(MsgType::Publish | MsgType::Subscribe)
    ) {
        return false;
    }
    match frame.get_mut(header_len) {
        Some(flags) => {
            *flags |= Flags::DUP;
            true
        }
        None => false,
    }
}

/// Cursor over a frame body.
struct Reader<'a> {
    msg_type: MsgType,
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(msg_type: MsgType, buf: &'a [u8]) -> Self {
        Self { msg_type, buf }
    }

    fn malformed(&self, reason: &'static str) -> FrameError {
        FrameError::Malformed {
            msg_type: self.msg_type,
            reason,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        let buf = self.buf;
        let (&byte, rest) = buf
            .split_first()
            .ok_or_else(|| self.malformed("body truncated"))?;
        self.buf = rest;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        if self.buf.len() < 2 {
            return Err(self.malformed("body truncated"));
        }
        let (head, rest) = self.buf.split_at(2);
        self.buf = rest;
        Ok(u16::from_be_bytes([head[0], head[1]]))
    }

    fn return_code(&mut self) -> Result<ReturnCode, FrameError> {
        self.u8().map(ReturnCode::from_byte)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn string(&mut self) -> Result<String, FrameError> {
        let bytes = self.rest();
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)
    }

    fn will_topic(&mut self) -> Result<Option<WillTopicField>, FrameError> {
        if self.is_empty() {
            return Ok(None);
        }
        let flags = Flags::from_byte(self.u8()?);
        Ok(Some(WillTopicField {
            flags,
            topic: self.string()?,
        }))
    }

    fn topic_field(&mut self, flags: Flags) -> Result<TopicField, FrameError> {
        match flags.topic_id_type() {
            Some(TopicIdType::Normal) => Ok(TopicField::Name(self.string()?)),
            Some(TopicIdType::Predefined) => Ok(TopicField::Predefined(self.u16()?)),
            Some(TopicIdType::Short) => {
                let first = self.u8()?;
                let second = self.u8()?;
                Ok(TopicField::Short([first, second]))
            }
            None => Err(self.malformed("reserved topic id type")),
        }
    }

    fn finish(self) -> Result<(), FrameError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(self.malformed("trailing bytes"))
        }
    }
}
