//! Relay signaling protocol types
//!
//! Every frame on the relay connection is a JSON envelope
//! `{"type": <string>, "payload": <any>}`. The relay only forwards
//! negotiation payloads between participants; it never sees media.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Signaling envelope carried in a single text frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Message type (see [`MessageType`])
    #[serde(rename = "type")]
    pub kind: String,

    /// Type-specific payload; absent payloads decode as `null`
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope for a known message type
    pub fn new(kind: MessageType, payload: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload,
        }
    }

    /// Known message type, if any
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    /// Decode the payload into a typed structure
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Invalid {} payload: {}",
                self.kind, e
            ))
        })
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize envelope: {}", e))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize envelope: {}", e))
        })
    }
}

/// Message catalogue understood by participants and the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Relay → client, first frame on a connection: `{id}`
    Connected,
    /// Client → relay: request presence list
    GetOnlineUsers,
    /// Relay → client: `[{userId, userName}]`
    OnlineUsersList,
    /// Client → relay: `{userName}`
    JoinRoom,
    /// Client → relay: no payload
    LeaveRoom,
    /// Relay → client, roster snapshot after join: `[{userId, userName}]`
    CurrentUsers,
    /// Relay → client: `{userId, userName}`
    UserJoined,
    /// Relay → client: bare user id
    UserLeft,
    /// Both directions: `{target|sender, offer}`
    Offer,
    /// Both directions: `{target|sender, answer}`
    Answer,
    /// Both directions: `{target|sender, candidate}`
    IceCandidate,
    /// Relay → client: `{message}`
    Error,
}

impl MessageType {
    /// Every message type, in catalogue order
    pub const ALL: [MessageType; 12] = [
        MessageType::Connected,
        MessageType::GetOnlineUsers,
        MessageType::OnlineUsersList,
        MessageType::JoinRoom,
        MessageType::LeaveRoom,
        MessageType::CurrentUsers,
        MessageType::UserJoined,
        MessageType::UserLeft,
        MessageType::Offer,
        MessageType::Answer,
        MessageType::IceCandidate,
        MessageType::Error,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connected => "connected",
            MessageType::GetOnlineUsers => "get-online-users",
            MessageType::OnlineUsersList => "online-users-list",
            MessageType::JoinRoom => "join-room",
            MessageType::LeaveRoom => "leave-room",
            MessageType::CurrentUsers => "current-users",
            MessageType::UserJoined => "user-joined",
            MessageType::UserLeft => "user-left",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::IceCandidate => "ice-candidate",
            MessageType::Error => "error",
        }
    }

    /// Look up a wire name
    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == kind)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence/roster entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    #[serde(rename = "userId")]
    pub user_id: String,

    #[serde(rename = "userName")]
    pub user_name: String,
}

/// `connected` payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectedPayload {
    pub id: String,
}

/// `join-room` payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRoomPayload {
    #[serde(rename = "userName")]
    pub user_name: String,
}

/// `error` payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

/// Offer or answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Negotiation description as exchanged through the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,

    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

#[derive(Deserialize)]
struct OfferFrom {
    sender: String,
    offer: SessionDescription,
}

#[derive(Deserialize)]
struct AnswerFrom {
    sender: String,
    answer: SessionDescription,
}

#[derive(Deserialize)]
struct CandidateFrom {
    sender: String,
    candidate: IceCandidate,
}

/// Decoded relay → client message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Connected { id: String },
    OnlineUsers(Vec<UserEntry>),
    CurrentUsers(Vec<UserEntry>),
    UserJoined(UserEntry),
    UserLeft(String),
    Offer {
        sender: String,
        description: SessionDescription,
    },
    Answer {
        sender: String,
        description: SessionDescription,
    },
    IceCandidate {
        sender: String,
        candidate: IceCandidate,
    },
    Error { message: String },
}

impl InboundMessage {
    /// Decode an envelope received from the relay
    ///
    /// Client → relay types and unknown types are rejected with
    /// [`crate::Error::InvalidData`].
    pub fn from_envelope(envelope: &Envelope) -> crate::Result<Self> {
        let kind = envelope.message_type().ok_or_else(|| {
            crate::Error::InvalidData(format!("Unknown message type: {}", envelope.kind))
        })?;

        let message = match kind {
            MessageType::Connected => {
                let p: ConnectedPayload = envelope.decode()?;
                InboundMessage::Connected { id: p.id }
            }
            MessageType::OnlineUsersList => InboundMessage::OnlineUsers(envelope.decode()?),
            MessageType::CurrentUsers => InboundMessage::CurrentUsers(envelope.decode()?),
            MessageType::UserJoined => InboundMessage::UserJoined(envelope.decode()?),
            MessageType::UserLeft => InboundMessage::UserLeft(user_left_id(&envelope.payload)?),
            MessageType::Offer => {
                let p: OfferFrom = envelope.decode()?;
                InboundMessage::Offer {
                    sender: p.sender,
                    description: p.offer,
                }
            }
            MessageType::Answer => {
                let p: AnswerFrom = envelope.decode()?;
                InboundMessage::Answer {
                    sender: p.sender,
                    description: p.answer,
                }
            }
            MessageType::IceCandidate => {
                let p: CandidateFrom = envelope.decode()?;
                InboundMessage::IceCandidate {
                    sender: p.sender,
                    candidate: p.candidate,
                }
            }
            MessageType::Error => {
                let p: ErrorPayload = envelope.decode()?;
                InboundMessage::Error { message: p.message }
            }
            MessageType::GetOnlineUsers | MessageType::JoinRoom | MessageType::LeaveRoom => {
                return Err(crate::Error::InvalidData(format!(
                    "{} is not a relay message",
                    kind
                )))
            }
        };
        Ok(message)
    }
}

// The relay sends the id bare; an object form is accepted too.
fn user_left_id(payload: &Value) -> crate::Result<String> {
    match payload {
        Value::String(id) => Ok(id.clone()),
        Value::Object(map) => map
            .get("userId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::Error::InvalidData("user-left without userId".to_string())),
        other => Err(crate::Error::InvalidData(format!(
            "Invalid user-left payload: {}",
            other
        ))),
    }
}

/// Client → relay message
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    GetOnlineUsers,
    JoinRoom { user_name: String },
    LeaveRoom,
    Offer {
        target: String,
        description: SessionDescription,
    },
    Answer {
        target: String,
        description: SessionDescription,
    },
    IceCandidate {
        target: String,
        candidate: IceCandidate,
    },
}

impl OutboundMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            OutboundMessage::GetOnlineUsers => MessageType::GetOnlineUsers,
            OutboundMessage::JoinRoom { .. } => MessageType::JoinRoom,
            OutboundMessage::LeaveRoom => MessageType::LeaveRoom,
            OutboundMessage::Offer { .. } => MessageType::Offer,
            OutboundMessage::Answer { .. } => MessageType::Answer,
            OutboundMessage::IceCandidate { .. } => MessageType::IceCandidate,
        }
    }

    /// Wire payload
    pub fn payload(&self) -> Value {
        match self {
            OutboundMessage::GetOnlineUsers | OutboundMessage::LeaveRoom => Value::Null,
            OutboundMessage::JoinRoom { user_name } => json!({ "userName": user_name }),
            OutboundMessage::Offer {
                target,
                description,
            } => json!({ "target": target, "offer": description }),
            OutboundMessage::Answer {
                target,
                description,
            } => json!({ "target": target, "answer": description }),
            OutboundMessage::IceCandidate { target, candidate } => {
                json!({ "target": target, "candidate": candidate })
            }
        }
    }

    /// Peer this message is addressed to, for targeted messages
    pub fn target(&self) -> Option<&str> {
        match self {
            OutboundMessage::Offer { target, .. }
            | OutboundMessage::Answer { target, .. }
            | OutboundMessage::IceCandidate { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(self.message_type(), self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_names() {
        for kind in MessageType::ALL {
            assert_eq!(MessageType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageType::IceCandidate.as_str(), "ice-candidate");
        assert_eq!(MessageType::parse("bogus"), None);
    }

    #[test]
    fn test_envelope_missing_payload_is_null() {
        let envelope = Envelope::from_json(r#"{"type":"leave-room"}"#).unwrap();
        assert_eq!(envelope.message_type(), Some(MessageType::LeaveRoom));
        assert_eq!(envelope.payload, Value::Null);
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let err = Envelope::from_json("{not json").unwrap_err();
        assert!(matches!(err, crate::Error::SerializationError(_)));
    }

    #[test]
    fn test_decode_connected() {
        let envelope = Envelope::from_json(r#"{"type":"connected","payload":{"id":"u-1"}}"#).unwrap();
        let msg = InboundMessage::from_envelope(&envelope).unwrap();
        assert_eq!(msg, InboundMessage::Connected { id: "u-1".into() });
    }

    #[test]
    fn test_decode_roster_snapshot() {
        let json = r#"{"type":"current-users","payload":[
            {"userId":"a","userName":"Alice"},
            {"userId":"b","userName":"Bob"}
        ]}"#;
        let msg = InboundMessage::from_envelope(&Envelope::from_json(json).unwrap()).unwrap();
        match msg {
            InboundMessage::CurrentUsers(users) => {
                assert_eq!(users.len(), 2);
                assert_eq!(users[1].user_name, "Bob");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_user_left_forms() {
        let bare = Envelope::new(MessageType::UserLeft, json!("a"));
        let object = Envelope::new(MessageType::UserLeft, json!({"userId": "a"}));
        let bad = Envelope::new(MessageType::UserLeft, json!(42));

        assert_eq!(
            InboundMessage::from_envelope(&bare).unwrap(),
            InboundMessage::UserLeft("a".into())
        );
        assert_eq!(
            InboundMessage::from_envelope(&object).unwrap(),
            InboundMessage::UserLeft("a".into())
        );
        assert!(InboundMessage::from_envelope(&bad).is_err());
    }

    #[test]
    fn test_decode_offer_and_candidate() {
        let offer = Envelope::new(
            MessageType::Offer,
            json!({"sender": "c", "offer": {"type": "offer", "sdp": "v=0"}}),
        );
        assert_eq!(
            InboundMessage::from_envelope(&offer).unwrap(),
            InboundMessage::Offer {
                sender: "c".into(),
                description: SessionDescription::offer("v=0"),
            }
        );

        let candidate = Envelope::new(
            MessageType::IceCandidate,
            json!({"sender": "c", "candidate": {
                "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }}),
        );
        match InboundMessage::from_envelope(&candidate).unwrap() {
            InboundMessage::IceCandidate { sender, candidate } => {
                assert_eq!(sender, "c");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_client_types_are_not_inbound() {
        let envelope = Envelope::new(MessageType::JoinRoom, json!({"userName": "x"}));
        assert!(matches!(
            InboundMessage::from_envelope(&envelope),
            Err(crate::Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_outbound_offer_wire_shape() {
        let msg = OutboundMessage::Offer {
            target: "a".into(),
            description: SessionDescription::offer("v=0"),
        };
        let value: Value = serde_json::from_str(&msg.to_envelope().to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["payload"]["target"], "a");
        assert_eq!(value["payload"]["offer"]["type"], "offer");
        assert_eq!(value["payload"]["offer"]["sdp"], "v=0");
        assert_eq!(msg.target(), Some("a"));
    }

    #[test]
    fn test_outbound_candidate_skips_missing_fields() {
        let msg = OutboundMessage::IceCandidate {
            target: "a".into(),
            candidate: IceCandidate {
                candidate: "candidate:1".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: None,
                username_fragment: None,
            },
        };
        let payload = msg.payload();
        assert_eq!(payload["candidate"]["sdpMid"], "0");
        assert!(payload["candidate"].get("sdpMLineIndex").is_none());
    }

    #[test]
    fn test_outbound_join_room() {
        let msg = OutboundMessage::JoinRoom {
            user_name: "Alice".into(),
        };
        assert_eq!(msg.payload(), json!({"userName": "Alice"}));
        assert_eq!(OutboundMessage::LeaveRoom.payload(), Value::Null);
    }
}
