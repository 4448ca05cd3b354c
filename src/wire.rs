//! JSON wire codec for protocol messages.
//!
//! Uses `serde-json-core` so the same code runs on the node and on the
//! desktop. Field names follow the layout bodies:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "timestamp": 1718000000,
//!   "session-id": 7,
//!   "respond-to": "cmd/h0/tam/tambox-1/a/res",
//!   "track": "left",
//!   "node-id": "tambox-1",
//!   "port-id": "a",
//!   "identity": "447",
//!   "state": { "desired": "out" }
//! }
//! ```
//!
//! # Example
//!
//! ```rust
//! use tambox::wire;
//! use tambox::message::{MessageKind, StateValue};
//!
//! let payload = br#"{"version":"1.0","timestamp":0,"state":{"reported":"ready"}}"#;
//! let msg = wire::decode("dt/h0/ping/tambox-2", payload).unwrap();
//! assert_eq!(msg.kind(), Ok(MessageKind::Ready));
//!
//! let encoded = wire::encode(&msg).unwrap();
//! assert_eq!(encoded.topic.as_str(), "dt/h0/ping/tambox-2");
//! ```

use crate::config::LongString;
use crate::error::{MalformedKind, ProtocolError};
use crate::message::{BodyType, MessageBody, ProtocolMessage, Topic};

/// Largest payload the codec produces.
pub const MAX_PAYLOAD: usize = 512;

/// Encoded payload buffer.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

/// A message ready for the MQTT client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Topic path
    pub topic: LongString,
    /// JSON body
    pub payload: Payload,
}

/// Parse a topic and JSON payload into a [`ProtocolMessage`].
///
/// Tower traffic is not decoded; its body is left empty.
pub fn decode(topic: &str, payload: &[u8]) -> Result<ProtocolMessage, ProtocolError> {
    let topic = Topic::parse(topic)?;
    if topic.body_type == BodyType::Tower {
        return Ok(ProtocolMessage::new(topic, MessageBody::default()));
    }
    let (body, _) = serde_json_core::from_slice::<MessageBody>(payload).map_err(|error| {
        tracing::debug!(?error, "undecodable body");
        ProtocolError::Malformed(MalformedKind::Body)
    })?;
    Ok(ProtocolMessage::new(topic, body))
}

/// Render a [`ProtocolMessage`] as topic path and JSON payload.
pub fn encode(msg: &ProtocolMessage) -> Result<EncodedMessage, ProtocolError> {
    let payload = serde_json_core::to_vec::<_, MAX_PAYLOAD>(&msg.body)
        .map_err(|_| ProtocolError::Malformed(MalformedKind::Body))?;
    Ok(EncodedMessage {
        topic: msg.topic.to_path(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::truncated;
    use crate::message::{MessageKind, Order, StateValue};
    use crate::registry::TrackIndex;

    #[test]
    fn decodes_departure_request() {
        let payload = br#"{
            "version": "1.0",
            "timestamp": 1718000000,
            "session-id": 7,
            "respond-to": "cmd/h0/tam/tambox-2/b/res",
            "track": "left",
            "node-id": "tambox-2",
            "port-id": "b",
            "identity": "447",
            "state": {"desired": "out"}
        }"#;
        let msg = decode("cmd/h0/tam/tambox-1/a/req", payload).unwrap();
        assert_eq!(msg.body.session_id, Some(7));
        assert_eq!(msg.body.track, Some(TrackIndex::Left));
        assert_eq!(msg.body.node_id.as_deref(), Some("tambox-2"));
        assert_eq!(msg.body.respond_to.as_deref(), Some("cmd/h0/tam/tambox-2/b/res"));
        assert_eq!(msg.kind(), Ok(MessageKind::DepartureRequest(truncated("447"))));
    }

    #[test]
    fn missing_optional_fields_default() {
        let msg = decode("cmd/h0/tam/tambox-1/a/res", br#"{"state":{"reported":"rejected"}}"#).unwrap();
        assert_eq!(msg.body.session_id, None);
        assert_eq!(msg.body.track, None);
        assert_eq!(msg.kind(), Ok(MessageKind::Response(StateValue::Rejected)));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let payload = br#"{"timestamp":5,"extra":"x","state":{"reported":"ready"}}"#;
        let msg = decode("dt/h0/ping/tambox-2", payload).unwrap();
        assert_eq!(msg.body.timestamp, 5);
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert_eq!(
            decode("cmd/h0/tam/tambox-1/a/req", b"not json"),
            Err(ProtocolError::Malformed(MalformedKind::Body))
        );
        assert_eq!(
            decode("cmd/h0/tam/tambox-1/a/req", br#"{"state":{"desired":"sideways"}}"#),
            Err(ProtocolError::Malformed(MalformedKind::Body))
        );
    }

    #[test]
    fn bad_topic_is_reported_before_body() {
        assert!(matches!(
            decode("cmd/h0/tam", b"not json"),
            Err(ProtocolError::Malformed(MalformedKind::TopicSegments))
        ));
    }

    #[test]
    fn tower_bodies_are_not_decoded() {
        let msg = decode("cmd/h0/tower/tambox-1/a/req", b"\x00garbage").unwrap();
        assert_eq!(msg.kind(), Ok(MessageKind::Ignored));
    }

    #[test]
    fn encode_skips_absent_fields() {
        let msg = ProtocolMessage::new(
            Topic::tam("h0", "tambox-2", "b", Order::Response),
            MessageBody::new(12)
                .with_sender("tambox-1", "a")
                .with_track(TrackIndex::Left)
                .with_session(Some(3))
                .with_reported(StateValue::Accepted),
        );
        let encoded = encode(&msg).unwrap();
        let json = core::str::from_utf8(&encoded.payload).unwrap();
        assert_eq!(encoded.topic.as_str(), "cmd/h0/tam/tambox-2/b/res");
        assert!(json.contains(r#""session-id":3"#));
        assert!(json.contains(r#""node-id":"tambox-1""#));
        assert!(json.contains(r#""state":{"reported":"accepted"}"#));
        assert!(!json.contains("respond-to"));
        assert!(!json.contains("identity"));
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn encoded_body_decodes_to_same_message() {
        let msg = ProtocolMessage::new(
            Topic::tam("h0", "tambox-2", "b", Order::Request),
            MessageBody::new(99)
                .with_sender("tambox-1", "a")
                .with_respond_to(&Topic::tam("h0", "tambox-1", "a", Order::Response))
                .with_track(TrackIndex::Right)
                .with_train(Some(truncated("12")))
                .with_desired(StateValue::In),
        );
        let encoded = encode(&msg).unwrap();
        let decoded = decode(&encoded.topic, &encoded.payload).unwrap();
        assert_eq!(decoded, msg);
    }
}
