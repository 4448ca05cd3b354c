//! Structured protocol messages.
//!
//! Every topic and body is parsed once at the boundary into the types in
//! this module; the engine never compares raw strings.
//!
//! # Topic layout
//!
//! ```text
//! cmd/h0/tam/tambox-1/a/req        TAM request addressed to tambox-1, port a
//! cmd/h0/tam/tambox-1/a/res        TAM response to tambox-1, port a
//! cmd/h0/node/tambox-1/inventory/req
//! dt/h0/ping/tambox-2              ready / lost broadcast from tambox-2
//! ```
//!
//! # Example
//!
//! ```rust
//! use tambox::message::{BodyType, MessageClass, Order, Topic};
//!
//! let topic = Topic::parse("cmd/h0/tam/tambox-1/a/req").unwrap();
//! assert_eq!(topic.class, MessageClass::Command);
//! assert_eq!(topic.body_type, BodyType::Tam);
//! assert_eq!(topic.node_id.as_str(), "tambox-1");
//! assert_eq!(topic.order, Some(Order::Request));
//! assert_eq!(topic.to_path().as_str(), "cmd/h0/tam/tambox-1/a/req");
//! ```

use core::fmt::Write as _;

use heapless::String as HString;

use crate::config::{truncated, LongString, NodeId, Scale, Signature, StationName, TrainId};
use crate::error::{MalformedKind, ProtocolError};
use crate::registry::TrackIndex;

/// Port id segment (`"a"`..`"d"`, or `"inventory"`).
pub type PortId = HString<16>;

/// Port id used for inventory requests.
pub const INVENTORY_PORT: &str = "inventory";

/// Number of segments in a command topic.
pub const NUM_OF_TOPICS: usize = 6;

// ============================================================================
// Topic
// ============================================================================

/// First topic segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageClass {
    /// `cmd`: request/response traffic
    Command,
    /// `dt`: data broadcasts
    Data,
}

impl MessageClass {
    /// Topic segment text.
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageClass::Command => "cmd",
            MessageClass::Data => "dt",
        }
    }

    fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "cmd" => Ok(MessageClass::Command),
            "dt" => Ok(MessageClass::Data),
            _ => Err(ProtocolError::Malformed(MalformedKind::MessageClass)),
        }
    }
}

/// Third topic segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyType {
    /// Track authority message
    Tam,
    /// Node management (inventory)
    Node,
    /// Tower traffic, not handled by a TAM box
    Tower,
    /// Liveness broadcast
    Ping,
}

impl BodyType {
    /// Topic segment text.
    pub const fn as_str(self) -> &'static str {
        match self {
            BodyType::Tam => "tam",
            BodyType::Node => "node",
            BodyType::Tower => "tower",
            BodyType::Ping => "ping",
        }
    }

    fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "tam" => Ok(BodyType::Tam),
            "node" => Ok(BodyType::Node),
            "tower" => Ok(BodyType::Tower),
            "ping" => Ok(BodyType::Ping),
            _ => Err(ProtocolError::Malformed(MalformedKind::BodyType)),
        }
    }
}

/// Last segment of a command topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// `req`
    Request,
    /// `res`
    Response,
}

impl Order {
    /// Topic segment text.
    pub const fn as_str(self) -> &'static str {
        match self {
            Order::Request => "req",
            Order::Response => "res",
        }
    }

    fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "req" => Ok(Order::Request),
            "res" => Ok(Order::Response),
            _ => Err(ProtocolError::Malformed(MalformedKind::Order)),
        }
    }
}

/// A parsed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topic {
    /// Message class (`cmd` / `dt`)
    pub class: MessageClass,
    /// Layout scale
    pub scale: Scale,
    /// Body type
    pub body_type: BodyType,
    /// Addressed node for `cmd`, sending node for `dt`
    pub node_id: NodeId,
    /// Port id, absent on ping broadcasts
    pub port_id: Option<PortId>,
    /// Request or response; only on `cmd`
    pub order: Option<Order>,
}

impl Topic {
    /// Parse a `/`-separated topic path.
    pub fn parse(path: &str) -> Result<Self, ProtocolError> {
        let mut segments: heapless::Vec<&str, NUM_OF_TOPICS> = heapless::Vec::new();
        for segment in path.split('/') {
            segments
                .push(segment)
                .map_err(|_| ProtocolError::Malformed(MalformedKind::TopicSegments))?;
        }
        Self::from_segments(&segments)
    }

    /// Build a topic from already split segments.
    pub fn from_segments(segments: &[&str]) -> Result<Self, ProtocolError> {
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ProtocolError::Malformed(MalformedKind::TopicSegments));
        }
        let class = MessageClass::parse(segments.first().copied().unwrap_or_default())?;
        let (port_id, order) = match (class, segments.len()) {
            (MessageClass::Command, 6) => (Some(segments[4]), Some(Order::parse(segments[5])?)),
            (MessageClass::Data, 4) => (None, None),
            (MessageClass::Data, 5) => (Some(segments[4]), None),
            _ => return Err(ProtocolError::Malformed(MalformedKind::TopicSegments)),
        };
        Ok(Self {
            class,
            scale: checked(segments[1], "scale")?,
            body_type: BodyType::parse(segments[2])?,
            node_id: checked(segments[3], "node-id")?,
            port_id: port_id.map(|p| checked(p, "port-id")).transpose()?,
            order,
        })
    }

    /// A TAM command topic addressed to `node_id` on `port`.
    pub fn tam(scale: &str, node_id: &str, port: &str, order: Order) -> Self {
        Self {
            class: MessageClass::Command,
            scale: truncated(scale),
            body_type: BodyType::Tam,
            node_id: truncated(node_id),
            port_id: Some(truncated(port)),
            order: Some(order),
        }
    }

    /// The ping broadcast topic of `node_id`.
    pub fn ping(scale: &str, node_id: &str) -> Self {
        Self {
            class: MessageClass::Data,
            scale: truncated(scale),
            body_type: BodyType::Ping,
            node_id: truncated(node_id),
            port_id: None,
            order: None,
        }
    }

    /// Inventory topic of `node_id`.
    pub fn inventory(scale: &str, node_id: &str, order: Order) -> Self {
        Self {
            class: MessageClass::Command,
            scale: truncated(scale),
            body_type: BodyType::Node,
            node_id: truncated(node_id),
            port_id: Some(truncated(INVENTORY_PORT)),
            order: Some(order),
        }
    }

    /// Render the topic path.
    pub fn to_path(&self) -> LongString {
        let mut path = LongString::new();
        let _ = write!(
            path,
            "{}/{}/{}/{}",
            self.class.as_str(),
            self.scale,
            self.body_type.as_str(),
            self.node_id
        );
        if let Some(port) = &self.port_id {
            let _ = write!(path, "/{}", port);
        }
        if let Some(order) = self.order {
            let _ = write!(path, "/{}", order.as_str());
        }
        path
    }
}

/// Reject segments that do not fit their fixed-size field.
fn checked<const N: usize>(s: &str, field: &'static str) -> Result<HString<N>, ProtocolError> {
    HString::try_from(s).map_err(|_| ProtocolError::Malformed(MalformedKind::Value(field)))
}

// ============================================================================
// Body
// ============================================================================

/// Values of `state.desired` and `state.reported`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StateValue {
    /// Desired: accept a request
    Accept,
    /// Desired: cancel an outstanding request
    Cancel,
    /// Desired: reject a request
    Reject,
    /// Reported: request accepted
    Accepted,
    /// Reported: request canceled
    Canceled,
    /// Reported: request rejected
    Rejected,
    /// Reported: node lost (broker last will)
    Lost,
    /// Reported: node ready
    Ready,
    /// Traffic or train toward the receiver
    In,
    /// Traffic or train away from the sender
    Out,
    /// Left track
    Left,
    /// Right track
    Right,
}

impl StateValue {
    /// Wire text.
    pub const fn as_str(self) -> &'static str {
        match self {
            StateValue::Accept => "accept",
            StateValue::Cancel => "cancel",
            StateValue::Reject => "reject",
            StateValue::Accepted => "accepted",
            StateValue::Canceled => "canceled",
            StateValue::Rejected => "rejected",
            StateValue::Lost => "lost",
            StateValue::Ready => "ready",
            StateValue::In => "in",
            StateValue::Out => "out",
            StateValue::Left => "left",
            StateValue::Right => "right",
        }
    }

    /// Parse wire text.
    pub fn from_text(s: &str) -> Option<Self> {
        Some(match s {
            "accept" => StateValue::Accept,
            "cancel" => StateValue::Cancel,
            "reject" => StateValue::Reject,
            "accepted" => StateValue::Accepted,
            "canceled" => StateValue::Canceled,
            "rejected" => StateValue::Rejected,
            "lost" => StateValue::Lost,
            "ready" => StateValue::Ready,
            "in" => StateValue::In,
            "out" => StateValue::Out,
            "left" => StateValue::Left,
            "right" => StateValue::Right,
            _ => return None,
        })
    }
}

/// Desired and reported state of a body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BodyState {
    /// What the sender asks for
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub desired: Option<StateValue>,
    /// What the sender reports
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub reported: Option<StateValue>,
}

/// Node description carried in inventory responses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Metadata {
    /// Node id
    pub id: NodeId,
    /// Software type
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: HString<16>,
    /// Software version
    #[cfg_attr(feature = "serde", serde(rename = "ver"))]
    pub version: HString<16>,
    /// Station name
    pub name: StationName,
    /// Station signature
    #[cfg_attr(feature = "serde", serde(rename = "sign"))]
    pub signature: Signature,
    /// Wi-Fi signal strength, if known
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub rssi: Option<i16>,
}

/// Message body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MessageBody {
    /// Body format version
    pub version: HString<8>,
    /// Wall clock seconds
    pub timestamp: u64,
    /// Correlates a response with its request
    #[cfg_attr(feature = "serde", serde(rename = "session-id", skip_serializing_if = "Option::is_none"))]
    pub session_id: Option<u32>,
    /// Topic the response should go to
    #[cfg_attr(feature = "serde", serde(rename = "respond-to", skip_serializing_if = "Option::is_none"))]
    pub respond_to: Option<LongString>,
    /// Track the message is about
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub track: Option<TrackIndex>,
    /// Sending node
    #[cfg_attr(feature = "serde", serde(rename = "node-id", skip_serializing_if = "Option::is_none"))]
    pub node_id: Option<NodeId>,
    /// Sending port
    #[cfg_attr(feature = "serde", serde(rename = "port-id", skip_serializing_if = "Option::is_none"))]
    pub port_id: Option<PortId>,
    /// Train identity
    #[cfg_attr(feature = "serde", serde(rename = "identity", skip_serializing_if = "Option::is_none"))]
    pub train: Option<TrainId>,
    /// Desired / reported state
    pub state: BodyState,
    /// Node description
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub metadata: Option<Metadata>,
}

impl MessageBody {
    /// A body stamped with the current body version.
    pub fn new(timestamp: u64) -> Self {
        Self {
            version: truncated(crate::config::BODY_VERSION),
            timestamp,
            ..Default::default()
        }
    }

    /// Set the sender.
    pub fn with_sender(mut self, node_id: &str, port_id: &str) -> Self {
        self.node_id = Some(truncated(node_id));
        self.port_id = Some(truncated(port_id));
        self
    }

    /// Set the session id.
    pub fn with_session(mut self, session_id: Option<u32>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the response topic.
    pub fn with_respond_to(mut self, topic: &Topic) -> Self {
        self.respond_to = Some(topic.to_path());
        self
    }

    /// Set the track.
    pub fn with_track(mut self, track: TrackIndex) -> Self {
        self.track = Some(track);
        self
    }

    /// Set the train identity.
    pub fn with_train(mut self, train: Option<TrainId>) -> Self {
        self.train = train;
        self
    }

    /// Set the desired state.
    pub fn with_desired(mut self, value: StateValue) -> Self {
        self.state.desired = Some(value);
        self
    }

    /// Set the reported state.
    pub fn with_reported(mut self, value: StateValue) -> Self {
        self.state.reported = Some(value);
        self
    }

    /// Set the node metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ============================================================================
// Protocol message
// ============================================================================

/// A parsed inbound or outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolMessage {
    /// Parsed topic
    pub topic: Topic,
    /// Decoded body
    pub body: MessageBody,
}

/// Messages produced by the engine for the messaging collaborator.
pub type OutboundMessage = ProtocolMessage;

/// What an inbound message asks of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Peer asks to set traffic direction; value is from the peer's side
    DirectionRequest(StateValue),
    /// Peer asks to send a train toward us
    DepartureRequest(TrainId),
    /// Peer confirms a train arrived
    Arrival(TrainId),
    /// Peer withdraws its outstanding request
    Cancel,
    /// Response to one of our requests (`accepted`/`rejected`/`canceled`)
    Response(StateValue),
    /// Peer broadcasts it is ready
    Ready,
    /// Peer broadcasts it is lost (last will)
    Lost,
    /// Request for our node description
    Inventory,
    /// Traffic the box does not act on
    Ignored,
}

impl ProtocolMessage {
    /// Pair a topic with a body.
    pub fn new(topic: Topic, body: MessageBody) -> Self {
        Self { topic, body }
    }

    /// Classify the message by topic and body.
    pub fn kind(&self) -> Result<MessageKind, ProtocolError> {
        let state = &self.body.state;
        match (self.topic.body_type, self.topic.order) {
            (BodyType::Ping, _) => match state.reported {
                Some(StateValue::Ready) => Ok(MessageKind::Ready),
                Some(StateValue::Lost) => Ok(MessageKind::Lost),
                Some(_) => Err(ProtocolError::Malformed(MalformedKind::Value("state.reported"))),
                None => Err(ProtocolError::Malformed(MalformedKind::MissingField("state.reported"))),
            },
            (BodyType::Node, Some(Order::Request))
                if self.topic.port_id.as_deref() == Some(INVENTORY_PORT) =>
            {
                Ok(MessageKind::Inventory)
            }
            (BodyType::Node | BodyType::Tower, _) => Ok(MessageKind::Ignored),
            (BodyType::Tam, Some(Order::Request)) => {
                let desired = state
                    .desired
                    .ok_or(ProtocolError::Malformed(MalformedKind::MissingField("state.desired")))?;
                match (desired, self.body.train.clone()) {
                    (StateValue::Out, Some(train)) => Ok(MessageKind::DepartureRequest(train)),
                    (StateValue::In, Some(train)) => Ok(MessageKind::Arrival(train)),
                    (StateValue::Out | StateValue::In, None) => Ok(MessageKind::DirectionRequest(desired)),
                    (StateValue::Cancel, _) => Ok(MessageKind::Cancel),
                    _ => Err(ProtocolError::Malformed(MalformedKind::Value("state.desired"))),
                }
            }
            (BodyType::Tam, Some(Order::Response)) => match state.reported {
                Some(v @ (StateValue::Accepted | StateValue::Rejected | StateValue::Canceled)) => {
                    Ok(MessageKind::Response(v))
                }
                Some(_) => Err(ProtocolError::Malformed(MalformedKind::Value("state.reported"))),
                None => Err(ProtocolError::Malformed(MalformedKind::MissingField("state.reported"))),
            },
            (BodyType::Tam, None) => Err(ProtocolError::Malformed(MalformedKind::Order)),
        }
    }
}
