//! Edge case and malformed input tests for the protocol engine

use tambox::config::truncated;
use tambox::{
    wire, Config, DestIndex, Destination, DestinationRegistry, LocalRequest, MalformedKind, NodeConfig,
    OutboundMessage, ProtocolEngine, ProtocolError, StateValue, TamState, TrackIndex, TrafficDirection,
};

fn engine() -> ProtocolEngine {
    let registry = DestinationRegistry::new()
        .with_destination(DestIndex::A, Destination::single("tambox-2", "Hr", "Hallsberg", 'b'))
        .with_destination(DestIndex::B, Destination::double("tambox-3", "Kbg", "Kumla", 'a'));
    let config = Config::default().with_node(NodeConfig::default().with_id("tambox-1").with_signature("Cda"));
    ProtocolEngine::new(&config, registry, 0)
}

fn inbound(engine: &mut ProtocolEngine, topic: &str, json: &str) -> Result<Vec<OutboundMessage>, ProtocolError> {
    wire::decode(topic, json.as_bytes()).and_then(|msg| engine.on_inbound_message(&msg, 1_000))
}

const REQ_A: &str = "cmd/h0/tam/tambox-1/a/req";
const RES_A: &str = "cmd/h0/tam/tambox-1/a/res";

/// Let tambox-2 set our direction on A to `in`.
fn grant_inbound_direction(engine: &mut ProtocolEngine) {
    let out = inbound(
        engine,
        REQ_A,
        r#"{"node-id":"tambox-2","port-id":"b","track":"left","state":{"desired":"out"}}"#,
    )
    .unwrap();
    assert_eq!(out[0].body.state.reported, Some(StateValue::Accepted));
    assert_eq!(
        engine.current_state(DestIndex::A, TrackIndex::Left).direction,
        TrafficDirection::In
    );
}

// ============================================================================
// Malformed Input
// ============================================================================

#[test]
fn bad_topics_are_malformed() {
    let mut engine = engine();
    for topic in [
        "cmd/h0/tam/tambox-1/a",
        "cmd/h0/tam/tambox-1/a/req/extra",
        "xx/h0/tam/tambox-1/a/req",
        "cmd/h0/boat/tambox-1/a/req",
        "cmd/h0/tam/tambox-1/a/ask",
        "cmd//tam/tambox-1/a/req",
    ] {
        let result = inbound(&mut engine, topic, r#"{"state":{"desired":"out"}}"#);
        assert!(
            matches!(result, Err(ProtocolError::Malformed(_))),
            "{topic} gave {result:?}"
        );
    }
}

#[test]
fn foreign_scale_is_malformed() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, "cmd/n/tam/tambox-1/a/req", r#"{"state":{"desired":"out"}}"#),
        Err(ProtocolError::Malformed(MalformedKind::Value("scale")))
    );
}

#[test]
fn request_without_desired_state_is_malformed() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, REQ_A, r#"{"node-id":"tambox-2","track":"left","state":{}}"#),
        Err(ProtocolError::Malformed(MalformedKind::MissingField("state.desired")))
    );
}

#[test]
fn response_with_request_state_is_malformed() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, RES_A, r#"{"state":{"reported":"ready"}}"#),
        Err(ProtocolError::Malformed(MalformedKind::Value("state.reported")))
    );
}

#[test]
fn malformed_input_leaves_state_untouched() {
    let mut engine = engine();
    let _ = inbound(&mut engine, REQ_A, "{ not json");
    let _ = inbound(&mut engine, REQ_A, r#"{"state":{"desired":"sideways"}}"#);
    let state = engine.current_state(DestIndex::A, TrackIndex::Left);
    assert_eq!(state.state, TamState::Idle);
    assert_eq!(state.direction, TrafficDirection::Unknown);
    assert_eq!(engine.drain_events().count(), 0);
}

// ============================================================================
// Unknown Destinations
// ============================================================================

#[test]
fn unconfigured_port_is_unknown() {
    let mut engine = engine();
    for topic in ["cmd/h0/tam/tambox-1/c/req", "cmd/h0/tam/tambox-1/e/req"] {
        assert_eq!(
            inbound(&mut engine, topic, r#"{"state":{"desired":"out"}}"#),
            Err(ProtocolError::UnknownDestination)
        );
    }
}

#[test]
fn sender_must_match_the_port() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, REQ_A, r#"{"node-id":"tambox-9","state":{"desired":"out"}}"#),
        Err(ProtocolError::UnknownDestination)
    );
}

#[test]
fn message_for_another_node_is_unknown() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, "cmd/h0/tam/tambox-7/a/req", r#"{"state":{"desired":"out"}}"#),
        Err(ProtocolError::UnknownDestination)
    );
    assert_eq!(
        inbound(&mut engine, "cmd/h0/node/tambox-7/inventory/req", "{}"),
        Err(ProtocolError::UnknownDestination)
    );
}

#[test]
fn missing_track_on_single_link_is_unknown() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, REQ_A, r#"{"node-id":"tambox-2","track":"right","state":{"desired":"out"}}"#),
        Err(ProtocolError::UnknownDestination)
    );
}

#[test]
fn ping_from_stranger_is_unknown() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, "dt/h0/ping/tambox-9", r#"{"state":{"reported":"ready"}}"#),
        Err(ProtocolError::UnknownDestination)
    );
}

#[test]
fn local_request_on_missing_track() {
    let mut engine = engine();
    assert_eq!(
        engine.on_local_request(DestIndex::A, TrackIndex::Right, LocalRequest::Accept, 0),
        Err(ProtocolError::InvalidTopology)
    );
}

// ============================================================================
// Invalid Transitions
// ============================================================================

#[test]
fn accept_without_inbound_request() {
    let mut engine = engine();
    assert_eq!(
        engine.on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Accept, 0),
        Err(ProtocolError::InvalidTransition {
            state: TamState::Idle,
            event: "local accept",
        })
    );
}

#[test]
fn arrival_without_train() {
    let mut engine = engine();
    assert!(matches!(
        engine.on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Arrival, 0),
        Err(ProtocolError::InvalidTransition { state: TamState::Idle, .. })
    ));
    assert!(matches!(
        inbound(&mut engine, REQ_A, r#"{"node-id":"tambox-2","identity":"447","state":{"desired":"in"}}"#),
        Err(ProtocolError::InvalidTransition { state: TamState::Idle, .. })
    ));
}

#[test]
fn cancel_without_inbound_request() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, REQ_A, r#"{"node-id":"tambox-2","session-id":3,"state":{"desired":"cancel"}}"#),
        Err(ProtocolError::InvalidTransition {
            state: TamState::Idle,
            event: "inbound cancel",
        })
    );
}

#[test]
fn response_without_pending_request() {
    let mut engine = engine();
    assert_eq!(
        inbound(&mut engine, RES_A, r#"{"node-id":"tambox-2","state":{"reported":"accepted"}}"#),
        Err(ProtocolError::InvalidTransition {
            state: TamState::Idle,
            event: "response",
        })
    );
}

// ============================================================================
// Sessions and Duplicates
// ============================================================================

#[test]
fn stale_session_is_dropped() {
    let mut engine = engine();
    engine
        .on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out), 0)
        .unwrap();
    let result = inbound(
        &mut engine,
        RES_A,
        r#"{"node-id":"tambox-2","session-id":99,"track":"left","state":{"reported":"accepted"}}"#,
    );
    assert!(matches!(result, Err(ProtocolError::InvalidTransition { .. })));
    assert_eq!(
        engine.current_state(DestIndex::A, TrackIndex::Left).state,
        TamState::TrafficDirection
    );
    assert!(engine.pending(DestIndex::A).is_some());
}

#[test]
fn response_without_session_is_accepted() {
    let mut engine = engine();
    engine
        .on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out), 0)
        .unwrap();
    inbound(&mut engine, RES_A, r#"{"node-id":"tambox-2","track":"left","state":{"reported":"accepted"}}"#).unwrap();
    let state = engine.current_state(DestIndex::A, TrackIndex::Left);
    assert_eq!(state.state, TamState::Idle);
    assert_eq!(state.direction, TrafficDirection::Out);
}

#[test]
fn duplicate_departure_request_is_ignored() {
    let mut engine = engine();
    grant_inbound_direction(&mut engine);
    let request = r#"{"node-id":"tambox-2","session-id":5,"track":"left","identity":"447","state":{"desired":"out"}}"#;

    assert!(inbound(&mut engine, REQ_A, request).unwrap().is_empty());
    assert!(inbound(&mut engine, REQ_A, request).unwrap().is_empty());
    let state = engine.current_state(DestIndex::A, TrackIndex::Left);
    assert_eq!(state.state, TamState::InRequest);
    assert_eq!(state.train.as_deref(), Some("447"));
}

#[test]
fn second_departure_request_is_rejected_busy() {
    let mut engine = engine();
    grant_inbound_direction(&mut engine);
    inbound(
        &mut engine,
        REQ_A,
        r#"{"node-id":"tambox-2","session-id":5,"track":"left","identity":"447","state":{"desired":"out"}}"#,
    )
    .unwrap();

    let out = inbound(
        &mut engine,
        REQ_A,
        r#"{"node-id":"tambox-2","session-id":6,"track":"left","identity":"448","state":{"desired":"out"}}"#,
    )
    .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].topic.to_path().as_str(), "cmd/h0/tam/tambox-2/b/res");
    assert_eq!(out[0].body.state.reported, Some(StateValue::Rejected));
    assert_eq!(out[0].body.session_id, Some(6));
    assert_eq!(
        engine.current_state(DestIndex::A, TrackIndex::Left).train,
        Some(truncated("447"))
    );
}

#[test]
fn departure_request_while_own_request_pending_is_rejected() {
    let mut engine = engine();
    grant_inbound_direction(&mut engine);
    engine
        .on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out), 0)
        .unwrap();
    let out = inbound(
        &mut engine,
        REQ_A,
        r#"{"node-id":"tambox-2","respond-to":"cmd/h0/tam/tambox-2/b/res","identity":"7","state":{"desired":"out"}}"#,
    )
    .unwrap();
    assert_eq!(out[0].body.state.reported, Some(StateValue::Rejected));
    assert_eq!(
        engine.current_state(DestIndex::A, TrackIndex::Left).state,
        TamState::TrafficDirection
    );
}

#[test]
fn departure_request_against_direction_is_rejected() {
    let mut engine = engine();
    let out = inbound(
        &mut engine,
        REQ_A,
        r#"{"node-id":"tambox-2","identity":"7","state":{"desired":"out"}}"#,
    )
    .unwrap();
    assert_eq!(out[0].body.state.reported, Some(StateValue::Rejected));
    assert_eq!(out[0].body.train.as_deref(), Some("7"));
    assert_eq!(engine.current_state(DestIndex::A, TrackIndex::Left).state, TamState::Idle);
}

// ============================================================================
// Double Track
// ============================================================================

#[test]
fn double_track_accepts_only_the_fixed_direction() {
    let mut engine = engine();
    // peer's left is our right, which is fixed inbound
    let out = inbound(
        &mut engine,
        "cmd/h0/tam/tambox-1/b/req",
        r#"{"node-id":"tambox-3","track":"left","state":{"desired":"out"}}"#,
    )
    .unwrap();
    assert_eq!(out[0].body.state.reported, Some(StateValue::Accepted));
    assert_eq!(out[0].body.track, Some(TrackIndex::Right));

    let out = inbound(
        &mut engine,
        "cmd/h0/tam/tambox-1/b/req",
        r#"{"node-id":"tambox-3","track":"left","state":{"desired":"in"}}"#,
    )
    .unwrap();
    assert_eq!(out[0].body.state.reported, Some(StateValue::Rejected));
    assert_eq!(
        engine.current_state(DestIndex::B, TrackIndex::Right).direction,
        TrafficDirection::In
    );
}

// ============================================================================
// Ignored Traffic
// ============================================================================

#[test]
fn own_ping_is_ignored() {
    let mut engine = engine();
    assert!(inbound(&mut engine, "dt/h0/ping/tambox-1", r#"{"state":{"reported":"lost"}}"#)
        .unwrap()
        .is_empty());
    assert_eq!(engine.drain_events().count(), 0);
}

#[test]
fn tower_traffic_is_ignored() {
    let mut engine = engine();
    assert!(inbound(&mut engine, "cmd/h0/tower/tambox-1/a/req", "\u{1}binary")
        .unwrap()
        .is_empty());
}

#[test]
fn ready_from_live_destination_does_nothing() {
    let mut engine = engine();
    assert!(inbound(&mut engine, "dt/h0/ping/tambox-2", r#"{"state":{"reported":"ready"}}"#)
        .unwrap()
        .is_empty());
    assert_eq!(engine.current_state(DestIndex::A, TrackIndex::Left).last_seen_ms, 1_000);
}

// ============================================================================
// Inventory
// ============================================================================

#[test]
fn inventory_reply_goes_to_respond_to() {
    let mut engine = engine();
    let out = inbound(
        &mut engine,
        "cmd/h0/node/tambox-1/inventory/req",
        r#"{"session-id":3,"respond-to":"cmd/h0/node/config/inventory/res"}"#,
    )
    .unwrap();
    assert_eq!(out[0].topic.to_path().as_str(), "cmd/h0/node/config/inventory/res");
    assert_eq!(out[0].body.session_id, Some(3));
    let metadata = out[0].body.metadata.as_ref().unwrap();
    assert_eq!(metadata.id.as_str(), "tambox-1");
    assert_eq!(metadata.kind.as_str(), "mqttTamBox");

    let encoded = wire::encode(&out[0]).unwrap();
    let json = core::str::from_utf8(&encoded.payload).unwrap();
    assert!(json.contains(r#""type":"mqttTamBox""#));
    assert!(json.contains(r#""sign":"Cda""#));
}
