#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use roomlink_node::config::{self, PeerKind, PeerRole, PeerScheme, RetryPolicy, Role};
use secrecy::ExposeSecret;

const MINIMAL: &str = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
layouts:
  - id: LAY1
"#;

fn code(yaml: &str) -> &'static str {
    config::load_from_str(yaml).expect_err("must fail").code().as_str()
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str(MINIMAL).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.node.role, Role::Primary);
    assert_eq!(cfg.node.app, "JoinSplit");
    assert_eq!(cfg.delivery.interval_ms, 500);
    assert_eq!(cfg.delivery.retry, RetryPolicy::None);
    assert_eq!(cfg.delivery.peer_scheme, PeerScheme::Https);
    assert_eq!(cfg.protocol.ack_timeout_ms, 4000);
    assert!(cfg.peers.is_empty());
}

#[test]
fn full_config_parses() {
    let cfg = config::load_from_str(
        r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary, relay_id: dev-100, listen: "127.0.0.1:9443" }
credentials: { token: YWRtaW46cHc= }
delivery:
  interval_ms: 250
  peer_scheme: http
  retry: { mode: requeue, max_attempts: 3 }
peers:
  - { address: 10.0.0.110, kind: ip }
  - { address: 10.0.0.112, kind: relay, relay_id: dev-112 }
  - { address: 10.0.0.120, kind: ip, role: auxiliary }
layouts:
  - { id: LAY1 }
  - { id: LAY2, members: [10.0.0.100, 10.0.0.110, 10.0.0.112] }
wall:
  enabled: true
  map: { 0: LAY1, 7: LAY2 }
protocol: { ack_timeout_ms: 2000, default_layout: LAY1 }
"#,
    )
    .expect("must parse");

    assert_eq!(cfg.delivery.retry, RetryPolicy::Requeue { max_attempts: 3 });
    assert_eq!(cfg.delivery.peer_scheme, PeerScheme::Http);
    assert_eq!(cfg.peers[1].kind, PeerKind::Relay);
    assert_eq!(cfg.peers[2].role, PeerRole::Auxiliary);
    assert_eq!(cfg.credentials.token.as_ref().unwrap().expose_secret(), "YWRtaW46cHc=");
    assert_eq!(cfg.wall.map.len(), 2);
    assert_eq!(cfg.layouts[1].members.len(), 3);
}

#[test]
fn secrets_are_redacted_in_debug() {
    let cfg = config::load_from_str(
        r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
credentials: { username: admin, password: hunter2 }
peers: [ { address: 10.0.0.110, kind: ip } ]
layouts: [ { id: LAY1 } ]
"#,
    )
    .unwrap();
    assert!(!format!("{cfg:?}").contains("hunter2"));
}

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
layouts:
  - { id: LAY1, membres: [] } # typo should fail
"#;
    assert_eq!(code(bad), "BAD_REQUEST");
}

#[test]
fn rejects_bad_version() {
    assert_eq!(code(&MINIMAL.replace("version: 1", "version: 2")), "BAD_REQUEST");
}

#[test]
fn rejects_members_outside_peers() {
    let bad = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
layouts:
  - { id: LAY2, members: [10.0.0.100, 10.0.0.199] }
"#;
    let err = config::load_from_str(bad).unwrap_err();
    assert!(err.to_string().contains("10.0.0.199"));
}

#[test]
fn rejects_peers_without_credentials() {
    let bad = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
peers: [ { address: 10.0.0.110, kind: ip } ]
layouts: [ { id: LAY1 } ]
"#;
    assert_eq!(code(bad), "BAD_REQUEST");
}

#[test]
fn rejects_relay_peer_without_id() {
    let bad = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
credentials: { token: abc }
peers: [ { address: 10.0.0.112, kind: relay } ]
layouts: [ { id: LAY1 } ]
"#;
    let err = config::load_from_str(bad).unwrap_err();
    assert!(err.to_string().contains("relay_id"));
}

#[test]
fn rejects_wall_map_problems() {
    let out_of_range = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
layouts: [ { id: LAY1 } ]
wall: { enabled: true, map: { 8: LAY1 } }
"#;
    assert!(config::load_from_str(out_of_range).unwrap_err().to_string().contains("3 bits"));

    let unknown_target = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
layouts: [ { id: LAY1 } ]
wall: { enabled: true, map: { 0: LAY9 } }
"#;
    assert!(config::load_from_str(unknown_target).unwrap_err().to_string().contains("LAY9"));
}

#[test]
fn rejects_ack_timeout_out_of_range() {
    let bad = format!("{MINIMAL}protocol: {{ ack_timeout_ms: 500 }}\n");
    assert_eq!(code(&bad), "BAD_REQUEST");
}

#[test]
fn rejects_duplicate_layouts() {
    let bad = r#"
version: 1
node: { id: FOC100, address: 10.0.0.100, role: primary }
layouts: [ { id: LAY1 }, { id: LAY1 } ]
"#;
    assert!(config::load_from_str(bad).unwrap_err().to_string().contains("duplicate layout"));
}

#[test]
fn secondary_needs_its_primary() {
    let bad = r#"
version: 1
node: { id: FOC110, address: 10.0.0.110, role: secondary }
layouts: [ { id: LAY1 } ]
"#;
    assert_eq!(code(bad), "BAD_REQUEST");
}
