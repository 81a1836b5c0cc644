#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use cs_gateway::config;

fn minimal_ok() -> &'static str {
    r#"
version: 1
database_url: "postgres://localhost/cs"
ai:
  encryption_key_b64: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
jwt_secret: "super-secret"
metrics_key: "ops-key"
"#
}

#[test]
fn deny_unknown_fields_top_level() {
    let bad = format!("{}\nbogus_field: 123\n", minimal_ok());
    let err = config::load_from_str(&bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "VALIDATION");
}

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
database_url: "postgres://localhost/cs"
ai:
  encryption_key_b64: "AAAA"
  unexpected: true
jwt_secret: "super-secret"
metrics_key: "ops-key"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "VALIDATION");
}

#[test]
fn ok_minimal_config_applies_defaults() {
    let cfg = config::load_from_str(minimal_ok()).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.gateway.listen, "0.0.0.0:8080");
    assert_eq!(cfg.gateway.ping_interval_ms, 20_000);
    assert_eq!(cfg.rate_limits.player_per_minute, 200);
    assert_eq!(cfg.rate_limits.agent_burst, 60);
}

#[test]
fn rejects_empty_jwt_secret() {
    let bad = r#"
version: 1
database_url: "postgres://localhost/cs"
ai:
  encryption_key_b64: "AAAA"
jwt_secret: ""
metrics_key: "ops-key"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "VALIDATION");
}

#[test]
fn rejects_unsupported_version() {
    let bad = r#"
version: 2
database_url: "postgres://localhost/cs"
ai:
  encryption_key_b64: "AAAA"
jwt_secret: "super-secret"
metrics_key: "ops-key"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "VALIDATION");
}
