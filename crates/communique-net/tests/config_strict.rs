#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use communique_net::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
server:
  listen: "127.0.0.1:9108"
tls:
  certificate_chain_file: certs/server.pem
  private_key_file: certs/server.key
  verfy_file: certs/ca.pem # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.server.listen, "127.0.0.1:9108");
    assert!(cfg.tls.is_none());
    assert!(cfg.tls_settings().certificate_chain().is_none());
}

#[test]
fn full_config_maps_to_settings() {
    let ok = r#"
version: 1
server:
  listen: "0.0.0.0:9443"
tls:
  certificate_chain_file: certs/server.pem
  private_key_file: certs/server.key
  verify_file: certs/ca.pem
  dh_params_file: certs/dh.pem
  required_hostname: www.example.com
log:
  error_level: 31
  access_level: 4
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.server.listen_addr().unwrap().port(), 9443);

    let settings = cfg.tls_settings();
    assert_eq!(settings.required_hostname(), Some("www.example.com"));
    assert!(settings.verify().is_some());
    assert!(settings.dh_params().is_some());

    let levels = cfg.log.levels();
    assert_eq!(levels.directives(), "trace,communique::access=info");
}

#[test]
fn rejects_bad_version_and_listen() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");

    let err = config::load_from_str("version: 1\nserver:\n  listen: nowhere\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn key_without_chain_is_rejected() {
    let bad = r#"
version: 1
tls:
  private_key_file: certs/server.key
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("certificate_chain_file"));
}
