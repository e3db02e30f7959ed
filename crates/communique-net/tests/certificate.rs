#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use time::OffsetDateTime;

use communique_net::tls::Certificate;

mod pki;
use pki::{Authority, Usage};

const TESTSERVER: &str = "tests/certs/testserver.pem";

#[test]
fn subject_oneline_and_repeated_rdns() {
    let cert = Certificate::from_file(TESTSERVER).unwrap();

    assert_eq!(
        cert.subject(),
        "/C=AU/ST=Some-State/O=Test Server/OU=Alpha/OU=Beta/CN=www.testserver.com"
    );
    // self-signed
    assert_eq!(cert.subject(), cert.issuer());

    assert_eq!(cert.subject_rdn("OU"), ["Alpha", "Beta"]);
    assert_eq!(cert.subject_rdn_entries("OU"), 2);
    assert_eq!(cert.subject_rdn_at("OU", 1), Some("Beta"));
    assert_eq!(cert.subject_rdn_at("OU", 2), None);
    assert_eq!(cert.subject_rdn("CN"), ["www.testserver.com"]);
    assert!(cert.subject_rdn("L").is_empty());
    assert_eq!(cert.issuer_rdn("O"), ["Test Server"]);
}

#[test]
fn alternate_names_and_hostname() {
    let pem = fs::read(TESTSERVER).unwrap();
    let cert = Certificate::from_pem(&pem).unwrap();

    assert_eq!(
        cert.alternate_names(),
        ["www.testserver.com", "*.testserver.com"]
    );
    assert!(cert.hostname_matches("www.testserver.com"));
    assert!(cert.hostname_matches("api.testserver.com"));
    assert!(!cert.hostname_matches("testserver.com"));
    assert!(!cert.hostname_matches("www.example.com"));
}

#[test]
fn hostname_falls_back_to_common_name() {
    let ca = Authority::root("Hostname CA");
    let leaf = ca.leaf("cn-only.example.com", &[], Usage::ServerAuth);
    let cert = Certificate::from_pem(leaf.cert_pem.as_bytes()).unwrap();
    assert!(cert.alternate_names().is_empty());
    assert!(cert.hostname_matches("cn-only.example.com"));
    assert!(!cert.hostname_matches("other.example.com"));
}

#[test]
fn validity_window() {
    let ca = Authority::root("Dates CA");

    let expired = ca.leaf_valid("old", &["old.example"], Usage::ServerAuth, (2000, 1, 1), (2001, 1, 1));
    let expired = Certificate::from_pem(expired.cert_pem.as_bytes()).unwrap();
    assert!(!expired.date_is_valid());
    assert_eq!(expired.not_after().year(), 2001);

    let current = ca.leaf("now", &["now.example"], Usage::ServerAuth);
    let current = Certificate::from_pem(current.cert_pem.as_bytes()).unwrap();
    assert!(current.date_is_valid());
    assert!(current.not_before() < OffsetDateTime::now_utc());

    let future = ca.leaf_valid("later", &["later.example"], Usage::ServerAuth, (2080, 1, 1), (2081, 1, 1));
    let future = Certificate::from_pem(future.cert_pem.as_bytes()).unwrap();
    assert!(!future.date_is_valid());
}

#[test]
fn bad_material_is_a_certificate_error() {
    let ca = Authority::root("Errors CA");
    let leaf = ca.leaf("x", &["x.example"], Usage::ServerAuth);

    let err = Certificate::from_pem(leaf.key_pem.as_bytes()).unwrap_err();
    assert_eq!(err.code().as_str(), "CERTIFICATE");

    let err = Certificate::from_file("tests/certs/does-not-exist.pem").unwrap_err();
    assert_eq!(err.code().as_str(), "CERTIFICATE");

    let err = Certificate::from_der(b"not der").unwrap_err();
    assert_eq!(err.code().as_str(), "CERTIFICATE");
}
