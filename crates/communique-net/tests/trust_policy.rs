#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use communique_net::tls::{
    chain_accepted, evaluate_chain, Certificate, Outcome, PreverifyFailure, TrustPolicy,
    MAX_VERIFY_DEPTH,
};

mod pki;
use pki::{Authority, Usage};

/// leaf, intermediate, root (index = depth).
fn three_level_chain(leaf_sans: &[&str]) -> Vec<Certificate> {
    let root = Authority::root("Policy Root");
    let inter = root.intermediate("Policy Intermediate");
    let leaf = inter.leaf("leaf", leaf_sans, Usage::ServerAuth);

    let leaf = Certificate::from_pem(leaf.cert_pem.as_bytes()).unwrap();
    let inter = Certificate::from_pem(inter.cert_pem.as_bytes()).unwrap();
    let root = Certificate::from_pem(root.cert_pem.as_bytes()).unwrap();
    vec![leaf, inter, root]
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[test]
fn evaluates_deepest_first_leaf_last() {
    let chain = three_level_chain(&["www.example.com"]);
    let verdicts = evaluate_chain(&TrustPolicy::new(), &chain, None, now());

    let depths: Vec<usize> = verdicts.iter().map(|v| v.depth).collect();
    assert_eq!(depths, [2, 1, 0]);
    assert_eq!(verdicts[2].subject, "/CN=leaf");
    assert_eq!(verdicts[2].issuer, chain[1].subject());
    assert!(verdicts.iter().all(|v| v.outcome == Outcome::Pass));
    assert!(chain_accepted(&verdicts));
}

#[test]
fn hostname_is_checked_at_the_leaf_only() {
    let chain = three_level_chain(&["www.example.com"]);

    let policy = TrustPolicy::new().with_required_hostname("www.example.com");
    assert!(chain_accepted(&evaluate_chain(&policy, &chain, None, now())));

    let policy = TrustPolicy::new().with_required_hostname("mail.example.com");
    let verdicts = evaluate_chain(&policy, &chain, None, now());
    assert!(!chain_accepted(&verdicts));
    assert!(verdicts[0].accepted && verdicts[1].accepted);
    assert_eq!(verdicts[2].outcome, Outcome::Fail);
    assert!(verdicts[2].error.as_deref().unwrap().contains("mail.example.com"));
}

#[test]
fn expired_certificate_fails() {
    let root = Authority::root("Expiry Root");
    let leaf = root.leaf_valid("stale", &["stale.example"], Usage::ServerAuth, (2000, 1, 1), (2001, 1, 1));
    let chain = vec![
        Certificate::from_pem(leaf.cert_pem.as_bytes()).unwrap(),
        Certificate::from_pem(root.cert_pem.as_bytes()).unwrap(),
    ];

    let verdicts = evaluate_chain(&TrustPolicy::new(), &chain, None, now());
    assert!(verdicts[0].accepted, "root is in date");
    assert!(!verdicts[1].accepted);
    assert!(verdicts[1].error.as_deref().unwrap().contains("validity"));
}

#[test]
fn preverify_failure_belongs_to_one_certificate() {
    let chain = three_level_chain(&["www.example.com"]);
    let failure = PreverifyFailure::unknown_issuer("invalid peer certificate: UnknownIssuer")
        .at_depth(2);

    let verdicts = evaluate_chain(&TrustPolicy::new(), &chain, Some(&failure), now());
    assert!(!chain_accepted(&verdicts));
    assert_eq!(verdicts[0].depth, 2);
    assert_eq!(verdicts[0].outcome, Outcome::Fail);
    assert!(verdicts[0].notes.iter().any(|n| n.starts_with("issuer: ")));
    assert!(verdicts[1..].iter().all(|v| v.outcome == Outcome::Pass));
    assert!(verdicts[1..].iter().all(|v| v.notes.is_empty()));

    let plain = PreverifyFailure::new("bad signature");
    let verdicts = evaluate_chain(&TrustPolicy::new(), &chain, Some(&plain), now());
    assert!(!chain_accepted(&verdicts));
    assert!(verdicts[0].accepted && verdicts[1].accepted);
    assert!(!verdicts[2].accepted);
    assert!(!verdicts[2].notes.iter().any(|n| n.starts_with("issuer: ")));
}

#[test]
fn path_check_errors_are_pinned_to_the_failing_certificate() {
    let root = Authority::root("Locate Root");
    let inter = root.intermediate("Locate Intermediate");
    let stale = inter.leaf_valid("stale", &["stale.example"], Usage::ServerAuth, (2000, 1, 1), (2001, 1, 1));
    let chain = vec![
        Certificate::from_pem(stale.cert_pem.as_bytes()).unwrap(),
        Certificate::from_pem(inter.cert_pem.as_bytes()).unwrap(),
        Certificate::from_pem(root.cert_pem.as_bytes()).unwrap(),
    ];

    let expired = rustls::Error::InvalidCertificate(rustls::CertificateError::Expired);
    let located = PreverifyFailure::locate(&expired, &chain, 2, now());
    assert_eq!(located.depth, 0);
    assert!(!located.unknown_issuer);

    let unknown = rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer);
    let located = PreverifyFailure::locate(&unknown, &chain, 2, now());
    assert_eq!(located.depth, 1);
    assert!(located.unknown_issuer);

    let other = rustls::Error::InvalidCertificate(rustls::CertificateError::BadSignature);
    assert_eq!(PreverifyFailure::locate(&other, &chain, 2, now()).depth, 0);
}

#[test]
fn user_can_accept_an_expired_leaf_under_a_good_root() {
    let root = Authority::root("Lenient Root");
    let stale = root.leaf_valid("stale", &["stale.example"], Usage::ServerAuth, (2000, 1, 1), (2001, 1, 1));
    let chain = vec![
        Certificate::from_pem(stale.cert_pem.as_bytes()).unwrap(),
        Certificate::from_pem(root.cert_pem.as_bytes()).unwrap(),
    ];
    let expired = rustls::Error::InvalidCertificate(rustls::CertificateError::Expired);
    let failure = PreverifyFailure::locate(&expired, &chain, 1, now());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let policy = {
        let seen = Arc::clone(&seen);
        TrustPolicy::new().with_user_verification(move |preverified, cert| {
            seen.lock().unwrap().push((cert.subject().to_owned(), preverified));
            preverified || cert.subject_rdn_at("CN", 0) == Some("stale")
        })
    };
    let verdicts = evaluate_chain(&policy, &chain, Some(&failure), now());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].1, "root is preverified");
    assert_eq!(seen[1], ("/CN=stale".to_owned(), false));
    assert_eq!(verdicts[0].outcome, Outcome::Pass);
    assert_eq!(verdicts[1].outcome, Outcome::Override);
    assert!(chain_accepted(&verdicts));
}

#[test]
fn chain_deeper_than_limit_is_forced_to_fail() {
    let one = three_level_chain(&["deep.example"]).remove(0);
    let chain: Vec<Certificate> = std::iter::repeat(one).take(MAX_VERIFY_DEPTH + 2).collect();

    let verdicts = evaluate_chain(&TrustPolicy::new(), &chain, None, now());
    let deepest = &verdicts[0];
    assert_eq!(deepest.depth, MAX_VERIFY_DEPTH + 1);
    assert_eq!(deepest.outcome, Outcome::Fail);
    assert!(deepest.error.as_deref().unwrap().contains("too long"));
    assert!(verdicts[1..].iter().all(|v| v.accepted));
    assert!(!chain_accepted(&verdicts));
}

#[test]
fn user_predicate_is_final_and_sees_preverified_state() {
    let chain = three_level_chain(&["www.example.com"]);
    let failure = PreverifyFailure::new("untrusted");

    // upgrade: accept despite the failure
    let seen = Arc::new(Mutex::new(Vec::new()));
    let policy = {
        let seen = Arc::clone(&seen);
        TrustPolicy::new().with_user_verification(move |preverified, cert| {
            seen.lock().unwrap().push((preverified, cert.subject().to_owned()));
            true
        })
    };
    let verdicts = evaluate_chain(&policy, &chain, Some(&failure), now());
    assert!(chain_accepted(&verdicts));
    assert!(verdicts[..2].iter().all(|v| v.outcome == Outcome::Pass));
    assert_eq!(verdicts[2].outcome, Outcome::Override);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].0 && seen[1].0);
    assert_eq!(seen[2], (false, "/CN=leaf".to_owned()));

    // downgrade: reject an otherwise good chain at the leaf
    let policy = TrustPolicy::new()
        .with_user_verification(|preverified, cert| preverified && cert.subject() != "/CN=leaf");
    let verdicts = evaluate_chain(&policy, &chain, None, now());
    assert_eq!(verdicts[2].outcome, Outcome::Override);
    assert!(!verdicts[2].accepted);
    assert!(!chain_accepted(&verdicts));

    // agreeing with the built-in checks is not an override
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = {
        let calls = Arc::clone(&calls);
        TrustPolicy::new().with_user_verification(move |preverified, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            preverified
        })
    };
    let verdicts = evaluate_chain(&policy, &chain, None, now());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(verdicts.iter().all(|v| v.outcome == Outcome::Pass));
}
