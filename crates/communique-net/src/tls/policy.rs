//! Trust policy applied to a presented certificate chain.
//!
//! The TLS stack first runs its own path check (signatures up to a trust
//! anchor, validity, key usage). A failure there is pinned to the certificate
//! it belongs to; that certificate is not "preverified", the rest are. The
//! policy then walks the chain deepest-first, leaf last, and for each
//! certificate applies, in order:
//!
//! 1. depth limit ([`MAX_VERIFY_DEPTH`]): deeper certificates fail outright
//! 2. preverify diagnostics (issuer named for unknown-issuer failures)
//! 3. required hostname, leaf only
//! 4. validity window
//! 5. user predicate, whose answer is final
//!
//! The chain is accepted only if every certificate is.

use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;

use super::certificate::Certificate;
use super::material::{TlsSettings, UserVerification};

/// Deepest chain position still evaluated normally (leaf is depth 0).
pub const MAX_VERIFY_DEPTH: usize = 8;

/// Why the stack's own path check rejected the chain, and which certificate
/// the rejection belongs to. Every other certificate counts as preverified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreverifyFailure {
    pub reason: String,
    pub unknown_issuer: bool,
    pub depth: usize,
}

impl PreverifyFailure {
    /// Failure of the leaf. Use [`at_depth`](Self::at_depth) to move it.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            unknown_issuer: false,
            depth: 0,
        }
    }

    pub fn unknown_issuer(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            unknown_issuer: true,
            depth: 0,
        }
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Attribute a rustls path-check error to one certificate of `chain`.
    ///
    /// `presented` is how many certificates the peer sent; `chain` may be
    /// longer when a trust anchor was appended.
    /// - unknown issuer: the deepest presented certificate
    /// - expired / not yet valid: the deepest certificate outside its own
    ///   validity window
    /// - anything else: the leaf
    pub fn locate(
        error: &rustls::Error,
        chain: &[Certificate],
        presented: usize,
        now: OffsetDateTime,
    ) -> Self {
        use rustls::CertificateError as E;

        let reason = error.to_string();
        let rustls::Error::InvalidCertificate(cert_error) = error else {
            return Self::new(reason);
        };
        match cert_error {
            E::UnknownIssuer => {
                Self::unknown_issuer(reason).at_depth(presented.saturating_sub(1))
            }
            E::Expired
            | E::ExpiredContext { .. }
            | E::NotValidYet
            | E::NotValidYetContext { .. } => {
                let depth = chain
                    .iter()
                    .rposition(|c| !c.date_is_valid_at(now))
                    .unwrap_or(0);
                Self::new(reason).at_depth(depth)
            }
            _ => Self::new(reason),
        }
    }
}

#[derive(Clone, Default)]
pub struct TrustPolicy {
    required_hostname: Option<String>,
    user_verification: Option<UserVerification>,
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustPolicy")
            .field("required_hostname", &self.required_hostname)
            .field("user_verification", &self.user_verification.is_some())
            .finish()
    }
}

impl TrustPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &TlsSettings) -> Self {
        Self {
            required_hostname: settings.required_hostname().map(str::to_owned),
            user_verification: settings.user_verification().cloned(),
        }
    }

    pub fn with_required_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.required_hostname = Some(hostname.into());
        self
    }

    pub fn with_user_verification<F>(mut self, f: F) -> Self
    where
        F: Fn(bool, &Certificate) -> bool + Send + Sync + 'static,
    {
        self.user_verification = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    /// The user predicate reversed the result of the built-in checks.
    Override,
}

/// Result of evaluating one certificate of a chain.
#[derive(Debug, Clone)]
pub struct CertificateVerdict {
    pub depth: usize,
    pub subject: String,
    pub issuer: String,
    /// First reason the built-in checks failed, if any.
    pub error: Option<String>,
    pub notes: Vec<String>,
    pub outcome: Outcome,
    pub accepted: bool,
}

/// Evaluate `chain` (index = depth, leaf at 0).
///
/// Verdicts come back in evaluation order: deepest first, leaf last.
pub fn evaluate_chain(
    policy: &TrustPolicy,
    chain: &[Certificate],
    preverified: Option<&PreverifyFailure>,
    now: OffsetDateTime,
) -> Vec<CertificateVerdict> {
    chain
        .iter()
        .enumerate()
        .rev()
        .map(|(depth, cert)| evaluate_one(policy, depth, cert, preverified, now))
        .collect()
}

pub fn chain_accepted(verdicts: &[CertificateVerdict]) -> bool {
    !verdicts.is_empty() && verdicts.iter().all(|v| v.accepted)
}

fn evaluate_one(
    policy: &TrustPolicy,
    depth: usize,
    cert: &Certificate,
    preverified: Option<&PreverifyFailure>,
    now: OffsetDateTime,
) -> CertificateVerdict {
    let preverified = preverified.filter(|p| p.depth == depth);
    let mut ok = preverified.is_none();
    let mut error = preverified.map(|p| p.reason.clone());
    let mut notes = Vec::new();

    if depth > MAX_VERIFY_DEPTH {
        ok = false;
        error = Some(format!("certificate chain too long (depth {depth})"));
    }

    if let Some(e) = &error {
        notes.push(format!("verify error at depth {depth}: {e}"));
        if preverified.is_some_and(|p| p.unknown_issuer) {
            notes.push(format!("issuer: {}", cert.issuer()));
        }
    }

    if depth == 0 {
        if let Some(host) = &policy.required_hostname {
            if !cert.hostname_matches(host) {
                ok = false;
                let e = format!("hostname {host} does not match certificate");
                notes.push(e.clone());
                error.get_or_insert(e);
            }
        }
    }

    if !cert.date_is_valid_at(now) {
        ok = false;
        let e = format!(
            "outside validity window ({} .. {})",
            cert.not_before(),
            cert.not_after()
        );
        notes.push(e.clone());
        error.get_or_insert(e);
    }

    let mut outcome = if ok { Outcome::Pass } else { Outcome::Fail };
    if let Some(user) = &policy.user_verification {
        let answer = user(ok, cert);
        if answer != ok {
            outcome = Outcome::Override;
            notes.push(format!(
                "user verification {} the certificate",
                if answer { "accepted" } else { "rejected" }
            ));
        }
        ok = answer;
    }

    CertificateVerdict {
        depth,
        subject: cert.subject().to_owned(),
        issuer: cert.issuer().to_owned(),
        error,
        notes,
        outcome,
        accepted: ok,
    }
}
