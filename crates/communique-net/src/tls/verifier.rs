//! rustls verifier hooks running [`TrustPolicy`] on the peer chain.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ParsedCertificate, WebPkiClientVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use time::OffsetDateTime;

use communique_core::error::{CommuniqueError, Result};

use super::certificate::Certificate;
use super::material::TrustAnchors;
use super::policy::{chain_accepted, evaluate_chain, CertificateVerdict, Outcome, PreverifyFailure, TrustPolicy};
use crate::obs::ACCESS;

// --------------------
// Shared chain handling
// --------------------

/// Parse the presented chain (leaf first) and append the trust anchor that
/// issued its last certificate, so the policy sees the whole path.
fn presented_chain(
    anchors: &TrustAnchors,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> std::result::Result<Vec<Certificate>, rustls::Error> {
    let mut chain = Vec::with_capacity(intermediates.len() + 2);
    for der in std::iter::once(end_entity).chain(intermediates) {
        let cert = Certificate::from_der(der)
            .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
        chain.push(cert);
    }

    if let Some(last) = chain.last() {
        if last.subject() != last.issuer() {
            let root = anchors
                .certs
                .iter()
                .find(|a| a.subject() == last.issuer() && !chain.contains(a))
                .cloned();
            chain.extend(root);
        }
    }
    Ok(chain)
}

fn to_datetime(now: UnixTime) -> OffsetDateTime {
    i64::try_from(now.as_secs())
        .ok()
        .and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

fn log_verdicts(side: &'static str, verdicts: &[CertificateVerdict]) {
    for v in verdicts {
        match v.outcome {
            Outcome::Pass => tracing::debug!(
                target: ACCESS, side, depth = v.depth, subject = %v.subject, "certificate accepted"
            ),
            Outcome::Fail => tracing::warn!(
                target: ACCESS, side, depth = v.depth, subject = %v.subject,
                error = v.error.as_deref().unwrap_or(""), notes = ?v.notes,
                "certificate rejected"
            ),
            Outcome::Override => tracing::info!(
                target: ACCESS, side, depth = v.depth, subject = %v.subject,
                accepted = v.accepted, notes = ?v.notes,
                "certificate verdict overridden by user verification"
            ),
        }
    }
}

/// Run the policy and turn the verdicts into a rustls answer.
fn decide(
    side: &'static str,
    anchors: &TrustAnchors,
    policy: &TrustPolicy,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    preverified: std::result::Result<(), rustls::Error>,
    now: UnixTime,
) -> std::result::Result<(), rustls::Error> {
    let chain = presented_chain(anchors, end_entity, intermediates)?;
    let now = to_datetime(now);
    let presented = intermediates.len() + 1;
    let failure = preverified
        .as_ref()
        .err()
        .map(|e| PreverifyFailure::locate(e, &chain, presented, now));
    let verdicts = evaluate_chain(policy, &chain, failure.as_ref(), now);
    log_verdicts(side, &verdicts);

    if chain_accepted(&verdicts) {
        return Ok(());
    }
    Err(preverified.err().unwrap_or(rustls::Error::InvalidCertificate(
        CertificateError::ApplicationVerificationFailure,
    )))
}

// --------------------
// Client side: verifying the server
// --------------------

#[derive(Debug)]
pub(crate) struct PolicyServerVerifier {
    anchors: TrustAnchors,
    policy: TrustPolicy,
    provider: Arc<CryptoProvider>,
}

impl PolicyServerVerifier {
    pub(crate) fn new(anchors: TrustAnchors, policy: TrustPolicy, provider: Arc<CryptoProvider>) -> Self {
        Self {
            anchors,
            policy,
            provider,
        }
    }
}

impl ServerCertVerifier for PolicyServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // Name checks belong to the policy (CN and wildcard rules), so only the
        // path is verified here.
        let preverified = ParsedCertificate::try_from(end_entity).and_then(|cert| {
            verify_server_cert_signed_by_trust_anchor(
                &cert,
                &self.anchors.store,
                intermediates,
                now,
                self.provider.signature_verification_algorithms.all,
            )
        });
        decide("client", &self.anchors, &self.policy, end_entity, intermediates, preverified, now)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Anonymous mode: any server certificate is accepted. Handshake signatures
/// are still checked against the presented key.
#[derive(Debug)]
pub(crate) struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    pub(crate) fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

// --------------------
// Server side: verifying the client
// --------------------

/// Mandatory client authentication: webpki does the path check, the policy
/// has the final word.
#[derive(Debug)]
pub(crate) struct PolicyClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    anchors: TrustAnchors,
    policy: TrustPolicy,
}

impl PolicyClientVerifier {
    pub(crate) fn new(
        anchors: TrustAnchors,
        policy: TrustPolicy,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self> {
        let inner = WebPkiClientVerifier::builder_with_provider(Arc::clone(&anchors.store), provider)
            .build()
            .map_err(|e| CommuniqueError::Certificate(format!("client verifier error: {e}")))?;
        Ok(Self {
            inner,
            anchors,
            policy,
        })
    }
}

impl ClientCertVerifier for PolicyClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let preverified = self
            .inner
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ());
        decide("server", &self.anchors, &self.policy, end_entity, intermediates, preverified, now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
