//! TLS: certificate inspection, trust policy and per-attempt rustls configs.
//!
//! A fresh config is built for every `connect` / `listen`, so material is
//! read from its source at that moment and local errors (missing files,
//! unparsable PEM) surface synchronously from the call that triggered them.

pub mod certificate;
pub mod hostname;
pub mod material;
pub mod policy;
mod verifier;

use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, ServerConfig};

use communique_core::error::{CommuniqueError, Result};

pub use certificate::Certificate;
pub use hostname::check_hostname;
pub use material::{PemSource, TlsSettings, UserVerification};
pub use policy::{
    chain_accepted, evaluate_chain, CertificateVerdict, Outcome, PreverifyFailure, TrustPolicy,
    MAX_VERIFY_DEPTH,
};

use verifier::{AcceptAnyServerCert, PolicyClientVerifier, PolicyServerVerifier};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_err(context: &str) -> impl Fn(rustls::Error) -> CommuniqueError + '_ {
    move |e| CommuniqueError::Certificate(format!("{context}: {e}"))
}

/// Client config for one `wss://` attempt.
pub fn client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    let provider = provider();

    let verifier: Arc<dyn ServerCertVerifier> = match settings.load_trust_anchors()? {
        Some(anchors) => Arc::new(PolicyServerVerifier::new(
            anchors,
            TrustPolicy::from_settings(settings),
            Arc::clone(&provider),
        )),
        None => {
            tracing::debug!("no verify source: accepting any server certificate");
            Arc::new(AcceptAnyServerCert::new(Arc::clone(&provider)))
        }
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(tls_err("client config error"))?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    let config = match settings.load_identity()? {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(tls_err("client certificate error"))?,
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// Server config for `listen`, or `None` for plaintext.
pub fn server_config(settings: &TlsSettings) -> Result<Option<Arc<ServerConfig>>> {
    settings.check_dh_params()?;
    let identity = settings.load_identity()?;
    let anchors = settings.load_trust_anchors()?;

    let Some((chain, key)) = identity else {
        if anchors.is_some() {
            return Err(CommuniqueError::Certificate(
                "verify source set but no certificate chain / private key to serve TLS with".into(),
            ));
        }
        return Ok(None);
    };

    let provider = provider();
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(tls_err("server config error"))?;

    let builder = match anchors {
        Some(anchors) => {
            let verifier =
                PolicyClientVerifier::new(anchors, TrustPolicy::from_settings(settings), provider)?;
            builder.with_client_cert_verifier(Arc::new(verifier))
        }
        None => builder.with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(chain, key)
        .map_err(tls_err("server certificate error"))?;
    Ok(Some(Arc::new(config)))
}
