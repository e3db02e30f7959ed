//! TLS material: where PEM bytes come from and how they are turned into
//! rustls types.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use x509_parser::pem::Pem;

use communique_core::error::{CommuniqueError, Result};

use super::certificate::Certificate;

/// Opaque byte source for PEM material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PemSource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl PemSource {
    pub fn load(&self) -> Result<Vec<u8>> {
        match self {
            PemSource::File(path) => fs::read(path).map_err(|e| {
                CommuniqueError::Certificate(format!("cannot read {}: {e}", path.display()))
            }),
            PemSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

impl fmt::Display for PemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PemSource::File(path) => write!(f, "{}", path.display()),
            PemSource::Memory(bytes) => write!(f, "<{} bytes in memory>", bytes.len()),
        }
    }
}

/// User verification predicate: `(preverified, certificate) -> accept`.
/// Its answer is final for the certificate it is called with.
pub type UserVerification = Arc<dyn Fn(bool, &Certificate) -> bool + Send + Sync>;

/// Everything a client or server needs to build its TLS context.
///
/// - chain + key: our own identity (server: enables TLS; client: offered for
///   client authentication)
/// - verify: trust anchors; absent means any peer certificate is accepted
/// - dh params: server only, validated but unused (ECDHE only)
#[derive(Clone, Default)]
pub struct TlsSettings {
    certificate_chain: Option<PemSource>,
    private_key: Option<PemSource>,
    verify: Option<PemSource>,
    dh_params: Option<PemSource>,
    required_hostname: Option<String>,
    user_verification: Option<UserVerification>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("certificate_chain", &self.certificate_chain)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("verify", &self.verify)
            .field("dh_params", &self.dh_params)
            .field("required_hostname", &self.required_hostname)
            .field("user_verification", &self.user_verification.is_some())
            .finish()
    }
}

impl TlsSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_certificate_chain_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.certificate_chain = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn set_certificate_chain_pem(&mut self, pem: impl Into<Vec<u8>>) -> &mut Self {
        self.certificate_chain = Some(PemSource::Memory(pem.into()));
        self
    }

    pub fn set_private_key_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.private_key = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn set_private_key_pem(&mut self, pem: impl Into<Vec<u8>>) -> &mut Self {
        self.private_key = Some(PemSource::Memory(pem.into()));
        self
    }

    pub fn set_verify_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.verify = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn set_verify_pem(&mut self, pem: impl Into<Vec<u8>>) -> &mut Self {
        self.verify = Some(PemSource::Memory(pem.into()));
        self
    }

    pub fn set_dh_params_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.dh_params = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn set_dh_params_pem(&mut self, pem: impl Into<Vec<u8>>) -> &mut Self {
        self.dh_params = Some(PemSource::Memory(pem.into()));
        self
    }

    /// Peer leaf certificate must match `hostname` (CN or DNS alt name).
    pub fn require_hostname(&mut self, hostname: impl Into<String>) -> &mut Self {
        self.required_hostname = Some(hostname.into());
        self
    }

    pub fn allow_any_hostname(&mut self) -> &mut Self {
        self.required_hostname = None;
        self
    }

    pub fn set_user_verification<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(bool, &Certificate) -> bool + Send + Sync + 'static,
    {
        self.user_verification = Some(Arc::new(f));
        self
    }

    pub fn clear_user_verification(&mut self) -> &mut Self {
        self.user_verification = None;
        self
    }

    pub fn certificate_chain(&self) -> Option<&PemSource> {
        self.certificate_chain.as_ref()
    }

    pub fn private_key(&self) -> Option<&PemSource> {
        self.private_key.as_ref()
    }

    pub fn verify(&self) -> Option<&PemSource> {
        self.verify.as_ref()
    }

    pub fn dh_params(&self) -> Option<&PemSource> {
        self.dh_params.as_ref()
    }

    pub fn required_hostname(&self) -> Option<&str> {
        self.required_hostname.as_deref()
    }

    pub fn user_verification(&self) -> Option<&UserVerification> {
        self.user_verification.as_ref()
    }

    /// Own identity, if configured. Chain and key must come together.
    pub(crate) fn load_identity(
        &self,
    ) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
        match (&self.certificate_chain, &self.private_key) {
            (None, None) => Ok(None),
            (Some(chain), Some(key)) => {
                let certs = parse_certificates(chain)?;
                let key = parse_private_key(key)?;
                Ok(Some((certs, key)))
            }
            (Some(_), None) => Err(CommuniqueError::Certificate(
                "certificate chain configured without a private key".into(),
            )),
            (None, Some(_)) => Err(CommuniqueError::Certificate(
                "private key configured without a certificate chain".into(),
            )),
        }
    }

    /// Trust anchors from the verify source, if configured.
    pub(crate) fn load_trust_anchors(&self) -> Result<Option<TrustAnchors>> {
        let Some(source) = &self.verify else {
            return Ok(None);
        };
        let der = parse_certificates(source)?;

        let mut store = RootCertStore::empty();
        let mut certs = Vec::with_capacity(der.len());
        for cert in der {
            certs.push(Certificate::from_der(&cert)?);
            store.add(cert).map_err(|e| {
                CommuniqueError::Certificate(format!("bad trust anchor in {source}: {e}"))
            })?;
        }

        Ok(Some(TrustAnchors {
            store: Arc::new(store),
            certs,
        }))
    }

    /// The DH parameters file must exist and hold a DH PARAMETERS block.
    /// Key exchange is ECDHE only, so the values themselves are not used.
    pub(crate) fn check_dh_params(&self) -> Result<()> {
        let Some(source) = &self.dh_params else {
            return Ok(());
        };
        let bytes = source.load()?;
        let found = Pem::iter_from_buffer(&bytes)
            .filter_map(|p| p.ok())
            .any(|p| p.label == "DH PARAMETERS");
        if !found {
            return Err(CommuniqueError::Certificate(format!(
                "no DH PARAMETERS block in {source}"
            )));
        }
        tracing::debug!(%source, "DH parameters accepted; key exchange is ECDHE only");
        Ok(())
    }
}

/// Parsed verify source: the rustls store plus our own view of each anchor
/// (used to complete the chain handed to the policy callback).
#[derive(Debug, Clone)]
pub(crate) struct TrustAnchors {
    pub(crate) store: Arc<RootCertStore>,
    pub(crate) certs: Vec<Certificate>,
}

fn parse_certificates(source: &PemSource) -> Result<Vec<CertificateDer<'static>>> {
    let pem = source.load()?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CommuniqueError::Certificate(format!("bad certificate in {source}: {e}")))?;
    if certs.is_empty() {
        return Err(CommuniqueError::Certificate(format!(
            "no certificate found in {source}"
        )));
    }
    Ok(certs)
}

fn parse_private_key(source: &PemSource) -> Result<PrivateKeyDer<'static>> {
    let pem = source.load()?;
    PrivateKeyDer::from_pem_slice(&pem)
        .map_err(|e| CommuniqueError::Certificate(format!("bad private key in {source}: {e}")))
}
