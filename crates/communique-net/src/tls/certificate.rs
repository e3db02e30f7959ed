//! Parsed X.509 certificate.
//!
//! Everything is extracted once at construction; a `Certificate` owns plain
//! strings and timestamps and does not borrow the DER it came from.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid2abbrev, oid_registry};
use x509_parser::pem::Pem;
use x509_parser::x509::X509Name;

use communique_core::error::{CommuniqueError, Result};

use super::hostname;

/// Subject or issuer name, in certificate order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct DistinguishedName {
    oneline: String,
    by_name: BTreeMap<String, Vec<String>>,
}

impl DistinguishedName {
    fn from_x509(name: &X509Name<'_>) -> Self {
        let mut dn = DistinguishedName::default();
        for rdn in name.iter_rdn() {
            for attr in rdn.iter() {
                let oid = attr.attr_type();
                let short = oid2abbrev(oid, oid_registry())
                    .map(str::to_owned)
                    .unwrap_or_else(|_| oid.to_id_string());
                let value = match attr.as_str() {
                    Ok(s) => s.to_owned(),
                    Err(_) => String::from_utf8_lossy(attr.attr_value().data).into_owned(),
                };
                let _ = write!(dn.oneline, "/{short}={value}");
                dn.by_name.entry(short).or_default().push(value);
            }
        }
        dn
    }

    fn values(&self, name: &str) -> &[String] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    subject: DistinguishedName,
    issuer: DistinguishedName,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    alternate_names: Vec<String>,
}

impl Certificate {
    /// First CERTIFICATE block of a PEM buffer.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        for block in Pem::iter_from_buffer(pem) {
            let block =
                block.map_err(|e| CommuniqueError::Certificate(format!("bad PEM: {e}")))?;
            if block.label == "CERTIFICATE" {
                return Self::from_der(&block.contents);
            }
        }
        Err(CommuniqueError::Certificate(
            "no CERTIFICATE block in PEM input".into(),
        ))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CommuniqueError::Certificate(format!("bad X.509 certificate: {e}")))?;
        Self::from_x509(&cert)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| {
            CommuniqueError::Certificate(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    fn from_x509(cert: &X509Certificate<'_>) -> Result<Self> {
        let validity = cert.validity();

        let mut alternate_names = Vec::new();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| CommuniqueError::Certificate(format!("bad subjectAltName: {e}")))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    alternate_names.push((*dns).to_owned());
                }
            }
        }

        Ok(Self {
            subject: DistinguishedName::from_x509(cert.subject()),
            issuer: DistinguishedName::from_x509(cert.issuer()),
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
            alternate_names,
        })
    }

    /// One-line subject, e.g. `/C=AU/ST=Some-State/O=Test Server/CN=www.testserver.com`.
    pub fn subject(&self) -> &str {
        &self.subject.oneline
    }

    pub fn issuer(&self) -> &str {
        &self.issuer.oneline
    }

    /// All values of a subject RDN type (`"CN"`, `"OU"`, ...), in order.
    pub fn subject_rdn(&self, name: &str) -> &[String] {
        self.subject.values(name)
    }

    pub fn subject_rdn_at(&self, name: &str, index: usize) -> Option<&str> {
        self.subject.values(name).get(index).map(String::as_str)
    }

    pub fn subject_rdn_entries(&self, name: &str) -> usize {
        self.subject.values(name).len()
    }

    pub fn issuer_rdn(&self, name: &str) -> &[String] {
        self.issuer.values(name)
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Subject alternative DNS names.
    pub fn alternate_names(&self) -> &[String] {
        &self.alternate_names
    }

    pub fn date_is_valid(&self) -> bool {
        self.date_is_valid_at(OffsetDateTime::now_utc())
    }

    pub fn date_is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.not_before < now && now < self.not_after
    }

    /// Matches against every CN value and every DNS alternate name.
    pub fn hostname_matches(&self, host: &str) -> bool {
        let names = self
            .subject_rdn("CN")
            .iter()
            .chain(self.alternate_names.iter())
            .map(String::as_str);
        hostname::matches_any(host, names)
    }
}
