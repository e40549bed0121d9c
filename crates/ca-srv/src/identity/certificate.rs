//! The server's own TLS identity: chain, key and parsed leaf metadata.

use ca_core::CaError;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use rustls::sign::CertifiedKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Metadata parsed from the leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafInfo {
    /// Subject distinguished name (human-readable)
    pub subject: String,
    /// Serial number (hex)
    pub serial: String,
    /// Not valid before
    pub not_before: DateTime<Utc>,
    /// Not valid after
    pub not_after: DateTime<Utc>,
}

/// An immutable identity certificate ready to present in handshakes.
///
/// Never mutated after construction; a refresh builds a new value and swaps
/// the shared pointer.
pub struct IdentityCertificate {
    cert_chain_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
    leaf: Option<LeafInfo>,
    certified_key: Arc<CertifiedKey>,
}

impl IdentityCertificate {
    /// Combine a PEM certificate chain (leaf first) with its PEM private key.
    ///
    /// Fails with [`CaError::Key`] when the key does not belong to the leaf.
    pub fn from_pem(cert_chain_pem: Vec<u8>, private_key_pem: Vec<u8>) -> ca_core::Result<Self> {
        let chain: Vec<CertificateDer<'static>> = pem::parse_many(&cert_chain_pem)
            .map_err(|e| CaError::Pem(e.to_string()))?
            .into_iter()
            .filter(|p| p.tag() == "CERTIFICATE")
            .map(|p| CertificateDer::from(p.into_contents()))
            .collect();
        let Some(leaf_der) = chain.first() else {
            return Err(CaError::Pem("no CERTIFICATE block in chain".to_string()));
        };
        let leaf = parse_leaf(leaf_der);

        let key_der = parse_private_key(&private_key_pem)?;
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)
            .map_err(|e| CaError::Key(e.to_string()))?;

        let certified_key = CertifiedKey::new(chain, signing_key);
        certified_key
            .keys_match()
            .map_err(|e| CaError::Key(format!("key does not match leaf certificate: {e}")))?;

        Ok(Self {
            cert_chain_pem,
            private_key_pem,
            leaf,
            certified_key: Arc::new(certified_key),
        })
    }

    /// Parsed leaf metadata, if the leaf could be decoded.
    pub const fn leaf(&self) -> Option<&LeafInfo> {
        self.leaf.as_ref()
    }

    /// PEM certificate chain as issued.
    pub fn cert_chain_pem(&self) -> &[u8] {
        &self.cert_chain_pem
    }

    /// PEM private key matching the leaf.
    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }

    /// Chain and signing key in the form rustls presents.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// Whether this certificate must be replaced before use at `now`.
    ///
    /// Stale when the leaf could not be parsed, or when
    /// `not_after - refresh_buffer <= now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, refresh_buffer: Duration) -> bool {
        let Some(leaf) = &self.leaf else {
            return true;
        };
        let Ok(buffer) = TimeDelta::from_std(refresh_buffer) else {
            return true;
        };
        leaf.not_after
            .checked_sub_signed(buffer)
            .map_or(true, |deadline| deadline <= now)
    }
}

impl std::fmt::Debug for IdentityCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCertificate")
            .field("leaf", &self.leaf)
            .finish_non_exhaustive()
    }
}

fn parse_leaf(der: &CertificateDer<'_>) -> Option<LeafInfo> {
    let cert = match x509_parser::parse_x509_certificate(der.as_ref()) {
        Ok((_, cert)) => cert,
        Err(e) => {
            warn!(error = %e, "cannot parse identity leaf certificate");
            return None;
        }
    };
    Some(LeafInfo {
        subject: cert.subject().to_string(),
        serial: cert.raw_serial_as_string(),
        not_before: asn1_to_utc(cert.validity().not_before)?,
        not_after: asn1_to_utc(cert.validity().not_after)?,
    })
}

fn parse_private_key(key_pem: &[u8]) -> ca_core::Result<PrivateKeyDer<'static>> {
    let blocks = pem::parse_many(key_pem).map_err(|e| CaError::Pem(e.to_string()))?;
    for block in blocks {
        let key = match block.tag() {
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents())),
            "RSA PRIVATE KEY" => {
                PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(block.into_contents()))
            }
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(block.into_contents())),
            _ => continue,
        };
        return Ok(key);
    }
    Err(CaError::Key("no private key block found".to_string()))
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(t.timestamp(), 0).single()
}
