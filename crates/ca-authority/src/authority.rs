//! Local signing authority.
//!
//! Holds a CA key pair in process memory and signs CSRs as short-lived
//! end-entity certificates. Suitable for development clusters and tests;
//! production deployments plug a remote authority in behind the same
//! [`SigningBackend`] trait.

use async_trait::async_trait;
use ca_core::{CaError, Result, SigningBackend};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

use crate::csr::generate_key_pair;
use crate::AuthorityOptions;

/// Backdate applied to `not_before` to absorb clock skew between peers.
const CLOCK_SKEW_ALLOWANCE: time::Duration = time::Duration::minutes(5);

/// An in-process certificate authority.
pub struct LocalAuthority {
    /// Key pair for signing
    key_pair: KeyPair,
    /// Issuer certificate handed to rcgen when signing
    certificate: Certificate,
    /// CA certificate as distributed to clients
    cert_pem: String,
    /// Lifetime of issued certificates
    cert_ttl: Duration,
}

impl LocalAuthority {
    /// Generate a fresh self-signed root.
    pub fn self_signed(options: &AuthorityOptions) -> Result<Self> {
        let key_pair = generate_key_pair(options.key_algorithm)?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, options.ca_name.as_str());
        dn.push(DnType::OrganizationName, options.org.as_str());
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - CLOCK_SKEW_ALLOWANCE;
        params.not_after = now + time::Duration::days(i64::from(options.ca_validity_days));
        params.serial_number = Some(random_serial().into());

        let certificate = params.self_signed(&key_pair).map_err(signing_error)?;
        let cert_pem = certificate.pem();

        info!(
            ca = %options.ca_name,
            algorithm = %options.key_algorithm,
            validity_days = options.ca_validity_days,
            "generated self-signed root"
        );

        Ok(Self {
            key_pair,
            certificate,
            cert_pem,
            cert_ttl: options.cert_ttl,
        })
    }

    /// Load an existing CA certificate and key from PEM.
    pub fn from_pem(cert_pem: &str, key_pem: &str, cert_ttl: Duration) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem).map_err(|e| CaError::Key(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| CaError::CertParse(e.to_string()))?;
        if !matches!(params.is_ca, IsCa::Ca(_)) {
            return Err(CaError::CertParse(
                "certificate is not marked as a CA".to_string(),
            ));
        }
        // rcgen needs a `Certificate` to sign with; only its subject and key
        // identifier end up in issued certificates.
        let certificate = params.self_signed(&key_pair).map_err(signing_error)?;

        Ok(Self {
            key_pair,
            certificate,
            cert_pem: cert_pem.to_string(),
            cert_ttl,
        })
    }

    /// Load an existing CA certificate and key from files.
    pub fn load_from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        cert_ttl: Duration,
    ) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        Self::from_pem(&cert_pem, &key_pem, cert_ttl)
    }

    /// Get the CA certificate PEM.
    pub fn root_cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Lifetime of issued certificates.
    pub const fn cert_ttl(&self) -> Duration {
        self.cert_ttl
    }

    /// Save to files.
    pub fn save_to_files(
        &self,
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
    ) -> Result<()> {
        std::fs::write(key_path, self.key_pair.serialize_pem())?;
        std::fs::write(cert_path, &self.cert_pem)?;
        Ok(())
    }

    /// Write only the CA certificate, for distribution to clients.
    pub fn export_root(&self, cert_path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(cert_path, &self.cert_pem)?;
        Ok(())
    }

    /// Sign a PEM-encoded CSR, returning the leaf followed by the CA certificate.
    pub fn sign_csr_pem(&self, csr_pem: &str) -> Result<String> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| CaError::InvalidCsr(e.to_string()))?;

        let subject = csr
            .params
            .distinguished_name
            .get(&DnType::CommonName)
            .map(|cn| match cn {
                DnValue::Utf8String(s) => s.clone(),
                other => format!("{other:?}"),
            });
        if csr.params.subject_alt_names.is_empty() && subject.is_none() {
            return Err(CaError::Rejected {
                reason: "CSR names no subject".to_string(),
            });
        }

        let ttl = time::Duration::try_from(self.cert_ttl)
            .map_err(|e| CaError::Signing(format!("certificate TTL out of range: {e}")))?;
        let now = OffsetDateTime::now_utc();
        let not_after = now
            .checked_add(ttl)
            .ok_or_else(|| CaError::Signing("certificate TTL out of range".to_string()))?;

        let serial = random_serial();
        let params = &mut csr.params;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_before = now - CLOCK_SKEW_ALLOWANCE;
        params.not_after = not_after;
        params.serial_number = Some(serial.into());

        let leaf = csr
            .signed_by(&self.certificate, &self.key_pair)
            .map_err(signing_error)?;

        info!(
            serial = %format!("{serial:016x}"),
            subject = subject.as_deref().unwrap_or("-"),
            not_after = %not_after,
            "signed certificate"
        );

        let mut chain = leaf.pem();
        if !chain.ends_with('\n') {
            chain.push('\n');
        }
        chain.push_str(&self.cert_pem);
        Ok(chain)
    }
}

#[async_trait]
impl SigningBackend for LocalAuthority {
    async fn sign(&self, csr_pem: &[u8]) -> Result<Vec<u8>> {
        let csr_pem = std::str::from_utf8(csr_pem)
            .map_err(|e| CaError::InvalidCsr(format!("CSR is not UTF-8: {e}")))?;
        self.sign_csr_pem(csr_pem).map(String::into_bytes)
    }
}

impl std::fmt::Debug for LocalAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthority")
            .field("cert_ttl", &self.cert_ttl)
            .finish_non_exhaustive()
    }
}

fn random_serial() -> u64 {
    // Top bit cleared so the DER integer stays positive without padding.
    rand::random::<u64>() >> 1
}

fn signing_error(e: rcgen::Error) -> CaError {
    CaError::Signing(e.to_string())
}
