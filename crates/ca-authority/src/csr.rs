//! CSR generation.
//!
//! Produces a PKCS#10 request and its private key for a host. The server
//! uses this to obtain its own identity certificate.

use ca_core::{CaError, CertOptions, CsrBundle, CsrGenerator, KeyAlgorithm, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use tracing::debug;

/// [`CsrGenerator`] backed by rcgen.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenCsrGenerator;

impl RcgenCsrGenerator {
    /// Create a new generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CsrGenerator for RcgenCsrGenerator {
    fn generate_csr(&self, options: &CertOptions) -> Result<CsrBundle> {
        let key_pair = generate_key_pair(options.key_algorithm)?;

        let mut params = CertificateParams::new(vec![options.host.clone()])
            .map_err(|e| CaError::CsrGeneration(format!("invalid host {}: {e}", options.host)))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, options.host.as_str());
        if let Some(org) = &options.org {
            dn.push(DnType::OrganizationName, org.as_str());
        }
        params.distinguished_name = dn;

        let csr_pem = params
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| CaError::CsrGeneration(e.to_string()))?;

        debug!(host = %options.host, algorithm = %options.key_algorithm, "generated CSR");

        Ok(CsrBundle {
            csr_pem: csr_pem.into_bytes(),
            private_key_pem: key_pair.serialize_pem().into_bytes(),
        })
    }
}

/// Generate a key pair for the given algorithm.
pub(crate) fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair> {
    let key_pair = match algorithm {
        KeyAlgorithm::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
        KeyAlgorithm::EcdsaP384 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384),
        KeyAlgorithm::Rsa { bits } => {
            let bits = usize::try_from(bits)
                .map_err(|_| CaError::CsrGeneration(format!("unsupported RSA size {bits}")))?;
            let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
                .map_err(|e| CaError::CsrGeneration(format!("RSA key generation: {e}")))?;
            let pem = key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CaError::CsrGeneration(format!("RSA key encoding: {e}")))?;
            KeyPair::from_pem(&pem)
        }
    };
    key_pair.map_err(|e| CaError::CsrGeneration(e.to_string()))
}
