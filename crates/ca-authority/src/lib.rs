//! # ca-authority
//!
//! In-process certificate authority for the CA front end.
//!
//! ## Pieces
//!
//! ```text
//! RcgenCsrGenerator   key pair + PKCS#10 request for a host
//!        │
//!        ▼
//! LocalAuthority      self-signed (or loaded) CA, signs CSRs as
//!                     short-lived end-entity certificates
//! ```
//!
//! Both implement the collaborator traits from `ca-core`, so the server can
//! drive them exactly as it would drive a remote authority.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ca_authority::{AuthorityOptions, LocalAuthority, RcgenCsrGenerator};
//! use ca_core::{CertOptions, CsrGenerator, SigningBackend};
//!
//! let ca = LocalAuthority::self_signed(&AuthorityOptions::default())?;
//! let bundle = RcgenCsrGenerator::new().generate_csr(&CertOptions::new("svc.local"))?;
//! let chain = ca.sign(&bundle.csr_pem).await?;
//! ```

mod authority;
mod csr;

pub use authority::LocalAuthority;
pub use csr::RcgenCsrGenerator;

use ca_core::KeyAlgorithm;
use std::time::Duration;

/// Default lifetime of issued certificates: one hour.
pub const DEFAULT_CERT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of a generated root: one year.
pub const DEFAULT_CA_VALIDITY_DAYS: u32 = 365;

/// Settings for generating a self-signed authority.
#[derive(Debug, Clone)]
pub struct AuthorityOptions {
    /// Common name of the CA certificate
    pub ca_name: String,
    /// Organization of the CA certificate
    pub org: String,
    /// Validity of the CA certificate in days
    pub ca_validity_days: u32,
    /// Lifetime of issued certificates
    pub cert_ttl: Duration,
    /// Key algorithm of the CA key
    pub key_algorithm: KeyAlgorithm,
}

impl Default for AuthorityOptions {
    fn default() -> Self {
        Self {
            ca_name: "Local Root CA".to_string(),
            org: "ca-frontend".to_string(),
            ca_validity_days: DEFAULT_CA_VALIDITY_DAYS,
            cert_ttl: DEFAULT_CERT_TTL,
            key_algorithm: KeyAlgorithm::EcdsaP256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = AuthorityOptions::default();
        assert_eq!(opts.cert_ttl, Duration::from_secs(3600));
        assert_eq!(opts.ca_validity_days, 365);
        assert_eq!(opts.key_algorithm, KeyAlgorithm::EcdsaP256);
    }
}
