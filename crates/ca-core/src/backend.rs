//! Collaborator traits driven by the server.

use async_trait::async_trait;

use crate::{CertOptions, CsrBundle, Result};

/// The signing operation of a certificate authority.
///
/// Takes a PEM-encoded CSR and returns the PEM-encoded signed certificate
/// chain (leaf first). Policy checks and key custody stay behind this call.
/// Implementations must be reentrant: the server calls `sign` from many
/// tasks at once.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Sign a PEM-encoded CSR.
    async fn sign(&self, csr_pem: &[u8]) -> Result<Vec<u8>>;
}

/// Key pair creation plus PKCS#10 encoding.
///
/// Key generation is CPU bound, so callers on an async runtime should run
/// this on the blocking pool.
pub trait CsrGenerator: Send + Sync {
    /// Produce a PEM-encoded CSR and the matching PEM-encoded private key.
    fn generate_csr(&self, options: &CertOptions) -> Result<CsrBundle>;
}
