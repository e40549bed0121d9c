//! Client for the CA front end, as used by node agents.
//!
//! Dials the server over TLS, trusting only the roots in a PEM bundle, and
//! issues `HandleCSR` calls over one HTTP/2 channel.

use ca_core::{SigningRequest, SigningResponse};
use std::path::Path;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::proto::certificate_service_client::CertificateServiceClient;
use crate::{Result, SrvError};

/// An open channel to a CA server.
#[derive(Debug, Clone)]
pub struct CaClient {
    inner: CertificateServiceClient<Channel>,
}

impl CaClient {
    /// Connect to `addr` (`host:port`), verifying the server as
    /// `server_name` against the roots in `root_ca_pem`.
    pub async fn connect(addr: &str, server_name: &str, root_ca_pem: &[u8]) -> Result<Self> {
        check_roots(root_ca_pem)?;
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(root_ca_pem))
            .domain_name(server_name);

        let channel = Endpoint::from_shared(format!("https://{addr}"))?
            .tls_config(tls)?
            .connect()
            .await?;
        debug!(addr, server_name, "connected to CA server");

        Ok(Self {
            inner: CertificateServiceClient::new(channel),
        })
    }

    /// Connect trusting the root CA bundle stored at `root_ca_path`.
    pub async fn connect_with_root_file(
        addr: &str,
        server_name: &str,
        root_ca_path: &Path,
    ) -> Result<Self> {
        let pem = tokio::fs::read(root_ca_path).await.map_err(|e| {
            SrvError::Config(format!("cannot read root CA {}: {e}", root_ca_path.display()))
        })?;
        Self::connect(addr, server_name, &pem).await
    }

    /// Have the server sign a CSR.
    ///
    /// An error status from the server surfaces as [`SrvError::Rpc`].
    pub async fn handle_csr(&mut self, request: SigningRequest) -> Result<SigningResponse> {
        let response = self.inner.handle_csr(tonic::Request::new(request.into())).await?;
        Ok(response.into_inner().into())
    }
}

/// Reject bundles without a parseable certificate.
fn check_roots(root_ca_pem: &[u8]) -> Result<()> {
    let blocks = pem::parse_many(root_ca_pem).map_err(|e| SrvError::Tls(e.to_string()))?;
    let mut certs = 0;
    for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
        x509_parser::parse_x509_certificate(block.contents())
            .map_err(|e| SrvError::Tls(format!("bad root certificate: {e}")))?;
        certs += 1;
    }
    if certs == 0 {
        return Err(SrvError::Tls("no root certificates in bundle".to_string()));
    }
    Ok(())
}
