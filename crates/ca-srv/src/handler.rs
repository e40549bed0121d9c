//! The `HandleCSR` call: forward a client's CSR to the signing backend.

use ca_core::{SigningBackend, SigningRequest, SigningResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::proto::certificate_service_server::CertificateService;
use crate::proto::{CsrRequest, CsrResponse};
use crate::{Result, SrvError};

/// Signs client CSRs through the configured backend.
#[derive(Clone)]
pub struct CsrHandler {
    backend: Arc<dyn SigningBackend>,
    signing_timeout: Duration,
}

impl CsrHandler {
    pub fn new(backend: Arc<dyn SigningBackend>, signing_timeout: Duration) -> Self {
        Self {
            backend,
            signing_timeout,
        }
    }

    /// Sign the CSR carried by `request`.
    ///
    /// The backend's chain is returned unmodified in an approved response.
    /// Backend errors surface as [`SrvError::SigningFailure`] and a slow
    /// backend as [`SrvError::SigningTimeout`]; no refusal response is
    /// fabricated for either.
    pub async fn handle_csr(&self, request: SigningRequest) -> Result<SigningResponse> {
        debug!(csr_len = request.csr_pem.len(), "signing client CSR");

        let signed = tokio::time::timeout(self.signing_timeout, self.backend.sign(&request.csr_pem))
            .await
            .map_err(|_| {
                warn!(timeout = ?self.signing_timeout, "signing backend timed out");
                SrvError::SigningTimeout(self.signing_timeout)
            })?;

        match signed {
            Ok(chain) => Ok(SigningResponse::approved(chain)),
            Err(e) => {
                warn!(error = %e, "failed to sign client CSR");
                Err(SrvError::SigningFailure(e))
            }
        }
    }
}

#[tonic::async_trait]
impl CertificateService for CsrHandler {
    async fn handle_csr(
        &self,
        request: tonic::Request<CsrRequest>,
    ) -> std::result::Result<tonic::Response<CsrResponse>, tonic::Status> {
        let response = CsrHandler::handle_csr(self, request.into_inner().into()).await?;
        Ok(tonic::Response::new(response.into()))
    }
}

impl std::fmt::Debug for CsrHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrHandler")
            .field("signing_timeout", &self.signing_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{authority, FailingBackend, FastGenerator, SlowBackend, StaticBackend};
    use ca_core::{CertOptions, CsrGenerator};
    use tonic::Code;

    fn client_csr() -> Vec<u8> {
        FastGenerator
            .generate_csr(&CertOptions::new("client.example.internal"))
            .unwrap()
            .csr_pem
    }

    #[tokio::test]
    async fn test_returns_backend_chain_verbatim() {
        let backend = Arc::new(StaticBackend::new(authority(Duration::from_secs(3600))));
        let handler = CsrHandler::new(backend.clone(), Duration::from_secs(5));

        let response = handler
            .handle_csr(SigningRequest::new(client_csr()))
            .await
            .unwrap();

        assert!(response.is_approved);
        assert_eq!(response.signed_cert_chain, backend.fixed_chain());
        assert!(response.refusal_reason.is_none());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_signs_with_local_authority() {
        let handler = CsrHandler::new(
            Arc::new(authority(Duration::from_secs(3600))),
            Duration::from_secs(5),
        );
        let response = handler
            .handle_csr(SigningRequest::new(client_csr()))
            .await
            .unwrap();

        let chain = String::from_utf8(response.signed_cert_chain).unwrap();
        assert_eq!(chain.matches("-----BEGIN CERTIFICATE-----").count(), 2);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = Arc::new(FailingBackend::default());
        let handler = CsrHandler::new(backend.clone(), Duration::from_secs(5));

        let err = handler
            .handle_csr(SigningRequest::new(client_csr()))
            .await
            .unwrap_err();

        assert!(matches!(err, SrvError::SigningFailure(_)));
        assert_eq!(tonic::Status::from(err).code(), Code::Unavailable);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_csr_is_invalid_argument() {
        let handler = CsrHandler::new(
            Arc::new(authority(Duration::from_secs(3600))),
            Duration::from_secs(5),
        );
        let err = handler
            .handle_csr(SigningRequest::new(b"not a csr".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(tonic::Status::from(err).code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let handler = CsrHandler::new(
            Arc::new(SlowBackend::new(Duration::from_secs(10))),
            Duration::from_millis(100),
        );
        let err = handler
            .handle_csr(SigningRequest::new(client_csr()))
            .await
            .unwrap_err();
        assert!(matches!(err, SrvError::SigningTimeout(_)));
    }

    #[tokio::test]
    async fn test_service_answers_with_protobuf_response() {
        let backend = Arc::new(StaticBackend::new(authority(Duration::from_secs(3600))));
        let handler = CsrHandler::new(backend.clone(), Duration::from_secs(5));

        let request = tonic::Request::new(CsrRequest {
            csr_pem: client_csr(),
        });
        let response = CertificateService::handle_csr(&handler, request)
            .await
            .unwrap()
            .into_inner();

        assert!(response.is_approved);
        assert_eq!(response.signed_cert_chain, backend.fixed_chain());
        assert!(response.refusal_reason.is_none());
    }

    #[tokio::test]
    async fn test_service_maps_timeout_to_deadline_exceeded() {
        let handler = CsrHandler::new(
            Arc::new(SlowBackend::new(Duration::from_secs(10))),
            Duration::from_millis(100),
        );
        let request = tonic::Request::new(CsrRequest {
            csr_pem: client_csr(),
        });
        let status = CertificateService::handle_csr(&handler, request)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }
}
