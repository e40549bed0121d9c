//! gRPC bindings for the `ca.v1.CertificateService` API.

#![allow(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    unreachable_pub
)]

tonic::include_proto!("ca.v1");

impl From<ca_core::SigningRequest> for CsrRequest {
    fn from(request: ca_core::SigningRequest) -> Self {
        Self {
            csr_pem: request.csr_pem,
        }
    }
}

impl From<CsrRequest> for ca_core::SigningRequest {
    fn from(request: CsrRequest) -> Self {
        Self::new(request.csr_pem)
    }
}

impl From<ca_core::SigningResponse> for CsrResponse {
    fn from(response: ca_core::SigningResponse) -> Self {
        Self {
            is_approved: response.is_approved,
            signed_cert_chain: response.signed_cert_chain,
            refusal_reason: response.refusal_reason,
        }
    }
}

impl From<CsrResponse> for ca_core::SigningResponse {
    fn from(response: CsrResponse) -> Self {
        Self {
            is_approved: response.is_approved,
            signed_cert_chain: response.signed_cert_chain,
            refusal_reason: response.refusal_reason,
        }
    }
}
