//! Error types for the CA front end.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in ca-srv operations.
#[derive(Error, Debug)]
pub enum SrvError {
    /// The listening socket could not be acquired.
    #[error("cannot listen on {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No usable identity certificate could be produced for a handshake.
    #[error("identity certificate unavailable: {0}")]
    CertificateUnavailable(String),

    /// The signing backend failed a client's CSR.
    #[error("signing failed: {0}")]
    SigningFailure(#[source] ca_core::CaError),

    /// The signing backend did not answer in time.
    #[error("signing timed out after {0:?}")]
    SigningTimeout(Duration),

    /// The serve loop exited; the service no longer takes connections.
    #[error("serve loop terminated: {0}")]
    ServeTerminated(String),

    /// A peer did not complete the TLS handshake in time.
    #[error("tls handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(String),

    /// TLS setup or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Channel setup or connection failure on the client side.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The server answered a call with an error status.
    #[error("remote error ({}): {}", .0.code(), .0.message())]
    Rpc(#[from] tonic::Status),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SrvError> for tonic::Status {
    fn from(err: SrvError) -> Self {
        let message = err.to_string();
        match err {
            SrvError::SigningFailure(e) if e.is_rejection() => Self::invalid_argument(message),
            SrvError::SigningFailure(e) if e.is_retryable() => Self::unavailable(message),
            SrvError::SigningTimeout(_) => Self::deadline_exceeded(message),
            SrvError::Rpc(status) => status,
            _ => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_core::CaError;
    use tonic::Code;

    #[test]
    fn test_status_codes() {
        let rejected = SrvError::SigningFailure(CaError::InvalidCsr("garbage".into()));
        assert_eq!(tonic::Status::from(rejected).code(), Code::InvalidArgument);

        let offline = SrvError::SigningFailure(CaError::Unavailable("down".into()));
        assert_eq!(tonic::Status::from(offline).code(), Code::Unavailable);

        let failed = SrvError::SigningFailure(CaError::Signing("bad key".into()));
        assert_eq!(tonic::Status::from(failed).code(), Code::Internal);

        let timeout = SrvError::SigningTimeout(Duration::from_secs(5));
        assert_eq!(timeout.to_string(), "signing timed out after 5s");
        assert_eq!(tonic::Status::from(timeout).code(), Code::DeadlineExceeded);
    }

    #[test]
    fn test_status_keeps_message() {
        let status = tonic::Status::from(SrvError::SigningFailure(CaError::Unavailable(
            "authority offline".into(),
        )));
        assert!(status.message().contains("authority offline"));
    }
}
