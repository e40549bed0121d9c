use thiserror::Error;

/// Result type alias for collaborator operations
pub type Result<T> = std::result::Result<T, CaError>;

/// Errors raised by the CSR generator and the signing backend
#[derive(Error, Debug)]
pub enum CaError {
    /// Key pair creation or CSR encoding failed
    #[error("CSR generation failed: {0}")]
    CsrGeneration(String),

    /// The CSR could not be decoded
    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    /// The authority refused to sign the request
    #[error("signing rejected: {reason}")]
    Rejected {
        /// Why the authority refused
        reason: String,
    },

    /// The authority failed while signing
    #[error("signing failed: {0}")]
    Signing(String),

    /// The authority cannot be reached
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),

    /// PEM input was malformed
    #[error("PEM decode error: {0}")]
    Pem(String),

    /// A certificate could not be parsed
    #[error("certificate parse error: {0}")]
    CertParse(String),

    /// A private key could not be loaded or used
    #[error("key error: {0}")]
    Key(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaError {
    /// Returns true if the failure is a policy decision rather than a fault
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::InvalidCsr(_))
    }

    /// Returns true if retrying the same call later may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}
