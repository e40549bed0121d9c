use serde::{Deserialize, Serialize};

/// A client's certificate signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// PEM-encoded CSR, forwarded to the authority as is
    #[serde(with = "base64_bytes")]
    pub csr_pem: Vec<u8>,
}

impl SigningRequest {
    /// Wrap raw CSR bytes
    #[must_use]
    pub fn new(csr_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            csr_pem: csr_pem.into(),
        }
    }
}

/// The answer to a [`SigningRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningResponse {
    /// Whether the request was approved and signed
    pub is_approved: bool,

    /// PEM-encoded certificate chain, leaf first; empty when refused
    #[serde(with = "base64_bytes", default)]
    pub signed_cert_chain: Vec<u8>,

    /// Reason for refusal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<String>,
}

impl SigningResponse {
    /// An approved response carrying the signed chain
    #[must_use]
    pub const fn approved(signed_cert_chain: Vec<u8>) -> Self {
        Self {
            is_approved: true,
            signed_cert_chain,
            refusal_reason: None,
        }
    }
}

/// Serde adapter encoding byte fields as standard base64 strings
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bytes_are_base64() {
        let request = SigningRequest::new(b"-----BEGIN CERTIFICATE REQUEST-----".to_vec());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["csr_pem"],
            "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURSBSRVFVRVNULS0tLS0="
        );
    }

    #[test]
    fn test_approved_response_shape() {
        let response = SigningResponse::approved(b"CERT".to_vec());
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("refusal_reason"));

        let parsed: SigningResponse = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_approved);
        assert_eq!(parsed.signed_cert_chain, b"CERT");
    }

    #[test]
    fn test_refused_response_without_chain() {
        let parsed: SigningResponse =
            serde_json::from_str(r#"{"is_approved": false, "refusal_reason": "denied"}"#).unwrap();
        assert!(!parsed.is_approved);
        assert!(parsed.signed_cert_chain.is_empty());
        assert_eq!(parsed.refusal_reason.as_deref(), Some("denied"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let result: Result<SigningRequest, _> = serde_json::from_str(r#"{"csr_pem": "%%%"}"#);
        assert!(result.is_err());
    }
}
