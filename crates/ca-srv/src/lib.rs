//! ca-srv: TLS front end of a certificate authority.
//!
//! Clients dial in over TLS and submit certificate signing requests, which
//! are forwarded to a signing backend. The server's own TLS identity is
//! issued through the same backend and renewed on demand.
//!
//! # Architecture
//!
//! - [`identity::IdentityCache`] holds the server certificate and refreshes it
//!   (single-flight) when it comes within the refresh buffer of expiry
//! - [`handler::CsrHandler`] implements the `HandleCSR` call
//! - [`server::CaServer`] binds the listener, draws each handshake's
//!   certificate from the cache and hands connections to the gRPC service
//! - [`client::CaClient`] dials a server trusting a root CA bundle
//!
//! # Wire format
//!
//! gRPC (`ca.v1.CertificateService/HandleCSR`) over HTTP/2 and TLS; see
//! [`proto`].

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod identity;
pub mod proto;
pub mod server;

#[cfg(test)]
mod test_support;

// Re-exports for convenience.
pub use client::CaClient;
pub use config::ServerConfig;
pub use error::SrvError;
pub use handler::CsrHandler;
pub use identity::{IdentityCache, IdentityCertificate, RefreshPolicy};
pub use server::{CaServer, ServeStatus, ServerHandle};

/// Result type for ca-srv operations.
pub type Result<T> = std::result::Result<T, SrvError>;
