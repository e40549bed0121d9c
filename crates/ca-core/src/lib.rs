//! Core types and traits for the certificate authority front end.
//!
//! This crate provides the foundational pieces shared by the authority and
//! the server:
//!
//! - **Types**: CSR options, signing requests and responses
//! - **Traits**: the two collaborators the server drives, [`SigningBackend`]
//!   and [`CsrGenerator`]
//! - **Errors**: collaborator failures as [`CaError`]
//!
//! # Example
//!
//! ```rust,ignore
//! use ca_core::{CertOptions, CsrGenerator, SigningBackend};
//!
//! async fn issue(gen: &dyn CsrGenerator, ca: &dyn SigningBackend) -> ca_core::Result<Vec<u8>> {
//!     let bundle = gen.generate_csr(&CertOptions::new("ca.example.internal"))?;
//!     ca.sign(&bundle.csr_pem).await
//! }
//! ```

mod backend;
mod error;
pub mod types;

pub use backend::{CsrGenerator, SigningBackend};
pub use error::{CaError, Result};
pub use types::*;
