//! Shared fixtures for unit tests.

use async_trait::async_trait;
use ca_authority::{AuthorityOptions, LocalAuthority, RcgenCsrGenerator};
use ca_core::{CaError, CertOptions, CsrBundle, CsrGenerator, KeyAlgorithm, SigningBackend};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::identity::IdentityCertificate;

/// A local authority issuing certificates that live `ttl`.
pub fn authority(ttl: Duration) -> LocalAuthority {
    LocalAuthority::self_signed(&AuthorityOptions {
        cert_ttl: ttl,
        ..AuthorityOptions::default()
    })
    .unwrap()
}

/// Issue an identity certificate for `host` directly.
pub fn issue_identity(host: &str, ttl: Duration) -> IdentityCertificate {
    let bundle = FastGenerator
        .generate_csr(&CertOptions::new(host))
        .unwrap();
    let chain = authority(ttl)
        .sign_csr_pem(std::str::from_utf8(&bundle.csr_pem).unwrap())
        .unwrap();
    IdentityCertificate::from_pem(chain.into_bytes(), bundle.private_key_pem).unwrap()
}

/// Generates ECDSA keys whatever the options ask for, so tests skip RSA.
#[derive(Default)]
pub struct FastGenerator;

impl CsrGenerator for FastGenerator {
    fn generate_csr(&self, options: &CertOptions) -> ca_core::Result<CsrBundle> {
        let options = options.clone().with_key_algorithm(KeyAlgorithm::EcdsaP256);
        RcgenCsrGenerator::new().generate_csr(&options)
    }
}

/// Delegates to a local authority and counts calls.
pub struct CountingBackend {
    inner: LocalAuthority,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: LocalAuthority) -> Self {
        Self::with_delay(inner, Duration::ZERO)
    }

    pub fn with_delay(inner: LocalAuthority, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningBackend for CountingBackend {
    async fn sign(&self, csr_pem: &[u8]) -> ca_core::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.sign(csr_pem).await
    }
}

/// Always returns the same key and CSR.
pub struct FixedGenerator(CsrBundle);

impl CsrGenerator for FixedGenerator {
    fn generate_csr(&self, _options: &CertOptions) -> ca_core::Result<CsrBundle> {
        Ok(self.0.clone())
    }
}

/// Answers every request with the same chain, issued for one fixed key.
pub struct StaticBackend {
    bundle: CsrBundle,
    chain: Vec<u8>,
    calls: AtomicUsize,
}

impl StaticBackend {
    pub fn new(inner: LocalAuthority) -> Self {
        let bundle = FastGenerator
            .generate_csr(&CertOptions::new("ca.example.internal"))
            .unwrap();
        let chain = inner
            .sign_csr_pem(std::str::from_utf8(&bundle.csr_pem).unwrap())
            .unwrap();
        Self {
            bundle,
            chain: chain.into_bytes(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed_chain(&self) -> Vec<u8> {
        self.chain.clone()
    }

    /// A generator handing out the key the fixed chain was issued for.
    pub fn generator(&self) -> FixedGenerator {
        FixedGenerator(self.bundle.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningBackend for StaticBackend {
    async fn sign(&self, _csr_pem: &[u8]) -> ca_core::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.clone())
    }
}

/// Fails the calls selected by `fails`, delegates the rest.
pub struct FlakyBackend {
    inner: LocalAuthority,
    fails: Box<dyn Fn(usize) -> bool + Send + Sync>,
    calls: AtomicUsize,
}

impl FlakyBackend {
    /// Fail the first `failures` calls.
    pub fn new(inner: LocalAuthority, failures: usize) -> Self {
        Self {
            inner,
            fails: Box::new(move |call| call < failures),
            calls: AtomicUsize::new(0),
        }
    }

    /// Succeed once, then fail every call.
    pub fn succeed_then_fail(inner: LocalAuthority) -> Self {
        Self {
            inner,
            fails: Box::new(|call| call >= 1),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningBackend for FlakyBackend {
    async fn sign(&self, csr_pem: &[u8]) -> ca_core::Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if (self.fails)(call) {
            return Err(CaError::Unavailable(format!("scripted failure on call {call}")));
        }
        self.inner.sign(csr_pem).await
    }
}

/// Always fails, optionally after a delay.
#[derive(Default)]
pub struct FailingBackend {
    delay: Duration,
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningBackend for FailingBackend {
    async fn sign(&self, _csr_pem: &[u8]) -> ca_core::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Err(CaError::Unavailable("authority offline".to_string()))
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowBackend {
    delay: Duration,
}

impl SlowBackend {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SigningBackend for SlowBackend {
    async fn sign(&self, _csr_pem: &[u8]) -> ca_core::Result<Vec<u8>> {
        tokio::time::sleep(self.delay).await;
        Err(CaError::Unavailable("too slow".to_string()))
    }
}
