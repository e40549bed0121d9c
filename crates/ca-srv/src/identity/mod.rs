//! Identity certificate cache.
//!
//! Holds the certificate this server presents in TLS handshakes and renews
//! it through the CSR generator and signing backend when it gets close to
//! expiry. Every handshake calls [`IdentityCache::get_certificate`].
//!
//! Refreshes are single-flight: while one is running, other callers wait on
//! it and reuse its outcome, whether that is a new certificate or a failure.
//! The held certificate is an `Arc` swapped only after it is fully built.

mod certificate;

pub use certificate::{IdentityCertificate, LeafInfo};

use ca_core::{CertOptions, CsrGenerator, SigningBackend};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Result, SrvError};

/// When and how the identity certificate gets renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Renew once `not_after - refresh_buffer <= now`.
    pub refresh_buffer: Duration,
    /// Upper bound on one refresh, CSR generation included.
    pub refresh_timeout: Duration,
    /// After a failure, callers fail fast for this long. Zero retries on the
    /// next call.
    pub failure_backoff: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(30),
            failure_backoff: Duration::ZERO,
        }
    }
}

/// Result of the most recent refresh.
enum FlightOutcome {
    Issued(Arc<IdentityCertificate>),
    Failed { at: Instant, reason: String },
}

/// Lazily refreshed, shareable holder of the server's identity certificate.
pub struct IdentityCache {
    hostname: String,
    org: Option<String>,
    generator: Arc<dyn CsrGenerator>,
    backend: Arc<dyn SigningBackend>,
    policy: RefreshPolicy,
    current: RwLock<Option<Arc<IdentityCertificate>>>,
    /// Held for the whole duration of a refresh.
    flight: Mutex<Option<FlightOutcome>>,
    /// Number of completed refreshes, successful or not.
    flights: AtomicU64,
}

impl IdentityCache {
    /// Create an empty cache for `hostname`.
    pub fn new(
        hostname: impl Into<String>,
        generator: Arc<dyn CsrGenerator>,
        backend: Arc<dyn SigningBackend>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            org: None,
            generator,
            backend,
            policy,
            current: RwLock::new(None),
            flight: Mutex::new(None),
            flights: AtomicU64::new(0),
        }
    }

    /// Hostname placed in the identity certificate.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Put `org` in the subject of every identity certificate.
    #[must_use]
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    /// The certificate currently held, fresh or not.
    pub fn current(&self) -> Option<Arc<IdentityCertificate>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of refreshes that have run to completion, failed ones included.
    pub fn refreshes(&self) -> u64 {
        self.flights.load(Ordering::Acquire)
    }

    /// Return a certificate fit to present now, refreshing it if needed.
    ///
    /// Fails with [`SrvError::CertificateUnavailable`] when a refresh is
    /// needed and cannot complete. A stale certificate stays held after a
    /// failure so that the next call retries.
    pub async fn get_certificate(&self) -> Result<Arc<IdentityCertificate>> {
        if let Some(cert) = self.fresh() {
            return Ok(cert);
        }

        let observed = self.flights.load(Ordering::Acquire);
        let mut last = self.flight.lock().await;

        if let Some(cert) = self.fresh() {
            return Ok(cert);
        }

        // A refresh completed while this call was waiting: share its outcome.
        if self.flights.load(Ordering::Acquire) != observed {
            match last.as_ref() {
                Some(FlightOutcome::Issued(cert)) => return Ok(Arc::clone(cert)),
                Some(FlightOutcome::Failed { reason, .. }) => {
                    return Err(SrvError::CertificateUnavailable(reason.clone()));
                }
                None => {}
            }
        }

        if let Some(FlightOutcome::Failed { at, reason }) = last.as_ref() {
            if at.elapsed() < self.policy.failure_backoff {
                debug!(host = %self.hostname, "identity refresh backing off");
                return Err(SrvError::CertificateUnavailable(format!(
                    "backing off after failed refresh: {reason}"
                )));
            }
        }

        let result = match self.refresh().await {
            Ok(cert) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&cert));
                *last = Some(FlightOutcome::Issued(Arc::clone(&cert)));
                Ok(cert)
            }
            Err(e) => {
                warn!(host = %self.hostname, error = %e, "identity refresh failed");
                *last = Some(FlightOutcome::Failed {
                    at: Instant::now(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        };
        self.flights.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// The held certificate if it passes the freshness check.
    fn fresh(&self) -> Option<Arc<IdentityCertificate>> {
        self.current()
            .filter(|cert| !cert.needs_refresh(Utc::now(), self.policy.refresh_buffer))
    }

    async fn refresh(&self) -> Result<Arc<IdentityCertificate>> {
        info!(host = %self.hostname, "refreshing identity certificate");
        let timeout = self.policy.refresh_timeout;

        let cert = tokio::time::timeout(timeout, self.issue())
            .await
            .map_err(|_| {
                SrvError::CertificateUnavailable(format!("refresh timed out after {timeout:?}"))
            })??;

        match cert.leaf() {
            Some(leaf) => {
                if cert.needs_refresh(Utc::now(), self.policy.refresh_buffer) {
                    warn!(
                        not_after = %leaf.not_after,
                        "issued identity certificate already falls inside the refresh buffer"
                    );
                }
                info!(
                    host = %self.hostname,
                    serial = %leaf.serial,
                    not_after = %leaf.not_after,
                    "identity certificate refreshed"
                );
            }
            None => warn!(host = %self.hostname, "identity certificate refreshed without leaf metadata"),
        }

        Ok(Arc::new(cert))
    }

    /// Generate a CSR, have it signed and combine the result with the key.
    async fn issue(&self) -> Result<IdentityCertificate> {
        let mut options = CertOptions::new(self.hostname.clone());
        if let Some(org) = &self.org {
            options = options.with_org(org.clone());
        }
        let generator = Arc::clone(&self.generator);

        let bundle = tokio::task::spawn_blocking(move || generator.generate_csr(&options))
            .await
            .map_err(|e| unavailable(format!("CSR generation task failed: {e}")))?
            .map_err(|e| unavailable(format!("CSR generation failed: {e}")))?;

        let chain = self
            .backend
            .sign(&bundle.csr_pem)
            .await
            .map_err(|e| unavailable(format!("signing failed: {e}")))?;

        IdentityCertificate::from_pem(chain, bundle.private_key_pem)
            .map_err(|e| unavailable(format!("unusable certificate: {e}")))
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("hostname", &self.hostname)
            .field("org", &self.org)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn unavailable(reason: String) -> SrvError {
    SrvError::CertificateUnavailable(reason)
}
