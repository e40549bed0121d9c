//! Server configuration for ca-srv.

use ca_authority::AuthorityOptions;
use ca_core::KeyAlgorithm;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::identity::RefreshPolicy;

/// Configuration for a CA front end node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,

    /// TCP port to serve on (default: 8060).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hostname placed in the server's own identity certificate.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Root CA bundle trusted when dialing a CA server.
    #[serde(default)]
    pub root_ca_path: Option<PathBuf>,

    /// Renew the identity certificate this long before it expires (seconds).
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_secs: u64,

    /// Upper bound on one identity refresh, CSR generation included (seconds).
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,

    /// After a failed refresh, fail handshakes fast for this long (seconds, 0 = off).
    #[serde(default)]
    pub refresh_backoff_secs: u64,

    /// Upper bound on signing a client's CSR (seconds).
    #[serde(default = "default_signing_timeout")]
    pub signing_timeout_secs: u64,

    /// A peer must finish the TLS handshake within this long (seconds).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Close HTTP/2 connections whose keepalive pings go unanswered, and
    /// bound each call, after this long (seconds).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Obtain the identity certificate at startup instead of on first handshake.
    #[serde(default)]
    pub prefetch_identity: bool,

    /// Local signing authority settings.
    #[serde(default)]
    pub authority: AuthorityConfig,
}

/// Settings for the in-process signing authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// CA certificate (PEM). A new CA is generated and saved here, with its
    /// key at `key_path`, when the file does not exist yet.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// Existing CA private key (PEM). Required with `cert_path`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Write the CA certificate here at startup so clients can trust it.
    #[serde(default)]
    pub export_root_path: Option<PathBuf>,

    /// Common name of a generated CA.
    #[serde(default = "default_ca_name")]
    pub ca_name: String,

    /// Organization of a generated CA.
    #[serde(default = "default_org")]
    pub org: String,

    /// Validity of a generated CA in days.
    #[serde(default = "default_ca_validity_days")]
    pub ca_validity_days: u32,

    /// Lifetime of issued certificates (seconds).
    #[serde(default = "default_cert_ttl")]
    pub cert_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            hostname: default_hostname(),
            root_ca_path: None,
            refresh_buffer_secs: default_refresh_buffer(),
            refresh_timeout_secs: default_refresh_timeout(),
            refresh_backoff_secs: 0,
            signing_timeout_secs: default_signing_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            prefetch_identity: false,
            authority: AuthorityConfig::default(),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            export_root_path: None,
            ca_name: default_ca_name(),
            org: default_org(),
            ca_validity_days: default_ca_validity_days(),
            cert_ttl_secs: default_cert_ttl(),
        }
    }
}

impl ServerConfig {
    /// Load and validate config from a TOML file, falling back to defaults.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it, falling back to defaults.
    ///
    /// Callers that layer overrides on top validate once afterwards.
    pub fn read(path: &std::path::Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::SrvError::Config(e.to_string()))
    }

    /// Replace the port and hostname with command line values, when given.
    pub fn apply_overrides(&mut self, port: Option<u16>, hostname: Option<String>) {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(hostname) = hostname {
            self.hostname = hostname;
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(crate::SrvError::Config("hostname must not be empty".into()));
        }
        if self.refresh_timeout_secs == 0
            || self.signing_timeout_secs == 0
            || self.handshake_timeout_secs == 0
            || self.idle_timeout_secs == 0
        {
            return Err(crate::SrvError::Config(
                "refresh, signing, handshake and idle timeouts must be positive".into(),
            ));
        }
        if self.idle_timeout_secs <= self.signing_timeout_secs {
            return Err(crate::SrvError::Config(format!(
                "idle_timeout_secs ({}) must exceed signing_timeout_secs ({})",
                self.idle_timeout_secs, self.signing_timeout_secs
            )));
        }
        if self.authority.cert_ttl_secs <= self.refresh_buffer_secs {
            return Err(crate::SrvError::Config(format!(
                "authority cert_ttl_secs ({}) must exceed refresh_buffer_secs ({})",
                self.authority.cert_ttl_secs, self.refresh_buffer_secs
            )));
        }
        if self.authority.cert_path.is_some() != self.authority.key_path.is_some() {
            return Err(crate::SrvError::Config(
                "authority cert_path and key_path must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Socket address to bind.
    pub const fn listen_socket(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.port)
    }

    /// Refresh policy for the identity certificate cache.
    pub const fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            refresh_buffer: Duration::from_secs(self.refresh_buffer_secs),
            refresh_timeout: Duration::from_secs(self.refresh_timeout_secs),
            failure_backoff: Duration::from_secs(self.refresh_backoff_secs),
        }
    }

    /// Upper bound on a client signing call.
    pub const fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing_timeout_secs)
    }

    /// Upper bound on a peer's TLS handshake.
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Keepalive and per-call bound for established connections.
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AuthorityConfig {
    /// Options for generating a self-signed authority.
    pub fn options(&self) -> AuthorityOptions {
        AuthorityOptions {
            ca_name: self.ca_name.clone(),
            org: self.org.clone(),
            ca_validity_days: self.ca_validity_days,
            cert_ttl: self.cert_ttl(),
            key_algorithm: KeyAlgorithm::EcdsaP256,
        }
    }

    /// Lifetime of issued certificates.
    pub const fn cert_ttl(&self) -> Duration {
        Duration::from_secs(self.cert_ttl_secs)
    }
}

// Default value functions for serde.
const fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    8060
}

fn default_hostname() -> String {
    String::from("localhost")
}

const fn default_refresh_buffer() -> u64 {
    60
}

const fn default_refresh_timeout() -> u64 {
    30
}

const fn default_signing_timeout() -> u64 {
    10
}

const fn default_handshake_timeout() -> u64 {
    10
}

const fn default_idle_timeout() -> u64 {
    60
}

fn default_ca_name() -> String {
    String::from("ca-srv Root CA")
}

fn default_org() -> String {
    String::from("ca-frontend")
}

const fn default_ca_validity_days() -> u32 {
    365
}

const fn default_cert_ttl() -> u64 {
    3600
}
