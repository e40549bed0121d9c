//! TLS listener: accepts connections, presents the cached identity and
//! hands finished handshakes to the gRPC service.

use ca_core::{CsrGenerator, SigningBackend};
use rustls::crypto::CryptoProvider;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::transport::Server;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::handler::CsrHandler;
use crate::identity::IdentityCache;
use crate::proto::certificate_service_server::CertificateServiceServer;
use crate::{Result, SrvError};

/// Handshaken connections waiting for the gRPC server to pick them up.
const CONNECTION_BACKLOG: usize = 64;

/// Lifecycle state of the accept loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeStatus {
    /// Accepting connections
    Serving,
    /// The accept loop exited and will not restart
    Terminated { reason: String },
}

/// A CA front end ready to be started.
pub struct CaServer {
    listen: SocketAddr,
    identity: Arc<IdentityCache>,
    handler: CsrHandler,
    prefetch_identity: bool,
    handshake_timeout: Duration,
    idle_timeout: Duration,
    provider: Arc<CryptoProvider>,
}

impl CaServer {
    pub fn new(listen: SocketAddr, identity: Arc<IdentityCache>, handler: CsrHandler) -> Self {
        Self {
            listen,
            identity,
            handler,
            prefetch_identity: false,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Wire a server from configuration. `backend` signs both the server's
    /// own identity and client CSRs.
    pub fn from_config(
        config: &ServerConfig,
        generator: Arc<dyn CsrGenerator>,
        backend: Arc<dyn SigningBackend>,
    ) -> Self {
        let identity = IdentityCache::new(
            config.hostname.clone(),
            generator,
            Arc::clone(&backend),
            config.refresh_policy(),
        )
        .with_org(config.authority.org.clone());
        let handler = CsrHandler::new(backend, config.signing_timeout());
        Self::new(config.listen_socket(), Arc::new(identity), handler)
            .with_prefetch_identity(config.prefetch_identity)
            .with_connection_timeouts(config.handshake_timeout(), config.idle_timeout())
    }

    /// Obtain the identity certificate in the background right after binding.
    #[must_use]
    pub fn with_prefetch_identity(mut self, prefetch: bool) -> Self {
        self.prefetch_identity = prefetch;
        self
    }

    /// Drop peers that do not finish the TLS handshake within `handshake`.
    /// Established connections get HTTP/2 keepalive pings and a per-call
    /// bound of `idle`.
    #[must_use]
    pub const fn with_connection_timeouts(mut self, handshake: Duration, idle: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.idle_timeout = idle;
        self
    }

    /// The identity cache handshakes draw from.
    pub const fn identity(&self) -> &Arc<IdentityCache> {
        &self.identity
    }

    /// Bind the listener and start serving in the background.
    ///
    /// Only a bind failure is reported here. Anything that later stops the
    /// accept loop shows up on [`ServerHandle::status`].
    pub async fn run(&self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|source| SrvError::BindFailure {
                addr: self.listen.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, host = %self.identity.hostname(), "ca-srv listening");

        if self.prefetch_identity {
            let identity = Arc::clone(&self.identity);
            tokio::spawn(async move {
                match identity.get_certificate().await {
                    Ok(_) => debug!("identity certificate prefetched"),
                    Err(e) => warn!(error = %e, "identity prefetch failed"),
                }
            });
        }

        let (status_tx, status_rx) = watch::channel(ServeStatus::Serving);
        let status_tx = Arc::new(status_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (conn_tx, conn_rx) = mpsc::channel(CONNECTION_BACKLOG);

        let handshakes = HandshakeContext {
            identity: Arc::clone(&self.identity),
            provider: Arc::clone(&self.provider),
            timeout: self.handshake_timeout,
        };
        tokio::spawn(accept_loop(
            listener,
            handshakes,
            conn_tx,
            shutdown_rx.clone(),
            Arc::clone(&status_tx),
        ));

        let router = Server::builder()
            .timeout(self.idle_timeout)
            .http2_keepalive_interval(Some(self.idle_timeout))
            .http2_keepalive_timeout(Some(self.idle_timeout))
            .add_service(CertificateServiceServer::new(self.handler.clone()));
        tokio::spawn(async move {
            let incoming = ReceiverStream::new(conn_rx).map(Ok::<_, std::io::Error>);
            let reason = match router
                .serve_with_incoming_shutdown(incoming, shutdown_requested(shutdown_rx))
                .await
            {
                Ok(()) => "grpc server stopped".to_string(),
                Err(e) => {
                    error!(error = %e, "grpc server failed");
                    format!("grpc server failed: {e}")
                }
            };
            terminate(&status_tx, reason);
        });

        Ok(ServerHandle {
            local_addr,
            status: status_rx,
            shutdown: shutdown_tx,
        })
    }
}

impl std::fmt::Debug for CaServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaServer")
            .field("listen", &self.listen)
            .field("identity", &self.identity)
            .field("prefetch_identity", &self.prefetch_identity)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Handle on a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    status: watch::Receiver<ServeStatus>,
    shutdown: watch::Sender<bool>,
}

impl ServerHandle {
    /// Address actually bound (resolves port 0).
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current state of the accept loop.
    pub fn status(&self) -> ServeStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<ServeStatus> {
        self.status.clone()
    }

    /// Stop accepting connections. Calls already in progress finish.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until the accept loop exits and return why.
    pub async fn wait_terminated(&self) -> SrvError {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            if let ServeStatus::Terminated { reason } = current {
                return SrvError::ServeTerminated(reason);
            }
            if status.changed().await.is_err() {
                return SrvError::ServeTerminated("accept loop exited".to_string());
            }
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the handle is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Publish the first reason the server stopped; later ones are dropped.
fn terminate(status: &watch::Sender<ServeStatus>, reason: String) {
    status.send_if_modified(|current| {
        if *current != ServeStatus::Serving {
            return false;
        }
        *current = ServeStatus::Terminated { reason };
        true
    });
}

/// What every handshake task needs.
#[derive(Clone)]
struct HandshakeContext {
    identity: Arc<IdentityCache>,
    provider: Arc<CryptoProvider>,
    timeout: Duration,
}

async fn accept_loop(
    listener: TcpListener,
    handshakes: HandshakeContext,
    connections: mpsc::Sender<TlsStream<TcpStream>>,
    shutdown: watch::Receiver<bool>,
    status: Arc<watch::Sender<ServeStatus>>,
) {
    let stop = shutdown_requested(shutdown);
    tokio::pin!(stop);

    let reason = loop {
        tokio::select! {
            () = &mut stop => {
                info!("shutdown requested, closing listener");
                terminate(&status, "shutdown requested".to_string());
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handshakes = handshakes.clone();
                    let connections = connections.clone();
                    tokio::spawn(async move {
                        match handshakes.accept(stream, peer).await {
                            Ok(tls) => {
                                if connections.send(tls).await.is_err() {
                                    debug!(peer = %peer, "server stopped before connection was served");
                                }
                            }
                            Err(e) => debug!(peer = %peer, error = %e, "tls handshake failed"),
                        }
                    });
                }
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "transient accept error");
                }
                Err(e) => break e.to_string(),
            },
        }
    };

    let err = SrvError::ServeTerminated(reason.clone());
    error!(error = %err, "ca-srv stopped accepting connections");
    terminate(&status, reason);
}

/// Accept errors caused by one peer rather than the listener.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

impl HandshakeContext {
    /// Run the server side of a TLS handshake with this connection's identity.
    ///
    /// The peer's reads and writes are bounded by the handshake timeout; the
    /// identity refresh is bounded by the cache's own refresh timeout.
    async fn accept(&self, stream: TcpStream, peer: SocketAddr) -> Result<TlsStream<TcpStream>> {
        let start = tokio::time::timeout(
            self.timeout,
            LazyConfigAcceptor::new(Acceptor::default(), stream),
        )
        .await
        .map_err(|_| SrvError::HandshakeTimeout(self.timeout))?
        .map_err(|e| SrvError::Tls(format!("reading ClientHello: {e}")))?;

        // Handshakes fail outright when no identity can be produced.
        let identity = match self.identity.get_certificate().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(peer = %peer, error = %e, "rejecting handshake");
                return Err(e);
            }
        };

        let tls_config = self.tls_config(identity.certified_key())?;
        let tls = tokio::time::timeout(self.timeout, start.into_stream(tls_config))
            .await
            .map_err(|_| SrvError::HandshakeTimeout(self.timeout))?
            .map_err(|e| SrvError::Tls(format!("handshake: {e}")))?;
        debug!(peer = %peer, "tls handshake completed");
        Ok(tls)
    }

    fn tls_config(&self, key: Arc<CertifiedKey>) -> Result<Arc<rustls::ServerConfig>> {
        let mut config = rustls::ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| SrvError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(IdentityResolver(key)));
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(Arc::new(config))
    }
}

/// Presents the identity chosen for this handshake.
#[derive(Debug)]
struct IdentityResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for IdentityResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{authority, CountingBackend, FastGenerator};
    use crate::RefreshPolicy;
    use tokio::io::AsyncReadExt;

    fn server(backend: Arc<CountingBackend>, handshake_timeout: Duration) -> CaServer {
        let identity = Arc::new(IdentityCache::new(
            "localhost",
            Arc::new(FastGenerator),
            backend.clone(),
            RefreshPolicy::default(),
        ));
        CaServer::new(
            "127.0.0.1:0".parse().unwrap(),
            identity,
            CsrHandler::new(backend, Duration::from_secs(5)),
        )
        .with_connection_timeouts(handshake_timeout, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_silent_peer_is_disconnected() {
        let backend = Arc::new(CountingBackend::new(authority(Duration::from_secs(3600))));
        let handle = server(backend.clone(), Duration::from_millis(200))
            .run()
            .await
            .unwrap();

        let mut peer = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .expect("server kept a silent peer open");

        // EOF or reset: either way the server hung up.
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(backend.calls(), 0);
        assert_eq!(handle.status(), ServeStatus::Serving);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_first_termination_reason_wins() {
        let (status, observed) = watch::channel(ServeStatus::Serving);
        terminate(&status, "listener failed".to_string());
        terminate(&status, "grpc server stopped".to_string());

        assert_eq!(
            *observed.borrow(),
            ServeStatus::Terminated {
                reason: "listener failed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dropped_handle_never_requests_shutdown() {
        let (shutdown, rx) = watch::channel(false);
        drop(shutdown);
        let stopped = tokio::time::timeout(Duration::from_millis(100), shutdown_requested(rx)).await;
        assert!(stopped.is_err());

        let (shutdown, rx) = watch::channel(false);
        shutdown.send_replace(true);
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_millis(100), shutdown_requested(rx)).await
        );
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::ConnectionAborted)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::PermissionDenied)));
    }
}
