//! ca-srv - certificate authority front end.
//!
//! `ca-srv` serves CSR signing over gRPC and TLS; `ca-srv request` asks a running
//! server for a certificate.

use anyhow::{Context, Result};
use ca_authority::{LocalAuthority, RcgenCsrGenerator};
use ca_core::{CertOptions, CsrGenerator, SigningRequest};
use ca_srv::config::AuthorityConfig;
use ca_srv::{CaClient, CaServer, ServerConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// TLS front end of a certificate authority.
#[derive(Parser, Debug)]
#[command(name = "ca-srv")]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, env = "CA_SRV_CONFIG", default_value = "ca-srv.toml")]
    config: PathBuf,

    /// Override the listening port.
    #[arg(short = 'p', long, env = "CA_SRV_PORT")]
    port: Option<u16>,

    /// Override the hostname in the server's identity certificate.
    #[arg(long, env = "CA_SRV_HOSTNAME")]
    hostname: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve CSR signing (default).
    Serve,
    /// Request a certificate from a running server.
    Request {
        /// Host the certificate is for.
        #[arg(long)]
        host: String,

        /// Server address, e.g. 127.0.0.1:8060.
        #[arg(long)]
        addr: String,

        /// Name to verify the server certificate against. Defaults to the
        /// configured hostname.
        #[arg(long)]
        server_name: Option<String>,

        /// Root CA bundle. Defaults to `root_ca_path` from the config.
        #[arg(long)]
        root_ca: Option<PathBuf>,

        /// Where to write the issued chain.
        #[arg(long, default_value = "cert.pem")]
        cert_out: PathBuf,

        /// Where to write the private key.
        #[arg(long, default_value = "key.pem")]
        key_out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::read(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    config.apply_overrides(args.port, args.hostname);
    config.validate()?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Request {
            host,
            addr,
            server_name,
            root_ca,
            cert_out,
            key_out,
        } => {
            let root_ca = root_ca
                .or_else(|| config.root_ca_path.clone())
                .context("no root CA: pass --root-ca or set root_ca_path")?;
            let server_name = server_name.unwrap_or_else(|| config.hostname.clone());
            request(&host, &addr, &server_name, &root_ca, &cert_out, &key_out).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let authority = build_authority(&config.authority)?;
    let server = CaServer::from_config(
        &config,
        Arc::new(RcgenCsrGenerator::new()),
        Arc::new(authority),
    );
    let handle = server.run().await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupt received");
            handle.shutdown();
            let stopped = handle.wait_terminated().await;
            info!(status = %stopped, "ca-srv stopped");
            Ok(())
        }
        err = handle.wait_terminated() => Err(err.into()),
    }
}

fn build_authority(config: &AuthorityConfig) -> Result<LocalAuthority> {
    let authority = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) if cert.exists() => {
            LocalAuthority::load_from_files(cert, key, config.cert_ttl())
                .with_context(|| format!("failed to load CA from {}", cert.display()))?
        }
        (Some(cert), Some(key)) => {
            let authority = LocalAuthority::self_signed(&config.options())?;
            authority
                .save_to_files(key, cert)
                .with_context(|| format!("failed to save generated CA to {}", cert.display()))?;
            info!(cert = %cert.display(), "generated and saved new CA");
            authority
        }
        _ => LocalAuthority::self_signed(&config.options())?,
    };

    if let Some(path) = &config.export_root_path {
        authority
            .export_root(path)
            .with_context(|| format!("failed to write root CA to {}", path.display()))?;
        info!(path = %path.display(), "exported root CA certificate");
    }
    Ok(authority)
}

async fn request(
    host: &str,
    addr: &str,
    server_name: &str,
    root_ca: &std::path::Path,
    cert_out: &std::path::Path,
    key_out: &std::path::Path,
) -> Result<()> {
    let options = CertOptions::new(host);
    let bundle = tokio::task::spawn_blocking(move || RcgenCsrGenerator::new().generate_csr(&options))
        .await??;

    let mut client = CaClient::connect_with_root_file(addr, server_name, root_ca).await?;
    let response = client.handle_csr(SigningRequest::new(bundle.csr_pem)).await?;

    if !response.is_approved {
        anyhow::bail!(
            "request refused: {}",
            response.refusal_reason.as_deref().unwrap_or("no reason given")
        );
    }

    std::fs::write(cert_out, &response.signed_cert_chain)
        .with_context(|| format!("failed to write {}", cert_out.display()))?;
    std::fs::write(key_out, &bundle.private_key_pem)
        .with_context(|| format!("failed to write {}", key_out.display()))?;
    info!(host, cert = %cert_out.display(), "certificate issued");
    Ok(())
}
