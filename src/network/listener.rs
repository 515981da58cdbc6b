//! TCP/TLS listeners.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::ListenerConfig;
use crate::state::ServerContext;

fn build_tls_acceptor(listener: &ListenerConfig) -> anyhow::Result<TlsAcceptor> {
    let cert_path = listener
        .cert
        .as_ref()
        .context("tls listener without cert path")?;
    let key_path = listener
        .key
        .as_ref()
        .context("tls listener without key path")?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(cert_path)?))
            .collect::<Result<_, _>>()
            .context("reading certificate chain")?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut std::io::BufReader::new(
        std::fs::File::open(key_path)?,
    ))?
    .context("no private key found")?;

    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Bind one listener and spawn its accept loop.
pub async fn spawn_listener(
    ctx: Arc<ServerContext>,
    listener_conf: ListenerConfig,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", listener_conf.host, listener_conf.port);
    let tcp = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let acceptor = if listener_conf.tls {
        Some(build_tls_acceptor(&listener_conf)?)
    } else {
        None
    };
    info!(%addr, tls = listener_conf.tls, "listening");

    tokio::spawn(async move {
        loop {
            let (socket, peer) = match tcp.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let peer_ip = peer.ip().to_string();
            let ctx = ctx.clone();

            match acceptor.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(socket).await {
                            Ok(tls_stream) => {
                                crate::network::connection::run(ctx, tls_stream, peer_ip, true)
                                    .await;
                            }
                            Err(e) => {
                                warn!(peer = %peer_ip, error = %e, "tls handshake failed");
                            }
                        }
                    });
                }
                None => {
                    tokio::spawn(crate::network::connection::run(ctx, socket, peer_ip, false));
                }
            }
        }
    });

    Ok(())
}
