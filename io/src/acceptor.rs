use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased duplex stream handed to accept callbacks, so the same
/// server code serves plain TCP and TLS connections.
pub type IoStream = Box<dyn AsyncStream>;

pub type AcceptCallback = Arc<dyn Fn(IoStream, SocketAddr) + Send + Sync>;

/// A listening socket plus its accept loop. Dropping the acceptor stops
/// listening; streams already handed out stay alive.
pub struct Acceptor {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Acceptor {
    pub async fn bind_tcp(addr: SocketAddr, on_accept: AcceptCallback) -> io::Result<Acceptor> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let task = tokio::spawn(accept_loop(listener, None, on_accept));
        Ok(Acceptor { local_addr, task })
    }

    pub async fn bind_tls(
        addr: SocketAddr,
        cert_file: &Path,
        key_file: &Path,
        on_accept: AcceptCallback,
    ) -> io::Result<Acceptor> {
        let tls = load_tls_acceptor(cert_file, key_file)?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let task = tokio::spawn(accept_loop(listener, Some(tls), on_accept));
        Ok(Acceptor { local_addr, task })
    }

    /// Actual bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, tls: Option<TlsAcceptor>, on_accept: AcceptCallback) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                match &tls {
                    None => on_accept(Box::new(stream), peer),
                    Some(acceptor) => {
                        // Handshakes run off the accept loop so one slow
                        // client cannot stall new connections.
                        let acceptor = acceptor.clone();
                        let on_accept = on_accept.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => on_accept(Box::new(tls_stream), peer),
                                Err(e) => {
                                    tracing::warn!("TLS handshake with {} failed: {}", peer, e)
                                }
                            }
                        });
                    }
                }
            }
            Err(e) => {
                tracing::error!("failed to accept connection: {}", e);
            }
        }
    }
}

fn load_tls_acceptor(cert_file: &Path, key_file: &Path) -> io::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_file)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_file)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key in key file"))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
