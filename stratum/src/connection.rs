use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;

use umbra_io::IoStream;

/// Numeric connection id derived from the remote address. IPv4 packs the
/// address and port into the low bits; IPv6 falls back to a stable hash.
pub fn peer_id(addr: &SocketAddr) -> u64 {
    match addr.ip() {
        IpAddr::V4(ip) => ((u32::from(ip) as u64) << 16) | addr.port() as u64,
        IpAddr::V6(ip) => {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            ip.hash(&mut hasher);
            addr.port().hash(&mut hasher);
            hasher.finish()
        }
    }
}

pub(crate) enum WriteCmd {
    Send(Arc<Vec<u8>>),
    SendThenClose(Arc<Vec<u8>>),
}

/// Write side of one miner connection. The read half lives in the server's
/// per-connection reader task; connections refer back to the server by id
/// only, never by pointer.
pub struct Connection {
    id: u64,
    addr: SocketAddr,
    logged_in: AtomicBool,
    writer: mpsc::UnboundedSender<WriteCmd>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        addr: SocketAddr,
        writer: mpsc::UnboundedSender<WriteCmd>,
    ) -> Connection {
        Connection {
            id,
            addr,
            logged_in: AtomicBool::new(false),
            writer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_logged_in(&self) {
        self.logged_in.store(true, Ordering::Relaxed);
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Relaxed)
    }

    /// Queue a framed message. Returns `false` once the writer task has
    /// died, which marks the connection dead to the caller. With
    /// `shutdown` the stream is half-closed after the write goes out.
    pub fn send_msg(&self, msg: Arc<Vec<u8>>, only_if_logged_in: bool, shutdown: bool) -> bool {
        if only_if_logged_in && !self.is_logged_in() {
            return true;
        }
        let cmd = if shutdown {
            WriteCmd::SendThenClose(msg)
        } else {
            WriteCmd::Send(msg)
        };
        self.writer.send(cmd).is_ok()
    }
}

pub(crate) async fn write_loop(
    mut half: WriteHalf<IoStream>,
    mut rx: mpsc::UnboundedReceiver<WriteCmd>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriteCmd::Send(buf) => {
                if half.write_all(&buf).await.is_err() {
                    break;
                }
            }
            WriteCmd::SendThenClose(buf) => {
                let _ = half.write_all(&buf).await;
                let _ = half.shutdown().await;
                break;
            }
        }
    }
}
