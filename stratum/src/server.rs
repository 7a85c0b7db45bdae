use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::mpsc;

use umbra_io::acceptor::AcceptCallback;
use umbra_io::{Acceptor, Handle, IoStream};

use crate::acl::Acl;
use crate::config::Options;
use crate::connection::{self, Connection};
use crate::error::{Result, StratumError};
use crate::protocol::{self, LineBuffer, Message, ResultCode};

pub const SERVER_RESTART_TIMER: u64 = 1;
pub const ACL_REFRESH_TIMER: u64 = 2;
pub const SERVER_RESTART_INTERVAL: Duration = Duration::from_secs(1);
pub const ACL_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Fired whenever a miner submits a solution; the consensus layer reacts
/// by validating the proof and eventually calling
/// [`Server::solution_result`].
pub type BlockFound = Arc<dyn Fn() + Send + Sync>;

/// Identity of a block a solution was folded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId {
    pub hash: [u8; 32],
    pub height: u64,
}

struct RecentJob {
    id: String,
    msg: Arc<Vec<u8>>,
}

struct LastSolution {
    job_id: String,
    pow: Vec<u8>,
    from: u64,
}

/// Miner-facing stratum server. Jobs are pushed to every logged-in
/// connection; solutions are routed to the consensus layer and the
/// verdict is reported back to the submitter.
pub struct Server {
    options: Options,
    reactor: Handle,
    state: Arc<State>,
}

struct State {
    connections: DashMap<u64, Arc<Connection>>,
    acceptor: Mutex<Option<Acceptor>>,
    recent_job: Mutex<Option<RecentJob>>,
    on_found: Mutex<Option<BlockFound>>,
    last_solution: Mutex<Option<LastSolution>>,
    acl: Acl,
}

impl Server {
    /// Create the server and schedule the first bind attempt on the
    /// reactor. Bind failures retry every [`SERVER_RESTART_INTERVAL`];
    /// the ACL file is re-checked every [`ACL_REFRESH_INTERVAL`].
    pub fn new(options: Options, reactor: Handle) -> Arc<Server> {
        let server = Arc::new(Server {
            state: Arc::new(State {
                connections: DashMap::new(),
                acceptor: Mutex::new(None),
                recent_job: Mutex::new(None),
                on_found: Mutex::new(None),
                last_solution: Mutex::new(None),
                acl: Acl::new(options.api_keys_file.clone()),
            }),
            reactor: reactor.clone(),
            options,
        });

        let s = server.clone();
        reactor.set_timer(SERVER_RESTART_TIMER, Duration::ZERO, move || s.start());
        if server.state.acl.enabled() {
            let s = server.clone();
            reactor.set_timer(ACL_REFRESH_TIMER, Duration::ZERO, move || s.refresh_acl());
        }
        server
    }

    fn start(self: Arc<Server>) {
        tokio::spawn(async move {
            let state = self.state.clone();
            let on_accept: AcceptCallback =
                Arc::new(move |stream, peer| State::attach(state.clone(), stream, peer));

            let bound = match (&self.options.cert_file, &self.options.priv_key_file) {
                (Some(cert), Some(key)) => {
                    Acceptor::bind_tls(self.options.listen_addr, cert, key, on_accept).await
                }
                _ => {
                    tracing::warn!("stratum server TLS disabled!");
                    Acceptor::bind_tcp(self.options.listen_addr, on_accept).await
                }
            };

            match bound {
                Ok(acceptor) => {
                    tracing::info!("stratum server listens to {}", acceptor.local_addr());
                    *self.state.acceptor.lock().unwrap() = Some(acceptor);
                }
                Err(e) => {
                    tracing::error!(
                        "stratum server cannot start: {}, restarting in {:?}",
                        e,
                        SERVER_RESTART_INTERVAL
                    );
                    let s = self.clone();
                    self.reactor
                        .set_timer(SERVER_RESTART_TIMER, SERVER_RESTART_INTERVAL, move || {
                            s.start()
                        });
                }
            }
        });
    }

    fn refresh_acl(self: Arc<Server>) {
        self.state.acl.refresh();
        let s = self.clone();
        self.reactor
            .set_timer(ACL_REFRESH_TIMER, ACL_REFRESH_INTERVAL, move || {
                s.refresh_acl()
            });
    }

    /// Bound listener address, once the bind succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state
            .acceptor
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| a.local_addr())
    }

    /// Advertise a new mining job. The job is serialized once, stored as
    /// the most recent job (late logins receive it on login) and fanned
    /// out to every logged-in connection. Connections whose writer is
    /// gone are pruned after the fan-out.
    pub fn new_job(
        &self,
        id: &str,
        input: &[u8; 32],
        pow: &[u8],
        height: u64,
        on_found: BlockFound,
    ) -> Result<()> {
        *self.state.on_found.lock().unwrap() = Some(on_found);

        let msg = Message::Job {
            id: id.to_owned(),
            input: hex::encode(input),
            pow: hex::encode(pow),
            height,
        };
        let bytes = Arc::new(protocol::encode(&msg)?);
        *self.state.recent_job.lock().unwrap() = Some(RecentJob {
            id: id.to_owned(),
            msg: bytes.clone(),
        });

        tracing::info!(
            "stratum server new job {} will be sent to {} connected peers",
            id,
            self.state.connections.len()
        );
        metrics::counter!("stratum_jobs_total").increment(1);

        let mut dead = Vec::new();
        for entry in self.state.connections.iter() {
            if !entry.value().send_msg(bytes.clone(), true, false) {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.state.connections.remove(&id);
        }
        Ok(())
    }

    /// Report the verdict for the most recent solution back to its
    /// submitter. The reply is serialized and queued here, before any
    /// later job broadcast, so the submitter sees the verdict first.
    pub fn solution_result(&self, job_id: &str, accepted: bool, block: BlockId) -> Result<()> {
        let msg = if accepted {
            Message::SolutionResult {
                id: job_id.to_owned(),
                code: ResultCode::SolutionAccepted.as_i32(),
                block_hash: hex::encode(block.hash),
                height: block.height,
            }
        } else {
            Message::result(job_id, ResultCode::SolutionRejected)
        };
        let bytes = Arc::new(protocol::encode(&msg)?);

        let submitter = self
            .state
            .last_solution
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.from);
        if let Some(from) = submitter {
            if let Some(conn) = self.state.connections.get(&from) {
                conn.send_msg(bytes, true, false);
            }
        }
        Ok(())
    }

    /// (job id, proof-of-work blob) of the most recently submitted
    /// solution.
    pub fn get_last_found_block(&self) -> Option<(String, Vec<u8>)> {
        self.state
            .last_solution
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| (s.job_id.clone(), s.pow.clone()))
    }

    /// Withdraw the current job; miners logging in afterwards receive
    /// nothing until the next [`Server::new_job`].
    pub fn stop_current(&self) {
        *self.state.recent_job.lock().unwrap() = None;
    }

    /// Stop listening. Existing connections die on their next I/O.
    pub fn stop(&self) {
        self.stop_current();
        *self.state.acceptor.lock().unwrap() = None;
    }
}

impl State {
    fn attach(state: Arc<State>, stream: IoStream, peer: SocketAddr) {
        let id = connection::peer_id(&peer);
        tracing::debug!("stratum server +peer {}", peer);
        metrics::counter!("stratum_connections_total").increment(1);

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(id, peer, tx));
        state.connections.insert(id, conn.clone());

        tokio::spawn(connection::write_loop(write_half, rx));
        tokio::spawn(State::read_loop(state, conn, read_half));
    }

    async fn read_loop(state: Arc<State>, conn: Arc<Connection>, mut read: ReadHalf<IoStream>) {
        let mut lines = LineBuffer::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            match read.read(&mut chunk).await {
                Ok(0) => {
                    tracing::info!("stratum server peer {} disconnected", conn.addr());
                    break;
                }
                Err(e) => {
                    tracing::info!("stratum server peer {} disconnected: {}", conn.addr(), e);
                    break;
                }
                Ok(n) => {
                    let parsed = match lines.split(&chunk[..n]) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            state.on_stratum_error(&conn, &e);
                            break;
                        }
                    };
                    let mut keep = true;
                    for line in parsed {
                        if !state.on_line(&conn, &line) {
                            keep = false;
                            break;
                        }
                    }
                    if !keep {
                        break;
                    }
                }
            }
        }
        state.on_bad_peer(conn.id(), conn.addr());
    }

    /// Dispatch one wire line. Returns `false` when the connection must
    /// be dropped; recoverable parse errors never abort the stream.
    fn on_line(&self, conn: &Arc<Connection>, line: &str) -> bool {
        match protocol::decode(line) {
            Ok(Message::Login { id, api_key }) => self.on_login(conn, &id, &api_key),
            Ok(Message::Solution { id, nonce, output }) => {
                self.on_solution(conn, id, &nonce, &output)
            }
            Ok(msg) => {
                self.on_unsupported_stratum_method(msg.method());
                true
            }
            Err(StratumError::UnsupportedMethod(method)) => {
                self.on_unsupported_stratum_method(&method);
                true
            }
            Err(e) => {
                self.on_stratum_error(conn, &e);
                e.is_recoverable()
            }
        }
    }

    /// First message on every connection. A key accepted by the ACL
    /// marks the connection logged-in and pushes the current job; a
    /// rejected key is answered with `login_failed` and a half-close.
    fn on_login(&self, conn: &Arc<Connection>, request_id: &str, api_key: &str) -> bool {
        if self.acl.check(api_key) {
            conn.set_logged_in();
            metrics::counter!("stratum_logins_total").increment(1);
            match &*self.recent_job.lock().unwrap() {
                Some(job) => conn.send_msg(job.msg.clone(), true, false),
                None => true,
            }
        } else {
            tracing::info!("stratum server peer login failed, key={}", api_key);
            let reply = Message::result(request_id, ResultCode::LoginFailed);
            if let Ok(bytes) = protocol::encode(&reply) {
                conn.send_msg(Arc::new(bytes), false, true);
            }
            false
        }
    }

    /// Solutions are recorded and forwarded unconditionally, even for
    /// stale job ids; the consensus layer decides what they are worth.
    fn on_solution(&self, conn: &Arc<Connection>, job_id: String, nonce: &str, output: &str) -> bool {
        tracing::debug!("solution nonce={} output={}", nonce, output);
        let pow = match hex::decode(output) {
            Ok(pow) => pow,
            Err(_) => {
                self.on_stratum_error(conn, &StratumError::InvalidHex { field: "output" });
                return true;
            }
        };

        tracing::info!("stratum server solution to {} from {}", job_id, conn.addr());
        metrics::counter!("stratum_solutions_total").increment(1);
        *self.last_solution.lock().unwrap() = Some(LastSolution {
            job_id,
            pow,
            from: conn.id(),
        });

        let callback = self.on_found.lock().unwrap().clone();
        if let Some(on_found) = callback {
            on_found();
        }
        true
    }

    fn on_stratum_error(&self, conn: &Arc<Connection>, e: &StratumError) {
        tracing::error!(
            "stratum server got stratum error from {}: {} ({})",
            conn.addr(),
            e,
            e.code().message()
        );
    }

    fn on_unsupported_stratum_method(&self, method: &str) {
        tracing::info!("stratum server ignoring unsupported stratum method: {}", method);
    }

    fn on_bad_peer(&self, id: u64, addr: SocketAddr) {
        if self.connections.remove(&id).is_some() {
            tracing::info!("stratum server -peer {}", addr);
        }
    }
}
