use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Post(Callback),
    SetTimer {
        id: u64,
        delay: Duration,
        callback: Callback,
    },
    TimerFired(u64),
    CancelTimer(u64),
    Stop,
}

/// Cheap, cloneable entry point into a running [`Reactor`].
///
/// Closures posted from any thread execute on the reactor task in FIFO
/// order relative to each other. Timer callbacks are delivered through the
/// same queue, so every callback the reactor ever runs is serialized.
#[derive(Clone)]
pub struct Handle {
    tx: mpsc::UnboundedSender<Command>,
}

impl Handle {
    /// Enqueue a closure to run on the reactor task.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Command::Post(Box::new(f)));
    }

    /// Arm a one-shot timer. Re-arming an id replaces the pending timer.
    pub fn set_timer(&self, id: u64, delay: Duration, f: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Command::SetTimer {
            id,
            delay,
            callback: Box::new(f),
        });
    }

    /// Cancel a pending timer. Silent when the id is not armed.
    pub fn cancel_timer(&self, id: u64) {
        let _ = self.tx.send(Command::CancelTimer(id));
    }

    /// Ask the reactor to shut down. Already-queued posts still run;
    /// no further timers fire. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Route SIGINT/ctrl-c into a graceful [`Handle::stop`].
    pub fn stop_on_ctrl_c(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping reactor");
                handle.stop();
            }
        });
    }
}

struct Timer {
    sleeper: JoinHandle<()>,
    callback: Callback,
}

/// Single-task event loop: a FIFO queue of posted closures plus one-shot
/// timers keyed by caller-chosen ids.
pub struct Reactor {
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    timers: HashMap<u64, Timer>,
}

impl Reactor {
    pub fn new() -> (Reactor, Handle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Handle { tx: tx.clone() };
        (
            Reactor {
                tx,
                rx,
                timers: HashMap::new(),
            },
            handle,
        )
    }

    /// Drive the loop until [`Handle::stop`] is observed and the queue is
    /// drained. Each timer runs on its own sleeper task whose only job is
    /// to re-post the firing back into the queue.
    pub async fn run(mut self) {
        let mut stopping = false;
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Post(f) => f(),
                Command::SetTimer {
                    id,
                    delay,
                    callback,
                } if !stopping => {
                    if let Some(old) = self.timers.remove(&id) {
                        old.sleeper.abort();
                    }
                    let tx = self.tx.clone();
                    let sleeper = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Command::TimerFired(id));
                    });
                    self.timers.insert(id, Timer { sleeper, callback });
                }
                Command::SetTimer { .. } => {}
                Command::TimerFired(id) => {
                    if let Some(timer) = self.timers.remove(&id) {
                        (timer.callback)();
                    }
                }
                Command::CancelTimer(id) => {
                    if let Some(timer) = self.timers.remove(&id) {
                        timer.sleeper.abort();
                    }
                }
                Command::Stop => {
                    if !stopping {
                        stopping = true;
                        for (_, timer) in self.timers.drain() {
                            timer.sleeper.abort();
                        }
                        // recv() returns None once the already-queued
                        // commands are consumed.
                        self.rx.close();
                    }
                }
            }
        }
        for (_, timer) in self.timers.drain() {
            timer.sleeper.abort();
        }
    }
}
