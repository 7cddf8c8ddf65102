//! Worker pool draining the dispatch queue
//!
//! Every worker runs an independent sequential loop: pull one message, decode
//! it, verify its token, fan it out to all handlers, release it. Each message
//! is processed inside its own guarded scope so that a malformed packet, a
//! failing handler or a panicking handler only ever affects that message.
//!
//! Workers run under a supervisor. If a worker's loop itself dies, the
//! supervisor starts a replacement with the same id, so the pool never loses
//! concurrency.

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, info, warn};
use shared::{Packet, PacketHeader, Registry};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{self, JoinHandle};

use crate::auth::TokenVerifier;
use crate::handler::PacketHandler;
use crate::message::{DecodeError, Message};
use crate::queue::QueueReceiver;
use crate::stats::IngestStats;

/// Everything a worker needs to process a message, frozen at server start
pub struct Dispatcher {
    registry: Arc<Registry>,
    handlers: Vec<PacketHandler>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    stats: Arc<IngestStats>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        handlers: Vec<PacketHandler>,
        verifier: Option<Arc<dyn TokenVerifier>>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            registry,
            handlers,
            verifier,
            stats,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Processes one message and releases it, whatever happens in between
    pub fn process(&self, msg: Message) {
        let sender = msg.sender();
        let mut header: Option<PacketHeader> = None;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&msg, &mut header)));

        if let Err(payload) = outcome {
            self.stats.record_handler_panic();
            match &header {
                Some(header) => error!(
                    "panic while processing packet {} from {} (token {}): {}",
                    header.packet_id,
                    sender,
                    header.token_base64(),
                    panic_message(payload.as_ref())
                ),
                None => error!(
                    "panic while processing message from {}: {}",
                    sender,
                    panic_message(payload.as_ref())
                ),
            }
        }

        msg.dispose();
    }

    fn dispatch(&self, msg: &Message, header_slot: &mut Option<PacketHeader>) {
        let sender = msg.sender();

        let decoded = match msg.decode(&self.registry) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.stats.record_malformed();
                self.log_malformed(sender, &err);
                return;
            }
        };
        let header = header_slot.insert(decoded.header);

        let Some(packet) = decoded.packet else {
            self.stats.record_unknown();
            warn!(
                "unable to find packet with id {} from {} (token {})",
                header.packet_id,
                sender,
                header.token_base64()
            );
            return;
        };

        if let Some(verifier) = &self.verifier {
            if !verifier.verify(sender, header) {
                self.stats.record_unauthorized();
                warn!(
                    "rejected packet {} from {}: token {} failed verification",
                    header.packet_id,
                    sender,
                    header.token_base64()
                );
                return;
            }
        }

        self.fan_out(sender, header, packet.as_ref());
        self.stats.record_dispatched();
    }

    fn fan_out(&self, sender: SocketAddr, header: &PacketHeader, packet: &dyn Packet) {
        for (index, handler) in self.handlers.iter().enumerate() {
            if let Err(err) = handler(sender, header, packet) {
                self.stats.record_handler_error();
                warn!(
                    "handler {} failed for packet {} from {}: {}",
                    index, header.packet_id, sender, err
                );
            }
        }
    }

    fn log_malformed(&self, sender: SocketAddr, err: &DecodeError) {
        match err.header() {
            Some(header) => warn!(
                "malformed packet {} from {} (token {}): {}",
                header.packet_id,
                sender,
                header.token_base64(),
                err
            ),
            None => warn!("malformed packet from {}: {}", sender, err),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Sequential processing loop of a single worker
pub async fn run_worker(id: usize, queue: QueueReceiver<Message>, dispatcher: Arc<Dispatcher>) {
    debug!("worker {} started", id);
    while let Some(msg) = queue.recv().await {
        process_off_executor(&dispatcher, msg);
    }
    debug!("worker {} stopped: queue closed", id);
}

/// Runs the synchronous handlers without pinning an executor thread
///
/// On a multi-threaded runtime the worker's scheduler core is handed to
/// another thread while handlers run, so a handler that blocks cannot starve
/// the listener. A current-thread runtime has no spare thread and calls the
/// handlers in place.
fn process_off_executor(dispatcher: &Dispatcher, msg: Message) {
    let flavor = Handle::try_current().map(|handle| handle.runtime_flavor());
    match flavor {
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(|| dispatcher.process(msg)),
        _ => dispatcher.process(msg),
    }
}

/// Keeps a worker alive: restarts it whenever its task panics
///
/// `spawn_worker` is called once per (re)start and must build a fresh worker
/// future. A worker that returns normally is not restarted.
pub async fn supervise<F, Fut>(id: usize, stats: Arc<IngestStats>, mut spawn_worker: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match tokio::spawn(spawn_worker()).await {
            Ok(()) => break,
            Err(err) if err.is_panic() => {
                stats.record_worker_restart();
                error!("worker {} crashed, respawning: {}", id, err);
            }
            Err(err) => {
                debug!("worker {} cancelled: {}", id, err);
                break;
            }
        }
    }
}

/// Fixed-size set of supervised workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        queue: QueueReceiver<Message>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<IngestStats>,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let queue = queue.clone();
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(supervise(id, Arc::clone(&stats), move || {
                    run_worker(id, queue.clone(), Arc::clone(&dispatcher))
                }))
            })
            .collect();

        info!("spawned {} workers", count);
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to drain the queue and exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!("worker supervisor failed: {}", err);
            }
        }
    }
}
