use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use coda_core::config::REPLAY_CAPACITY;
use coda_events::{EventFrame, EventStream, Submission};

const BROADCAST_CAPACITY: usize = 256;

pub type LifecycleCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Shared fan-out state: the sequence counter, the replay ring, the
/// broadcast channel, and the observer registry.
pub struct FanoutState {
    seq: AtomicU64,
    /// Wall-clock anchor + monotonic offset, so stamped timestamps never
    /// move backwards even when the system clock does.
    epoch_base: f64,
    started_at: Instant,
    replay: Mutex<VecDeque<EventFrame>>,
    tx: broadcast::Sender<String>,
    clients: DashMap<String, ()>,
    on_connect: Mutex<Vec<LifecycleCallback>>,
    on_disconnect: Mutex<Vec<LifecycleCallback>>,
}

impl FanoutState {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let epoch_base = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            seq: AtomicU64::new(0),
            epoch_base,
            started_at: Instant::now(),
            replay: Mutex::new(VecDeque::with_capacity(REPLAY_CAPACITY)),
            tx,
            clients: DashMap::new(),
            on_connect: Mutex::new(Vec::new()),
            on_disconnect: Mutex::new(Vec::new()),
        }
    }

    fn now_seconds(&self) -> f64 {
        self.epoch_base + self.started_at.elapsed().as_secs_f64()
    }

    /// Stamp a submission into a frame, record it for replay when
    /// high-priority, and publish it. Sequence numbers are strictly
    /// increasing and gap-free for the server's lifetime.
    pub fn dispatch(&self, submission: Submission) -> EventFrame {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let frame = EventFrame::new(
            seq,
            self.now_seconds(),
            submission.event_type,
            submission.data,
        );

        if submission.high_priority {
            let mut replay = self.replay.lock().unwrap();
            if replay.len() >= REPLAY_CAPACITY {
                replay.pop_front();
            }
            replay.push_back(frame.clone());
        }

        match serde_json::to_string(&frame) {
            Ok(json) => {
                // Send fails only when no observer is subscribed.
                let _ = self.tx.send(json);
            }
            Err(e) => warn!(error = %e, "failed to serialize event frame"),
        }
        frame
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn replay_snapshot(&self) -> Vec<EventFrame> {
        self.replay.lock().unwrap().iter().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn next_seq_value(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Register observer-lifecycle callbacks. Call before `start`.
    pub fn on_connect(&self, callback: LifecycleCallback) {
        self.on_connect.lock().unwrap().push(callback);
    }

    pub fn on_disconnect(&self, callback: LifecycleCallback) {
        self.on_disconnect.lock().unwrap().push(callback);
    }

    pub(crate) fn client_connected(&self, conn_id: &str) {
        self.clients.insert(conn_id.to_string(), ());
        for callback in self.on_connect.lock().unwrap().iter() {
            callback(conn_id);
        }
        info!(conn_id, clients = self.client_count(), "observer connected");
    }

    pub(crate) fn client_disconnected(&self, conn_id: &str) {
        if self.clients.remove(conn_id).is_some() {
            for callback in self.on_disconnect.lock().unwrap().iter() {
                callback(conn_id);
            }
            info!(conn_id, clients = self.client_count(), "observer disconnected");
        }
    }
}

impl Default for FanoutState {
    fn default() -> Self {
        Self::new()
    }
}

/// The fan-out server: dispatcher task + WS listener. `start` and
/// `stop` are both idempotent.
pub struct FanoutServer {
    pub state: Arc<FanoutState>,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl FanoutServer {
    /// Create the server and immediately begin draining the bus, so
    /// events submitted before `start` still reach the replay ring.
    pub fn new(stream: EventStream) -> Self {
        let state = Arc::new(FanoutState::new());
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::clone(&state),
            stream,
            cancel.clone(),
        ));
        Self {
            state,
            cancel,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            dispatcher: Mutex::new(Some(dispatcher)),
            listener: Mutex::new(None),
        }
    }

    /// Bind and serve the observer endpoint. A second call logs a
    /// warning and does nothing.
    pub async fn start(
        &self,
        host: &str,
        port: u16,
        router: axum::Router,
    ) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("fan-out server already started, ignoring");
            return Ok(());
        }

        // "localhost" and friends go through the resolver.
        let addr: SocketAddr = match format!("{host}:{port}").parse() {
            Ok(addr) => addr,
            Err(_) => tokio::net::lookup_host((host, port))
                .await?
                .next()
                .ok_or_else(|| anyhow::anyhow!("cannot resolve host '{host}'"))?,
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "fan-out server listening");

        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { cancel.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "fan-out server exited with error");
            }
        });
        *self.listener.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Close all observer connections and drain pending deliveries.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping fan-out server");
        self.cancel.cancel();

        let listener = self.listener.lock().unwrap().take();
        if let Some(task) = listener {
            let _ = task.await;
        }
        let dispatcher = self.dispatcher.lock().unwrap().take();
        if let Some(task) = dispatcher {
            let _ = task.await;
        }
        info!("fan-out server stopped");
    }
}

async fn run_dispatcher(
    state: Arc<FanoutState>,
    mut stream: EventStream,
    cancel: CancellationToken,
) {
    debug!("event dispatcher running");
    loop {
        tokio::select! {
            submission = stream.recv() => {
                match submission {
                    Some(sub) => { state.dispatch(sub); }
                    None => break,
                }
            }
            _ = cancel.cancelled() => {
                // Drain whatever producers managed to submit.
                while let Ok(sub) = stream.try_recv() {
                    state.dispatch(sub);
                }
                break;
            }
        }
    }
    debug!("event dispatcher stopped");
}
