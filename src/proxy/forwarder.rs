//! Bounded-queue worker pool that best-effort POSTs accepted traces to the
//! downstream collector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::errors::{InvalidCollectorUrl, SendError, StartupError};

/// A payload queued for delivery: the serialized trace body and the
/// content type to send it with.
#[derive(Debug, Clone)]
pub struct Payload {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_WORKERS: usize = 100;

struct Inner {
    endpoint: String,
    client: reqwest::Client,
    stopped: AtomicBool,
}

/// Sends payloads to `<scheme>://<host>/api/v1/spans`. `Send` never blocks:
/// it enqueues if there's room or returns `SinkFull` immediately, and
/// returns `SinkStopped` once `stop` has run.
pub struct Forwarder {
    inner: Arc<Inner>,
    tx: Mutex<Option<mpsc::Sender<Payload>>>,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Forwarder {
    /// `collector_url` must be `http://` or `https://`; the effective POST
    /// endpoint is `<scheme>://<host>/api/v1/spans`.
    pub fn start(
        collector_url: &str,
        buffer_size: usize,
        workers: usize,
    ) -> Result<Self, StartupError> {
        let url = reqwest::Url::parse(collector_url).map_err(|e| {
            StartupError::InvalidCollectorUrl(InvalidCollectorUrl {
                url: collector_url.to_string(),
                reason: e.to_string(),
            })
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(StartupError::InvalidCollectorUrl(InvalidCollectorUrl {
                url: collector_url.to_string(),
                reason: "scheme must be http or https".to_string(),
            }));
        }
        let endpoint = url
            .join("/api/v1/spans")
            .map_err(|e| {
                StartupError::InvalidCollectorUrl(InvalidCollectorUrl {
                    url: collector_url.to_string(),
                    reason: e.to_string(),
                })
            })?
            .to_string();

        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let inner = Arc::new(Inner {
            endpoint,
            client: reqwest::Client::new(),
            stopped: AtomicBool::new(false),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut worker_handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let inner = inner.clone();
            let rx = rx.clone();
            worker_handles.push(tokio::spawn(run_worker(id, inner, rx)));
        }

        Ok(Forwarder {
            inner,
            tx: Mutex::new(Some(tx)),
            worker_handles: Mutex::new(worker_handles),
        })
    }

    /// Non-blocking enqueue. Returns `SinkFull` if the channel has no room,
    /// `SinkStopped` once `stop` has been called.
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(SendError::SinkStopped);
        }
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.try_send(payload).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::SinkFull,
                mpsc::error::TrySendError::Closed(_) => SendError::SinkStopped,
            }),
            None => Err(SendError::SinkStopped),
        }
    }

    /// Closes the payload channel and waits for all workers to drain
    /// in-flight work before returning.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.tx.lock().take(); // drop the sender, closing the channel
        let handles: Vec<_> = self.worker_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    id: usize,
    inner: Arc<Inner>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Payload>>>,
) {
    loop {
        let payload = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let payload = match payload {
            Some(p) => p,
            None => break,
        };

        match inner
            .client
            .post(&inner.endpoint)
            .header("Content-Type", payload.content_type)
            .body(payload.body)
            .send()
            .await
        {
            Ok(resp) if resp.status().as_u16() == 202 => {}
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let truncated: String = body.chars().take(1024).collect();
                info!(worker = id, %status, body = %truncated, "collector rejected trace");
            }
            Err(e) => {
                warn!(worker = id, error = %e, "forward attempt failed, payload dropped from forwarder's view");
            }
        }
    }
}
