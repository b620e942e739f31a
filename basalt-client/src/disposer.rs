//! Deferred resource disposal
//!
//! Provides a background worker that closes server resources off the caller's
//! thread. Domain code that must not block on a close round-trip (a REPL
//! dropping a cursor, a batch loop discarding spent statements) hands the
//! resource to the disposer instead; shutdown drains the queue so nothing is
//! left undisposed.

use crate::resource::ServerResource;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Disposer worker configuration
#[derive(Debug, Clone)]
pub struct DisposerConfig {
    /// How often the worker re-checks the shutdown flag while idle, in
    /// milliseconds
    pub poll_interval_ms: u64,
}

impl DisposerConfig {
    pub fn new() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }

    /// Set the idle poll interval in milliseconds
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }
}

impl Default for DisposerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Background worker that performs deferred closes
pub struct Disposer {
    /// Worker thread handle
    handle: Option<JoinHandle<()>>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,

    /// Disposal queue
    queue: Sender<Arc<dyn ServerResource>>,
    backlog: Receiver<Arc<dyn ServerResource>>,

    config: DisposerConfig,
}

impl Disposer {
    pub fn new(config: DisposerConfig) -> Self {
        let (queue, backlog) = channel::unbounded();
        Self {
            handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            queue,
            backlog,
            config,
        }
    }

    /// Start the worker thread.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("Disposer already running");
            return;
        }

        let shutdown = Arc::clone(&self.shutdown);
        let backlog = self.backlog.clone();
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        info!("Starting disposer worker");

        let handle = thread::spawn(move || {
            Self::worker_loop(shutdown, backlog, poll);
        });

        self.handle = Some(handle);
    }

    fn worker_loop(
        shutdown: Arc<AtomicBool>,
        backlog: Receiver<Arc<dyn ServerResource>>,
        poll: Duration,
    ) {
        debug!("Disposer worker loop started");

        while !shutdown.load(Ordering::Relaxed) {
            match backlog.recv_timeout(poll) {
                Ok(resource) => Self::dispose(resource),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Shutdown: everything still queued gets a disposal attempt
        Self::drain(&backlog);
        debug!("Disposer worker loop exited");
    }

    fn drain(backlog: &Receiver<Arc<dyn ServerResource>>) {
        while let Ok(resource) = backlog.try_recv() {
            Self::dispose(resource);
        }
    }

    fn dispose(resource: Arc<dyn ServerResource>) {
        if let Err(e) = resource.close() {
            warn!("Deferred close failed: {}", e);
        }
    }

    /// Queue a resource for disposal off the caller's thread.
    pub fn defer(&self, resource: Arc<dyn ServerResource>) {
        if self.queue.send(resource).is_err() {
            warn!("Disposer queue disconnected; resource dropped without close");
        }
    }

    /// Number of resources waiting for disposal.
    pub fn queue_len(&self) -> usize {
        self.backlog.len()
    }

    /// Check if the worker is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Relaxed)
    }

    /// Initiate graceful shutdown.
    ///
    /// Signals the worker, waits for it to drain the queue and exit, then
    /// drains anything that slipped in after the worker's final sweep. Safe
    /// to call on a disposer that was never started.
    pub fn shutdown(&mut self) {
        info!("Initiating disposer shutdown");
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            debug!("Waiting for disposer worker to exit");
            if let Err(e) = handle.join() {
                warn!("Error joining disposer worker thread: {:?}", e);
            }
        }
        Self::drain(&self.backlog);

        info!("Disposer shutdown complete");
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
