//! Publish dispatcher: one owned buffer, one job slot, one outcome per job.
//!
//! ```text
//!   ┌────────────┐  free (cap 1)   ┌──────────────┐
//!   │ Dispatcher │◀────────────────│              │
//!   │  (caller)  │  jobs (cap 1)   │ PublishWorker│──▶ CloudPort::publish
//!   │            │────────────────▶│   (thread)   │
//!   └────────────┘                 └──────────────┘
//!          ▲          Signal<PublishOutcome>  │
//!          └──────────────────────────────────┘
//! ```
//!
//! The caller side blocks only in [`PublishPort::acquire`] and
//! [`PublishPort::wait`], both bounded by a timer raced against the
//! channel/signal future.

use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, error, info, warn};

use crate::error::CloudError;

// ── Outcome / ticket ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Success,
    Fail,
}

/// Oneshot carrying the outcome of one submitted publish.
#[derive(Clone)]
pub struct PublishTicket {
    signal: Arc<Signal<CriticalSectionRawMutex, PublishOutcome>>,
}

impl PublishTicket {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal::new()),
        }
    }

    pub fn complete(&self, outcome: PublishOutcome) {
        self.signal.signal(outcome);
    }

    /// Take the outcome if the job already finished.
    pub fn try_take(&self) -> Option<PublishOutcome> {
        self.signal.try_take()
    }

    pub async fn outcome(&self) -> PublishOutcome {
        self.signal.wait().await
    }
}

impl Default for PublishTicket {
    fn default() -> Self {
        Self::new()
    }
}

// ── Ports ────────────────────────────────────────────────────

/// Caller side of the publish path, used by the download pipeline, the
/// stash drain and the dummy publish.
pub trait PublishPort {
    /// Take the publish buffer, waiting at most `timeout`.
    fn acquire(&mut self, timeout: Duration) -> bool;

    /// Give the buffer back without publishing.
    fn release(&mut self);

    /// Copy `header ++ entry` into the held buffer and queue it. The
    /// buffer is consumed whether or not this succeeds.
    fn submit(
        &mut self,
        topic: &str,
        header: &[u8],
        entry: &[u8],
    ) -> Result<PublishTicket, CloudError>;

    /// Wait at most `timeout` for the job's outcome; `None` on timeout.
    fn wait(&mut self, ticket: &PublishTicket, timeout: Duration) -> Option<PublishOutcome>;
}

/// The cloud client the worker publishes through.
pub trait CloudPort {
    fn is_connected(&self) -> bool;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CloudError>;
}

// ── Shared state ─────────────────────────────────────────────

struct PublishBuffer {
    data: Vec<u8>,
    len: usize,
    topic: String,
}

struct PublishJob {
    buffer: PublishBuffer,
    ticket: PublishTicket,
}

struct Shared {
    free: Channel<CriticalSectionRawMutex, PublishBuffer, 1>,
    jobs: Channel<CriticalSectionRawMutex, PublishJob, 1>,
}

/// Build the caller and worker halves around a `capacity`-byte buffer.
pub fn dispatcher<C: CloudPort>(capacity: usize, cloud: C) -> (Dispatcher, PublishWorker<C>) {
    let shared = Arc::new(Shared {
        free: Channel::new(),
        jobs: Channel::new(),
    });
    let buffer = PublishBuffer {
        data: vec![0; capacity],
        len: 0,
        topic: String::new(),
    };
    // Fresh channel: the slot is empty.
    let _ = shared.free.try_send(buffer);
    (
        Dispatcher {
            shared: shared.clone(),
            held: None,
        },
        PublishWorker { shared, cloud },
    )
}

/// Run `fut` until it resolves or `timeout` elapses.
fn with_timeout<T>(timeout: Duration, fut: impl core::future::Future<Output = T>) -> Option<T> {
    future::block_on(future::or(async { Some(fut.await) }, async {
        async_io_mini::Timer::after(timeout).await;
        None
    }))
}

// ── Caller half ──────────────────────────────────────────────

pub struct Dispatcher {
    shared: Arc<Shared>,
    held: Option<PublishBuffer>,
}

impl Dispatcher {
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }
}

impl PublishPort for Dispatcher {
    fn acquire(&mut self, timeout: Duration) -> bool {
        if self.held.is_some() {
            return true;
        }
        let buffer = match self.shared.free.try_receive() {
            Ok(b) => Some(b),
            Err(_) => with_timeout(timeout, self.shared.free.receive()),
        };
        match buffer {
            Some(b) => {
                self.held = Some(b);
                true
            }
            None => {
                warn!("Publish: buffer not released within {:?}", timeout);
                false
            }
        }
    }

    fn release(&mut self) {
        if let Some(b) = self.held.take() {
            if self.shared.free.try_send(b).is_err() {
                error!("Publish: free slot occupied on release");
            }
        }
    }

    fn submit(
        &mut self,
        topic: &str,
        header: &[u8],
        entry: &[u8],
    ) -> Result<PublishTicket, CloudError> {
        let Some(mut buffer) = self.held.take() else {
            return Err(CloudError::Timeout);
        };
        let len = header.len() + entry.len();
        if len > buffer.data.len() {
            self.held = Some(buffer);
            self.release();
            return Err(CloudError::TooLarge);
        }
        buffer.data[..header.len()].copy_from_slice(header);
        buffer.data[header.len()..len].copy_from_slice(entry);
        buffer.len = len;
        buffer.topic.clear();
        buffer.topic.push_str(topic);

        let ticket = PublishTicket::new();
        let job = PublishJob {
            buffer,
            ticket: ticket.clone(),
        };
        if let Err(embassy_sync::channel::TrySendError::Full(job)) = self.shared.jobs.try_send(job) {
            // The worker holds at most the one buffer, so the slot is only
            // full if a job was queued without a buffer; hand it back.
            error!("Publish: job slot full");
            self.held = Some(job.buffer);
            self.release();
            return Err(CloudError::Timeout);
        }
        debug!("Publish: queued {} bytes to {}", len, topic);
        Ok(ticket)
    }

    fn wait(&mut self, ticket: &PublishTicket, timeout: Duration) -> Option<PublishOutcome> {
        if let Some(o) = ticket.try_take() {
            return Some(o);
        }
        let outcome = with_timeout(timeout, ticket.outcome());
        if outcome.is_none() {
            warn!("Publish: no outcome within {:?}", timeout);
        }
        outcome
    }
}

// ── Worker half ──────────────────────────────────────────────

pub struct PublishWorker<C> {
    shared: Arc<Shared>,
    cloud: C,
}

impl<C: CloudPort> PublishWorker<C> {
    /// Serve jobs forever.
    pub async fn run(mut self) {
        info!("Publish worker started");
        loop {
            let job = self.shared.jobs.receive().await;
            self.handle(job);
        }
    }

    /// Serve one queued job if there is one.
    pub fn poll_once(&mut self) -> bool {
        match self.shared.jobs.try_receive() {
            Ok(job) => {
                self.handle(job);
                true
            }
            Err(_) => false,
        }
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    fn handle(&mut self, job: PublishJob) {
        let PublishJob { buffer, ticket } = job;
        let outcome = if !self.cloud.is_connected() {
            warn!("Publish: cloud not connected");
            PublishOutcome::Fail
        } else {
            match self
                .cloud
                .publish(&buffer.topic, &buffer.data[..buffer.len])
            {
                Ok(()) => PublishOutcome::Success,
                Err(e) => {
                    error!("Publish: {} ({} bytes)", e, buffer.len);
                    PublishOutcome::Fail
                }
            }
        };
        ticket.complete(outcome);
        if self.shared.free.try_send(buffer).is_err() {
            error!("Publish: free slot occupied on return");
        }
    }
}

impl<C: CloudPort + Send + 'static> PublishWorker<C> {
    /// Run the worker on its own thread.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("ct_publish".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                let executor: edge_executor::LocalExecutor<'_, 1> =
                    edge_executor::LocalExecutor::new();
                future::block_on(executor.run(self.run()));
            })
    }
}
