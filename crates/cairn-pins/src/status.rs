//! Read-side projection of pin records.
//!
//! Point reads go straight to the [`StatusSource`]. Polling runs as a tokio
//! task that re-reads on an interval and streams [`PollEvent`]s until the
//! pin settles, the deadline passes, the token is cancelled or the receiver
//! is dropped. Cancellation is raced against every sleep.

use std::sync::Arc;
use std::time::Duration;

use cairn_types::{Cid, PinRequest, PinStatus};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::failure::{self, FailureInfo};
use crate::{PinRegistry, StatusError};

/// Buffered poll events per subscriber.
const POLL_CHANNEL_CAPACITY: usize = 32;

/// Where status reads come from.
pub trait StatusSource: Send + Sync + 'static {
    fn read_status(&self, cid: &Cid) -> Result<Option<PinRequest>, StatusError>;
}

impl StatusSource for PinRegistry {
    fn read_status(&self, cid: &Cid) -> Result<Option<PinRequest>, StatusError> {
        Ok(self.get(cid))
    }
}

/// A pin record with derived fields for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinView {
    #[serde(flatten)]
    pub pin: PinRequest,
    pub converged: bool,
    pub failure: Option<FailureInfo>,
}

impl PinView {
    pub fn project(pin: PinRequest) -> Self {
        let failure = match (pin.status, pin.error_code) {
            (PinStatus::Failed, Some(code)) => Some(failure::decode(code)),
            _ => None,
        };
        Self {
            converged: pin.is_converged(),
            failure,
            pin,
        }
    }

    /// Failed or converged: further polling will not show progress.
    pub fn is_settled(&self) -> bool {
        self.converged || self.pin.status == PinStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Upper bound on the delay after repeated read failures.
    pub max_backoff: Duration,
    pub timeout: Option<Duration>,
    pub stop_when_settled: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            timeout: None,
            stop_when_settled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PollEvent {
    Snapshot(PinView),
    /// No record for the CID yet.
    Missing,
    /// The read failed; polling continues with backoff.
    ReadFailed {
        error: StatusError,
        last_known: Option<PinView>,
    },
    TimedOut,
    Cancelled,
}

/// A running poll.
pub struct PollHandle {
    events: mpsc::Receiver<PollEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Next event, or `None` once polling has stopped.
    pub async fn next(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the poll task to exit.
    pub async fn join(self) {
        drop(self.events);
        let _ = self.task.await;
    }
}

/// Status queries over a [`StatusSource`].
pub struct StatusProjection<S> {
    source: Arc<S>,
}

impl<S> Clone for StatusProjection<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<S: StatusSource> StatusProjection<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    pub fn get_status(&self, cid: &Cid) -> Result<Option<PinRequest>, StatusError> {
        self.source.read_status(cid)
    }

    pub fn view(&self, cid: &Cid) -> Result<Option<PinView>, StatusError> {
        Ok(self.get_status(cid)?.map(PinView::project))
    }

    /// Start polling `cid`. Must be called inside a tokio runtime.
    ///
    /// Cancelling `cancel` (or [`PollHandle::cancel`]) stops the task
    /// promptly and yields a final [`PollEvent::Cancelled`] if the channel
    /// has room.
    pub fn poll_status(&self, cid: Cid, config: PollConfig, cancel: CancellationToken) -> PollHandle {
        let (tx, rx) = mpsc::channel(POLL_CHANNEL_CAPACITY);
        let task = tokio::spawn(run_poll(
            self.source.clone(),
            cid,
            config,
            cancel.clone(),
            tx,
        ));
        PollHandle {
            events: rx,
            cancel,
            task,
        }
    }
}

async fn run_poll<S: StatusSource>(
    source: Arc<S>,
    cid: Cid,
    config: PollConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<PollEvent>,
) {
    let deadline = config.timeout.map(|t| Instant::now() + t);
    let mut delay = config.interval;
    let mut last_known: Option<PinView> = None;

    loop {
        if cancel.is_cancelled() {
            let _ = tx.try_send(PollEvent::Cancelled);
            return;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            debug!(%cid, "status poll timed out");
            let _ = send_unless_cancelled(&tx, &cancel, PollEvent::TimedOut).await;
            return;
        }

        let mut settled = false;
        let event = match source.read_status(&cid) {
            Ok(Some(pin)) => {
                delay = config.interval;
                let view = PinView::project(pin);
                settled = view.is_settled();
                last_known = Some(view.clone());
                PollEvent::Snapshot(view)
            }
            Ok(None) => {
                delay = config.interval;
                PollEvent::Missing
            }
            Err(error) => {
                delay = (delay * 2).min(config.max_backoff.max(config.interval));
                warn!(%cid, %error, next_in = ?delay, "status read failed");
                PollEvent::ReadFailed {
                    error,
                    last_known: last_known.clone(),
                }
            }
        };

        if !send_unless_cancelled(&tx, &cancel, event).await {
            debug!(%cid, "status poll stopped while delivering");
            return;
        }
        if settled && config.stop_when_settled {
            return;
        }

        let sleep_for = match deadline {
            Some(d) => delay.min(d.saturating_duration_since(Instant::now())),
            None => delay,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tx.try_send(PollEvent::Cancelled);
                return;
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

/// Send `event`, giving up as soon as `cancel` fires.
///
/// Returns whether the event was delivered.
async fn send_unless_cancelled(
    tx: &mpsc::Sender<PollEvent>,
    cancel: &CancellationToken,
    event: PollEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = tx.try_send(PollEvent::Cancelled);
            false
        }
        sent = tx.send(event) => sent.is_ok(),
    }
}
