//! Position source abstraction.
//!
//! A platform geolocation watch is modeled as a subscription that pushes
//! into a [`PositionSink`] until it is unsubscribed or its handle is
//! cancelled. Fixes are latest-wins: a fix that has not been consumed yet is
//! replaced by a newer one. Errors are queued in order.
//! Platform adapters implement [`PositionSource`]; this module ships a
//! channel-fed source for embedding and tests, and a replay source for
//! recorded traces.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, trace, warn};

use crate::fix::PositionFix;

/// Errors a position source can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PositionError {
    /// The user denied location permission.
    #[error("location permission denied")]
    PermissionDenied,

    /// The hardware did not produce a fix in time.
    #[error("location request timed out")]
    Timeout,

    /// Location is temporarily unavailable.
    #[error("location unavailable: {0}")]
    Unavailable(String),

    /// The source has failed and will not recover.
    #[error("location source failed: {0}")]
    Unrecoverable(String),

    /// The source is already subscribed.
    #[error("position source already subscribed")]
    AlreadySubscribed,
}

impl PositionError {
    /// Whether the session cannot continue after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// Something a position source delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    /// A new position fix.
    Fix(PositionFix),
    /// The source failed to produce a fix.
    Error(PositionError),
}

/// Options passed to a platform geolocation watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Ask for GPS-grade accuracy.
    pub high_accuracy: bool,
    /// Oldest cached fix the platform may return.
    pub maximum_age: Duration,
    /// How long the platform may wait for a fix.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age: Duration::from_millis(1000),
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Create a connected sink and stream. At most `error_capacity` errors are
/// buffered; fixes never queue.
#[must_use]
pub fn position_channel(error_capacity: usize) -> (PositionSink, PositionStream) {
    let (fix_tx, fix_rx) = watch::channel(None);
    let (error_tx, error_rx) = mpsc::channel(error_capacity.max(1));
    (
        PositionSink {
            fixes: Arc::new(fix_tx),
            errors: error_tx,
        },
        PositionStream {
            fixes: fix_rx,
            errors: error_rx,
        },
    )
}

/// Delivery side handed to a [`PositionSource`] on subscribe.
#[derive(Debug, Clone)]
pub struct PositionSink {
    fixes: Arc<watch::Sender<Option<PositionFix>>>,
    errors: mpsc::Sender<PositionError>,
}

impl PositionSink {
    /// Publish a fix, replacing any fix not yet consumed.
    ///
    /// Returns `false` once the stream is gone.
    pub fn send_fix(&self, fix: PositionFix) -> bool {
        self.fixes.send(Some(fix)).is_ok()
    }

    /// Queue an error. Returns `false` if the stream is gone or its error
    /// buffer is full.
    pub fn send_error(&self, error: PositionError) -> bool {
        match self.errors.try_send(error) {
            Ok(()) => true,
            Err(e) => {
                trace!(error = %e, "Dropping position error");
                false
            }
        }
    }

    /// Deliver either kind of event.
    pub fn send(&self, event: PositionEvent) -> bool {
        match event {
            PositionEvent::Fix(fix) => self.send_fix(fix),
            PositionEvent::Error(error) => self.send_error(error),
        }
    }

    /// Whether the receiving stream has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.fixes.is_closed()
    }
}

/// Receiving side of [`position_channel`].
#[derive(Debug)]
pub struct PositionStream {
    fixes: watch::Receiver<Option<PositionFix>>,
    errors: mpsc::Receiver<PositionError>,
}

impl PositionStream {
    /// Next event: queued errors first, then the newest unseen fix.
    ///
    /// Returns `None` once every sink is dropped and nothing is pending.
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<PositionEvent> {
        loop {
            tokio::select! {
                biased;

                Some(error) = self.errors.recv() => return Some(PositionEvent::Error(error)),

                changed = self.fixes.changed() => {
                    changed.ok()?;
                    if let Some(fix) = *self.fixes.borrow_and_update() {
                        return Some(PositionEvent::Fix(fix));
                    }
                }
            }
        }
    }
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an active subscription.
///
/// This is a lightweight, cloneable handle; all clones share the same
/// active flag.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: u64,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Create a new, active handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::SeqCst),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Unique id of this subscription.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the subscription as cancelled.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Check whether the subscription is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A trait for platform position sources.
pub trait PositionSource: Send + std::fmt::Debug {
    /// The name of this source (for logging).
    fn name(&self) -> &'static str;

    /// Start delivering events into `sink`.
    ///
    /// Delivery must stop as soon as the returned handle is cancelled, even
    /// before [`unsubscribe`](Self::unsubscribe) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is already subscribed or the platform
    /// refuses the watch.
    fn subscribe(&mut self, sink: PositionSink) -> Result<SubscriptionHandle, PositionError>;

    /// Stop delivering events for `handle`. No event is sent afterwards.
    fn unsubscribe(&mut self, handle: &SubscriptionHandle);

    /// Check if the source currently has a subscriber.
    fn is_subscribed(&self) -> bool;
}

type Slot = Arc<Mutex<Option<(SubscriptionHandle, PositionSink)>>>;

/// Position source fed from outside through a [`FixFeeder`].
///
/// Platform glue pushes fixes into the feeder; they reach the subscriber
/// only while a subscription is active.
#[derive(Debug, Default)]
pub struct ChannelPositionSource {
    slot: Slot,
}

/// Push side of a [`ChannelPositionSource`].
#[derive(Debug, Clone)]
pub struct FixFeeder {
    slot: Slot,
}

impl ChannelPositionSource {
    /// Create a source and the feeder that drives it.
    #[must_use]
    pub fn new() -> (Self, FixFeeder) {
        let slot: Slot = Arc::default();
        (
            Self {
                slot: Arc::clone(&slot),
            },
            FixFeeder { slot },
        )
    }
}

impl PositionSource for ChannelPositionSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn subscribe(&mut self, sink: PositionSink) -> Result<SubscriptionHandle, PositionError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(h, _)| h.is_active()) {
            return Err(PositionError::AlreadySubscribed);
        }
        let handle = SubscriptionHandle::new();
        debug!(id = handle.id(), "Channel position source subscribed");
        *slot = Some((handle.clone(), sink));
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        handle.cancel();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(h, _)| h.id() == handle.id()) {
            debug!(id = handle.id(), "Channel position source unsubscribed");
            *slot = None;
        }
    }

    fn is_subscribed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(h, _)| h.is_active())
    }
}

impl FixFeeder {
    /// Deliver an event to the current subscriber.
    ///
    /// Returns `false` if nobody is subscribed or the event was dropped.
    pub fn push(&self, event: PositionEvent) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some((handle, sink)) if handle.is_active() => sink.send(event),
            _ => false,
        }
    }

    /// Deliver a fix to the current subscriber.
    pub fn push_fix(&self, fix: PositionFix) -> bool {
        self.push(PositionEvent::Fix(fix))
    }

    /// Deliver an error to the current subscriber.
    pub fn push_error(&self, error: PositionError) -> bool {
        self.push(PositionEvent::Error(error))
    }
}

/// Position source that replays a recorded list of fixes.
///
/// Fixes are emitted at a fixed interval until the list is exhausted or the
/// subscription is cancelled.
#[derive(Debug)]
pub struct ReplayPositionSource {
    fixes: Arc<Vec<PositionFix>>,
    interval: Duration,
    handle: Option<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

impl ReplayPositionSource {
    /// Create a replay source. A zero interval is raised to 1 ms.
    #[must_use]
    pub fn new(fixes: Vec<PositionFix>, interval: Duration) -> Self {
        Self {
            fixes: Arc::new(fixes),
            interval: interval.max(Duration::from_millis(1)),
            handle: None,
            task: None,
        }
    }

    /// Number of fixes in the trace.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    /// Whether the trace is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

impl PositionSource for ReplayPositionSource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn subscribe(&mut self, sink: PositionSink) -> Result<SubscriptionHandle, PositionError> {
        if self.is_subscribed() {
            return Err(PositionError::AlreadySubscribed);
        }

        let handle = SubscriptionHandle::new();
        let active = handle.clone();
        let fixes = Arc::clone(&self.fixes);
        let period = self.interval;

        debug!(
            fixes = fixes.len(),
            interval_ms = period.as_millis(),
            "Starting replay"
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            for fix in fixes.iter() {
                ticker.tick().await;
                if !active.is_active() {
                    break;
                }
                if !sink.send_fix(*fix) {
                    warn!("Replay receiver closed");
                    break;
                }
            }
            debug!("Replay finished");
        }));
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        handle.cancel();
        if self.handle.as_ref().is_some_and(|h| h.id() == handle.id()) {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            self.handle = None;
        }
    }

    fn is_subscribed(&self) -> bool {
        self.handle.as_ref().is_some_and(SubscriptionHandle::is_active)
    }
}
