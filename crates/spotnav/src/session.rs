//! Async glue around the guidance state machine.
//!
//! A [`NavigationSession`] computes the initial route, subscribes to a
//! [`PositionSource`] and runs a driver task that feeds fixes to the
//! [`GuidanceController`], executes reroute requests against the
//! [`RouteProvider`] with retries, and publishes state snapshots.
//!
//! Fixes are consumed latest-wins: whatever arrived while the previous fix
//! was being processed collapses to the newest one. When the driver exits
//! for any reason, the position subscription is cancelled with it.

use std::future::pending;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::announcer::Speaker;
use crate::config::Config;
use crate::controller::{
    GuidanceController, GuidanceEvent, NavigationState, NavigationStatus, RerouteRequest,
};
use crate::error::{Error, Result};
use crate::geo::LatLng;
use crate::provider::{validate_geometry, RouteError, RouteProvider};
use crate::route::Route;
use crate::source::{
    position_channel, PositionEvent, PositionSource, PositionStream, SubscriptionHandle,
};

/// Position errors buffered between the source and the driver.
const ERROR_CHANNEL_CAPACITY: usize = 8;

type SharedController = Arc<Mutex<GuidanceController>>;

fn lock(controller: &Mutex<GuidanceController>) -> MutexGuard<'_, GuidanceController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a route computation with retries.
#[derive(Debug)]
struct Attempted {
    attempts: u32,
    result: std::result::Result<Route, RouteError>,
}

/// Ask `provider` for a route, retrying with exponential backoff.
///
/// Each attempt is bounded by the configured deadline. `origin` is read
/// before every attempt so retries start from the freshest position.
async fn compute_with_retries(
    provider: &dyn RouteProvider,
    config: &Config,
    origin: impl Fn() -> LatLng,
    destination: LatLng,
) -> Attempted {
    let max_attempts = config.reroute.max_retries.max(1);
    let mut last_error = RouteError::NotFound;

    for attempt in 1..=max_attempts {
        let backoff = config.reroute_backoff(attempt);
        if !backoff.is_zero() {
            debug!(attempt, backoff_ms = backoff.as_millis(), "Backing off");
            sleep(backoff).await;
        }

        let from = origin();
        let outcome = timeout(
            config.reroute_deadline(),
            provider.compute_route(from, destination),
        )
        .await
        .unwrap_or(Err(RouteError::Timeout))
        .and_then(|route| validate_geometry(&route).map(|()| route));

        match outcome {
            Ok(route) => {
                debug!(
                    provider = provider.name(),
                    attempt,
                    steps = route.len(),
                    "Route computed"
                );
                return Attempted {
                    attempts: attempt,
                    result: Ok(route),
                };
            }
            Err(e) => {
                warn!(provider = provider.name(), attempt, error = %e, "Route attempt failed");
                last_error = e;
            }
        }
    }

    Attempted {
        attempts: max_attempts,
        result: Err(last_error),
    }
}

/// A reroute worker's result, tagged with its request ticket.
#[derive(Debug)]
struct RerouteOutcome {
    ticket: u64,
    attempted: Attempted,
}

/// Await the running reroute, or never resolve if there is none.
async fn join_reroute(
    task: &mut Option<JoinHandle<RerouteOutcome>>,
) -> std::result::Result<RerouteOutcome, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

/// The task that owns the fix receiver and the reroute worker.
#[derive(Debug)]
struct Driver {
    controller: SharedController,
    provider: Arc<dyn RouteProvider>,
    config: Config,
    events: mpsc::UnboundedSender<GuidanceEvent>,
    state: Arc<watch::Sender<NavigationState>>,
    subscription: SubscriptionHandle,
    reroute: Option<JoinHandle<RerouteOutcome>>,
}

impl Driver {
    async fn run(mut self, mut positions: PositionStream, mut shutdown: watch::Receiver<bool>) {
        let stale_after = self.config.stale_after();
        let stale = sleep(stale_after);
        tokio::pin!(stale);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                received = positions.recv() => {
                    let Some(event) = received else {
                        self.on_source_closed();
                        break;
                    };
                    if self.on_position_event(event) {
                        stale.as_mut().reset(Instant::now() + stale_after);
                    }
                }

                joined = join_reroute(&mut self.reroute) => {
                    self.reroute = None;
                    self.on_reroute_finished(joined);
                }

                () = &mut stale => {
                    let events = lock(&self.controller).mark_position_stale();
                    self.emit(events);
                    stale.as_mut().reset(Instant::now() + stale_after);
                }
            }

            self.publish();
            if matches!(
                lock(&self.controller).status(),
                NavigationStatus::Stopped | NavigationStatus::Error
            ) {
                break;
            }
        }

        if let Some(task) = self.reroute.take() {
            task.abort();
        }
        self.subscription.cancel();
        self.publish();
        debug!(subscription = self.subscription.id(), "Driver stopped");
    }

    /// Apply one position event. Returns whether it was a fix.
    fn on_position_event(&mut self, event: PositionEvent) -> bool {
        let fix = match event {
            PositionEvent::Fix(fix) => fix,
            PositionEvent::Error(error) => {
                let events = lock(&self.controller).handle_position_error(&error);
                self.emit(events);
                return false;
            }
        };

        let events = lock(&self.controller).handle_fix(fix);
        let request = events.iter().find_map(|e| match e {
            GuidanceEvent::RerouteRequested(r) => Some(*r),
            _ => None,
        });
        self.emit(events);
        if let Some(request) = request {
            self.spawn_reroute(request);
        }
        true
    }

    /// The source will deliver nothing more, so the session cannot continue.
    fn on_source_closed(&self) {
        info!("Position source closed, ending session");
        let mut controller = lock(&self.controller);
        let mut events = vec![GuidanceEvent::PositionUnavailable {
            message: "position source closed".to_string(),
        }];
        if controller.status() == NavigationStatus::Stopped {
            events.clear();
        }
        events.extend(controller.stop());
        drop(controller);
        self.emit(events);
    }

    fn spawn_reroute(&mut self, request: RerouteRequest) {
        if let Some(previous) = self.reroute.take() {
            debug!("Superseding running reroute");
            previous.abort();
        }

        let provider = Arc::clone(&self.provider);
        let controller = Arc::clone(&self.controller);
        let config = self.config.clone();

        self.reroute = Some(tokio::spawn(async move {
            let origin = || lock(&controller).retry_origin().unwrap_or(request.origin);
            let attempted =
                compute_with_retries(provider.as_ref(), &config, origin, request.destination)
                    .await;
            RerouteOutcome {
                ticket: request.ticket,
                attempted,
            }
        }));
    }

    fn on_reroute_finished(
        &mut self,
        joined: std::result::Result<RerouteOutcome, tokio::task::JoinError>,
    ) {
        let mut controller = lock(&self.controller);
        let events = match joined {
            Ok(RerouteOutcome {
                ticket,
                attempted:
                    Attempted {
                        attempts,
                        result: Ok(route),
                    },
            }) => {
                debug!(ticket, attempts, "Reroute succeeded");
                controller.reroute_succeeded(ticket, route)
            }
            Ok(RerouteOutcome {
                ticket,
                attempted:
                    Attempted {
                        attempts,
                        result: Err(e),
                    },
            }) => controller.reroute_failed(ticket, attempts, e.to_string()),
            Err(e) => {
                warn!(error = %e, "Reroute worker died");
                match controller.pending_reroute() {
                    Some(ticket) => controller.reroute_failed(ticket, 0, e.to_string()),
                    None => Vec::new(),
                }
            }
        };
        drop(controller);
        self.emit(events);
    }

    fn emit(&self, events: Vec<GuidanceEvent>) {
        for event in events {
            // Nobody listening is fine.
            let _ = self.events.send(event);
        }
    }

    fn publish(&self) {
        let snapshot = lock(&self.controller).snapshot();
        self.state.send_replace(snapshot);
    }
}

/// A live navigation session.
#[derive(Debug)]
pub struct NavigationSession {
    controller: SharedController,
    provider: Arc<dyn RouteProvider>,
    source: Box<dyn PositionSource>,
    subscription: Option<SubscriptionHandle>,
    config: Config,
    state: Arc<watch::Sender<NavigationState>>,
    events_tx: mpsc::UnboundedSender<GuidanceEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<GuidanceEvent>>,
    shutdown: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
}

impl NavigationSession {
    /// Compute the initial route from `origin` to `destination` and load it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RouteComputationFailed`] if no route could be
    /// computed within the configured retries.
    pub async fn create(
        config: Config,
        provider: Arc<dyn RouteProvider>,
        source: Box<dyn PositionSource>,
        speaker: Arc<dyn Speaker>,
        origin: LatLng,
        destination: LatLng,
    ) -> Result<Self> {
        info!(
            provider = provider.name(),
            source = source.name(),
            %origin,
            %destination,
            "Creating navigation session"
        );

        let attempted =
            compute_with_retries(provider.as_ref(), &config, || origin, destination).await;
        let route = attempted
            .result
            .map_err(|e| Error::route_computation_failed(attempted.attempts, &e))?;

        let mut controller = GuidanceController::new(&config, speaker);
        let events = controller.load_route(route)?;

        let (state, _) = watch::channel(controller.snapshot());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let session = Self {
            controller: Arc::new(Mutex::new(controller)),
            provider,
            source,
            subscription: None,
            config,
            state: Arc::new(state),
            events_tx,
            events_rx: Some(events_rx),
            shutdown,
            driver: None,
        };
        session.emit(events);
        Ok(session)
    }

    /// Start tracking: subscribe to the position source and spawn the driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DegenerateRoute`] for a route with no steps (nothing
    /// is subscribed), [`Error::InvalidTransition`] if not in the
    /// route-loaded state, or [`Error::PositionUnavailable`] if the source
    /// refuses the subscription.
    pub fn start(&mut self) -> Result<()> {
        let events = lock(&self.controller).start()?;
        self.emit(events);

        let (sink, positions) = position_channel(ERROR_CHANNEL_CAPACITY);
        let handle = match self.source.subscribe(sink) {
            Ok(handle) => handle,
            Err(e) => {
                let events = lock(&self.controller).fail(&e.to_string());
                self.emit(events);
                self.publish();
                return Err(e.into());
            }
        };
        debug!(
            source = self.source.name(),
            subscription = handle.id(),
            "Subscribed to position source"
        );

        let driver = Driver {
            controller: Arc::clone(&self.controller),
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
            events: self.events_tx.clone(),
            state: Arc::clone(&self.state),
            subscription: handle.clone(),
            reroute: None,
        };
        self.subscription = Some(handle);
        self.driver = Some(tokio::spawn(driver.run(positions, self.shutdown.subscribe())));
        self.publish();
        Ok(())
    }

    /// Stop the session. Safe to call in any state and more than once.
    ///
    /// The position subscription is released before this returns, so no fix
    /// is processed afterwards.
    pub fn stop(&mut self) {
        if let Some(handle) = self.subscription.take() {
            self.source.unsubscribe(&handle);
            debug!(subscription = handle.id(), "Unsubscribed from position source");
        }
        self.shutdown.send_replace(true);
        let events = lock(&self.controller).stop();
        self.emit(events);
        self.publish();
    }

    /// Stop the session and wait for the driver to exit.
    pub async fn dispose(mut self) {
        self.stop();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }

    /// Wait until the driver exits on its own (arrival, error, or the
    /// position source running dry), then release the subscription.
    pub async fn finished(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(error = %e, "Driver task failed");
            }
        }
        if let Some(handle) = self.subscription.take() {
            self.source.unsubscribe(&handle);
        }
    }

    /// Turn spoken announcements on or off.
    pub fn set_audio_enabled(&self, enabled: bool) {
        lock(&self.controller).set_audio_enabled(enabled);
        self.publish();
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> NavigationState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<NavigationState> {
        self.state.subscribe()
    }

    /// Take the event stream. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<GuidanceEvent>> {
        self.events_rx.take()
    }

    /// Whether the position source is still subscribed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.source.is_subscribed()
    }

    fn emit(&self, events: Vec<GuidanceEvent>) {
        for event in events {
            let _ = self.events_tx.send(event);
        }
    }

    fn publish(&self) {
        let snapshot = lock(&self.controller).snapshot();
        self.state.send_replace(snapshot);
    }
}

impl Drop for NavigationSession {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.take() {
            self.source.unsubscribe(&handle);
        }
        self.shutdown.send_replace(true);
    }
}
