//! The connection lifecycle controller.
//!
//! At most one session exists at a time. The controller validates connect
//! requests synchronously, then drives the session forward purely from
//! transport events: link up, handshake done, measurement, failure, teardown
//! confirmation. Every transition is reported as exactly one
//! [`LifecycleEvent`], emitted under the session lock so the consumer sees
//! events in the same order the transitions took effect.
//!
//! Sessions carry a generation counter, passed to the transport as the
//! connect-request token and echoed back on the attempt's outcome events.
//! Transport events are matched against the live session's address and
//! generation; anything from a since-terminated session is discarded, so a
//! late `Connected` or `ConnectFailed` can neither resurrect a dead session
//! nor be misattributed to a new session to the same address.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::events::{
    lifecycle_channel, LifecycleEvent, LifecycleReceiver, LifecycleSender,
};
use crate::transport::{ScaleTransport, TransportEvent};
use crate::util::is_valid_address;

/// How connection attempts are bounded and spaced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of connect attempts before giving up (minimum 1).
    pub max_attempts: u32,
    /// Fixed delay before each reissued attempt. `None` retries immediately,
    /// leaving pacing to the transport's own connect timeout.
    pub backoff: Option<Duration>,
    /// Apply ±25% random jitter to the backoff delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: None,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// The delay to sleep before the next attempt, jittered if configured.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        let base = self.backoff?;
        if !self.jitter {
            return Some(base);
        }
        let factor = rand::rng().random_range(0.75..=1.25);
        Some(base.mul_f64(factor))
    }
}

/// Phase of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Link is up; the driver handshake is running.
    Initializing,
    /// Handshake done; measurements flow.
    Connected,
    /// Teardown requested; awaiting transport confirmation.
    Disconnecting,
}

/// Point-in-time view of the active session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Address of the target device.
    pub address: String,
    /// Driver selected for the device.
    pub driver_id: String,
    /// Current phase.
    pub state: SessionState,
    /// Number of reissued attempts so far.
    pub retry_count: u32,
    /// When the session was created.
    pub started_at: Instant,
}

#[derive(Debug)]
struct Session {
    address: String,
    driver_id: String,
    state: SessionState,
    retry_count: u32,
    started_at: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct CtrlState {
    session: Option<Session>,
    next_generation: u64,
}

struct Shared {
    transport: Arc<dyn ScaleTransport>,
    policy: RetryPolicy,
    state: Mutex<CtrlState>,
    sender: LifecycleSender,
}

/// Deferred work computed while the session lock was held.
enum FollowUp {
    Retry {
        address: String,
        driver_id: String,
        generation: u64,
    },
    Teardown {
        address: String,
    },
}

/// Single-session connection state machine.
///
/// Dropping the controller stops event processing; the paired
/// [`LifecycleReceiver`] then yields `None`.
pub struct ConnectionController {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl ConnectionController {
    /// Create a controller over the given transport.
    ///
    /// Returns the controller and the single consumer's event stream.
    pub fn new(
        transport: Arc<dyn ScaleTransport>,
        policy: RetryPolicy,
    ) -> (Self, LifecycleReceiver) {
        let (sender, receiver) = lifecycle_channel();
        let shared = Arc::new(Shared {
            transport: Arc::clone(&transport),
            policy,
            state: Mutex::new(CtrlState::default()),
            sender,
        });
        let cancel = CancellationToken::new();
        tokio::spawn(pump_transport_events(
            transport.events(),
            Arc::clone(&shared),
            cancel.clone(),
        ));
        (Self { shared, cancel }, receiver)
    }

    /// Create a controller with the default retry policy.
    pub fn with_defaults(transport: Arc<dyn ScaleTransport>) -> (Self, LifecycleReceiver) {
        Self::new(transport, RetryPolicy::default())
    }

    /// Current session phase; [`SessionState::Idle`] when no session exists.
    pub fn state(&self) -> SessionState {
        self.shared
            .lock_state()
            .session
            .as_ref()
            .map_or(SessionState::Idle, |s| s.state)
    }

    /// Snapshot of the active session, if any.
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.shared
            .lock_state()
            .session
            .as_ref()
            .map(|s| SessionSnapshot {
                address: s.address.clone(),
                driver_id: s.driver_id.clone(),
                state: s.state,
                retry_count: s.retry_count,
                started_at: s.started_at,
            })
    }

    /// Open a session to the device at `address` using the driver registered
    /// under `driver_id`.
    ///
    /// Returns as soon as the first attempt is issued; the outcome arrives on
    /// the event stream. Calling again for the same address while the session
    /// is live is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `address` is malformed.
    /// - [`Error::RadioDisabled`] if the transport is unavailable.
    /// - [`Error::AlreadyConnecting`] if a session to a different address is
    ///   live.
    #[instrument(skip(self))]
    pub async fn connect(&self, address: &str, driver_id: &str) -> Result<()> {
        if !is_valid_address(address) {
            return Err(Error::invalid_address(address));
        }
        if !self.shared.transport.is_available().await {
            return Err(Error::RadioDisabled);
        }

        let generation = {
            let mut state = self.shared.lock_state();
            if let Some(session) = &state.session {
                if session.address == address {
                    debug!(address, "connect is a no-op, session already live");
                    return Ok(());
                }
                return Err(Error::AlreadyConnecting {
                    active: session.address.clone(),
                    requested: address.to_string(),
                });
            }
            let generation = state.next_generation;
            state.next_generation += 1;
            state.session = Some(Session {
                address: address.to_string(),
                driver_id: driver_id.to_string(),
                state: SessionState::Connecting,
                retry_count: 0,
                started_at: Instant::now(),
                generation,
            });
            generation
        };

        debug!(address, driver_id, "issuing first connect attempt");
        if let Err(error) = self
            .shared
            .transport
            .connect(address, driver_id, generation)
            .await
        {
            // The request itself could not be issued; undo the session.
            let mut state = self.shared.lock_state();
            if state
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation)
            {
                state.session = None;
            }
            return Err(error);
        }
        Ok(())
    }

    /// Request teardown of the active session.
    ///
    /// Always legal; a no-op when idle. The `Disconnected` event is emitted
    /// only once the transport confirms.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let address = {
            let mut state = self.shared.lock_state();
            let Some(session) = state.session.as_mut() else {
                return Ok(());
            };
            if session.state == SessionState::Disconnecting {
                return Ok(());
            }
            session.state = SessionState::Disconnecting;
            session.address.clone()
        };
        debug!(address, "requesting teardown");
        self.shared.transport.disconnect(&address).await
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CtrlState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(?event, "lifecycle event");
        let _ = self.sender.send(event);
    }

    /// Apply one transport event. Emissions happen under the lock; returned
    /// follow-ups run afterwards.
    fn apply(&self, event: TransportEvent) -> Option<FollowUp> {
        let mut state = self.lock_state();
        let Some(session) = state.session.as_mut() else {
            return None;
        };
        if session.address != event.address() {
            return None;
        }

        match event {
            TransportEvent::Connected { token, .. } => {
                if token != session.generation {
                    debug!(token, "discarding connect outcome from a stale session");
                    return None;
                }
                if session.state == SessionState::Connecting {
                    session.state = SessionState::Initializing;
                    self.emit(LifecycleEvent::ConnectionEstablished);
                }
                None
            }
            TransportEvent::ConnectFailed { token, reason, .. } => {
                if token != session.generation {
                    debug!(token, "discarding connect outcome from a stale session");
                    return None;
                }
                match session.state {
                    SessionState::Connecting => {
                        if session.retry_count + 1 < self.policy.max_attempts {
                            session.retry_count += 1;
                            let attempt = session.retry_count;
                            warn!(%reason, attempt, "connect attempt failed, retrying");
                            self.emit(LifecycleEvent::ConnectionRetrying { attempt });
                            Some(FollowUp::Retry {
                                address: session.address.clone(),
                                driver_id: session.driver_id.clone(),
                                generation: session.generation,
                            })
                        } else {
                            warn!(%reason, "connect attempts exhausted");
                            self.emit(LifecycleEvent::NoDeviceFound);
                            state.session = None;
                            None
                        }
                    }
                    SessionState::Disconnecting => {
                        // The attempt we were tearing down died on its own.
                        self.emit(LifecycleEvent::Disconnected);
                        state.session = None;
                        None
                    }
                    _ => None,
                }
            }
            TransportEvent::Disconnected { unexpected, .. } => match session.state {
                SessionState::Disconnecting => {
                    self.emit(LifecycleEvent::Disconnected);
                    state.session = None;
                    None
                }
                SessionState::Initializing | SessionState::Connected => {
                    if unexpected {
                        self.emit(LifecycleEvent::ConnectionLost);
                    } else {
                        self.emit(LifecycleEvent::Disconnected);
                    }
                    state.session = None;
                    None
                }
                _ => None,
            },
            TransportEvent::HandshakeComplete { .. } => {
                if session.state == SessionState::Initializing {
                    session.state = SessionState::Connected;
                    self.emit(LifecycleEvent::Init);
                }
                None
            }
            TransportEvent::HandshakeFailed { detail, .. } => {
                if matches!(
                    session.state,
                    SessionState::Initializing | SessionState::Connecting
                ) {
                    let address = session.address.clone();
                    self.emit(LifecycleEvent::UnexpectedError { detail });
                    state.session = None;
                    Some(FollowUp::Teardown { address })
                } else {
                    None
                }
            }
            TransportEvent::Measurement { measurement, .. } => {
                if session.state == SessionState::Connected {
                    self.emit(LifecycleEvent::DataReady { measurement });
                }
                None
            }
            TransportEvent::Info { code, arg, .. } => {
                if matches!(
                    session.state,
                    SessionState::Initializing | SessionState::Connected
                ) {
                    self.emit(LifecycleEvent::InfoMessage { code, arg });
                }
                None
            }
            TransportEvent::Advertisement { .. } => None,
        }
    }

    /// Reissue a connect attempt, unless the session moved on while the
    /// backoff delay elapsed.
    async fn run_retry(self: Arc<Self>, address: String, driver_id: String, generation: u64) {
        if let Some(delay) = self.policy.delay() {
            tokio::time::sleep(delay).await;
        }

        let still_live = {
            let state = self.lock_state();
            state.session.as_ref().is_some_and(|s| {
                s.generation == generation && s.state == SessionState::Connecting
            })
        };
        if !still_live {
            debug!(address, "retry abandoned, session moved on");
            return;
        }

        if let Err(error) = self.transport.connect(&address, &driver_id, generation).await {
            let mut state = self.lock_state();
            let live = state.session.as_ref().is_some_and(|s| {
                s.generation == generation && s.state == SessionState::Connecting
            });
            if live {
                self.emit(LifecycleEvent::UnexpectedError {
                    detail: error.to_string(),
                });
                state.session = None;
            }
        }
    }

    /// End the session when the transport stream lagged: a dropped event may
    /// have been the one transition the session was waiting for, leaving it
    /// wedged forever.
    fn fail_lagged(&self, missed: u64) -> Option<String> {
        let mut state = self.lock_state();
        let session = state.session.take()?;
        self.emit(LifecycleEvent::UnexpectedError {
            detail: format!("transport event stream lagged, {missed} events lost"),
        });
        Some(session.address)
    }
}

async fn pump_transport_events(
    mut rx: broadcast::Receiver<TransportEvent>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => {
                if let Some(follow_up) = shared.apply(event) {
                    match follow_up {
                        FollowUp::Retry {
                            address,
                            driver_id,
                            generation,
                        } => {
                            tokio::spawn(Arc::clone(&shared).run_retry(
                                address,
                                driver_id,
                                generation,
                            ));
                        }
                        FollowUp::Teardown { address } => {
                            let transport = Arc::clone(&shared.transport);
                            tokio::spawn(async move {
                                if let Err(error) = transport.disconnect(&address).await {
                                    warn!(%error, address, "post-failure teardown failed");
                                }
                            });
                        }
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "transport event stream lagged");
                if let Some(address) = shared.fail_lagged(missed) {
                    let transport = Arc::clone(&shared.transport);
                    tokio::spawn(async move {
                        if let Err(error) = transport.disconnect(&address).await {
                            warn!(%error, address, "post-lag teardown failed");
                        }
                    });
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
