//! Connection supervisor.
//!
//! Owns the lifecycle of the single canonical transport: connect, readiness,
//! reconnect with backoff, periodic health check and circuit breaker. Uses the
//! action pattern: methods take time as input and return actions for the
//! driver to execute, so the supervisor itself never touches a socket.
//!
//! # State Machine
//!
//! ```text
//!                connect / retry due
//! ┌──────────────┐ ───────────────> ┌────────────┐   ready    ┌───────┐
//! │ Disconnected │                  │ Connecting │ ─────────> │ Ready │
//! └──────────────┘ <─────────────── └────────────┘            └───────┘
//!        ↑      open failed / timeout (backoff)                    │
//!        └──────────────────────────────────────────────────────────┘
//!                        closed / dropped (retry next tick)
//!
//!   shutdown (any state) ──> Closed (terminal)
//! ```
//!
//! Every transport instance gets a fresh [`TransportId`]. Lifecycle events
//! carrying any id other than the current one are ignored, so a replaced
//! transport cannot disturb its successor.

use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

/// Interval between health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Time allowed for a transport to become ready.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after the first failed attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Ceiling for the retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive failed attempts that open the circuit.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 8;

/// How long an open circuit suppresses attempts.
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Generation number of a transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Wrap a raw generation number.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw generation number.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live transport.
    Disconnected,
    /// Transport created, waiting for its ready event.
    Connecting,
    /// Transport ready; room operations may proceed.
    Ready,
    /// Supervisor shut down. Terminal.
    Closed,
}

/// Actions returned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Construct a transport and register its lifecycle callbacks under this
    /// id.
    Open {
        /// Id to stamp on the new transport's events.
        transport: TransportId,
    },

    /// Close and release the transport with this id.
    Close {
        /// Transport to release.
        transport: TransportId,
    },

    /// The connection became ready.
    Ready,

    /// A ready connection was lost.
    Lost,
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between health checks.
    pub health_check_interval: Duration,
    /// Time allowed for a transport to become ready.
    pub connect_timeout: Duration,
    /// Delay after the first failed attempt; doubles per failure.
    pub initial_backoff: Duration,
    /// Ceiling for the retry delay.
    pub max_backoff: Duration,
    /// Consecutive failed attempts that open the circuit.
    pub breaker_threshold: u32,
    /// How long an open circuit suppresses attempts.
    pub breaker_cooldown: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown: DEFAULT_BREAKER_COOLDOWN,
        }
    }
}

/// Connection supervisor state machine.
///
/// Pure: no I/O, no clock. Generic over `I` so tests can drive virtual time.
#[derive(Debug, Clone)]
pub struct Supervisor<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    state: ConnectionState,
    config: SupervisorConfig,
    /// Canonical transport. `None` when nothing is live.
    current: Option<TransportId>,
    /// Last generation handed out.
    last_transport: u64,
    /// Consecutive attempts that did not reach Ready.
    failures: u32,
    /// Next scheduled reconnect. `None` if nothing is scheduled.
    retry_at: Option<I>,
    /// Deadline for the current Connecting attempt.
    connect_deadline: Option<I>,
    last_health_check: Option<I>,
    /// Circuit open until this instant.
    breaker_until: Option<I>,
    shut_down: bool,
}

impl<I> Supervisor<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a supervisor in [`ConnectionState::Disconnected`].
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            current: None,
            last_transport: 0,
            failures: 0,
            retry_at: None,
            connect_deadline: None,
            last_health_check: None,
            breaker_until: None,
            shut_down: false,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the current transport reported ready.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Canonical transport. `None` if nothing is live.
    pub fn current_transport(&self) -> Option<TransportId> {
        self.current
    }

    /// Consecutive failed attempts.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Next scheduled reconnect. `None` if nothing is scheduled.
    pub fn retry_at(&self) -> Option<I> {
        self.retry_at
    }

    /// True while the circuit breaker suppresses attempts.
    pub fn is_circuit_open(&self, now: I) -> bool {
        self.breaker_until.is_some_and(|until| now < until)
    }

    /// True after [`Supervisor::shutdown`].
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Retry delay implied by the current failure count.
    pub fn backoff(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (self.failures - 1).min(16);
        self.config.initial_backoff.saturating_mul(1 << exponent).min(self.config.max_backoff)
    }

    /// Start a transport unless one is already live.
    ///
    /// Idempotent: returns no actions while a transport exists or after
    /// shutdown.
    pub fn connect(&mut self, now: I) -> Vec<SupervisorAction> {
        if self.shut_down || self.current.is_some() {
            return Vec::new();
        }

        self.open(now)
    }

    /// The transport reported ready.
    pub fn handle_ready(&mut self, transport: TransportId) -> Vec<SupervisorAction> {
        if !self.is_current(transport) || self.state == ConnectionState::Ready {
            return Vec::new();
        }

        self.state = ConnectionState::Ready;
        self.failures = 0;
        self.breaker_until = None;
        self.retry_at = None;
        self.connect_deadline = None;

        vec![SupervisorAction::Ready]
    }

    /// The transport reported closed.
    ///
    /// Losing a ready connection schedules a reconnect for the next tick.
    /// Closing before readiness counts as a failed attempt.
    pub fn handle_closed(&mut self, transport: TransportId, now: I) -> Vec<SupervisorAction> {
        if !self.is_current(transport) {
            return Vec::new();
        }

        if self.detach() {
            self.failures = 0;
            self.retry_at = Some(now);
            vec![SupervisorAction::Lost]
        } else {
            self.record_failure(now);
            Vec::new()
        }
    }

    /// Transport construction failed.
    pub fn handle_open_failed(&mut self, transport: TransportId, now: I) -> Vec<SupervisorAction> {
        if !self.is_current(transport) {
            return Vec::new();
        }

        self.detach();
        self.record_failure(now);
        Vec::new()
    }

    /// The live handle vanished without a close event.
    ///
    /// Reconnection is left to the next health check.
    pub fn handle_dropped(&mut self, transport: TransportId, now: I) -> Vec<SupervisorAction> {
        if !self.is_current(transport) {
            return Vec::new();
        }

        if self.detach() {
            vec![SupervisorAction::Lost]
        } else {
            self.record_failure(now);
            Vec::new()
        }
    }

    /// Periodic maintenance: connect deadline, due retries, health check and
    /// circuit breaker.
    pub fn tick(&mut self, now: I) -> Vec<SupervisorAction> {
        if self.shut_down {
            return Vec::new();
        }

        let mut actions = Vec::new();

        if self.state == ConnectionState::Connecting
            && self.connect_deadline.is_some_and(|deadline| now >= deadline)
        {
            if let Some(transport) = self.current {
                actions.push(SupervisorAction::Close { transport });
            }
            self.detach();
            self.record_failure(now);
        }

        let health_check_due = self
            .last_health_check
            .is_none_or(|last| now - last >= self.config.health_check_interval);
        if health_check_due {
            self.last_health_check = Some(now);
        }

        if self.current.is_some() {
            return actions;
        }

        if let Some(until) = self.breaker_until {
            if now < until {
                return actions;
            }

            // Half-open: one attempt, a failure reopens the circuit
            self.breaker_until = None;
            self.failures = self.config.breaker_threshold.saturating_sub(1);
            actions.extend(self.open(now));
            return actions;
        }

        let due = match self.retry_at {
            Some(at) => now >= at,
            None => health_check_due,
        };

        if due {
            actions.extend(self.open(now));
        }

        actions
    }

    /// Stop supervising. Releases the live transport; no further reconnects.
    pub fn shutdown(&mut self) -> Vec<SupervisorAction> {
        if self.shut_down {
            return Vec::new();
        }

        let was_ready = self.state == ConnectionState::Ready;
        self.shut_down = true;
        self.state = ConnectionState::Closed;
        self.retry_at = None;
        self.connect_deadline = None;
        self.breaker_until = None;

        let mut actions = Vec::new();
        if let Some(transport) = self.current.take() {
            actions.push(SupervisorAction::Close { transport });
        }
        if was_ready {
            actions.push(SupervisorAction::Lost);
        }
        actions
    }

    fn is_current(&self, transport: TransportId) -> bool {
        self.current == Some(transport)
    }

    fn open(&mut self, now: I) -> Vec<SupervisorAction> {
        self.last_transport += 1;
        let transport = TransportId(self.last_transport);

        self.current = Some(transport);
        self.state = ConnectionState::Connecting;
        self.retry_at = None;
        self.connect_deadline = Some(now + self.config.connect_timeout);

        vec![SupervisorAction::Open { transport }]
    }

    /// Forget the current transport. Returns true if it was ready.
    fn detach(&mut self) -> bool {
        let was_ready = self.state == ConnectionState::Ready;
        self.current = None;
        self.connect_deadline = None;
        self.state = ConnectionState::Disconnected;
        was_ready
    }

    fn record_failure(&mut self, now: I) {
        self.failures = self.failures.saturating_add(1);

        if self.failures >= self.config.breaker_threshold {
            self.breaker_until = Some(now + self.config.breaker_cooldown);
            self.retry_at = None;
        } else {
            self.retry_at = Some(now + self.backoff());
        }
    }
}
