use crate::metrics_defs::{BREAKER_REJECTED, BREAKER_TRANSITIONS};
use parking_lot::Mutex;
use serde::Deserialize;
use shared::counter;
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

/// Category of a failed protected call. Only kinds in the breaker's
/// allow-list count as failures.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call did not finish before its deadline.
    Timeout,
    /// Connection or transport level failure.
    Request,
    /// The backend answered with a non-success status.
    Status,
    /// The backend answered with a body that could not be decoded.
    Decode,
}

/// Errors that can be classified for the circuit breaker.
///
/// `None` means the error never counts against the backend, e.g. a call that
/// was cancelled by the caller.
pub trait ClassifiedError {
    fn failure_kind(&self) -> Option<FailureKind>;
}

#[derive(Clone, Debug)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// When set, failures only accumulate within a window of this length.
    pub failure_window: Option<Duration>,
    pub failure_kinds: HashSet<FailureKind>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    window_started: Option<Instant>,
    changed_at: Instant,
    trial_in_flight: bool,
}

enum Admission {
    Pass,
    Trial,
    Reject,
}

/// Protects a backend from callers once it keeps failing.
///
/// Closed: calls pass through and allow-listed failures are counted. Once the
/// count reaches `failure_threshold` the breaker opens and every call returns
/// the fallback without touching the backend. After `recovery_timeout` a
/// single trial call is let through (half-open): success closes the breaker,
/// failure opens it again for another full timeout.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        CircuitBreaker {
            name: name.into(),
            settings,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                window_started: None,
                changed_at: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose recovery timeout has elapsed is
    /// still reported as open until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Runs `f` if the breaker admits the call, otherwise returns the value
    /// of `fallback`.
    ///
    /// Errors that are not in the allow-list are returned unchanged and leave
    /// the breaker untouched.
    pub async fn call<T, E, F, Fut, FB>(&self, f: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifiedError,
        FB: FnOnce() -> T,
    {
        match self.admit() {
            Admission::Reject => {
                counter!(BREAKER_REJECTED, "breaker" => self.name.clone()).increment(1);
                Ok(fallback())
            }
            Admission::Pass => {
                let result = f().await;
                self.record(&result, false);
                result
            }
            Admission::Trial => {
                // Dropping the guard without disarming frees the trial slot,
                // so a cancelled trial does not wedge the breaker half-open.
                let guard = TrialGuard {
                    breaker: self,
                    armed: true,
                };
                let result = f().await;
                guard.disarm();
                self.record(&result, true);
                result
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                if state.changed_at.elapsed() < self.settings.recovery_timeout {
                    return Admission::Reject;
                }
                self.transition(&mut state, CircuitState::HalfOpen);
                state.trial_in_flight = true;
                Admission::Trial
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Admission::Reject
                } else {
                    state.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn record<T, E: ClassifiedError>(&self, result: &Result<T, E>, trial: bool) {
        let mut state = self.state.lock();
        if trial {
            state.trial_in_flight = false;
        }

        let counted_failure = match result {
            Ok(_) => false,
            Err(e) => match e.failure_kind() {
                Some(kind) if self.settings.failure_kinds.contains(&kind) => true,
                _ => return,
            },
        };

        match (state.state, counted_failure) {
            (CircuitState::HalfOpen, false) if trial => {
                state.failures = 0;
                state.window_started = None;
                self.transition(&mut state, CircuitState::Closed);
            }
            (CircuitState::HalfOpen, true) if trial => {
                self.transition(&mut state, CircuitState::Open);
            }
            (CircuitState::Closed, false) => {
                state.failures = 0;
                state.window_started = None;
            }
            (CircuitState::Closed, true) => {
                let now = Instant::now();
                if let (Some(window), Some(started)) =
                    (self.settings.failure_window, state.window_started)
                    && now.duration_since(started) >= window
                {
                    state.failures = 0;
                    state.window_started = None;
                }
                if state.window_started.is_none() {
                    state.window_started = Some(now);
                }
                state.failures += 1;
                if state.failures >= self.settings.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failures,
                        "failure threshold reached"
                    );
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            // A call admitted while closed that finishes after the breaker
            // moved on does not influence the new state.
            _ => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        state.changed_at = Instant::now();
        tracing::info!(
            breaker = %self.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit breaker state change"
        );
        counter!(
            BREAKER_TRANSITIONS,
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    fn release_trial(&self) {
        let mut state = self.state.lock();
        state.trial_in_flight = false;
        tracing::debug!(breaker = %self.name, "trial call abandoned");
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}
