//! Failure-containment circuit breaker for the scheduler.
//!
//! Scope is pool-wide: consecutive execution failures across any jobs open
//! the breaker, suspending dispatch of new executions while letting running
//! ones finish. After a cool-down a single half-open trial probes recovery.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Closed → Open after `threshold` consecutive failures; Open → HalfOpen
/// after `cooldown`; HalfOpen → Closed on trial success, back to Open on
/// trial failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    state: State,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            state: State::Closed,
        }
    }

    /// Current state, surfacing Open → HalfOpen eligibility after cool-down.
    pub fn state(&self) -> BreakerState {
        match &self.state {
            State::Closed => BreakerState::Closed,
            State::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Whether a new execution may be dispatched right now. Does not consume
    /// the half-open trial; call [`on_dispatch`](Self::on_dispatch) when a
    /// slot is actually assigned.
    pub fn admissible(&self) -> bool {
        match &self.state {
            State::Closed => true,
            State::Open { since } => since.elapsed() >= self.cooldown,
            State::HalfOpen { trial_in_flight } => !trial_in_flight,
        }
    }

    /// Record that an execution was dispatched. In half-open this consumes
    /// the single trial.
    pub fn on_dispatch(&mut self) {
        match &self.state {
            State::Open { since } if since.elapsed() >= self.cooldown => {
                self.state = State::HalfOpen {
                    trial_in_flight: true,
                };
            }
            State::HalfOpen { .. } => {
                self.state = State::HalfOpen {
                    trial_in_flight: true,
                };
            }
            _ => {}
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = State::Closed;
    }

    pub fn record_failure(&mut self) {
        match &self.state {
            State::HalfOpen { .. } => {
                // Trial failed: re-open and restart the cool-down.
                self.state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
            State::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.threshold {
                    self.state = State::Open {
                        since: Instant::now(),
                    };
                }
            }
        }
    }
}
