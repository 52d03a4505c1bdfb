//! Stream session state machine.
//!
//! `StreamSession` is a pure reducer: the async driver feeds it
//! [`SessionEvent`]s and executes the [`SessionAction`]s it returns. All
//! reconnect decisions live here so that log, shell and gateway streams
//! share one behavior and differ only in their [`RetryPolicy`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RetryPolicy, StreamTarget};

/// Connection state surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Internal phase of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Not bound to any resource.
    Inactive,
    /// Waiting for the token issuer.
    Issuing,
    /// Token in hand, handshake in flight.
    Opening,
    /// Connection open.
    Open,
    /// Waiting `delay` before retry number `attempt`.
    Backoff { attempt: u32, delay: Duration },
    /// Active, but the resource is not in a connectable lifecycle state.
    Parked,
    /// Retry policy exhausted.
    GaveUp { reason: String },
}

impl Phase {
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        match self {
            Self::Inactive | Self::Parked | Self::GaveUp { .. } => ConnectionState::Disconnected,
            Self::Issuing | Self::Opening | Self::Backoff { .. } => ConnectionState::Connecting,
            Self::Open => ConnectionState::Connected,
        }
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Activate(StreamTarget),
    TokenIssued,
    Opened,
    /// Any incoming frame; only refreshes liveness.
    Received,
    /// Token issuance, handshake or transport failure.
    Failed(String),
    /// Remote closed the connection.
    Closed,
    RetryElapsed,
    /// Resource lifecycle changed (e.g. agent stopped or started).
    SetConnectable(bool),
    /// User asked for an immediate reconnect.
    Reconnect,
    Deactivate,
}

/// Side effects requested by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Request a fresh access token.
    IssueToken,
    /// Open the connection with the token just issued.
    Open,
    /// Close the connection if open or opening.
    Close,
    ScheduleRetry(Duration),
    CancelRetry,
    GiveUp(String),
}

/// One logical real-time connection, owned by whoever activated it.
#[derive(Debug, Clone)]
pub struct StreamSession {
    policy: RetryPolicy,
    target: Option<StreamTarget>,
    phase: Phase,
    connectable: bool,
    /// Consecutive failures since the last successful open.
    failures: u32,
    last_seen: Option<DateTime<Utc>>,
}

impl StreamSession {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            target: None,
            phase: Phase::Inactive,
            connectable: true,
            failures: 0,
            last_seen: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.phase.connection_state()
    }

    #[must_use]
    pub const fn target(&self) -> Option<&StreamTarget> {
        self.target.as_ref()
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Inactive)
    }

    #[must_use]
    pub const fn is_connectable(&self) -> bool {
        self.connectable
    }

    #[must_use]
    pub const fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Apply one event and return the side effects to run, in order.
    pub fn apply(&mut self, event: SessionEvent, now: DateTime<Utc>) -> Vec<SessionAction> {
        match event {
            SessionEvent::Activate(target) => {
                let mut actions = self.teardown();
                self.target = Some(target);
                self.failures = 0;
                self.last_seen = None;
                actions.extend(self.begin());
                actions
            }
            SessionEvent::Deactivate => {
                let actions = self.teardown();
                self.target = None;
                actions
            }
            SessionEvent::TokenIssued => {
                if self.phase == Phase::Issuing {
                    self.phase = Phase::Opening;
                    vec![SessionAction::Open]
                } else {
                    Vec::new()
                }
            }
            SessionEvent::Opened => {
                if self.phase == Phase::Opening {
                    self.phase = Phase::Open;
                    self.failures = 0;
                    self.last_seen = Some(now);
                }
                Vec::new()
            }
            SessionEvent::Received => {
                if self.phase == Phase::Open {
                    self.last_seen = Some(now);
                }
                Vec::new()
            }
            SessionEvent::Failed(reason) => self.on_failure(reason),
            SessionEvent::Closed => self.on_failure("connection closed".to_owned()),
            SessionEvent::RetryElapsed => {
                if matches!(self.phase, Phase::Backoff { .. }) {
                    self.begin()
                } else {
                    Vec::new()
                }
            }
            SessionEvent::SetConnectable(connectable) => self.set_connectable(connectable),
            SessionEvent::Reconnect => {
                if !self.is_active() {
                    return Vec::new();
                }
                let mut actions = self.interrupt();
                self.failures = 0;
                actions.extend(self.begin());
                actions
            }
        }
    }

    /// Start (or restart) the issue-then-open sequence.
    fn begin(&mut self) -> Vec<SessionAction> {
        if self.connectable {
            self.phase = Phase::Issuing;
            vec![SessionAction::IssueToken]
        } else {
            self.phase = Phase::Parked;
            Vec::new()
        }
    }

    /// Cancel timers and close the socket, leaving the phase to the caller.
    fn interrupt(&self) -> Vec<SessionAction> {
        match self.phase {
            Phase::Inactive => Vec::new(),
            Phase::Backoff { .. } => vec![SessionAction::CancelRetry],
            Phase::Opening | Phase::Open => vec![SessionAction::Close],
            Phase::Issuing | Phase::Parked | Phase::GaveUp { .. } => Vec::new(),
        }
    }

    fn teardown(&mut self) -> Vec<SessionAction> {
        let actions = self.interrupt();
        self.phase = Phase::Inactive;
        actions
    }

    fn on_failure(&mut self, reason: String) -> Vec<SessionAction> {
        let mut actions = match self.phase {
            Phase::Issuing | Phase::Opening | Phase::Open => Vec::new(),
            // Stale report from a connection that is already gone.
            _ => return Vec::new(),
        };
        if matches!(self.phase, Phase::Open | Phase::Opening) {
            actions.push(SessionAction::Close);
        }
        if !self.connectable {
            self.phase = Phase::Parked;
            return actions;
        }
        let attempt = self.failures;
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                self.failures = self.failures.saturating_add(1);
                self.phase = Phase::Backoff { attempt, delay };
                actions.push(SessionAction::ScheduleRetry(delay));
            }
            None => {
                self.phase = Phase::GaveUp {
                    reason: reason.clone(),
                };
                actions.push(SessionAction::GiveUp(reason));
            }
        }
        actions
    }

    fn set_connectable(&mut self, connectable: bool) -> Vec<SessionAction> {
        if self.connectable == connectable {
            return Vec::new();
        }
        self.connectable = connectable;
        match (&self.phase, connectable) {
            (Phase::Backoff { .. }, false) => {
                self.phase = Phase::Parked;
                vec![SessionAction::CancelRetry]
            }
            // Abandon the token request or handshake in flight.
            (Phase::Issuing, false) => {
                self.phase = Phase::Parked;
                Vec::new()
            }
            (Phase::Opening, false) => {
                self.phase = Phase::Parked;
                vec![SessionAction::Close]
            }
            (Phase::Parked, true) => {
                self.failures = 0;
                self.begin()
            }
            _ => Vec::new(),
        }
    }
}
