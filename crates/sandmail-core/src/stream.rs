//! Event-stream reconnect state machine.
//!
//! Uses the action pattern: the driver reports what happened on the wire
//! and executes the returned actions. No I/O and no clock in here; delays
//! are returned as values for the driver to sleep on.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start ┌────────────┐  opened  ┌───────────┐
//! │ Idle │──────>│ Connecting │─────────>│ Connected │
//! └──────┘       └────────────┘          └───────────┘
//!                   │     ↑                    │
//!      disconnected │     │ wait elapsed       │ disconnected
//!                   ↓     │                    ↓
//!               ┌──────────────┐<──────────────┘
//!               │ Reconnecting │
//!               └──────────────┘
//!                   │ attempts exhausted
//!                   ↓
//!               ┌────────┐
//!               │ Failed │
//!               └────────┘
//! ```
//!
//! `Closed` is reachable from every state when the last subscriber leaves.
//! `Failed` is terminal.
//!
//! # Attempt Counting
//!
//! The attempt counter is the number of consecutive connection attempts
//! that ended in a disconnect since the last observed event. The disconnect
//! that brings it to `max_attempts` fails the stream, so a cold start with
//! `max_attempts` refused connects ends in `Failed`. Disconnect `n` below
//! that schedules a reconnect after `min(interval * 2^(n-1), max_delay)`.
//!
//! | max_attempts | disconnect | action          |
//! |--------------|------------|-----------------|
//! | 5            | 1..=4      | wait 1,2,4,8 x  |
//! | 5            | 5          | fail            |
//! | 1            | 1          | fail            |
//!
//! Observing an event resets the counter to zero. Reopening because the
//! subscription list changed is not a failure and leaves the counter alone.

use std::time::Duration;

use crate::error::StreamError;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub interval: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Consecutive failed connection attempts that fail the stream
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// `min(interval * 2^(attempt - 1), max_delay)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.interval
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Actions returned by the stream state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// Open the stream with the current subscription list, replacing any
    /// open connection
    Open,

    /// Sleep, then report [`StreamMachine::wait_elapsed`]
    Wait {
        /// Failed attempts so far
        attempt: u32,
        /// How long to wait
        delay: Duration,
    },

    /// Stream gave up; notify every subscriber
    Fail {
        /// Consecutive attempts that failed
        attempts: u32,
        /// Cause of the final disconnect
        reason: String,
    },

    /// Tear down any open connection
    Close,
}

/// Stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Never started, or closed and waiting for a subscriber
    Idle,
    /// Open requested, response not yet seen
    Connecting {
        /// Failed attempts since the last observed event
        attempt: u32,
    },
    /// Response accepted, reading frames
    Connected {
        /// Failed attempts since the last observed event
        attempt: u32,
    },
    /// Waiting out a backoff delay
    Reconnecting {
        /// Failed attempts so far
        attempt: u32,
        /// Delay being waited
        delay: Duration,
    },
    /// Attempts exhausted. Terminal.
    Failed,
    /// Shut down because nothing is subscribed
    Closed,
}

/// Reconnect state machine for one shared event stream.
#[derive(Debug, Clone)]
pub struct StreamMachine {
    state: StreamState,
    policy: ReconnectPolicy,
}

impl StreamMachine {
    /// Create a machine in [`StreamState::Idle`]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { state: StreamState::Idle, policy }
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Backoff parameters
    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Whether the stream has given up.
    pub fn is_failed(&self) -> bool {
        self.state == StreamState::Failed
    }

    /// First subscriber arrived.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidTransition` unless `Idle` or `Closed`
    pub fn start(&mut self) -> Result<Vec<StreamAction>, StreamError> {
        match self.state {
            StreamState::Idle | StreamState::Closed => {
                self.state = StreamState::Connecting { attempt: 0 };
                Ok(vec![StreamAction::Open])
            },
            state => Err(StreamError::invalid(state, "start")),
        }
    }

    /// The server accepted the stream request.
    ///
    /// Does not reset the attempt counter; only events do.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidTransition` unless `Connecting`
    pub fn opened(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Connecting { attempt } => {
                self.state = StreamState::Connected { attempt };
                Ok(())
            },
            state => Err(StreamError::invalid(state, "opened")),
        }
    }

    /// A frame was observed on the stream.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidTransition` unless `Connected`
    pub fn event_observed(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Connected { .. } => {
                self.state = StreamState::Connected { attempt: 0 };
                Ok(())
            },
            state => Err(StreamError::invalid(state, "event_observed")),
        }
    }

    /// The request failed, the response was non-success, the stream ended,
    /// or a read failed.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidTransition` unless `Connecting` or `Connected`
    pub fn disconnected(&mut self, reason: &str) -> Result<Vec<StreamAction>, StreamError> {
        let attempt = match self.state {
            StreamState::Connecting { attempt } | StreamState::Connected { attempt } => attempt,
            state => return Err(StreamError::invalid(state, "disconnected")),
        };

        let attempt = attempt + 1;
        if attempt >= self.policy.max_attempts {
            self.state = StreamState::Failed;
            return Ok(vec![StreamAction::Fail { attempts: attempt, reason: reason.to_string() }]);
        }

        let delay = self.policy.delay(attempt);
        self.state = StreamState::Reconnecting { attempt, delay };
        Ok(vec![StreamAction::Wait { attempt, delay }])
    }

    /// A backoff delay has elapsed.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidTransition` unless `Reconnecting`
    pub fn wait_elapsed(&mut self) -> Result<Vec<StreamAction>, StreamError> {
        match self.state {
            StreamState::Reconnecting { attempt, .. } => {
                self.state = StreamState::Connecting { attempt };
                Ok(vec![StreamAction::Open])
            },
            state => Err(StreamError::invalid(state, "wait_elapsed")),
        }
    }

    /// The set of subscribed inboxes changed.
    ///
    /// An open or opening stream is reopened immediately with the new list.
    /// A pending reconnect will pick the list up when it fires. Not a
    /// failure, so the attempt counter is untouched.
    pub fn subscriptions_changed(&mut self) -> Vec<StreamAction> {
        match self.state {
            StreamState::Connecting { attempt } | StreamState::Connected { attempt } => {
                self.state = StreamState::Connecting { attempt };
                vec![StreamAction::Open]
            },
            StreamState::Idle | StreamState::Closed => {
                self.state = StreamState::Connecting { attempt: 0 };
                vec![StreamAction::Open]
            },
            StreamState::Reconnecting { .. } | StreamState::Failed => vec![],
        }
    }

    /// Last subscriber left.
    ///
    /// A failed stream stays failed.
    pub fn close(&mut self) -> Vec<StreamAction> {
        match self.state {
            StreamState::Failed => vec![],
            StreamState::Idle | StreamState::Closed => {
                self.state = StreamState::Closed;
                vec![]
            },
            _ => {
                self.state = StreamState::Closed;
                vec![StreamAction::Close]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts,
        }
    }

    fn connected(max_attempts: u32) -> StreamMachine {
        let mut machine = StreamMachine::new(policy(max_attempts));
        machine.start().unwrap();
        machine.opened().unwrap();
        machine
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy(10);
        let delays: Vec<u64> = (1..=6).map(|n| p.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(p.delay(200), Duration::from_secs(60));
    }

    #[test]
    fn start_opens() {
        let mut machine = StreamMachine::new(policy(3));
        assert_eq!(machine.start().unwrap(), vec![StreamAction::Open]);
        assert_eq!(machine.state(), StreamState::Connecting { attempt: 0 });
    }

    #[test]
    fn start_twice_is_invalid() {
        let mut machine = StreamMachine::new(policy(3));
        machine.start().unwrap();
        assert!(matches!(machine.start(), Err(StreamError::InvalidTransition { .. })));
    }

    #[test]
    fn disconnect_schedules_reconnect() {
        let mut machine = connected(3);

        let actions = machine.disconnected("stream ended").unwrap();
        assert_eq!(actions, vec![StreamAction::Wait {
            attempt: 1,
            delay: Duration::from_secs(5)
        }]);

        assert_eq!(machine.wait_elapsed().unwrap(), vec![StreamAction::Open]);
        assert_eq!(machine.state(), StreamState::Connecting { attempt: 1 });
    }

    #[test]
    fn fails_at_max_consecutive_disconnects() {
        let mut machine = connected(5);

        // Established stream drops, then four reconnects are refused
        let mut delays = Vec::new();
        let mut actions = machine.disconnected("dropped").unwrap();
        for _ in 0..4 {
            let [StreamAction::Wait { delay, .. }] = actions.as_slice() else {
                panic!("expected wait, got {actions:?}");
            };
            delays.push(delay.as_secs());
            machine.wait_elapsed().unwrap();
            actions = machine.disconnected("refused").unwrap();
        }

        assert_eq!(delays, vec![5, 10, 20, 40]);
        assert_eq!(actions, vec![StreamAction::Fail { attempts: 5, reason: "refused".to_string() }]);
        assert!(machine.is_failed());
    }

    #[test]
    fn cold_start_fails_after_max_refused_connects() {
        let mut machine = StreamMachine::new(policy(3));
        machine.start().unwrap();

        assert!(matches!(machine.disconnected("refused").unwrap()[0], StreamAction::Wait {
            attempt: 1,
            ..
        }));
        machine.wait_elapsed().unwrap();
        assert!(matches!(machine.disconnected("refused").unwrap()[0], StreamAction::Wait {
            attempt: 2,
            ..
        }));
        machine.wait_elapsed().unwrap();

        let actions = machine.disconnected("refused").unwrap();
        assert!(matches!(actions[0], StreamAction::Fail { attempts: 3, .. }));
    }

    #[test]
    fn single_attempt_fails_on_first_disconnect() {
        let mut machine = connected(1);
        let actions = machine.disconnected("dropped").unwrap();
        assert!(matches!(actions[0], StreamAction::Fail { attempts: 1, .. }));
    }

    #[test]
    fn event_resets_counter() {
        let mut machine = connected(2);
        machine.disconnected("dropped").unwrap();
        machine.wait_elapsed().unwrap();
        machine.opened().unwrap();
        assert_eq!(machine.state(), StreamState::Connected { attempt: 1 });

        machine.event_observed().unwrap();
        assert_eq!(machine.state(), StreamState::Connected { attempt: 0 });
    }

    #[test]
    fn open_without_event_keeps_counter() {
        // A server that accepts then immediately hangs up still exhausts attempts
        let mut machine = connected(2);
        machine.disconnected("dropped").unwrap();
        machine.wait_elapsed().unwrap();
        machine.opened().unwrap();

        let actions = machine.disconnected("dropped").unwrap();
        assert!(matches!(actions[0], StreamAction::Fail { attempts: 2, .. }));
    }

    #[test]
    fn subscription_change_reopens_without_counting() {
        let mut machine = connected(3);
        machine.disconnected("dropped").unwrap();
        machine.wait_elapsed().unwrap();

        assert_eq!(machine.subscriptions_changed(), vec![StreamAction::Open]);
        assert_eq!(machine.state(), StreamState::Connecting { attempt: 1 });
    }

    #[test]
    fn subscription_change_while_waiting_is_deferred() {
        let mut machine = connected(3);
        machine.disconnected("dropped").unwrap();
        assert!(machine.subscriptions_changed().is_empty());
    }

    #[test]
    fn close_then_restart() {
        let mut machine = connected(3);
        assert_eq!(machine.close(), vec![StreamAction::Close]);
        assert_eq!(machine.state(), StreamState::Closed);

        assert_eq!(machine.start().unwrap(), vec![StreamAction::Open]);
    }

    #[test]
    fn failed_is_terminal() {
        let mut machine = connected(0);
        machine.disconnected("gone").unwrap();

        assert!(machine.close().is_empty());
        assert!(machine.subscriptions_changed().is_empty());
        assert!(machine.start().is_err());
        assert!(machine.is_failed());
    }

    #[test]
    fn stale_events_are_rejected() {
        let mut machine = StreamMachine::new(policy(3));
        assert!(machine.opened().is_err());
        assert!(machine.event_observed().is_err());
        assert!(machine.wait_elapsed().is_err());
        assert!(machine.disconnected("x").is_err());
    }
}
