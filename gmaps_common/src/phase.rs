//! Observable lifecycle state machine for the stdio bridge.
//!
//! Single source of truth for the bridge's startup/steady-state/shutdown
//! progression. Uses `tokio::sync::watch` so waiters are notified on
//! transition instead of polling.

use std::sync::Arc;
use tokio::sync::watch;

/// Bridge lifecycle phases. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Child process is being spawned.
    Starting,
    /// Child spawned; waiting for its readiness marker on stderr.
    WaitingReady,
    /// Steady state: stdin lines are forwarded as HTTP requests.
    Ready,
    /// Terminal: stdin closed or the child exited.
    Closed,
}

impl Phase {
    /// Phases may only advance; `rank` defines the order.
    fn rank(self) -> u8 {
        match self {
            Phase::Starting => 0,
            Phase::WaitingReady => 1,
            Phase::Ready => 2,
            Phase::Closed => 3,
        }
    }
}

/// Watch-channel wrapper around [`Phase`].
///
/// Transitions are monotonic: an attempt to move backwards is ignored and
/// reported via the `bool` return, so racing tasks (stderr scanner vs.
/// shutdown path) cannot resurrect a closed bridge.
#[derive(Clone)]
pub struct PhaseMachine {
    sender: Arc<watch::Sender<Phase>>,
    // Keeps the channel alive even with no external subscribers.
    _receiver: watch::Receiver<Phase>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(Phase::Starting);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Current phase without blocking.
    pub fn current(&self) -> Phase {
        *self.sender.borrow()
    }

    /// Advance to `next`. Returns `false` if the transition would move
    /// backwards (or sideways) in the lifecycle.
    pub fn advance(&self, next: Phase) -> bool {
        self.sender
            .send_if_modified(|phase| {
                if next.rank() > phase.rank() {
                    *phase = next;
                    true
                } else {
                    false
                }
            })
    }

    pub fn is_closed(&self) -> bool {
        self.current() == Phase::Closed
    }

    /// Wait until the bridge reaches `Ready`. Returns `false` if the
    /// lifecycle terminated first.
    pub async fn wait_for_ready(&self) -> bool {
        let mut rx = self.sender.subscribe();
        loop {
            match *rx.borrow_and_update() {
                Phase::Ready => return true,
                Phase::Closed => return false,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let machine = PhaseMachine::new();
        assert_eq!(machine.current(), Phase::Starting);
        assert!(machine.advance(Phase::WaitingReady));
        assert!(machine.advance(Phase::Ready));
        assert!(machine.advance(Phase::Closed));
        assert!(machine.is_closed());
    }

    #[test]
    fn backwards_transitions_are_rejected() {
        let machine = PhaseMachine::new();
        assert!(machine.advance(Phase::Ready));
        assert!(!machine.advance(Phase::WaitingReady));
        assert_eq!(machine.current(), Phase::Ready);

        assert!(machine.advance(Phase::Closed));
        assert!(!machine.advance(Phase::Ready));
        assert!(machine.is_closed());
    }

    #[test]
    fn skipping_intermediate_phases_is_allowed() {
        // A spawn failure goes straight from Starting to Closed.
        let machine = PhaseMachine::new();
        assert!(machine.advance(Phase::Closed));
        assert!(machine.is_closed());
    }

    #[tokio::test]
    async fn wait_for_ready_resolves_on_transition() {
        let machine = PhaseMachine::new();
        let waiter = machine.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_ready().await });

        machine.advance(Phase::WaitingReady);
        machine.advance(Phase::Ready);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_ready_fails_when_closed_first() {
        let machine = PhaseMachine::new();
        let waiter = machine.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_ready().await });

        machine.advance(Phase::Closed);
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_ready_returns_immediately_when_already_ready() {
        let machine = PhaseMachine::new();
        machine.advance(Phase::Ready);
        assert!(machine.wait_for_ready().await);
    }
}
