//! Batch-level control state.
//!
//! Backed by a `watch` channel so that the dispatcher sees pause, resume and
//! cancel as soon as they are written, and can sleep while paused without
//! polling.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Whether a batch may start more jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Running,
    Paused,
    Cancelled,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Writer side of a batch's control state.
///
/// Every setter reports whether it changed anything, which makes repeated
/// calls harmless.
#[derive(Debug)]
pub struct BatchControl {
    tx: watch::Sender<ControlState>,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::Running);
        Self { tx }
    }

    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.tx.subscribe()
    }

    /// `Running → Paused`.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Running {
                *state = ControlState::Paused;
                true
            } else {
                false
            }
        })
    }

    /// `Paused → Running`.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Paused {
                *state = ControlState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Any state `→ Cancelled`. Final.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Cancelled {
                false
            } else {
                *state = ControlState::Cancelled;
                true
            }
        })
    }
}

/// Sleep while the batch is paused; returns the state that ended the wait.
pub async fn wait_while_paused(rx: &mut watch::Receiver<ControlState>) -> ControlState {
    match rx.wait_for(|state| *state != ControlState::Paused).await {
        Ok(state) => *state,
        // Writer gone: nothing can resume us
        Err(_) => ControlState::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transitions_are_idempotent() {
        let control = BatchControl::new();
        assert_eq!(control.state(), ControlState::Running);

        assert!(!control.resume());
        assert!(control.pause());
        assert!(!control.pause());
        assert_eq!(control.state(), ControlState::Paused);

        assert!(control.resume());
        assert!(!control.resume());
        assert_eq!(control.state(), ControlState::Running);
    }

    #[test]
    fn test_cancel_is_final() {
        let control = BatchControl::new();
        control.pause();
        assert!(control.cancel());
        assert!(!control.cancel());
        assert!(!control.resume());
        assert!(!control.pause());
        assert_eq!(control.state(), ControlState::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_while_paused_unblocks_on_resume() {
        let control = BatchControl::new();
        let mut rx = control.subscribe();
        control.pause();

        let waiter = tokio::spawn(async move { wait_while_paused(&mut rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert_eq!(waiter.await.unwrap(), ControlState::Running);
    }

    #[tokio::test]
    async fn test_wait_while_paused_unblocks_on_cancel() {
        let control = BatchControl::new();
        let mut rx = control.subscribe();
        control.pause();

        let waiter = tokio::spawn(async move { wait_while_paused(&mut rx).await });
        control.cancel();
        assert_eq!(waiter.await.unwrap(), ControlState::Cancelled);
    }
}
