//! Activity gate
//!
//! Tells the processing loop which formats have listeners. The flags are
//! recomputed from the registry on every mutation, never incremented.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::session::listener::StreamFormat;

/// Snapshot of the activity flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Activity {
    pub compressed: bool,
    pub raw: bool,
}

impl Activity {
    pub fn any(&self) -> bool {
        self.compressed || self.raw
    }

    pub fn wants(&self, format: StreamFormat) -> bool {
        match format {
            StreamFormat::Compressed => self.compressed,
            StreamFormat::Raw => self.raw,
        }
    }
}

#[derive(Default)]
struct GateState {
    activity: Activity,
    closed: bool,
}

#[derive(Default)]
pub struct ActivityGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl ActivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Activity {
        self.state.lock().activity
    }

    /// Replace the flags with the value computed by `compute`.
    ///
    /// `compute` runs under the gate lock so concurrent recomputations
    /// cannot publish a stale result after a fresher one.
    pub fn recompute(&self, compute: impl FnOnce() -> Activity) -> Activity {
        let mut state = self.state.lock();
        let activity = compute();
        if state.activity != activity {
            state.activity = activity;
            self.changed.notify_all();
        }
        activity
    }

    /// Park until some format is active; `None` once the gate is closed
    pub fn wait_active(&self) -> Option<Activity> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.activity.any() {
                return Some(state.activity);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Release any waiter for good
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.activity = Activity::default();
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_when_activated() {
        let gate = Arc::new(ActivityGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_active())
        };

        thread::sleep(Duration::from_millis(20));
        gate.recompute(|| Activity {
            compressed: false,
            raw: true,
        });

        let activity = waiter.join().unwrap().unwrap();
        assert!(activity.raw);
        assert!(!activity.wants(StreamFormat::Compressed));
    }

    #[test]
    fn test_close_releases_waiter() {
        let gate = Arc::new(ActivityGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_active())
        };

        thread::sleep(Duration::from_millis(20));
        gate.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(!gate.current().any());
    }
}
