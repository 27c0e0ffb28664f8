// Run-state flags
//! The three process-wide flags owned by the supervisor.
//!
//! - `quit`: set while the run is live; clearing it makes every loop drain and exit
//! - `pause`: set while assistance is active; cleared means hold bias current only
//! - `log`: set while per-iteration snapshots are recorded

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Quit,
    Pause,
    Log,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Quit => "quit",
            EventKind::Pause => "pause",
            EventKind::Log => "log",
        }
    }
}

/// A boolean flag with set/clear semantics.
#[derive(Debug, Default)]
pub struct Event {
    flag: AtomicBool,
}

impl Event {
    #[inline]
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn assign(&self, value: bool) {
        self.flag.store(value, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct Events {
    pub quit: Event,
    pub pause: Event,
    pub log: Event,
}

impl Events {
    /// All three cleared; call `arm` right before threads start.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start-of-run state: `quit` set, `pause` and `log` cleared.
    pub fn arm(&self) {
        self.quit.set();
        self.pause.clear();
        self.log.clear();
    }

    pub fn get(&self, kind: EventKind) -> &Event {
        match kind {
            EventKind::Quit => &self.quit,
            EventKind::Pause => &self.pause,
            EventKind::Log => &self.log,
        }
    }

    #[inline]
    pub fn running(&self) -> bool {
        self.quit.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_sets_run_state() {
        let ev = Events::new();
        assert!(!ev.running());
        ev.log.set();
        ev.arm();
        assert!(ev.running());
        assert!(!ev.pause.is_set());
        assert!(!ev.log.is_set());

        ev.get(EventKind::Quit).assign(false);
        assert!(!ev.running());
    }
}
