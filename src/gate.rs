//! Loading gate: four independent completion signals, one `loading` flag.

use std::fmt;

/// Sources the first authoritative view waits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateSignal {
    Profile,
    Courses,
    Dates,
    Notifications,
}

impl GateSignal {
    pub const ALL: [GateSignal; 4] = [
        GateSignal::Profile,
        GateSignal::Courses,
        GateSignal::Dates,
        GateSignal::Notifications,
    ];
}

impl fmt::Display for GateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateSignal::Profile => "profile",
            GateSignal::Courses => "courses",
            GateSignal::Dates => "dates",
            GateSignal::Notifications => "notifications",
        };
        f.write_str(name)
    }
}

/// Result of [`LoadingGate::check_complete`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// At least one signal is outstanding.
    Pending,
    /// This call opened the gate.
    Opened,
    /// The gate was opened by an earlier call.
    AlreadyOpen,
}

/// Tracks which sources have reported at least once.
///
/// A failed source still counts as received. The gate opens exactly once
/// and never closes.
#[derive(Clone, Debug, Default)]
pub struct LoadingGate {
    profile: bool,
    courses: bool,
    dates: bool,
    notifications: bool,
    opened: bool,
}

impl LoadingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `signal` fired, then check completion.
    pub fn mark(&mut self, signal: GateSignal) -> GateState {
        match signal {
            GateSignal::Profile => self.profile = true,
            GateSignal::Courses => self.courses = true,
            GateSignal::Dates => self.dates = true,
            GateSignal::Notifications => self.notifications = true,
        }
        self.check_complete()
    }

    pub fn check_complete(&mut self) -> GateState {
        if self.opened {
            return GateState::AlreadyOpen;
        }
        if GateSignal::ALL.iter().all(|s| self.received(*s)) {
            self.opened = true;
            GateState::Opened
        } else {
            GateState::Pending
        }
    }

    pub fn received(&self, signal: GateSignal) -> bool {
        match signal {
            GateSignal::Profile => self.profile,
            GateSignal::Courses => self.courses,
            GateSignal::Dates => self.dates,
            GateSignal::Notifications => self.notifications,
        }
    }

    pub fn outstanding(&self) -> Vec<GateSignal> {
        GateSignal::ALL
            .iter()
            .copied()
            .filter(|s| !self.received(*s))
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn is_loading(&self) -> bool {
        !self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_all_four() {
        let mut gate = LoadingGate::new();
        assert_eq!(gate.mark(GateSignal::Courses), GateState::Pending);
        assert_eq!(gate.mark(GateSignal::Dates), GateState::Pending);
        assert_eq!(gate.mark(GateSignal::Profile), GateState::Pending);
        assert_eq!(gate.outstanding(), vec![GateSignal::Notifications]);
        assert!(gate.is_loading());

        assert_eq!(gate.mark(GateSignal::Notifications), GateState::Opened);
        assert!(gate.is_open());
    }

    #[test]
    fn test_opens_once() {
        let mut gate = LoadingGate::new();
        for signal in GateSignal::ALL {
            gate.mark(signal);
        }
        assert_eq!(gate.check_complete(), GateState::AlreadyOpen);
        assert_eq!(gate.mark(GateSignal::Profile), GateState::AlreadyOpen);
        assert!(!gate.is_loading());
    }

    #[test]
    fn test_repeated_signal_does_not_open() {
        let mut gate = LoadingGate::new();
        for _ in 0..5 {
            assert_eq!(gate.mark(GateSignal::Profile), GateState::Pending);
        }
        assert_eq!(gate.outstanding().len(), 3);
    }
}
