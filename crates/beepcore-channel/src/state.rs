//! Channel lifecycle.
//!
//! ```text
//! INITIALIZED -> STARTING -> ACTIVE -> TUNING_PENDING -> TUNING
//!                              |  ^
//!                              v  |
//!                          CLOSE_PENDING -> CLOSING -> CLOSED
//!
//! any non-terminal state -> ABORTED
//! ```

use std::fmt;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Initialized,
    Starting,
    Active,
    TuningPending,
    Tuning,
    ClosePending,
    Closing,
    Closed,
    Aborted,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Initialized => "INITIALIZED",
            ChannelState::Starting => "STARTING",
            ChannelState::Active => "ACTIVE",
            ChannelState::TuningPending => "TUNING_PENDING",
            ChannelState::Tuning => "TUNING",
            ChannelState::ClosePending => "CLOSE_PENDING",
            ChannelState::Closing => "CLOSING",
            ChannelState::Closed => "CLOSED",
            ChannelState::Aborted => "ABORTED",
        }
    }

    /// CLOSED and ABORTED accept nothing further.
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Aborted)
    }

    /// Message traffic (sending and reassembly) is only allowed here.
    pub fn carries_traffic(self) -> bool {
        matches!(self, ChannelState::Active | ChannelState::Tuning)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Aborted || next == self {
            return true;
        }
        matches!(
            (self, next),
            (Initialized, Starting)
                | (Initialized, Active)
                | (Initialized, Closed)
                | (Starting, Active)
                | (Starting, Closed)
                | (Active, TuningPending)
                | (Active, ClosePending)
                | (Active, Closing)
                | (TuningPending, Tuning)
                | (TuningPending, Active)
                | (Tuning, Active)
                | (Tuning, Closed)
                | (ClosePending, Closing)
                | (ClosePending, Active)
                | (Closing, Closed)
                | (Closing, Active)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelState::*;
    use super::*;

    const ALL: [ChannelState; 9] = [
        Initialized,
        Starting,
        Active,
        TuningPending,
        Tuning,
        ClosePending,
        Closing,
        Closed,
        Aborted,
    ];

    #[test]
    fn happy_path_is_legal() {
        let path = [Initialized, Starting, Active, ClosePending, Closing, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn tuning_path_is_legal() {
        assert!(Active.can_transition_to(TuningPending));
        assert!(TuningPending.can_transition_to(Tuning));
        assert!(Tuning.can_transition_to(Closed));
    }

    #[test]
    fn aborted_reachable_from_every_live_state() {
        for state in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(Aborted), "{state}");
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
            assert!(!Aborted.can_transition_to(next));
        }
    }

    #[test]
    fn skipping_start_is_rejected() {
        assert!(!Initialized.can_transition_to(TuningPending));
        assert!(!Starting.can_transition_to(ClosePending));
        assert!(!Active.can_transition_to(Initialized));
    }

    #[test]
    fn traffic_only_when_active_or_tuning() {
        let carrying: Vec<_> = ALL.into_iter().filter(|s| s.carries_traffic()).collect();
        assert_eq!(carrying, vec![Active, Tuning]);
    }
}
