use std::fmt;

use serde::Serialize;

/// Service lifecycle: `created -> initializing -> running -> draining ->
/// stopped`. A failed start goes from `initializing` straight to `stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Initializing)
                | (Self::Initializing, Self::Running | Self::Stopped)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_linear() {
        use LifecycleState::{Created, Draining, Initializing, Running, Stopped};
        let path = [Created, Initializing, Running, Draining, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn no_skipping_or_going_back() {
        use LifecycleState::{Created, Draining, Initializing, Running, Stopped};
        assert!(Initializing.can_transition_to(Stopped));
        assert!(!Created.can_transition_to(Running));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Created));
        assert!(!Draining.can_transition_to(Running));
    }
}
