//! Idempotent bootstrap state
//!
//! The relay/self-invocation machinery can make the one-time startup routine
//! reachable twice within one process lifetime. Instead of a hidden global
//! flag, the state is an explicit value threaded through the startup call
//! chain, so reentrancy is a testable argument.

/// Progress of the one-time main-thread preparation routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    /// Preparation has not run yet
    #[default]
    NotStarted,
    /// Preparation ran; later invocations return immediately
    Started,
}

impl BootstrapState {
    /// Transition to `Started`.
    ///
    /// Returns `true` exactly once: on the call that performed the
    /// transition.
    pub fn begin(&mut self) -> bool {
        match self {
            BootstrapState::NotStarted => {
                *self = BootstrapState::Started;
                true
            }
            BootstrapState::Started => false,
        }
    }

    /// Whether preparation already ran
    pub fn is_started(&self) -> bool {
        matches!(self, BootstrapState::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_fires_once() {
        let mut state = BootstrapState::default();
        assert!(!state.is_started());
        assert!(state.begin());
        assert!(state.is_started());
        assert!(!state.begin());
        assert!(!state.begin());
        assert!(state.is_started());
    }
}
