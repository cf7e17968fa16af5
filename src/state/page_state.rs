//! Route state definitions for tracking snapshot progress
//!
//! This module defines all possible states a route can be in during the crawl.
use serde::Serialize;
use std::fmt;

/// Represents the current state of a route in the snapshot process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    // ===== Active States =====
    /// Route is in the frontier waiting for a worker
    Queued,

    /// Route is being rendered and finalized
    Rendering,

    // ===== Terminal Success States =====
    /// All requested artifacts were written
    Saved,

    // ===== Terminal Skip States =====
    /// Route was not rendered (static asset on disk, or the crawl is draining)
    Skipped,

    // ===== Terminal Error States =====
    /// Rendering, finalization or writing failed
    Failed,
}

impl RouteState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if this is an active state (route may still be processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Rendering)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Saved)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Short lowercase label used in logs and the crawl report
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Rendering => "rendering",
            Self::Saved => "saved",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Returns all possible route states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Rendering,
            Self::Saved,
            Self::Skipped,
            Self::Failed,
        ]
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!RouteState::Queued.is_terminal());
        assert!(!RouteState::Rendering.is_terminal());

        assert!(RouteState::Saved.is_terminal());
        assert!(RouteState::Skipped.is_terminal());
        assert!(RouteState::Failed.is_terminal());
    }

    #[test]
    fn test_success_and_error() {
        assert!(RouteState::Saved.is_success());
        assert!(!RouteState::Skipped.is_success());
        assert!(!RouteState::Failed.is_success());

        assert!(RouteState::Failed.is_error());
        assert!(!RouteState::Skipped.is_error());
        assert!(!RouteState::Rendering.is_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", RouteState::Queued), "queued");
        assert_eq!(format!("{}", RouteState::Saved), "saved");
        assert_eq!(format!("{}", RouteState::Failed), "failed");
    }

    #[test]
    fn test_all_states_complete() {
        let all = RouteState::all_states();
        assert_eq!(all.len(), 5);

        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j], "Duplicate state found");
            }
        }
    }
}
