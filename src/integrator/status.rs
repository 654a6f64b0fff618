//! # Unit Status
//!
//! Coarse operator-facing state of the integrator with the timestamp of
//! its last transition. Re-setting the current status is a no-op, so
//! repeated checks do not churn the transition time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Operator-facing state of this unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    /// Starting up or reconfiguring; no verdict yet
    Maintenance,
    /// Configuration complete and credentials verified
    Active,
    /// Operator input needed; the message says what
    Blocked(String),
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Maintenance => "maintenance",
            UnitStatus::Active => "active",
            UnitStatus::Blocked(_) => "blocked",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            UnitStatus::Blocked(message) => Some(message),
            UnitStatus::Maintenance | UnitStatus::Active => None,
        }
    }
}

/// Tracks the current status and when it last changed.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    current: UnitStatus,
    last_transition: DateTime<Utc>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            current: UnitStatus::Maintenance,
            last_transition: Utc::now(),
        }
    }

    pub fn current(&self) -> &UnitStatus {
        &self.current
    }

    pub fn last_transition(&self) -> DateTime<Utc> {
        self.last_transition
    }

    /// Applies a new status, returning whether anything changed.
    pub fn set(&mut self, status: UnitStatus) -> bool {
        if self.current == status {
            return false;
        }
        info!(
            from = self.current.as_str(),
            to = status.as_str(),
            message = status.message().unwrap_or(""),
            "unit status transition"
        );
        self.current = status;
        self.last_transition = Utc::now();
        true
    }
}
