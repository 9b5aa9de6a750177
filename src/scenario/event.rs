//! Closed set of timeline event kinds.

use crate::scenario::{Selector, TimelineEventConfig};
use std::time::Duration;

pub const INCREASE_LOAD: &str = "increase_load";
pub const BURST_LOAD: &str = "burst_load";
pub const INJECT_FAILURE: &str = "inject_failure";
pub const RECOVERY: &str = "recovery";

const DEFAULT_LOAD_MULTIPLIER: f64 = 2.0;
const DEFAULT_BURST_MULTIPLIER: f64 = 5.0;
const DEFAULT_BURST_DURATION: Duration = Duration::from_secs(300);
const DEFAULT_SEVERITY: f64 = 1.0;

/// A timeline event after its kind string has been resolved
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Replace the load multiplier for the selected processes
    IncreaseLoad {
        multiplier: f64,
        selector: Option<Selector>,
    },
    /// Temporary extra multiplier that expires on its own
    BurstLoad {
        multiplier: f64,
        duration: Duration,
        selector: Option<Selector>,
    },
    /// Activate a fault tag
    InjectFailure {
        fault: String,
        severity: f64,
        selector: Option<Selector>,
    },
    /// Clear one fault, or all of them, and drop load changes
    Recovery { fault: Option<String> },
    /// Anything else; logged and skipped
    Unknown { name: String },
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::IncreaseLoad { .. } => INCREASE_LOAD,
            EventKind::BurstLoad { .. } => BURST_LOAD,
            EventKind::InjectFailure { .. } => INJECT_FAILURE,
            EventKind::Recovery { .. } => RECOVERY,
            EventKind::Unknown { name } => name,
        }
    }
}

impl From<&TimelineEventConfig> for EventKind {
    fn from(raw: &TimelineEventConfig) -> Self {
        match raw.event.as_str() {
            INCREASE_LOAD => EventKind::IncreaseLoad {
                multiplier: raw.multiplier.unwrap_or(DEFAULT_LOAD_MULTIPLIER),
                selector: raw.selector.clone(),
            },
            BURST_LOAD => EventKind::BurstLoad {
                multiplier: raw.multiplier.unwrap_or(DEFAULT_BURST_MULTIPLIER),
                duration: raw.duration.unwrap_or(DEFAULT_BURST_DURATION),
                selector: raw.selector.clone(),
            },
            INJECT_FAILURE => EventKind::InjectFailure {
                fault: raw.fault.clone().unwrap_or_default(),
                severity: raw.severity.unwrap_or(DEFAULT_SEVERITY),
                selector: raw.selector.clone(),
            },
            RECOVERY => EventKind::Recovery {
                fault: raw.fault.clone(),
            },
            other => EventKind::Unknown {
                name: other.to_string(),
            },
        }
    }
}
