//! The status machine: derivation of a computed status from a raw triple.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw status as stored in the registry: `{alive, current, expected}`.
///
/// The three fields are free-form strings drawn from the status vocabulary
/// (`starting`, `started`, `stopping`, `stopped`, `error`, `warning`, `n/a`,
/// `passivated`), but only `current`/`expected`/`alive` combinations listed
/// in [`compute`] are meaningful; anything else degrades to `error`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    /// Non-empty iff the driver currently reports the instance alive.
    pub alive: String,
    /// Current observed state.
    pub current: String,
    /// Desired state, set by lifecycle calls.
    pub expected: String,
}

/// The vocabulary a computed status can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputedStatus {
    /// No status present at all.
    NotApplicable,
    /// Instance is starting.
    Starting,
    /// Instance is up and matches the expected state.
    Started,
    /// Instance is stopping.
    Stopping,
    /// Instance is stopped and matches the expected state.
    Stopped,
    /// Instance has been stopped intentionally (passivated).
    Passivated,
    /// Instance reports alive but not in the expected state, or vice versa.
    Warning,
    /// Any other inconsistent combination.
    Error,
}

impl ComputedStatus {
    /// The lowercase wire string for this computed status, matching the
    /// observable status vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputedStatus::NotApplicable => "n/a",
            ComputedStatus::Starting => "starting",
            ComputedStatus::Started => "started",
            ComputedStatus::Stopping => "stopping",
            ComputedStatus::Stopped => "stopped",
            ComputedStatus::Passivated => "passivated",
            ComputedStatus::Warning => "warning",
            ComputedStatus::Error => "error",
        }
    }
}

impl fmt::Display for ComputedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STARTED: &str = "started";
const STOPPED: &str = "stopped";
const STARTING: &str = "starting";
const STOPPING: &str = "stopping";
const PASSIVATED: &str = "passivated";

/// Derive the computed status from a raw `(current, expected, alive)` triple.
///
/// Pure, total, deterministic. `None` maps to [`ComputedStatus::NotApplicable`].
pub fn compute(status: Option<&Status>) -> ComputedStatus {
    let Some(status) = status else {
        return ComputedStatus::NotApplicable;
    };

    let alive = !status.alive.is_empty();

    match status.current.as_str() {
        STOPPED => match status.expected.as_str() {
            PASSIVATED => ComputedStatus::Passivated,
            STOPPED => ComputedStatus::Stopped,
            _ => ComputedStatus::Error,
        },
        STARTING => {
            if status.expected == STARTED {
                ComputedStatus::Starting
            } else {
                ComputedStatus::Error
            }
        }
        STARTED => match (alive, status.expected == STARTED) {
            (true, true) => ComputedStatus::Started,
            (true, false) => ComputedStatus::Warning,
            (false, true) => ComputedStatus::Error,
            (false, false) => ComputedStatus::Warning,
        },
        STOPPING => {
            if status.expected == STOPPED {
                ComputedStatus::Stopped
            } else {
                ComputedStatus::Error
            }
        }
        _ => ComputedStatus::Error,
    }
}
