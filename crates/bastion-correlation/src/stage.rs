use std::fmt;

use serde::{Deserialize, Serialize};

/// Incident stage. Stages are totally ordered and only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStage {
    Clean,
    Suspicious,
    Probable,
    Confirmed,
}

impl IncidentStage {
    pub const ALL: [IncidentStage; 4] = [
        Self::Clean,
        Self::Suspicious,
        Self::Probable,
        Self::Confirmed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "CLEAN",
            Self::Suspicious => "SUSPICIOUS",
            Self::Probable => "PROBABLE",
            Self::Confirmed => "CONFIRMED",
        }
    }

    /// Inverse of [`IncidentStage::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// The stage one step ahead, or `None` from CONFIRMED.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Clean => Some(Self::Suspicious),
            Self::Suspicious => Some(Self::Probable),
            Self::Probable => Some(Self::Confirmed),
            Self::Confirmed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Confirmed
    }

    /// Transition guard: only a single step forward is allowed.
    pub fn can_transition_to(self, to: Self) -> bool {
        self.next() == Some(to)
    }

    /// Move at most one step toward `target`.
    ///
    /// A target more than one step ahead advances a single step; the rest
    /// waits for the next signal. A target at or behind the current stage
    /// leaves it unchanged.
    pub fn step_toward(self, target: Self) -> Self {
        match self.next() {
            Some(next) if target > self => next,
            _ => self,
        }
    }
}

impl fmt::Display for IncidentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
