//! Operator decisions on a plan awaiting confirmation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Decision submitted for a run in `AWAITING_CONFIRMATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Execute the plan as proposed.
    Approve,
    /// Acknowledged only; the plan is left unchanged.
    Edit,
    /// Ask the planner for a fresh plan.
    Regenerate,
    /// Stop the run.
    Cancel,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Edit => "edit",
            Self::Regenerate => "regenerate",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = CoreError;

    /// Accepts the full action names plus the single-letter shortcuts the
    /// interactive prompt offered (`a`, `e`, `r`, `c`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "a" => Ok(Self::Approve),
            "edit" | "e" => Ok(Self::Edit),
            "regenerate" | "r" => Ok(Self::Regenerate),
            "cancel" | "c" => Ok(Self::Cancel),
            other => Err(CoreError::UnknownValue {
                kind: "decision",
                value: other.to_string(),
            }),
        }
    }
}
