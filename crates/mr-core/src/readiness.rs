//! Process-wide readiness state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the process is willing to take on new work.
///
/// `Starting` and `Unhealthy` are the only states that can become `Ready`;
/// `Draining` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Starting,
    Ready,
    Draining,
    Unhealthy,
}

impl Readiness {
    /// Whether a transition from `self` to `next` is permitted.
    pub fn can_become(self, next: Readiness) -> bool {
        use Readiness::*;
        match (self, next) {
            (a, b) if a == b => false,
            (Draining, _) => false,
            (_, Draining) => true,
            (Starting, Ready) | (Starting, Unhealthy) => true,
            (Ready, Unhealthy) | (Unhealthy, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Draining => write!(f, "draining"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}
