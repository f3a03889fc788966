use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ObservedText
// ---------------------------------------------------------------------------

/// One snapshot of an agent's rendered output, taken once per poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedText {
    /// Configured name of the agent this snapshot came from.
    pub agent: String,
    /// The full rendered text at the time of observation.
    pub text: String,
    /// Whether the surface reported active generation at observation time.
    pub generating: bool,
    /// When the snapshot was taken.
    pub observed_at: DateTime<Utc>,
}

impl ObservedText {
    /// Build a snapshot timestamped now.
    pub fn now(agent: impl Into<String>, text: impl Into<String>, generating: bool) -> Self {
        Self {
            agent: agent.into(),
            text: text.into(),
            generating,
            observed_at: Utc::now(),
        }
    }
}
