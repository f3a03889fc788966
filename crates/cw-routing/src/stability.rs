//! Debounce for rendered agent output.
//!
//! Rendered text streams in while an agent generates, so a single read
//! proves nothing. A tracker settles on a value only after two
//! consecutive identical reads with the generation flag clear:
//!
//! - `Generating`          — the flag is up; nothing observed counts.
//! - `Pending(candidate)`  — flag down; waiting for a confirming read.
//! - `Stable(text)`        — two identical non-generating reads agreed.
//!
//! `Stable` holds until the text changes again or the tracker is reset,
//! so one settled turn is reported exactly once per caller decision.

use tracing::debug;

// ---------------------------------------------------------------------------
// StabilityState
// ---------------------------------------------------------------------------

/// Where one agent's output currently sits in the debounce cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityState {
    /// The agent is mid-generation; any text on screen is partial.
    Generating,
    /// Generation flag is clear. `candidate` is the last read awaiting
    /// confirmation, or `None` right after generation ended or a reset.
    Pending { candidate: Option<String> },
    /// Two consecutive identical non-generating reads.
    Stable(String),
}

impl StabilityState {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityState::Stable(_))
    }

    /// The settled text, if any.
    pub fn stable_text(&self) -> Option<&str> {
        match self {
            StabilityState::Stable(text) => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// StabilityTracker
// ---------------------------------------------------------------------------

/// One tracker per observed agent surface.
///
/// Transitions on each `observe(text, generating)`:
///
/// | from                  | input                     | to                  |
/// |-----------------------|---------------------------|---------------------|
/// | any                   | `generating = true`       | `Generating`        |
/// | `Generating`          | flag clear                | `Pending(Some(t))`  |
/// | `Pending(None)`       | flag clear                | `Pending(Some(t))`  |
/// | `Pending(Some(c))`    | `t == c`                  | `Stable(t)`         |
/// | `Pending(Some(c))`    | `t != c`                  | `Pending(Some(t))`  |
/// | `Stable(s)`           | `t == s`                  | `Stable(s)`         |
/// | `Stable(s)`           | `t != s`                  | `Pending(Some(t))`  |
///
/// The generation flag always wins: identical reads never confirm
/// stability while the agent reports it is still writing.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    state: StabilityState,
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self {
            state: StabilityState::Pending { candidate: None },
        }
    }

    pub fn state(&self) -> &StabilityState {
        &self.state
    }

    /// Drop any candidate and start a fresh debounce cycle.
    pub fn reset(&mut self) {
        self.state = StabilityState::Pending { candidate: None };
    }

    /// Feed one observation and return the resulting state.
    pub fn observe(&mut self, text: &str, generating: bool) -> &StabilityState {
        if generating {
            if !matches!(self.state, StabilityState::Generating) {
                debug!("generation started, discarding candidate");
            }
            self.state = StabilityState::Generating;
            return &self.state;
        }

        self.state = match &self.state {
            StabilityState::Generating | StabilityState::Pending { candidate: None } => {
                StabilityState::Pending {
                    candidate: Some(text.to_string()),
                }
            }
            StabilityState::Pending {
                candidate: Some(candidate),
            } => {
                if candidate == text {
                    debug!(bytes = text.len(), "output confirmed stable");
                    StabilityState::Stable(text.to_string())
                } else {
                    StabilityState::Pending {
                        candidate: Some(text.to_string()),
                    }
                }
            }
            StabilityState::Stable(settled) => {
                if settled == text {
                    StabilityState::Stable(settled.clone())
                } else {
                    debug!("stable output changed, re-entering debounce");
                    StabilityState::Pending {
                        candidate: Some(text.to_string()),
                    }
                }
            }
        };
        &self.state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
