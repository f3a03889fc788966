//! Private-message directive grammar and the processed ledger.
//!
//! Agents emit structured segments inside their otherwise free-form
//! output. A directive asks the bus to carry a private message:
//!
//! ```text
//! [ type : private message ; for : Gemini ; message : { the payload } ]
//! ```
//!
//! Replies travel back wrapped so the recipient can attribute them:
//!
//! ```text
//! [ Private response from Gemini: the reply text ]
//! ```
//!
//! The shared trigger channel accepts one externally written form:
//!
//! ```text
//! [ Conversation till Gemini's last message : the payload ]
//! ```
//!
//! Matching is case-insensitive and dot-matches-newline throughout.
//! Anything bracketed that fails the strict directive shape is prose
//! and passes through untouched.

use std::collections::HashSet;

use regex::Regex;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Directive
// ---------------------------------------------------------------------------

/// One parsed private-message directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Addressee, canonicalized to the configured spelling when the
    /// name is known. Unknown targets are kept as written so the
    /// router can report them back to the origin.
    pub target: String,
    /// The text between the payload braces, trimmed.
    pub payload: String,
    /// The exact raw segment as it appeared in the output. Dedup keys
    /// on this, so the same request re-rendered is never re-routed.
    pub raw: String,
}

/// One parsed external trigger from the shared channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub target: String,
    pub payload: String,
}

/// Wrap a reply for delivery back to the directive's origin.
pub fn reply_wrapper(from: &str, text: &str) -> String {
    format!("[ Private response from {from}: {text} ]")
}

// ---------------------------------------------------------------------------
// ProcessedSet
// ---------------------------------------------------------------------------

/// Append-only ledger of raw segments already handled for one agent.
///
/// Rendered output is cumulative, so every directive an agent ever
/// emitted stays visible on its surface forever. Marking the exact raw
/// text here, before dispatch, is what makes each directive fire at
/// most once per run. Reply wrappers are marked too, before they are
/// submitted back, so the bus never re-parses its own deliveries.
#[derive(Debug, Default, Clone)]
pub struct ProcessedSet {
    seen: HashSet<String>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw segment. Returns `false` if it was already present.
    pub fn mark(&mut self, raw: impl Into<String>) -> bool {
        self.seen.insert(raw.into())
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.seen.contains(raw)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DirectiveParser
// ---------------------------------------------------------------------------

/// Scans rendered output for directive segments.
///
/// The parser never mutates the ledger it is handed: discovery is a
/// pure read, and the caller decides when a found directive is
/// actually dispatched (and therefore marked).
pub struct DirectiveParser {
    names: Vec<String>,
    directive_re: Regex,
    reply_re: Regex,
    trigger_re: Regex,
}

impl DirectiveParser {
    pub fn new<I, S>(agent_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: agent_names.into_iter().map(Into::into).collect(),
            directive_re: Regex::new(
                r"(?is)^\s*\[\s*type\s*:\s*private\s+message\s*;\s*for\s*:\s*([A-Za-z0-9 _.-]+?)\s*;\s*message\s*:\s*\{(.*)\}\s*\]\s*$",
            )
            .expect("hard-coded pattern compiles"),
            reply_re: Regex::new(r"(?is)^\s*\[\s*private\s+response\s+from\s+")
                .expect("hard-coded pattern compiles"),
            trigger_re: Regex::new(
                r"(?is)\[\s*conversation\s+till\s+([A-Za-z0-9 _.-]+?)'s\s+last\s+message\s*:\s*(.*)\]",
            )
            .expect("hard-coded pattern compiles"),
        }
    }

    /// Canonical spelling for a known agent name, if any.
    fn canonical(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Byte ranges of top-level bracketed segments.
    ///
    /// Brackets nest inside payloads, so a segment runs from a
    /// top-level `[` to the `]` that balances it, not to the nearest
    /// closer. An unbalanced trailing `[` is still streaming in and is
    /// ignored until a later read completes it.
    fn segment_ranges(text: &str) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (i, c) in text.char_indices() {
            match c {
                '[' => {
                    if depth == 0 {
                        start = i;
                    }
                    depth += 1;
                }
                ']' => {
                    if depth > 0 {
                        depth -= 1;
                        if depth == 0 {
                            ranges.push((start, i + 1));
                        }
                    }
                }
                _ => {}
            }
        }
        ranges
    }

    /// Whether a segment is one of the bus's own reply wrappers.
    pub fn is_reply_wrapper(&self, segment: &str) -> bool {
        self.reply_re.is_match(segment)
    }

    /// Parse a single segment as a directive, or `None` if it is prose.
    pub fn parse_segment(&self, segment: &str) -> Option<Directive> {
        let caps = self.directive_re.captures(segment)?;
        let written = caps.get(1)?.as_str().trim();
        let target = self
            .canonical(written)
            .map(str::to_string)
            .unwrap_or_else(|| written.to_string());
        Some(Directive {
            target,
            payload: caps.get(2)?.as_str().trim().to_string(),
            raw: segment.to_string(),
        })
    }

    /// Find every new directive in a rendered snapshot, in discovery
    /// order. Segments already in `processed`, reply wrappers, and
    /// repeats within the same snapshot are skipped.
    pub fn scan(&self, text: &str, processed: &ProcessedSet) -> Vec<Directive> {
        let mut found = Vec::new();
        let mut seen_this_scan: HashSet<&str> = HashSet::new();

        for (start, end) in Self::segment_ranges(text) {
            let segment = &text[start..end];
            if self.is_reply_wrapper(segment) {
                trace!("skipping reply wrapper segment");
                continue;
            }
            let Some(directive) = self.parse_segment(segment) else {
                continue;
            };
            if processed.contains(segment) || !seen_this_scan.insert(segment) {
                continue;
            }
            debug!(target = %directive.target, "found new directive");
            found.push(directive);
        }
        found
    }

    /// Remove directive segments and reply wrappers from a snapshot,
    /// leaving the conversational prose. Malformed bracketed text is
    /// prose and stays.
    pub fn strip(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for (start, end) in Self::segment_ranges(text) {
            let segment = &text[start..end];
            if self.is_reply_wrapper(segment) || self.directive_re.is_match(segment) {
                out.push_str(&text[cursor..start]);
                cursor = end;
            }
        }
        out.push_str(&text[cursor..]);
        out.trim().to_string()
    }

    /// Parse the shared channel content as an external trigger.
    pub fn parse_trigger(&self, content: &str) -> Option<Trigger> {
        let caps = self.trigger_re.captures(content)?;
        let written = caps.get(1)?.as_str().trim();
        let target = self
            .canonical(written)
            .map(str::to_string)
            .unwrap_or_else(|| written.to_string());
        Some(Trigger {
            target,
            payload: caps.get(2)?.as_str().trim().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
