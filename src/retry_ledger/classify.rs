//! Failure reason taxonomy and retry classification
//!
//! Raw worker error strings are mapped onto a fixed taxonomy, and ledger
//! entries are classified as retryable or permanent. Three independent
//! routes lead to permanent: a terminal reason, an exhausted retry budget,
//! or staleness (no attempt inside the abandonment window).

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::LedgerEntry;

/// Fixed failure taxonomy for per-URL work failures.
///
/// These are recorded into the ledger, never thrown: a work failure cannot
/// crash the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Document does not exist (404/410)
    NotFound,
    /// Upstream refused access (403, bot walls)
    AccessDenied,
    /// Result was empty, too short, or structurally unusable
    ContentInvalid,
    /// Upstream took too long
    UpstreamTimeout,
    /// Upstream rate limit hit (429)
    UpstreamRateLimit,
    /// The page/session was torn down externally mid-task
    ResourceTerminated,
    /// Anything we cannot place
    Unknown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not_found",
            Self::AccessDenied => "access_denied",
            Self::ContentInvalid => "content_invalid",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamRateLimit => "upstream_rate_limit",
            Self::ResourceTerminated => "resource_terminated",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

lazy_static! {
    static ref NOT_FOUND_RE: Regex =
        Regex::new(r"(?i)HTTP 404|HTTP 410|not found|\bgone\b").expect("static regex");
    static ref ACCESS_DENIED_RE: Regex =
        Regex::new(r"(?i)HTTP 403|forbidden|access denied|blocked by").expect("static regex");
    static ref RATE_LIMIT_RE: Regex =
        Regex::new(r"(?i)HTTP 429|too many requests|rate.?limit").expect("static regex");
    static ref TIMEOUT_RE: Regex =
        Regex::new(r"(?i)timeout.*exceeded|timed? ?out").expect("static regex");
    static ref TERMINATED_RE: Regex =
        Regex::new(r"(?i)target.*closed|session.*closed|browser.*(crash|closed)|page.*closed")
            .expect("static regex");
    static ref CONTENT_INVALID_RE: Regex =
        Regex::new(r"(?i)content too short|empty (body|content|result)|missing title|invalid content")
            .expect("static regex");
}

impl FailureReason {
    /// Classify a raw worker error message.
    ///
    /// Rate limiting is checked before timeouts: a "429 after waiting"
    /// message must not be mistaken for a plain timeout.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        if NOT_FOUND_RE.is_match(message) {
            Self::NotFound
        } else if ACCESS_DENIED_RE.is_match(message) {
            Self::AccessDenied
        } else if RATE_LIMIT_RE.is_match(message) {
            Self::UpstreamRateLimit
        } else if TERMINATED_RE.is_match(message) {
            Self::ResourceTerminated
        } else if TIMEOUT_RE.is_match(message) {
            Self::UpstreamTimeout
        } else if CONTENT_INVALID_RE.is_match(message) {
            Self::ContentInvalid
        } else {
            Self::Unknown
        }
    }

    /// Whether this reason alone makes a failure permanent.
    ///
    /// `ResourceTerminated` means the *external* teardown of the document's
    /// host resource (page removed while live-blogging ended, etc.), which
    /// retrying does not fix.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::AccessDenied | Self::ContentInvalid | Self::ResourceTerminated
        )
    }
}

/// Why an entry became permanent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentCause {
    /// The recorded reason is in the terminal set
    TerminalReason(FailureReason),
    /// attempt_count reached the retry budget
    BudgetExhausted,
    /// No attempt inside the staleness window; abandoned
    Stale,
}

/// Outcome of classifying a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Permanent(PermanentCause),
}

impl Classification {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Classify one ledger entry against the budget and staleness window.
///
/// Order matters: a terminal reason is permanent on the first failure,
/// independent of budget; the budget check comes next; staleness last.
#[must_use]
pub fn classify(
    entry: &LedgerEntry,
    retry_budget: u32,
    staleness_days: i64,
    now: DateTime<Utc>,
) -> Classification {
    if entry.reason.is_terminal() {
        return Classification::Permanent(PermanentCause::TerminalReason(entry.reason));
    }
    if entry.attempt_count >= retry_budget {
        return Classification::Permanent(PermanentCause::BudgetExhausted);
    }
    let age = now - entry.last_attempt;
    if age > chrono::Duration::days(staleness_days) {
        return Classification::Permanent(PermanentCause::Stale);
    }
    Classification::Retryable
}
