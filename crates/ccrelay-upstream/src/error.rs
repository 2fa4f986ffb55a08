use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Body read error: {0}")]
    Body(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// How a failure counts against a credential's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The credential burned through its quota window.
    QuotaExhausted,
    /// Upstream asked us to back off.
    RateLimited,
    /// Everything else — transport faults, 5xx, timeouts.
    Generic,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExhausted => write!(f, "quota-exhausted"),
            Self::RateLimited => write!(f, "rate-limited"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

const QUOTA_MARKERS: &[&str] = &["exceeded_limit", "quota", "usage limit"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate_limit_error", "too many requests"];

/// Classify an upstream failure for the health monitor. Quota markers win
/// over rate-limit markers so a 429 carrying `exceeded_limit` cools down
/// until the window resets rather than for the flat backoff.
pub fn classify(err: &UpstreamError) -> FailureKind {
    match err {
        UpstreamError::Api { status, body } => {
            let lower = body.to_lowercase();
            if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
                FailureKind::QuotaExhausted
            } else if *status == 429 || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
                FailureKind::RateLimited
            } else {
                FailureKind::Generic
            }
        }
        _ => FailureKind::Generic,
    }
}
