//! Error taxonomy for the sync engine.
//!
//! Four classes of failure move through the system differently:
//!
//! - **item** — a single file or message failed to export or parse; logged
//!   and skipped by the connector, never propagated past it.
//! - **connector** — systemic (auth expired, retries exhausted); aborts that
//!   connector's sync, the scheduler logs it and moves on.
//! - **store / config** — infrastructure; surfaced to the caller of the
//!   sync pass.
//! - **cancelled** — not a failure; unwinds cleanly without marking the
//!   connector as failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A single source item failed; siblings are unaffected.
    #[error("item error: {0}")]
    Item(String),

    /// Systemic connector failure (enumeration exhausted retries, bad response).
    #[error("connector error: {0}")]
    Connector(String),

    /// Missing or invalid credential for a connector.
    #[error("auth error: {0}")]
    Auth(String),

    /// The connector's lock is already held by another sync.
    #[error("connector {0} is already locked")]
    AlreadyLocked(String),

    /// Vector store failure (lock bookkeeping, batch writes, state reads).
    #[error("store error: {0}")]
    Store(String),

    /// Embedding boundary failure; fatal only to the single chunk.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Bad or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Outbound HTTP failure, with the status when one was received.
    #[error("http error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// The governing cancellation token fired.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn connector(msg: impl Into<String>) -> Self {
        Self::Connector(msg.into())
    }

    /// Whether an outbound call that failed this way should be retried.
    ///
    /// Rate limits, server errors, and transport failures are transient;
    /// everything else fails immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Http { status, message } => match status {
                Some(429) => true,
                // Google APIs report user rate limiting as 403 with a
                // rate-limit reason in the body.
                Some(403) => {
                    let message = message.to_ascii_lowercase();
                    message.contains("rate limit") || message.contains("ratelimitexceeded")
                }
                Some(code) => *code >= 500,
                // No status means the request never completed (timeout,
                // connection reset) — transient.
                None => true,
            },
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
