//! Typed errors for the provider-routing contract.
//!
//! Everything else in the crate propagates `anyhow::Error` with context; these two enums
//! exist because callers need to match on them (the router on `ProviderError`, the
//! analysis stages on `RouterError`).

use thiserror::Error;

/// One failed call to one provider candidate.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider returned an empty completion")]
    Empty,
}

impl ProviderError {
    /// HTTP status tag, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// What happened to a single candidate during one router invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Budget guard refused the call; nothing went over the network.
    Vetoed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub provider_id: String,
    pub model: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no provider candidates configured")]
    NoCandidates,

    #[error("all {} provider candidates failed or were vetoed", .attempts.len())]
    Exhausted { attempts: Vec<Attempt> },
}

impl RouterError {
    /// True when every candidate was turned away by the budget guard, i.e. the run's
    /// spend ceiling is reached rather than the services being down.
    pub fn all_vetoed(&self) -> bool {
        match self {
            RouterError::Exhausted { attempts } => {
                !attempts.is_empty()
                    && attempts.iter().all(|a| a.outcome == AttemptOutcome::Vetoed)
            }
            RouterError::NoCandidates => false,
        }
    }
}
