// src/error.rs
//! Request-scoped failure taxonomy for the answer pipeline.
//!
//! None of these are fatal to the process. Each variant maps to a recovery
//! policy applied by the pipeline:
//!
//! | variant              | recovery                                          |
//! |----------------------|---------------------------------------------------|
//! | `Classification`     | route as static / `none` bucket, or reject input  |
//! | `Retrieval`          | fallback answer with the 311 contact, no citations|
//! | `Fetch`              | drop that candidate                               |
//! | `AllowlistViolation` | drop that candidate, never surfaced               |
//! | `Generation`         | terminal `Error` stream event                     |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid query: {0}")]
    Classification(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("host not allowlisted: {0}")]
    AllowlistViolation(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Classification(_) => "classification",
            Self::Retrieval(_) => "retrieval",
            Self::Fetch { .. } => "fetch",
            Self::AllowlistViolation(_) => "allowlist",
            Self::Generation(_) => "generation",
        }
    }
}
