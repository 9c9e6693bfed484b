//! Error taxonomy for a generation run.
//!
//! Every variant aborts the run. [`GenerateError::kind`] and
//! [`GenerateError::space`] give the CLI what it prints before exiting.

use quote_shards_core::PlanError;
use thiserror::Error;

/// Space label used for errors raised while reading the corpus.
pub const CORPUS_SPACE: &str = "corpus";

#[derive(Debug, Error)]
pub enum GenerateError {
    /// Bad corpus declarations or settings. Raised before any write.
    #[error("{message}")]
    Config {
        space: Option<String>,
        message: String,
    },

    /// The planner produced (or refused) a plan.
    #[error("{source}")]
    Planning {
        space: String,
        #[source]
        source: PlanError,
    },

    /// Filesystem or network failure.
    #[error("{context}: {source}")]
    Io {
        space: String,
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Manifests requested for output that was not fully produced.
    #[error("{0}")]
    ManifestConsistency(String),
}

impl GenerateError {
    pub fn config(message: impl Into<String>) -> Self {
        GenerateError::Config {
            space: None,
            message: message.into(),
        }
    }

    pub fn config_in(space: &str, message: impl Into<String>) -> Self {
        GenerateError::Config {
            space: Some(space.to_string()),
            message: message.into(),
        }
    }

    pub fn io(space: &str, context: impl Into<String>, source: std::io::Error) -> Self {
        GenerateError::Io {
            space: space.to_string(),
            context: context.into(),
            source,
        }
    }

    /// Error kind as reported to operators.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerateError::Config { .. } => "ConfigError",
            GenerateError::Planning { .. } => "PlanningError",
            GenerateError::Io { .. } => "IOError",
            GenerateError::ManifestConsistency(_) => "ManifestConsistencyError",
        }
    }

    /// Failing address space, when one is known.
    pub fn space(&self) -> Option<&str> {
        match self {
            GenerateError::Config { space, .. } => space.as_deref(),
            GenerateError::Planning { space, .. } => Some(space),
            GenerateError::Io { space, .. } => Some(space),
            GenerateError::ManifestConsistency(_) => None,
        }
    }
}

impl From<PlanError> for GenerateError {
    fn from(err: PlanError) -> Self {
        let space = err.space().map(str::to_string);
        match err {
            PlanError::Invariant { .. } => GenerateError::Planning {
                space: space.unwrap_or_default(),
                source: err,
            },
            // Empty subsets and oversized spaces are fixed by the operator.
            _ => GenerateError::Config {
                space,
                message: err.to_string(),
            },
        }
    }
}

pub type GenerateResult<T> = std::result::Result<T, GenerateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_spaces() {
        let err = GenerateError::config_in("x", "undeclared category code 'x'");
        assert_eq!(err.kind(), "ConfigError");
        assert_eq!(err.space(), Some("x"));

        let err = GenerateError::io(
            "global",
            "write orig_data/0.json",
            std::io::Error::other("disk full"),
        );
        assert_eq!(err.kind(), "IOError");
        assert_eq!(err.space(), Some("global"));
        assert!(err.to_string().contains("disk full"));

        let err = GenerateError::ManifestConsistency("space `a` was not published".into());
        assert_eq!(err.kind(), "ManifestConsistencyError");
        assert_eq!(err.space(), None);
    }

    #[test]
    fn test_plan_error_mapping() {
        let err: GenerateError = PlanError::EmptySubset { space: "b".into() }.into();
        assert_eq!(err.kind(), "ConfigError");
        assert_eq!(err.space(), Some("b"));

        let err: GenerateError = PlanError::Invariant {
            space: "global".into(),
            detail: "capacity 15 < item count 16".into(),
        }
        .into();
        assert_eq!(err.kind(), "PlanningError");
        assert_eq!(err.space(), Some("global"));
    }
}
