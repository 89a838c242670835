//! Error types for registration-time and runtime failures.
//!
//! Only configuration errors abort engine startup. Every runtime failure is
//! recovered into an `UNKNOWN` result so the emitted stream stays
//! well-formed.

use std::fmt;

/// A single registration-time configuration defect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    #[error("duplicate environment `{name}`")]
    DuplicateEnvironment { name: String },

    #[error("duplicate check id `{check}`")]
    DuplicateCheck { check: String },

    #[error("execution environment `{name}` is not registered")]
    UnknownExecutionEnvironment { name: String },

    #[error("check `{check}`: unknown target environment `{environment}`")]
    UnknownTargetEnvironment { check: String, environment: String },

    #[error("check `{check}` declares no target environments")]
    NoTargetEnvironments { check: String },

    #[error("check `{check}`: invalid duration `{input}` (expected `<digits>(s|m|h|d)`)")]
    InvalidDuration { check: String, input: String },

    #[error("check `{check}` parameter `{param}`: no datasource registered for `{ty}`")]
    UnresolvedDatasource {
        check: String,
        param: String,
        ty: String,
    },

    #[error("check `{check}` parameter `{param}`: no factory registered for `{ty}`")]
    UnresolvedFactory {
        check: String,
        param: String,
        ty: String,
    },

    #[error(
        "check `{check}` can never be scheduled against `{environment}`: \
         no execution environment satisfies [{strategies}]"
    )]
    ImpossibleCombination {
        check: String,
        environment: String,
        strategies: String,
    },
}

/// All configuration defects found during startup, raised together so a
/// single run surfaces every problem.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationErrors(pub Vec<ConfigurationError>);

impl ConfigurationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: ConfigurationError) {
        self.0.push(err);
    }

    pub fn extend(&mut self, errs: ConfigurationErrors) {
        self.0.extend(errs.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a `Result`, erroring when any defect was recorded.
    pub fn into_result(self) -> Result<(), ConfigurationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigurationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid check configuration ({} problem(s)):", self.0.len())?;
        for err in &self.0 {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigurationErrors {}

/// Failure channel for user code inside checks and datasources.
///
/// `DatasourceUnavailable` signals a transient external failure; the engine
/// deliberately does not substitute a cached value for it — the grace-read
/// policy already covers the unavailability window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("datasource unavailable: {0}")]
    DatasourceUnavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl CheckError {
    pub fn unavailable(msg: impl fmt::Display) -> Self {
        CheckError::DatasourceUnavailable(msg.to_string())
    }

    pub fn failed(msg: impl fmt::Display) -> Self {
        CheckError::Failed(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_error_lists_every_problem() {
        let mut errs = ConfigurationErrors::new();
        errs.push(ConfigurationError::NoTargetEnvironments {
            check: "app.checks.a".to_string(),
        });
        errs.push(ConfigurationError::InvalidDuration {
            check: "app.checks.b".to_string(),
            input: "5x".to_string(),
        });

        let rendered = errs.to_string();
        assert!(rendered.contains("2 problem(s)"));
        assert!(rendered.contains("app.checks.a"));
        assert!(rendered.contains("`5x`"));
        assert!(errs.into_result().is_err());
    }

    #[test]
    fn empty_multi_error_is_ok() {
        assert!(ConfigurationErrors::new().into_result().is_ok());
    }
}
