// src/error.rs

//! Crate-wide error type and result alias.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the feature engine.
#[derive(Debug, Error)]
pub enum Error {
    /// No feature in the catalog matches the requested name/version.
    #[error("no matching feature for '{0}'")]
    NotFound(String),

    /// A wildcard uninstall matched more than one installed version.
    #[error(
        "feature '{name}' has multiple versions installed ({versions}); \
         specify the version to uninstall"
    )]
    MultipleVersions { name: String, versions: String },

    /// The feature to uninstall is not part of the required set.
    #[error("feature '{0}' is not installed")]
    NotInstalled(String),

    /// The resolver could not satisfy the requested feature set.
    #[error("unable to resolve feature set: {0}")]
    Unresolvable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(String),

    /// A module install/update/stop/uninstall/refresh operation failed.
    /// These abort the deployment immediately; start failures are
    /// accumulated into [`Error::StartFailures`] instead.
    #[error("module operation failed: {0}")]
    ModuleOperation(String),

    /// One or more modules failed to start at the end of a deployment.
    /// The deployment state is already committed when this is raised.
    #[error("error starting modules: {0}")]
    StartFailures(StartErrors),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Aggregate of start errors collected during the start phase.
#[derive(Debug, Default)]
pub struct StartErrors(pub Vec<Error>);

impl StartErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, error: Error) {
        self.0.push(error);
    }
}

impl fmt::Display for StartErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}
