use std::any::Any;
use std::sync::Arc;

use serde::Serialize;

/// A loaded module's exported surface, shared by every caller that loads it.
pub type ModuleValue = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Loader registered, nothing cached (never loaded, or dropped by cleanup).
    Unregistered,
    Loading,
    Loaded,
    /// Last attempt failed. The next request tries again.
    Failed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("module '{0}' is not registered")]
    NotRegistered(String),

    #[error("module '{name}' failed to load: {cause:#}")]
    Failed { name: String, cause: Arc<anyhow::Error> },

    #[error("module '{name}' does not export a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("loading module '{0}' was aborted")]
    Aborted(String),
}

impl LoadError {
    /// The loader's own error, when there is one.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            LoadError::Failed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}
