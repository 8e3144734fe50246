//! Error types shared across the workspace.
//!
//! The enum is `Clone` because errors travel through actor result
//! handles: one underlying failure can be fanned out to several
//! callers, so OS-level causes are captured as message text rather
//! than as owned source errors.

use thiserror::Error;

/// Result type alias for enforcement operations.
pub type NetpolResult<T> = Result<T, NetpolError>;

/// Errors produced while reconciling endpoint state.
#[derive(Debug, Clone, Error)]
pub enum NetpolError {
    /// A shell command could not be spawned at all.
    #[error("failed to execute '{command}': {message}")]
    ShellExec {
        /// The command that failed to spawn.
        command: String,
        /// Spawn error text.
        message: String,
    },

    /// A shell command ran and returned a non-zero exit code.
    #[error("command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// Its exit code.
        exit_code: i32,
        /// Combined stdout/stderr.
        output: String,
    },

    /// Endpoint data from the data store is missing required fields or
    /// otherwise malformed. Fatal to that single update only.
    #[error("invalid data for endpoint {endpoint}: {message}")]
    InvalidEndpoint {
        /// The endpoint the update was for.
        endpoint: String,
        /// What was wrong with it.
        message: String,
    },

    /// A firewall-table update could not be applied.
    #[error("firewall update failed: {message}")]
    Firewall {
        /// Error message.
        message: String,
    },

    /// Configuration validation failed.
    #[error("invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The offending field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// Unexpected internal state.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl NetpolError {
    /// Creates a shell spawn error.
    pub fn shell_exec(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShellExec {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-endpoint error.
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a firewall error.
    pub fn firewall(message: impl Into<String>) -> Self {
        Self::Firewall {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed when re-driven by a
    /// later update. Stored reconciler state is left untouched on these
    /// errors, so the retry is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetpolError::ShellExec { .. }
                | NetpolError::ShellCommandFailed { .. }
                | NetpolError::Firewall { .. }
        )
    }
}
