//! Error types for parsing declarations and converging containers.

use thiserror::Error;

use crate::spec::SpecField;
use crate::state::{Action, LifecycleState};

/// Errors produced while parsing declared resource properties.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required property was empty.
    #[error("{property} cannot be empty")]
    Empty { property: &'static str },

    /// A port specification did not match `host:container[/proto]`.
    #[error("invalid port spec '{input}': {reason}")]
    InvalidPort { input: String, reason: String },

    /// A bind specification did not match `host:container[:mode]`.
    #[error("invalid bind spec '{input}': {reason}")]
    InvalidBind { input: String, reason: String },

    /// An image reference could not be parsed.
    #[error("invalid image reference '{input}': {reason}")]
    InvalidImage { input: String, reason: String },

    /// A command string had unbalanced quotes or a dangling escape.
    #[error("invalid command '{input}': {reason}")]
    InvalidCommand { input: String, reason: String },

    /// An environment entry was not `KEY=VALUE`.
    #[error("invalid environment entry '{0}'")]
    InvalidEnv(String),

    /// An action name is not one of the supported actions.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// Two properties that cannot be combined were both given.
    #[error("conflicting properties: {0}")]
    Conflict(String),
}

/// Coarse classification used by callers to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    RuntimeUnavailable,
    RuntimeRejected,
    NameConflict,
    InvalidTransition,
    SpecConflict,
    SpecRequired,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::RuntimeUnavailable => "runtime_unavailable",
            Self::RuntimeRejected => "runtime_rejected",
            Self::NameConflict => "name_conflict",
            Self::InvalidTransition => "invalid_transition",
            Self::SpecConflict => "spec_conflict",
            Self::SpecRequired => "spec_required",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convergence errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A declared property could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The runtime could not be reached.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The runtime understood the request and refused it.
    #[error("runtime rejected request ({status}): {message}")]
    RuntimeRejected { status: u16, message: String },

    /// A create collided with an existing container name.
    #[error("container name already in use: {0}")]
    NameConflict(String),

    /// The declared action is not defined for the current state.
    #[error("cannot {action} container '{name}' while it is {state}")]
    InvalidTransition {
        name: String,
        action: Action,
        state: LifecycleState,
    },

    /// The existing container does not match the declared spec.
    #[error(
        "container '{name}' exists with a different spec ({}); redeploy to replace it",
        format_fields(.fields)
    )]
    SpecConflict { name: String, fields: Vec<SpecField> },

    /// The action needs a spec but none was declared.
    #[error("action {action} on '{name}' requires a container spec")]
    SpecRequired { name: String, action: Action },

    /// The action needs an existing container.
    #[error("container not found: {0}")]
    NotFound(String),
}

fn format_fields(fields: &[SpecField]) -> String {
    fields
        .iter()
        .map(SpecField::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            Self::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Self::RuntimeRejected { .. } => ErrorKind::RuntimeRejected,
            Self::NameConflict(_) => ErrorKind::NameConflict,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::SpecConflict { .. } => ErrorKind::SpecConflict,
            Self::SpecRequired { .. } => ErrorKind::SpecRequired,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Returns true if the whole convergence may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable(_))
    }

    /// Returns true if the error may be a probe-then-act race, in which case
    /// the executor re-probes once before surfacing it.
    pub fn is_race(&self) -> bool {
        matches!(self, Self::RuntimeRejected { .. } | Self::NameConflict(_))
    }
}
