//! Lifecycle states, declared actions and the transition table between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ReconcileError};

/// Observed lifecycle state of a named container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No container with that name is known to the runtime.
    Absent,
    /// Created but never started.
    Created,
    Running,
    Paused,
    /// Started at some point and no longer running.
    Exited,
    /// The runtime is tearing the container down.
    Removing,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Removing => "removing",
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action declared against a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Run,
    Stop,
    Kill,
    Pause,
    Unpause,
    Restart,
    Delete,
    Redeploy,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Self::Create,
        Self::Run,
        Self::Stop,
        Self::Kill,
        Self::Pause,
        Self::Unpause,
        Self::Restart,
        Self::Delete,
        Self::Redeploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Run => "run",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Restart => "restart",
            Self::Delete => "delete",
            Self::Redeploy => "redeploy",
        }
    }

    /// Actions that may create a container need a spec to create it from.
    pub fn requires_spec(&self) -> bool {
        matches!(self, Self::Create | Self::Run | Self::Redeploy)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ParseError::UnknownAction(s.to_string()))
    }
}

/// A single runtime operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Create,
    Start,
    Stop,
    Kill,
    Pause,
    Unpause,
    /// Engine-side stop then start. Does not trigger autoremove.
    Restart,
    Remove { force: bool },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
            Self::Kill => f.write_str("kill"),
            Self::Pause => f.write_str("pause"),
            Self::Unpause => f.write_str("unpause"),
            Self::Restart => f.write_str("restart"),
            Self::Remove { force: true } => f.write_str("force-remove"),
            Self::Remove { force: false } => f.write_str("remove"),
        }
    }
}

/// Computes the runtime operations that take a container in `state` to the
/// outcome of `action`. An empty plan is a no-op.
///
/// Spec drift is not considered here: callers check it before planning
/// `create`/`run` against an existing container, and redeploy decides on its
/// own whether an existing container can be kept.
pub fn plan(
    name: &str,
    action: Action,
    state: LifecycleState,
) -> Result<Vec<Step>, ReconcileError> {
    use Action as A;
    use LifecycleState as S;

    let invalid = || ReconcileError::InvalidTransition {
        name: name.to_string(),
        action,
        state,
    };

    let steps = match (action, state) {
        (A::Delete, S::Absent | S::Removing) => vec![],
        (_, S::Removing) => return Err(invalid()),

        (A::Create, S::Absent) => vec![Step::Create],
        (A::Create, _) => vec![],

        (A::Run, S::Absent) => vec![Step::Create, Step::Start],
        (A::Run, S::Created | S::Exited) => vec![Step::Start],
        (A::Run, S::Running) => vec![],
        (A::Run, S::Paused) => return Err(invalid()),

        (A::Kill, S::Running | S::Paused) => vec![Step::Kill],
        (A::Kill, _) => vec![],

        (A::Stop, S::Running) => vec![Step::Stop],
        (A::Stop, S::Paused) => return Err(invalid()),
        (A::Stop, _) => vec![],

        (A::Pause | A::Unpause | A::Restart, S::Absent) => {
            return Err(ReconcileError::NotFound(name.to_string()))
        }

        (A::Pause, S::Running) => vec![Step::Pause],
        (A::Pause, S::Paused) => vec![],
        (A::Pause, _) => return Err(invalid()),

        (A::Unpause, S::Paused) => vec![Step::Unpause],
        (A::Unpause, S::Running) => vec![],
        (A::Unpause, _) => return Err(invalid()),

        (A::Restart, S::Created | S::Exited) => vec![Step::Start],
        (A::Restart, S::Running) => vec![Step::Restart],
        (A::Restart, S::Paused) => return Err(invalid()),

        (A::Delete, S::Created | S::Exited) => vec![Step::Remove { force: false }],
        (A::Delete, S::Running | S::Paused) => vec![Step::Remove { force: true }],

        (A::Redeploy, S::Absent) => vec![Step::Create, Step::Start],
        (A::Redeploy, _) => vec![Step::Remove { force: true }, Step::Create, Step::Start],
    };

    Ok(steps)
}
