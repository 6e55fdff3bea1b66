//! State prober: classifies a named container's lifecycle state and recovers
//! the spec it was created with.

use std::sync::Arc;
use std::time::Duration;

use dockhand_reconcile::{
    Command, ContainerSpec, LifecycleState, ReconcileError, SpecField, SpecHash, SPEC_HASH_LABEL,
};
use tokio::time::Instant;
use tracing::debug;

use crate::runtime::{ContainerDetails, ContainerStatus, Runtime};

/// Interval between probes while waiting for a transient state to pass.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An existing container as seen by the prober.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedContainer {
    pub id: String,
    /// Configuration recovered from the runtime.
    pub spec: ContainerSpec,
    /// Command baked into the container's image, if the image is still known.
    pub image_default_command: Option<Command>,
    /// Fingerprint label written when the reconciler created the container.
    pub spec_hash: Option<SpecHash>,
}

impl ObservedContainer {
    fn from_details(details: ContainerDetails, image_default_command: Option<Command>) -> Self {
        let spec_hash = details
            .labels
            .get(SPEC_HASH_LABEL)
            .and_then(|value| SpecHash::from_label(value));
        Self {
            id: details.id,
            spec: details.spec,
            image_default_command,
            spec_hash,
        }
    }

    /// Returns true if the container runs its image's default command.
    pub fn runs_default_command(&self) -> bool {
        self.image_default_command.as_ref() == Some(&self.spec.command)
    }

    /// The actual spec with the command reported as unset when it is the
    /// image default.
    pub fn actual_spec(&self) -> ContainerSpec {
        let mut spec = self.spec.clone();
        if self.runs_default_command() {
            spec.command = Command::Unset;
        }
        spec
    }

    /// Fields where this container does not satisfy `declared`.
    pub fn drift(&self, declared: &ContainerSpec) -> Vec<SpecField> {
        if self.spec_hash.as_ref() == Some(&declared.fingerprint()) {
            return Vec::new();
        }

        // An unset or empty declared command means "whatever the image
        // runs"; the engine substitutes the image command for an empty one.
        let follows_image = declared
            .command
            .as_args()
            .is_none_or(|args| args.is_empty());
        match (follows_image, &self.image_default_command) {
            (true, Some(default)) => {
                let effective = ContainerSpec {
                    command: default.clone(),
                    ..declared.clone()
                };
                effective.drift(&self.spec)
            }
            _ => declared.drift(&self.spec),
        }
    }
}

/// Result of probing a container name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub state: LifecycleState,
    pub container: Option<ObservedContainer>,
}

impl Probe {
    pub fn absent() -> Self {
        Self {
            state: LifecycleState::Absent,
            container: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.id.as_str())
    }

    pub fn autoremove(&self) -> bool {
        self.container.as_ref().is_some_and(|c| c.spec.autoremove)
    }
}

/// Maps the runtime's state flags to a lifecycle state.
pub fn classify(status: &ContainerStatus) -> LifecycleState {
    match status.status.as_str() {
        "removing" => LifecycleState::Removing,
        "paused" => LifecycleState::Paused,
        _ if status.running && status.paused => LifecycleState::Paused,
        _ if status.running || status.restarting => LifecycleState::Running,
        "created" => LifecycleState::Created,
        _ if status.started_at.is_none() && status.exit_code.is_none() => LifecycleState::Created,
        _ => LifecycleState::Exited,
    }
}

/// Reads container state from the runtime.
#[derive(Clone)]
pub struct StateProber {
    runtime: Arc<dyn Runtime>,
}

impl StateProber {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }

    /// Probe a container by name.
    ///
    /// An absent container is a state, not an error; only an unreachable
    /// runtime fails.
    pub async fn probe(&self, name: &str) -> Result<Probe, ReconcileError> {
        let Some(details) = self.runtime.inspect(name).await? else {
            debug!(name = %name, state = %LifecycleState::Absent, "Probed container");
            return Ok(Probe::absent());
        };

        let state = classify(&details.status);
        let image_default_command = self
            .runtime
            .inspect_image(&details.image_id)
            .await?
            .map(|image| image.default_command);

        debug!(
            name = %name,
            id = %details.id,
            state = %state,
            status = %details.status.status,
            "Probed container"
        );

        Ok(Probe {
            state,
            container: Some(ObservedContainer::from_details(
                details,
                image_default_command,
            )),
        })
    }

    /// Probe, waiting up to `timeout` for a `Removing` state to resolve.
    pub async fn probe_settled(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Probe, ReconcileError> {
        self.probe_until(name, timeout, |state| state != LifecycleState::Removing)
            .await
    }

    /// Probe until the container is gone, for up to `timeout`.
    ///
    /// Returns the last probe; a container that is still present after the
    /// timeout is not an error.
    pub async fn probe_until_absent(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Probe, ReconcileError> {
        self.probe_until(name, timeout, |state| state == LifecycleState::Absent)
            .await
    }

    async fn probe_until<F>(
        &self,
        name: &str,
        timeout: Duration,
        done: F,
    ) -> Result<Probe, ReconcileError>
    where
        F: Fn(LifecycleState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let probe = self.probe(name).await?;
            if done(probe.state) || Instant::now() >= deadline {
                return Ok(probe);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
