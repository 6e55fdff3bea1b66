//! Action executor: drives a named container to the outcome of its declared
//! action.
//!
//! Each convergence pass:
//! - Probes the container, waiting out a transient `removing` state
//! - Checks an existing container against the declared spec
//! - Plans the runtime steps from the transition table and applies them
//! - Re-probes so the result carries the state the runtime actually reports
//!
//! A rejection or name conflict from the runtime may mean another agent acted
//! between the probe and the call. The executor re-probes and decides again,
//! once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dockhand_reconcile::{
    plan, Action, ActionRequest, ContainerSpec, ConvergenceResult, ImageRef, LifecycleState,
    ReconcileError, Step, SPEC_HASH_LABEL,
};
use tracing::{debug, info, warn};

use crate::prober::{Probe, StateProber};
use crate::runtime::{Runtime, RuntimeError};

/// Signal sent by `kill` when none is declared.
pub const DEFAULT_KILL_SIGNAL: &str = "SIGKILL";

/// Executor timeouts.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long a graceful stop may take before the runtime kills the
    /// container, unless the request sets its own.
    pub stop_timeout: Duration,

    /// How long to wait for transient states (removing, autoremove cleanup).
    pub settle_timeout: Duration,

    /// Extra time allowed on top of the stop timeout before the executor
    /// stops waiting for the runtime and sends SIGKILL itself.
    pub stop_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            settle_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Progress of one convergence pass, carried across the retry.
#[derive(Debug, Default)]
pub(crate) struct Pass {
    /// The runtime acknowledged at least one mutation.
    pub(crate) changed: bool,
    /// Last state the runtime reported, advanced by each acknowledged step.
    pub(crate) known: Option<LifecycleState>,
}

impl Pass {
    pub(crate) fn observed(&mut self, state: LifecycleState) {
        self.known = Some(state);
    }

    fn stepped(&mut self, state: LifecycleState) {
        self.changed = true;
        self.known = Some(state);
    }
}

/// Converges containers against a runtime.
#[derive(Clone)]
pub struct ActionExecutor {
    pub(crate) runtime: Arc<dyn Runtime>,
    pub(crate) prober: StateProber,
    pub(crate) config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(runtime: Arc<dyn Runtime>, config: ExecutorConfig) -> Self {
        Self {
            prober: StateProber::new(runtime.clone()),
            runtime,
            config,
        }
    }

    pub fn prober(&self) -> &StateProber {
        &self.prober
    }

    /// Run one convergence pass for `request`.
    ///
    /// Never panics and never returns early with a bare error: failures are
    /// reported in the result together with the re-probed state and whether a
    /// mutation already happened.
    pub async fn converge(&self, request: &ActionRequest) -> ConvergenceResult {
        info!(name = %request.name, action = %request.action, "Converging container");

        let mut pass = Pass::default();
        let outcome = match self.attempt(request, &mut pass).await {
            Err(err) if err.is_race() => {
                warn!(
                    name = %request.name,
                    action = %request.action,
                    error = %err,
                    "Runtime refused the operation, re-probing and retrying once"
                );
                self.attempt(request, &mut pass).await
            }
            outcome => outcome,
        };

        match outcome {
            Ok(final_state) => {
                info!(
                    name = %request.name,
                    action = %request.action,
                    changed = pass.changed,
                    state = %final_state,
                    "Container converged"
                );
                ConvergenceResult {
                    name: request.name.clone(),
                    action: request.action,
                    changed: pass.changed,
                    final_state,
                    error: None,
                }
            }
            Err(err) => self.failed(request, pass, err).await,
        }
    }

    /// Build a failed result, re-probing for the state left behind. If the
    /// runtime cannot be probed, the last state known from this pass is
    /// reported instead.
    async fn failed(
        &self,
        request: &ActionRequest,
        pass: Pass,
        err: ReconcileError,
    ) -> ConvergenceResult {
        let changed = pass.changed;
        let final_state = match self.prober.probe(&request.name).await {
            Ok(probe) => probe.state,
            Err(probe_err) => {
                let known = pass.known.unwrap_or(LifecycleState::Absent);
                warn!(
                    name = %request.name,
                    error = %probe_err,
                    state = %known,
                    "Failed to re-probe after error, reporting last known state"
                );
                known
            }
        };

        warn!(
            name = %request.name,
            action = %request.action,
            changed,
            state = %final_state,
            error = %err,
            "Convergence failed"
        );

        ConvergenceResult {
            name: request.name.clone(),
            action: request.action,
            changed,
            final_state,
            error: Some(err),
        }
    }

    /// One probe-decide-apply round. Returns the final state.
    async fn attempt(
        &self,
        request: &ActionRequest,
        pass: &mut Pass,
    ) -> Result<LifecycleState, ReconcileError> {
        let spec = match (&request.spec, request.action.requires_spec()) {
            (None, true) => {
                return Err(ReconcileError::SpecRequired {
                    name: request.name.clone(),
                    action: request.action,
                })
            }
            (spec, _) => spec.as_ref(),
        };

        let probe = self
            .prober
            .probe_settled(&request.name, self.config.settle_timeout)
            .await?;
        pass.observed(probe.state);

        if let (Action::Redeploy, Some(spec)) = (request.action, spec) {
            return self.redeploy_probed(request, spec, probe, pass).await;
        }

        let steps = plan(&request.name, request.action, probe.state)?;

        if matches!(request.action, Action::Create | Action::Run) {
            if let (Some(container), Some(spec)) = (&probe.container, spec) {
                let fields = container.drift(spec);
                if !fields.is_empty() {
                    return Err(ReconcileError::SpecConflict {
                        name: request.name.clone(),
                        fields,
                    });
                }
            }
        }

        if steps.is_empty() {
            debug!(
                name = %request.name,
                action = %request.action,
                state = %probe.state,
                "Container already converged"
            );
            return Ok(probe.state);
        }

        self.apply(request, spec, &probe, &steps, pass).await
    }

    /// Apply `steps` in order, then report the resulting state.
    pub(crate) async fn apply(
        &self,
        request: &ActionRequest,
        spec: Option<&ContainerSpec>,
        probe: &Probe,
        steps: &[Step],
        pass: &mut Pass,
    ) -> Result<LifecycleState, ReconcileError> {
        let name = request.name.as_str();
        let mut id = probe.id().map(str::to_string);
        let mut autoremove = probe.autoremove();

        debug!(
            name = %name,
            steps = %steps.iter().map(Step::to_string).collect::<Vec<_>>().join(","),
            "Applying steps"
        );

        for step in steps {
            match step {
                Step::Create => {
                    let spec = spec.ok_or_else(|| ReconcileError::SpecRequired {
                        name: name.to_string(),
                        action: request.action,
                    })?;
                    self.ensure_image(&spec.image).await?;
                    let labels = BTreeMap::from([(
                        SPEC_HASH_LABEL.to_string(),
                        spec.fingerprint().to_string(),
                    )]);
                    let new_id = self.runtime.create(name, spec, &labels).await?;
                    info!(
                        name = %name,
                        id = %short_id(&new_id),
                        image = %spec.image,
                        "Created container"
                    );
                    id = Some(new_id);
                    autoremove = spec.autoremove;
                    pass.stepped(LifecycleState::Created);
                }
                Step::Start => {
                    self.runtime.start(target(&id, name)?).await?;
                    info!(name = %name, "Started container");
                    pass.stepped(LifecycleState::Running);
                }
                Step::Stop => {
                    let timeout = self.stop_timeout(request);
                    self.stop(name, target(&id, name)?, timeout).await?;
                    pass.stepped(LifecycleState::Exited);
                }
                Step::Restart => {
                    let timeout = self.stop_timeout(request);
                    self.restart(name, target(&id, name)?, timeout).await?;
                    pass.stepped(LifecycleState::Running);
                }
                Step::Kill => {
                    let signal = request
                        .options
                        .signal
                        .as_deref()
                        .unwrap_or(DEFAULT_KILL_SIGNAL);
                    self.runtime.kill(target(&id, name)?, signal).await?;
                    info!(name = %name, signal = %signal, "Killed container");
                    pass.stepped(LifecycleState::Exited);
                }
                Step::Pause => {
                    self.runtime.pause(target(&id, name)?).await?;
                    info!(name = %name, "Paused container");
                    pass.stepped(LifecycleState::Paused);
                }
                Step::Unpause => {
                    self.runtime.unpause(target(&id, name)?).await?;
                    info!(name = %name, "Unpaused container");
                    pass.stepped(LifecycleState::Running);
                }
                Step::Remove { force } => {
                    self.runtime
                        .remove(target(&id, name)?, *force, request.options.remove_volumes)
                        .await?;
                    info!(name = %name, force = *force, "Removed container");
                    id = None;
                    pass.stepped(LifecycleState::Absent);
                }
            }
        }

        let terminated = matches!(steps.last(), Some(Step::Stop | Step::Kill));
        if autoremove && terminated {
            let probe = self
                .prober
                .probe_until_absent(name, self.config.settle_timeout)
                .await?;
            if probe.state.exists() {
                warn!(
                    name = %name,
                    state = %probe.state,
                    "Autoremove container still present after settle timeout"
                );
            }
            pass.observed(probe.state);
            return Ok(probe.state);
        }

        let state = self.prober.probe(name).await?.state;
        pass.observed(state);
        Ok(state)
    }

    fn stop_timeout(&self, request: &ActionRequest) -> Duration {
        request
            .options
            .stop_timeout
            .unwrap_or(self.config.stop_timeout)
    }

    /// Gracefully stop a container, sending SIGKILL if the runtime does not
    /// return within the timeout plus grace.
    async fn stop(&self, name: &str, id: &str, timeout: Duration) -> Result<(), ReconcileError> {
        let bound = timeout + self.config.stop_grace;
        match tokio::time::timeout(bound, self.runtime.stop(id, timeout)).await {
            Ok(result) => {
                result?;
                info!(name = %name, timeout_secs = timeout.as_secs(), "Stopped container");
                Ok(())
            }
            Err(_) => {
                warn!(
                    name = %name,
                    waited_ms = bound.as_millis() as u64,
                    "Stop did not return in time, escalating to SIGKILL"
                );
                match self.runtime.kill(id, DEFAULT_KILL_SIGNAL).await {
                    Ok(()) => Ok(()),
                    // Stopped on its own in the meantime.
                    Err(RuntimeError::Rejected { status: 409, .. }) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Restart a container through the runtime, bounded like a stop. There is
    /// no escalation: a kill would let autoremove delete the container.
    async fn restart(&self, name: &str, id: &str, timeout: Duration) -> Result<(), ReconcileError> {
        let bound = timeout + self.config.stop_grace;
        match tokio::time::timeout(bound, self.runtime.restart(id, timeout)).await {
            Ok(result) => {
                result?;
                info!(name = %name, timeout_secs = timeout.as_secs(), "Restarted container");
                Ok(())
            }
            Err(_) => {
                warn!(
                    name = %name,
                    waited_ms = bound.as_millis() as u64,
                    "Restart did not return in time"
                );
                Err(ReconcileError::RuntimeUnavailable(format!(
                    "restart of '{name}' did not return within {}ms",
                    bound.as_millis()
                )))
            }
        }
    }

    /// Pull the image if it is not present locally.
    pub(crate) async fn ensure_image(&self, image: &ImageRef) -> Result<(), ReconcileError> {
        if self.runtime.inspect_image(&image.to_string()).await?.is_some() {
            return Ok(());
        }
        info!(image = %image, "Image not present, pulling");
        self.runtime.pull(image).await?;
        Ok(())
    }
}

fn target<'a>(id: &'a Option<String>, name: &str) -> Result<&'a str, ReconcileError> {
    id.as_deref()
        .ok_or_else(|| ReconcileError::NotFound(name.to_string()))
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
