//! Redeploy: replace a container whose declared spec changed underneath it.

use dockhand_reconcile::{
    Action, ActionRequest, ContainerSpec, ConvergenceResult, LifecycleState, ReconcileError, Step,
};
use tracing::{debug, info};

use crate::executor::{ActionExecutor, Pass};
use crate::prober::Probe;

impl ActionExecutor {
    /// Converge `name` to a running container created from `spec`,
    /// replacing any existing container that does not match it.
    pub async fn redeploy(&self, name: &str, spec: ContainerSpec) -> ConvergenceResult {
        self.converge(&ActionRequest::new(name, Action::Redeploy).with_spec(spec))
            .await
    }

    /// Decide and apply a redeploy against an already probed container.
    pub(crate) async fn redeploy_probed(
        &self,
        request: &ActionRequest,
        spec: &ContainerSpec,
        probe: Probe,
        pass: &mut Pass,
    ) -> Result<LifecycleState, ReconcileError> {
        let steps = match (&probe.container, probe.state) {
            (_, LifecycleState::Removing) => {
                return Err(ReconcileError::InvalidTransition {
                    name: request.name.clone(),
                    action: Action::Redeploy,
                    state: probe.state,
                })
            }
            (None, _) => vec![Step::Create, Step::Start],
            (Some(container), state) => {
                let fields = container.drift(spec);
                if fields.is_empty() && state == LifecycleState::Running {
                    debug!(name = %request.name, "Running container matches declared spec");
                    return Ok(state);
                }
                info!(
                    name = %request.name,
                    state = %state,
                    drift = ?fields,
                    "Replacing container"
                );
                vec![Step::Remove { force: true }, Step::Create, Step::Start]
            }
        };

        self.apply(request, Some(spec), &probe, &steps, pass).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dockhand_reconcile::Command;

    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::runtime::{MockRuntime, OpKind};

    #[tokio::test]
    async fn test_redeploy_absent_runs() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_image("nginx", Command::args(["nginx", "-g", "daemon off;"])).await;
        let exec = ActionExecutor::new(runtime.clone(), ExecutorConfig::default());

        let result = exec
            .redeploy("web", ContainerSpec::new("nginx".parse().unwrap()))
            .await;
        assert!(result.is_ok());
        assert!(result.changed);
        assert_eq!(result.final_state, LifecycleState::Running);
        assert_eq!(runtime.mutations().await, vec![OpKind::Create, OpKind::Start]);
    }

    #[tokio::test]
    async fn test_redeploy_recreates_exited_container_with_same_spec() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_image("busybox", Command::args(["sh"])).await;
        runtime.exit_on_start("job").await;
        let exec = ActionExecutor::new(runtime.clone(), ExecutorConfig::default());
        let spec = ContainerSpec::new("busybox".parse().unwrap());

        exec.redeploy("job", spec.clone()).await;
        runtime.clear_ops().await;

        let result = exec.redeploy("job", spec).await;
        assert!(result.changed);
        assert_eq!(
            runtime.mutations().await,
            vec![OpKind::Remove, OpKind::Create, OpKind::Start]
        );
    }
}
