//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts the container engine's operations:
//! - Inspecting containers and images
//! - Creating, starting, stopping, killing, pausing and removing containers
//! - Pulling and building images
//!
//! A mock implementation is provided for testing and development.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockhand_reconcile::{Command, ContainerSpec, ImageRef, ReconcileError};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Errors from runtime operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not be reached (connection-level, transient).
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime understood the request and refused it.
    #[error("runtime rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A create collided with an existing container name.
    #[error("container name already in use: {0}")]
    NameConflict(String),
}

impl RuntimeError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

impl From<RuntimeError> for ReconcileError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => ReconcileError::RuntimeUnavailable(msg),
            RuntimeError::Rejected { status, message } => {
                ReconcileError::RuntimeRejected { status, message }
            }
            RuntimeError::NameConflict(name) => ReconcileError::NameConflict(name),
        }
    }
}

/// Raw state flags reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Runtime status word: created, running, paused, restarting, removing,
    /// exited or dead.
    pub status: String,
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub exit_code: Option<i64>,
    /// `None` if the container was never started.
    pub started_at: Option<DateTime<Utc>>,
}

/// An existing container as the runtime reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    /// ID of the image the container was created from.
    pub image_id: String,
    /// Configuration recovered from the runtime. The command is the one the
    /// runtime will execute, so an image default shows up as explicit args.
    pub spec: ContainerSpec,
    pub labels: BTreeMap<String, String>,
}

/// A locally available image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    pub id: String,
    pub default_command: Command,
}

/// Container runtime interface.
///
/// Container operations accept either the runtime ID or the name.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Inspect a container by name. `Ok(None)` means no such container.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>, RuntimeError>;

    /// Inspect a local image by reference or ID. `Ok(None)` means it is not
    /// present.
    async fn inspect_image(&self, image: &str) -> Result<Option<ImageDetails>, RuntimeError>;

    /// Create (but do not start) a container. Returns its ID.
    async fn create(
        &self,
        name: &str,
        spec: &ContainerSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError>;

    /// Start a container. Starting a running container succeeds.
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Gracefully stop a container, killing it after `timeout`.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Stop then start a container on the engine side, killing it after
    /// `timeout`. Autoremove does not apply to the intermediate stop.
    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Send a signal to a running container.
    async fn kill(&self, id: &str, signal: &str) -> Result<(), RuntimeError>;

    async fn pause(&self, id: &str) -> Result<(), RuntimeError>;

    async fn unpause(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a container; `force` also removes a running one.
    async fn remove(&self, id: &str, force: bool, volumes: bool) -> Result<(), RuntimeError>;

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError>;

    /// Pull an image from its registry.
    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError>;

    /// Build an image from a context directory. Returns the image ID.
    async fn build(&self, context: &Path, image: &ImageRef) -> Result<String, RuntimeError>;
}

/// Kind of runtime call, for recording and fault injection on the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Inspect,
    InspectImage,
    Create,
    Start,
    Stop,
    Restart,
    Kill,
    Pause,
    Unpause,
    Remove,
    Rename,
    Pull,
    Build,
}

impl OpKind {
    /// Returns true for calls that change runtime state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Inspect | Self::InspectImage)
    }
}

/// A call recorded by the mock runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOp {
    pub kind: OpKind,
    /// Container name or image reference the call targeted.
    pub target: String,
    /// Signal sent by a kill.
    pub signal: Option<String>,
}

impl RecordedOp {
    fn new(kind: OpKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            signal: None,
        }
    }
}

/// Something another actor does to the mock runtime right before a call.
#[derive(Debug, Clone)]
pub enum Interference {
    /// Another agent removes the container.
    Remove(String),
    /// Another agent creates a container with this name.
    Create { name: String, spec: ContainerSpec },
    /// The runtime becomes unreachable, starting with this call.
    Disconnect,
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    name: String,
    status: ContainerStatus,
    image_id: String,
    spec: ContainerSpec,
    labels: BTreeMap<String, String>,
}

impl MockContainer {
    fn details(&self) -> ContainerDetails {
        ContainerDetails {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status.clone(),
            image_id: self.image_id.clone(),
            spec: self.spec.clone(),
            labels: self.labels.clone(),
        }
    }

    fn set_status(&mut self, status: &str) {
        self.status.status = status.to_string();
        self.status.running = matches!(status, "running" | "paused");
        self.status.paused = status == "paused";
    }

    fn exit(&mut self, code: i64) {
        self.set_status("exited");
        self.status.exit_code = Some(code);
    }
}

#[derive(Debug, Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    images: BTreeMap<ImageRef, ImageDetails>,
    ops: Vec<RecordedOp>,
    faults: VecDeque<(OpKind, RuntimeError)>,
    interference: VecDeque<(OpKind, Interference)>,
    unavailable: bool,
    exit_on_start: BTreeSet<String>,
    unpullable: BTreeSet<String>,
    stop_delay: Option<Duration>,
    /// Containers held in `removing`: remaining inspects before they are
    /// gone, or `None` to hold them forever.
    removing: BTreeMap<String, Option<usize>>,
}

impl MockState {
    fn name_for(&self, id_or_name: &str) -> Option<String> {
        let id_or_name = id_or_name.trim_start_matches('/');
        if self.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.containers
            .values()
            .find(|c| c.id == id_or_name)
            .map(|c| c.name.clone())
    }

    fn container_mut(&mut self, id_or_name: &str) -> Result<&mut MockContainer, RuntimeError> {
        let name = self
            .name_for(id_or_name)
            .ok_or_else(|| no_such_container(id_or_name))?;
        self.containers
            .get_mut(&name)
            .ok_or_else(|| no_such_container(id_or_name))
    }

    /// Autoremove containers disappear as soon as they exit.
    fn reap(&mut self, name: &str) {
        let remove = self
            .containers
            .get(name)
            .is_some_and(|c| c.spec.autoremove && c.status.status == "exited");
        if remove {
            debug!(name = %name, "[MOCK] Auto-removing exited container");
            self.containers.remove(name);
        }
    }

    fn interfere(&mut self, interference: Interference, next_id: impl FnOnce() -> String) {
        match interference {
            Interference::Remove(name) => {
                debug!(name = %name, "[MOCK] Container removed by another agent");
                self.containers.remove(&name);
            }
            Interference::Create { name, spec } => {
                debug!(name = %name, "[MOCK] Container created by another agent");
                let container = MockContainer {
                    id: next_id(),
                    name: name.clone(),
                    status: created_status(),
                    image_id: String::new(),
                    spec,
                    labels: BTreeMap::new(),
                };
                self.containers.insert(name, container);
            }
            Interference::Disconnect => {
                debug!("[MOCK] Runtime connection lost");
                self.unavailable = true;
            }
        }
    }
}

fn no_such_container(id: &str) -> RuntimeError {
    RuntimeError::rejected(404, format!("No such container: {id}"))
}

fn created_status() -> ContainerStatus {
    ContainerStatus {
        status: "created".to_string(),
        running: false,
        paused: false,
        restarting: false,
        exit_code: None,
        started_at: None,
    }
}

const MOCK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Mock runtime for testing and development.
///
/// Keeps containers and images in memory, mimics the Docker Engine's
/// responses (including autoremove) and records every call.
pub struct MockRuntime {
    /// Counter for generating container and image IDs.
    id_counter: AtomicU64,

    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create a new mock runtime. Any image can be pulled.
    pub fn new() -> Self {
        Self {
            id_counter: AtomicU64::new(0),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Generate a new ID.
    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{:064x}", counter + 1)
    }

    async fn begin(
        &self,
        kind: OpKind,
        target: &str,
    ) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.begin_op(RecordedOp::new(kind, target)).await
    }

    /// Record a call, apply queued interference and faults.
    async fn begin_op(&self, op: RecordedOp) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        let kind = op.kind;
        let mut state = self.state.lock().await;
        if let Some(pos) = state.interference.iter().position(|(k, _)| *k == kind) {
            if let Some((_, interference)) = state.interference.remove(pos) {
                state.interfere(interference, || self.next_id());
            }
        }

        if state.unavailable {
            return Err(RuntimeError::Unavailable(
                "[MOCK] connection refused".to_string(),
            ));
        }

        if let Some(pos) = state.faults.iter().position(|(k, _)| *k == kind) {
            if let Some((_, err)) = state.faults.remove(pos) {
                return Err(err);
            }
        }

        state.ops.push(op);
        Ok(state)
    }

    /// Make an image available locally.
    pub async fn add_image(&self, image: &str, default_command: Command) {
        let Ok(image) = ImageRef::parse(image) else {
            return;
        };
        let id = format!("sha256:{}", self.next_id());
        self.state.lock().await.images.insert(
            image,
            ImageDetails {
                id,
                default_command,
            },
        );
    }

    /// Make pulls of this repository fail with 404.
    pub async fn set_unpullable(&self, repo: &str) {
        self.state.lock().await.unpullable.insert(repo.to_string());
    }

    /// Containers with this name exit right after starting.
    pub async fn exit_on_start(&self, name: &str) {
        self.state.lock().await.exit_on_start.insert(name.to_string());
    }

    /// Simulate losing the connection to the runtime.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Fail the next call of `kind` with `err`, without side effects.
    pub async fn fail_next(&self, kind: OpKind, err: RuntimeError) {
        self.state.lock().await.faults.push_back((kind, err));
    }

    /// Apply `interference` right before the next call of `kind`.
    pub async fn interfere_before(&self, kind: OpKind, interference: Interference) {
        self.state
            .lock()
            .await
            .interference
            .push_back((kind, interference));
    }

    /// Make graceful stops take this long.
    pub async fn set_stop_delay(&self, delay: Duration) {
        self.state.lock().await.stop_delay = Some(delay);
    }

    /// Put an existing container into `removing`. It disappears after
    /// `probes` more inspects, or never if `probes` is `None`.
    pub async fn hold_removing(&self, name: &str, probes: Option<usize>) {
        let mut state = self.state.lock().await;
        let Some(container) = state.containers.get_mut(name) else {
            return;
        };
        container.set_status("removing");
        state.removing.insert(name.to_string(), probes);
    }

    /// All calls made so far.
    pub async fn ops(&self) -> Vec<RecordedOp> {
        self.state.lock().await.ops.clone()
    }

    /// Calls that changed runtime state.
    pub async fn mutations(&self) -> Vec<OpKind> {
        self.state
            .lock()
            .await
            .ops
            .iter()
            .map(|op| op.kind)
            .filter(OpKind::is_mutation)
            .collect()
    }

    /// Signals sent by kills, in order.
    pub async fn signals(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .ops
            .iter()
            .filter_map(|op| op.signal.clone())
            .collect()
    }

    /// Forget recorded calls.
    pub async fn clear_ops(&self) {
        self.state.lock().await.ops.clear();
    }

    /// Current status word of a container, if it exists.
    pub async fn status_of(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .containers
            .get(name)
            .map(|c| c.status.status.clone())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>, RuntimeError> {
        let mut state = self.begin(OpKind::Inspect, name).await?;
        let Some(name) = state.name_for(name) else {
            return Ok(None);
        };

        if let Some(Some(remaining)) = state.removing.get_mut(&name) {
            if *remaining == 0 {
                debug!(name = %name, "[MOCK] Removal finished");
                state.removing.remove(&name);
                state.containers.remove(&name);
                return Ok(None);
            }
            *remaining -= 1;
        }

        Ok(state.containers.get(&name).map(MockContainer::details))
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageDetails>, RuntimeError> {
        let state = self.begin(OpKind::InspectImage, image).await?;
        let by_ref = ImageRef::parse(image)
            .ok()
            .and_then(|image| state.images.get(&image).cloned());
        Ok(by_ref.or_else(|| state.images.values().find(|i| i.id == image).cloned()))
    }

    async fn create(
        &self,
        name: &str,
        spec: &ContainerSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError> {
        let mut state = self.begin(OpKind::Create, name).await?;
        if state.containers.contains_key(name) {
            return Err(RuntimeError::NameConflict(name.to_string()));
        }
        let image = state.images.get(&spec.image).cloned().ok_or_else(|| {
            RuntimeError::rejected(404, format!("No such image: {}", spec.image))
        })?;

        // The engine fills in the image's command and environment. An empty
        // command counts as no command.
        let mut actual = spec.clone();
        if actual.command.as_args().is_none_or(|args| args.is_empty()) {
            actual.command = image.default_command.clone();
        }
        actual
            .env
            .entry("PATH".to_string())
            .or_insert_with(|| MOCK_PATH.to_string());

        let id = self.next_id();
        info!(name = %name, id = %&id[..12], image = %spec.image, "[MOCK] Creating container");
        state.containers.insert(
            name.to_string(),
            MockContainer {
                id: id.clone(),
                name: name.to_string(),
                status: created_status(),
                image_id: image.id,
                spec: actual,
                labels: labels.clone(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.begin(OpKind::Start, id).await?;
        let exits = {
            let name = state.name_for(id).unwrap_or_default();
            state.exit_on_start.contains(&name)
        };
        let container = state.container_mut(id)?;
        match container.status.status.as_str() {
            "running" => return Ok(()),
            "paused" => {
                return Err(RuntimeError::rejected(
                    409,
                    "cannot start a paused container, try unpause instead",
                ))
            }
            _ => {}
        }

        info!(name = %container.name, "[MOCK] Starting container");
        container.set_status("running");
        container.status.exit_code = None;
        container.status.started_at = Some(Utc::now());
        if exits {
            container.exit(0);
        }
        let name = container.name.clone();
        state.reap(&name);
        Ok(())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let delay = {
            let mut state = self.begin(OpKind::Stop, id).await?;
            let container = state.container_mut(id)?;
            if !container.status.running {
                return Ok(());
            }
            info!(
                name = %container.name,
                timeout_secs = timeout.as_secs(),
                "[MOCK] Stopping container"
            );
            state.stop_delay
        };

        // Simulate a slow graceful shutdown
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        let container = state.container_mut(id)?;
        if container.status.running {
            container.exit(143);
        }
        let name = container.name.clone();
        state.reap(&name);
        Ok(())
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let delay = {
            let mut state = self.begin(OpKind::Restart, id).await?;
            let stop_delay = state.stop_delay;
            let container = state.container_mut(id)?;
            info!(
                name = %container.name,
                timeout_secs = timeout.as_secs(),
                "[MOCK] Restarting container"
            );
            stop_delay.filter(|_| container.status.running)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        let exits = {
            let name = state.name_for(id).unwrap_or_default();
            state.exit_on_start.contains(&name)
        };
        let container = state.container_mut(id)?;
        container.set_status("running");
        container.status.exit_code = None;
        container.status.started_at = Some(Utc::now());
        if exits {
            container.exit(0);
            let name = container.name.clone();
            state.reap(&name);
        }
        Ok(())
    }

    async fn kill(&self, id: &str, signal: &str) -> Result<(), RuntimeError> {
        let op = RecordedOp {
            signal: Some(signal.to_string()),
            ..RecordedOp::new(OpKind::Kill, id)
        };
        let mut state = self.begin_op(op).await?;
        let container = state.container_mut(id)?;
        if !container.status.running {
            return Err(RuntimeError::rejected(
                409,
                format!("Container {id} is not running"),
            ));
        }
        info!(name = %container.name, signal = %signal, "[MOCK] Killing container");
        container.exit(137);
        let name = container.name.clone();
        state.reap(&name);
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.begin(OpKind::Pause, id).await?;
        let container = state.container_mut(id)?;
        if container.status.status != "running" {
            return Err(RuntimeError::rejected(
                409,
                format!("Container {id} is not running"),
            ));
        }
        info!(name = %container.name, "[MOCK] Pausing container");
        container.set_status("paused");
        Ok(())
    }

    async fn unpause(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.begin(OpKind::Unpause, id).await?;
        let container = state.container_mut(id)?;
        if container.status.status != "paused" {
            return Err(RuntimeError::rejected(
                409,
                format!("Container {id} is not paused"),
            ));
        }
        info!(name = %container.name, "[MOCK] Unpausing container");
        container.set_status("running");
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool, volumes: bool) -> Result<(), RuntimeError> {
        let mut state = self.begin(OpKind::Remove, id).await?;
        let name = state.name_for(id).ok_or_else(|| no_such_container(id))?;
        let running = state.containers.get(&name).is_some_and(|c| c.status.running);
        if running && !force {
            return Err(RuntimeError::rejected(
                409,
                "You cannot remove a running container. Stop the container before attempting removal or force remove",
            ));
        }
        info!(name = %name, force, volumes, "[MOCK] Removing container");
        state.containers.remove(&name);
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let mut state = self.begin(OpKind::Rename, id).await?;
        if state.containers.contains_key(new_name) {
            return Err(RuntimeError::NameConflict(new_name.to_string()));
        }
        let name = state.name_for(id).ok_or_else(|| no_such_container(id))?;
        let Some(mut container) = state.containers.remove(&name) else {
            return Err(no_such_container(id));
        };
        info!(from = %name, to = %new_name, "[MOCK] Renaming container");
        container.name = new_name.to_string();
        state.containers.insert(new_name.to_string(), container);
        Ok(())
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let mut state = self.begin(OpKind::Pull, &image.to_string()).await?;
        if state.unpullable.contains(&image.repo) {
            return Err(RuntimeError::rejected(
                404,
                format!("pull access denied for {}", image.repo),
            ));
        }
        info!(image = %image, "[MOCK] Pulling image");
        let id = format!("sha256:{}", self.next_id());
        let default_command = state
            .images
            .get(image)
            .map(|existing| existing.default_command.clone())
            .unwrap_or(Command::Unset);
        state.images.insert(
            image.clone(),
            ImageDetails {
                id,
                default_command,
            },
        );
        Ok(())
    }

    async fn build(&self, context: &Path, image: &ImageRef) -> Result<String, RuntimeError> {
        let mut state = self.begin(OpKind::Build, &image.to_string()).await?;
        if !context.is_dir() {
            return Err(RuntimeError::rejected(
                400,
                format!("build context {} is not a directory", context.display()),
            ));
        }
        info!(image = %image, context = %context.display(), "[MOCK] Building image");
        let id = format!("sha256:{}", self.next_id());
        state.images.insert(
            image.clone(),
            ImageDetails {
                id: id.clone(),
                default_command: Command::Unset,
            },
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(image: &str) -> ContainerSpec {
        ContainerSpec::new(image.parse().unwrap())
    }

    async fn runtime_with_busybox() -> MockRuntime {
        let runtime = MockRuntime::new();
        runtime
            .add_image("busybox", Command::args(["sh"]))
            .await;
        runtime
    }

    #[tokio::test]
    async fn test_mock_create_fills_image_defaults() {
        let runtime = runtime_with_busybox().await;
        let id = runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(id.len(), 64);

        let details = runtime.inspect("box").await.unwrap().unwrap();
        assert_eq!(details.status.status, "created");
        assert_eq!(details.spec.command, Command::args(["sh"]));
        assert!(details.spec.env.contains_key("PATH"));
        assert!(details.status.started_at.is_none());
    }

    #[tokio::test]
    async fn test_mock_name_conflict() {
        let runtime = runtime_with_busybox().await;
        runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        let err = runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, RuntimeError::NameConflict("box".into()));
    }

    #[tokio::test]
    async fn test_mock_missing_image() {
        let runtime = MockRuntime::new();
        let err = runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_mock_autoremove_on_kill() {
        let runtime = runtime_with_busybox().await;
        let mut s = spec("busybox");
        s.autoremove = true;
        let id = runtime.create("temp", &s, &BTreeMap::new()).await.unwrap();
        runtime.start(&id).await.unwrap();
        runtime.kill(&id, "SIGKILL").await.unwrap();
        assert!(runtime.inspect("temp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_restart_keeps_autoremove_container() {
        let runtime = runtime_with_busybox().await;
        let mut s = spec("busybox");
        s.autoremove = true;
        let id = runtime.create("temp", &s, &BTreeMap::new()).await.unwrap();
        runtime.start(&id).await.unwrap();
        runtime.restart(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(runtime.status_of("temp").await.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_mock_records_kill_signal() {
        let runtime = runtime_with_busybox().await;
        let id = runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        runtime.start(&id).await.unwrap();
        runtime.kill(&id, "SIGHUP").await.unwrap();
        assert_eq!(runtime.signals().await, vec!["SIGHUP".to_string()]);
        let kill = runtime.ops().await.pop().unwrap();
        assert_eq!(kill.kind, OpKind::Kill);
        assert_eq!(kill.signal.as_deref(), Some("SIGHUP"));
    }

    #[tokio::test]
    async fn test_mock_hold_removing() {
        let runtime = runtime_with_busybox().await;
        runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        runtime.hold_removing("box", Some(2)).await;

        for _ in 0..2 {
            let details = runtime.inspect("box").await.unwrap().unwrap();
            assert_eq!(details.status.status, "removing");
        }
        assert!(runtime.inspect("box").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_empty_command_runs_image_default() {
        let runtime = runtime_with_busybox().await;
        let mut s = spec("busybox");
        s.command = Command::Args(vec![]);
        runtime.create("box", &s, &BTreeMap::new()).await.unwrap();
        let details = runtime.inspect("box").await.unwrap().unwrap();
        assert_eq!(details.spec.command, Command::args(["sh"]));
    }

    #[tokio::test]
    async fn test_mock_remove_running_requires_force() {
        let runtime = runtime_with_busybox().await;
        let id = runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        runtime.start(&id).await.unwrap();
        assert!(runtime.remove(&id, false, false).await.is_err());
        runtime.remove(&id, true, false).await.unwrap();
        assert!(runtime.inspect("box").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_rename() {
        let runtime = runtime_with_busybox().await;
        let id = runtime
            .create("old", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        runtime.rename(&id, "new").await.unwrap();
        assert!(runtime.inspect("old").await.unwrap().is_none());
        assert_eq!(runtime.inspect("new").await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let runtime = MockRuntime::new();
        runtime.set_unavailable(true).await;
        let err = runtime.inspect("x").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_mock_records_mutations() {
        let runtime = runtime_with_busybox().await;
        let id = runtime
            .create("box", &spec("busybox"), &BTreeMap::new())
            .await
            .unwrap();
        runtime.inspect("box").await.unwrap();
        runtime.start(&id).await.unwrap();
        assert_eq!(runtime.mutations().await, vec![OpKind::Create, OpKind::Start]);
        assert_eq!(runtime.ops().await.len(), 3);
    }

    #[test]
    fn test_runtime_error_conversion() {
        let err: ReconcileError = RuntimeError::rejected(409, "busy").into();
        assert!(err.is_race());
        let err: ReconcileError = RuntimeError::Unavailable("down".into()).into();
        assert!(err.is_retryable());
    }
}
