//! Declared resources and their resolution into action requests.
//!
//! Declarations arrive loosely typed (a port may be one string or a list, a
//! command may be a shell string or an argument list). [`DeclaredContainer::resolve`]
//! turns them into a typed [`ActionRequest`] carrying a canonical
//! [`ContainerSpec`], or a [`ParseError`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ReconcileError};
use crate::image::ImageRef;
use crate::spec::{parse_env_entry, BindMount, Command, ContainerSpec, PortMapping};
use crate::state::{Action, LifecycleState};

/// Action used when a declaration names none.
pub const DEFAULT_ACTION: Action = Action::Run;

/// A property that may be written as a single string or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// A command written as a shell string or an argument list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    Shell(String),
    Args(Vec<String>),
}

/// Environment written as a table or as `KEY=VALUE` entries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

impl Default for EnvValue {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

/// A declared container resource, as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeclaredContainer {
    pub name: String,
    #[serde(default)]
    pub action: Option<Action>,
    /// `repo[:tag]`; mutually exclusive with `repo`.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub command: Option<CommandValue>,
    #[serde(default, alias = "port")]
    pub ports: OneOrMany,
    #[serde(default)]
    pub binds: OneOrMany,
    #[serde(default)]
    pub volumes_from: OneOrMany,
    #[serde(default)]
    pub autoremove: bool,
    #[serde(default)]
    pub env: EnvValue,
    /// Seconds to wait for a graceful stop before killing.
    #[serde(default)]
    pub kill_after: Option<u64>,
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub remove_volumes: bool,
}

impl DeclaredContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Resolves the declaration into a request.
    ///
    /// Spec properties are only parsed for actions that may create a
    /// container; other actions act on whatever container has the name.
    pub fn resolve(&self) -> Result<ActionRequest, ParseError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ParseError::Empty { property: "name" });
        }

        let action = self.action.unwrap_or(DEFAULT_ACTION);
        let spec = if action.requires_spec() {
            Some(self.resolve_spec(name)?)
        } else {
            None
        };

        let signal = match self.signal.as_deref().map(str::trim) {
            Some("") => return Err(ParseError::Empty { property: "signal" }),
            other => other.map(str::to_string),
        };

        Ok(ActionRequest {
            name: name.to_string(),
            action,
            spec,
            options: ActionOptions {
                stop_timeout: self.kill_after.map(Duration::from_secs),
                signal,
                remove_volumes: self.remove_volumes,
            },
        })
    }

    fn resolve_spec(&self, name: &str) -> Result<ContainerSpec, ParseError> {
        let tag = self.tag.as_deref();
        let image = match (self.image.as_deref(), self.repo.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(ParseError::Conflict(
                    "`image` and `repo` cannot both be set".to_string(),
                ))
            }
            (Some(image), None) => ImageRef::new(image, tag)?,
            (None, Some(repo)) => ImageRef::new(repo, tag)?,
            // The container name doubles as the repository.
            (None, None) => ImageRef::new(name, tag)?,
        };

        let command = match &self.command {
            None => Command::Unset,
            Some(CommandValue::Shell(line)) => Command::shell(line)?,
            Some(CommandValue::Args(args)) => Command::Args(args.clone()),
        };
        // The engine runs the image command for an empty one, which would
        // never match what was declared.
        if command.as_args().is_some_and(|args| args.is_empty()) {
            return Err(ParseError::InvalidCommand {
                input: match &self.command {
                    Some(CommandValue::Shell(line)) => line.clone(),
                    _ => "[]".to_string(),
                },
                reason: "command is empty; omit it to run the image command".to_string(),
            });
        }

        let ports = self
            .ports
            .clone()
            .into_vec()
            .iter()
            .map(|p| p.parse::<PortMapping>())
            .collect::<Result<Vec<_>, _>>()?;

        let binds = self
            .binds
            .clone()
            .into_vec()
            .iter()
            .map(|b| b.parse::<BindMount>())
            .collect::<Result<Vec<_>, _>>()?;

        let volumes_from = self
            .volumes_from
            .clone()
            .into_vec()
            .into_iter()
            .map(|v| {
                let v = v.trim().to_string();
                if v.is_empty() {
                    Err(ParseError::Empty {
                        property: "volumes_from",
                    })
                } else {
                    Ok(v)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ContainerSpec {
            image,
            command,
            ports: dedup(ports),
            binds: dedup(binds),
            volumes_from: dedup(volumes_from),
            autoremove: self.autoremove,
            env: resolve_env(&self.env)?,
        })
    }
}

fn resolve_env(env: &EnvValue) -> Result<BTreeMap<String, String>, ParseError> {
    match env {
        EnvValue::Map(map) => {
            if let Some(key) = map.keys().find(|k| k.is_empty() || k.contains('=')) {
                return Err(ParseError::InvalidEnv(key.clone()));
            }
            Ok(map.clone())
        }
        EnvValue::List(entries) => {
            let mut map = BTreeMap::new();
            for entry in entries {
                let (key, value) = parse_env_entry(entry)?;
                if map.insert(key.clone(), value).is_some() {
                    return Err(ParseError::Conflict(format!(
                        "environment variable {key} declared twice"
                    )));
                }
            }
            Ok(map)
        }
    }
}

/// Drops repeated entries, keeping the first occurrence.
fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Per-request knobs that are not part of the container's identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOptions {
    /// Overrides the executor's default graceful stop timeout.
    pub stop_timeout: Option<Duration>,
    /// Signal sent by `kill`; the runtime default (SIGKILL) when unset.
    pub signal: Option<String>,
    /// Also remove anonymous volumes on delete.
    pub remove_volumes: bool,
}

/// A typed request to converge one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub name: String,
    pub action: Action,
    pub spec: Option<ContainerSpec>,
    pub options: ActionOptions,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
            spec: None,
            options: ActionOptions::default(),
        }
    }

    pub fn with_spec(mut self, spec: ContainerSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of one convergence pass over a container.
///
/// `final_state` is what the runtime reported after the pass, including when
/// the pass failed part-way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceResult {
    pub name: String,
    pub action: Action,
    pub changed: bool,
    pub final_state: LifecycleState,
    pub error: Option<ReconcileError>,
}

impl ConvergenceResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Self, ReconcileError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// What to do for a declared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageAction {
    Pull,
    #[default]
    PullIfMissing,
    Build,
    BuildIfMissing,
}

impl ImageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::PullIfMissing => "pull_if_missing",
            Self::Build => "build",
            Self::BuildIfMissing => "build_if_missing",
        }
    }

    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build | Self::BuildIfMissing)
    }
}

/// A declared image resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeclaredImage {
    /// Repository, optionally with a tag.
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    /// Build context directory.
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub action: ImageAction,
}

impl DeclaredImage {
    pub fn resolve(&self) -> Result<ImageRequest, ParseError> {
        let image = ImageRef::new(self.name.trim(), self.tag.as_deref())?;
        if self.action.is_build() && self.source.is_none() {
            return Err(ParseError::Empty { property: "source" });
        }
        Ok(ImageRequest {
            image,
            source: self.source.clone(),
            action: self.action,
        })
    }
}

/// A typed request to converge one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub image: ImageRef,
    pub source: Option<PathBuf>,
    pub action: ImageAction,
}

/// Outcome of converging one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    pub image: ImageRef,
    pub action: ImageAction,
    pub changed: bool,
    pub image_id: Option<String>,
    pub error: Option<ReconcileError>,
}

/// One entry of a resource file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeclaredResource {
    Container(DeclaredContainer),
    Image(DeclaredImage),
}

/// A resource file: resources converge in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceFile {
    #[serde(default)]
    pub resource: Vec<DeclaredResource>,
}
