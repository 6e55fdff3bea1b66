//! Canonical container specification and drift detection.
//!
//! A [`ContainerSpec`] is what a declared resource resolves to, and also what
//! the prober recovers from an existing container. Ports, binds and
//! volumes-from keep their declaration order for the runtime but compare as
//! sets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ParseError;
use crate::image::ImageRef;

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Tcp
    }
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unsupported protocol '{other}'")),
        }
    }
}

/// A published port: `host:container[/proto]`, `container[/proto]`.
///
/// Without a host port the runtime picks one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// The runtime's key for the container side, e.g. `7/udp`.
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl FromStr for PortMapping {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ParseError::InvalidPort {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let parse_port = |p: &str| -> Result<u16, ParseError> {
            match p.parse::<u16>() {
                Ok(0) | Err(_) => Err(invalid("port must be a number between 1 and 65535")),
                Ok(port) => Ok(port),
            }
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty { property: "port" });
        }

        let (ports, protocol) = match trimmed.split_once('/') {
            Some((ports, proto)) => (ports, proto.parse().map_err(|e: String| invalid(&e))?),
            None => (trimmed, Protocol::Tcp),
        };

        let mut parts = ports.split(':');
        let (host, container) = match (parts.next(), parts.next(), parts.next()) {
            (Some(container), None, None) => (None, container),
            (Some(host), Some(container), None) => (Some(host), container),
            _ => return Err(invalid("expected host:container[/proto] or container[/proto]")),
        };

        Ok(Self {
            host_port: host.map(parse_port).transpose()?,
            container_port: parse_port(container)?,
            protocol,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host_port {
            Some(host) => write!(f, "{}:{}/{}", host, self.container_port, self.protocol),
            None => write!(f, "{}/{}", self.container_port, self.protocol),
        }
    }
}

/// Bind mount mode used when none is given.
pub const DEFAULT_BIND_MODE: &str = "rw";

/// A host path bound into the container: `host:container[:mode]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub mode: String,
}

impl FromStr for BindMount {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ParseError::InvalidBind {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        let (host, container, mode) = match parts.as_slice() {
            [host, container] => (*host, *container, DEFAULT_BIND_MODE),
            [host, container, mode] => (*host, *container, *mode),
            _ => return Err(invalid("expected host:container[:mode]")),
        };

        if host.is_empty() || container.is_empty() {
            return Err(invalid("paths cannot be empty"));
        }
        if !container.starts_with('/') {
            return Err(invalid("container path must be absolute"));
        }
        if mode.is_empty() {
            return Err(invalid("mode cannot be empty"));
        }

        Ok(Self {
            host_path: host.to_string(),
            container_path: container.to_string(),
            mode: mode.to_string(),
        })
    }
}

impl fmt::Display for BindMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mode == DEFAULT_BIND_MODE {
            write!(f, "{}:{}", self.host_path, self.container_path)
        } else {
            write!(f, "{}:{}:{}", self.host_path, self.container_path, self.mode)
        }
    }
}

/// The command a container runs.
///
/// `Unset` runs the image's built-in command. The engine does the same for an
/// empty argument list, so declared commands are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    #[default]
    Unset,
    Args(Vec<String>),
}

impl Command {
    /// Splits a shell-style string into arguments.
    pub fn shell(input: &str) -> Result<Self, ParseError> {
        split_command(input).map(Self::Args)
    }

    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Args(args.into_iter().map(Into::into).collect())
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn as_args(&self) -> Option<&[String]> {
        match self {
            Self::Unset => None,
            Self::Args(args) => Some(args),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("<image default>"),
            Self::Args(args) => f.write_str(&args.join(" ")),
        }
    }
}

/// Splits a command line into words, honouring single quotes, double quotes
/// and backslash escapes. No expansion is performed.
pub fn split_command(input: &str) -> Result<Vec<String>, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidCommand {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(invalid("unterminated single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(invalid("unterminated double quote")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(invalid("unterminated double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err(invalid("dangling escape")),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Parses a `KEY=VALUE` environment entry.
pub fn parse_env_entry(entry: &str) -> Result<(String, String), ParseError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ParseError::InvalidEnv(entry.to_string())),
    }
}

/// A field of [`ContainerSpec`], used to report drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecField {
    Image,
    Command,
    Ports,
    Binds,
    VolumesFrom,
    Autoremove,
    Env,
}

impl SpecField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Command => "command",
            Self::Ports => "ports",
            Self::Binds => "binds",
            Self::VolumesFrom => "volumes_from",
            Self::Autoremove => "autoremove",
            Self::Env => "env",
        }
    }
}

impl fmt::Display for SpecField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical desired configuration of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: ImageRef,
    #[serde(default)]
    pub command: Command,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub binds: Vec<BindMount>,
    #[serde(default)]
    pub volumes_from: Vec<String>,
    #[serde(default)]
    pub autoremove: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// A spec running the image's default command with nothing else set.
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            command: Command::Unset,
            ports: Vec::new(),
            binds: Vec::new(),
            volumes_from: Vec::new(),
            autoremove: false,
            env: BTreeMap::new(),
        }
    }

    /// Returns true if both specs describe the same container.
    ///
    /// Environment is not part of equivalence; see [`ContainerSpec::drift`].
    pub fn equivalent(&self, other: &ContainerSpec) -> bool {
        self.core_drift(other).is_empty()
    }

    /// Lists the fields where `actual` does not satisfy this declared spec.
    ///
    /// Declared environment variables must be present in `actual` with the
    /// same value; extra variables (e.g. from the image) are ignored.
    pub fn drift(&self, actual: &ContainerSpec) -> Vec<SpecField> {
        let mut fields = self.core_drift(actual);
        let env_satisfied = self
            .env
            .iter()
            .all(|(key, value)| actual.env.get(key) == Some(value));
        if !env_satisfied {
            fields.push(SpecField::Env);
        }
        fields
    }

    fn core_drift(&self, other: &ContainerSpec) -> Vec<SpecField> {
        let mut fields = Vec::new();
        if self.image != other.image {
            fields.push(SpecField::Image);
        }
        if self.command != other.command {
            fields.push(SpecField::Command);
        }
        if !set_eq(&self.ports, &other.ports) {
            fields.push(SpecField::Ports);
        }
        if !set_eq(&self.binds, &other.binds) {
            fields.push(SpecField::Binds);
        }
        if !set_eq(&self.volumes_from, &other.volumes_from) {
            fields.push(SpecField::VolumesFrom);
        }
        if self.autoremove != other.autoremove {
            fields.push(SpecField::Autoremove);
        }
        fields
    }

    /// Order-insensitive fingerprint of the full spec, environment included.
    pub fn fingerprint(&self) -> SpecHash {
        let canonical = serde_json::json!({
            "image": self.image.to_string(),
            "command": self.command,
            "ports": sorted(&self.ports),
            "binds": sorted(&self.binds),
            "volumes_from": sorted(&self.volumes_from),
            "autoremove": self.autoremove,
            "env": self.env,
        });
        SpecHash::from_json(&canonical)
    }
}

fn set_eq<T: Ord>(a: &[T], b: &[T]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    items
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect()
}

/// A spec hash for deterministic comparison.
///
/// Written to a container label at create time; a matching label means the
/// container was created from an identical declaration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from JSON. `serde_json` maps keep keys sorted, so
    /// the serialized form is canonical.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let bytes = json.to_string();
        let digest = Sha256::digest(bytes.as_bytes());
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    /// Wraps a hash read back from a label.
    pub fn from_label(value: &str) -> Option<Self> {
        value
            .strip_prefix("sha256:")
            .filter(|hex| !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .map(|_| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
