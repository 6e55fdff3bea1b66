//! Docker Engine API request and response bodies, and their mapping to the
//! reconciler's types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dockhand_reconcile::spec::parse_env_entry;
use dockhand_reconcile::{
    BindMount, Command, ContainerSpec, ImageRef, PortMapping, Protocol, DEFAULT_TAG,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime::{ContainerDetails, ContainerStatus, ImageDetails};

/// `GET /containers/{id}/json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    /// ID of the image the container was created from.
    pub image: String,
    pub state: ContainerState,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub restarting: bool,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// Image reference as given at create time.
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeMap<String, EmptyObject>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_bindings: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes_from: Option<Vec<String>>,
    #[serde(default)]
    pub auto_remove: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyObject {}

/// `GET /images/{name}/json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    pub id: String,
    #[serde(default)]
    pub config: Option<ContainerConfig>,
}

/// `POST /containers/create`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerRequest {
    #[serde(flatten)]
    pub config: ContainerConfig,
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerResponse {
    pub id: String,
}

/// Engine's placeholder for "never started".
const ZERO_TIME_PREFIX: &str = "0001-01-01";

fn parse_started_at(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    if value.is_empty() || value.starts_with(ZERO_TIME_PREFIX) {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Split a `80/tcp` port key.
fn parse_port_key(key: &str) -> Option<(u16, Protocol)> {
    let (port, proto) = key.split_once('/').unwrap_or((key, "tcp"));
    let protocol = match proto {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        _ => return None,
    };
    Some((port.parse().ok()?, protocol))
}

fn image_ref(reference: &str) -> ImageRef {
    ImageRef::parse(reference).unwrap_or_else(|_| ImageRef {
        repo: reference.to_string(),
        tag: DEFAULT_TAG.to_string(),
        digest: None,
    })
}

impl ContainerInspect {
    pub fn into_details(self) -> ContainerDetails {
        let status = ContainerStatus {
            status: self.state.status,
            running: self.state.running,
            paused: self.state.paused,
            restarting: self.state.restarting,
            started_at: parse_started_at(self.state.started_at.as_deref()),
            exit_code: self.state.exit_code,
        };

        let mut ports: Vec<PortMapping> = Vec::new();
        for (key, bindings) in self.host_config.port_bindings.unwrap_or_default() {
            let Some((container_port, protocol)) = parse_port_key(&key) else {
                debug!(key = %key, "Skipping unrecognised port binding");
                continue;
            };
            let bindings = bindings.unwrap_or_default();
            if bindings.is_empty() {
                ports.push(PortMapping {
                    host_port: None,
                    container_port,
                    protocol,
                });
            }
            for binding in bindings {
                ports.push(PortMapping {
                    host_port: binding.host_port.parse().ok(),
                    container_port,
                    protocol,
                });
            }
        }

        let binds = self
            .host_config
            .binds
            .unwrap_or_default()
            .iter()
            .filter_map(|b| b.parse::<BindMount>().ok())
            .collect();

        let env = self
            .config
            .env
            .unwrap_or_default()
            .iter()
            .filter_map(|e| parse_env_entry(e).ok())
            .collect();

        let spec = ContainerSpec {
            image: image_ref(&self.config.image),
            command: self.config.cmd.map(Command::Args).unwrap_or(Command::Unset),
            ports,
            binds,
            volumes_from: self.host_config.volumes_from.unwrap_or_default(),
            autoremove: self.host_config.auto_remove,
            env,
        };

        ContainerDetails {
            id: self.id,
            name: self.name.trim_start_matches('/').to_string(),
            status,
            image_id: self.image,
            spec,
            labels: self.config.labels.unwrap_or_default(),
        }
    }
}

impl ImageInspect {
    pub fn into_details(self) -> ImageDetails {
        let default_command = self
            .config
            .and_then(|c| c.cmd)
            .map(Command::Args)
            .unwrap_or(Command::Unset);
        ImageDetails {
            id: self.id,
            default_command,
        }
    }
}

impl CreateContainerRequest {
    pub fn from_spec(spec: &ContainerSpec, labels: &BTreeMap<String, String>) -> Self {
        let mut exposed_ports = BTreeMap::new();
        let mut port_bindings: BTreeMap<String, Option<Vec<PortBinding>>> = BTreeMap::new();
        for port in &spec.ports {
            let key = port.container_key();
            exposed_ports.insert(key.clone(), EmptyObject {});
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(PortBinding {
                    host_ip: String::new(),
                    host_port: port.host_port.map(|p| p.to_string()).unwrap_or_default(),
                });
        }

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        Self {
            config: ContainerConfig {
                image: spec.image.to_string(),
                cmd: spec.command.as_args().map(<[String]>::to_vec),
                env: (!env.is_empty()).then_some(env),
                labels: (!labels.is_empty()).then(|| labels.clone()),
                exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            },
            host_config: HostConfig {
                binds: (!spec.binds.is_empty())
                    .then(|| spec.binds.iter().map(ToString::to_string).collect()),
                port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
                volumes_from: (!spec.volumes_from.is_empty()).then(|| spec.volumes_from.clone()),
                auto_remove: spec.autoremove,
            },
        }
    }
}
