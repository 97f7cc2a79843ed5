//! Stack domain types.
//!
//! A stack is a declarative bundle of grouped resources owned by a single
//! logical application. The per-kind specs here carry only the semantic
//! fields the reconciler diffs on; anything else belongs to the downstream
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label maps. Ordered so that diffing and serialization are deterministic.
pub type Labels = BTreeMap<String, String>;

/// Declarative description of a stack: the desired services, networks,
/// secrets, and configs, each named uniquely within its kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSpec {
    /// Stack name
    pub name: String,

    /// Stack-level labels
    pub labels: Labels,

    /// Desired services
    pub services: Vec<ServiceSpec>,

    /// Desired networks, keyed by network name
    pub networks: BTreeMap<String, NetworkSpec>,

    /// Desired secrets
    pub secrets: Vec<SecretSpec>,

    /// Desired configs
    pub configs: Vec<ConfigSpec>,
}

/// A stack as stored by the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// Stack ID
    pub id: String,

    /// Stack name
    pub name: String,

    /// Revision of the stored spec, used for optimistic concurrency
    pub version: u64,

    /// The declared spec
    pub spec: StackSpec,
}

/// Response to a stack creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackCreateResponse {
    pub id: String,
}

/// Desired state for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: Labels,
    pub task_template: TaskTemplate,
    pub mode: ServiceMode,
    pub update_config: Option<ChangeConfig>,
    pub rollback_config: Option<ChangeConfig>,
    /// Names of stack networks the service attaches to
    pub networks: Vec<String>,
    pub endpoint: Option<EndpointSpec>,
}

/// The template tasks of a service are started from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTemplate {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

/// Replication mode of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Replicated { replicas: u64 },
    Global,
}

impl Default for ServiceMode {
    fn default() -> Self {
        ServiceMode::Replicated { replicas: 1 }
    }
}

/// Rollout parameters shared by update and rollback configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeConfig {
    pub parallelism: u64,
    pub delay_ms: u64,
}

/// Published-port description for a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSpec {
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub target_port: u16,
    pub published_port: u16,
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

/// Desired state for one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSpec {
    pub name: String,
    pub labels: Labels,
    pub data: Vec<u8>,
    pub driver: Option<Driver>,
    pub templating: Option<Driver>,
}

/// Desired state for one config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSpec {
    pub name: String,
    pub labels: Labels,
    pub data: Vec<u8>,
    pub templating: Option<Driver>,
}

/// Desired state for one network. Networks are immutable downstream: they
/// can only be created or removed, never updated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub driver: String,
    pub options: BTreeMap<String, String>,
    pub attachable: bool,
    pub labels: Labels,
}

/// Driver reference used by secret storage and templating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Driver {
    pub name: String,
    pub options: BTreeMap<String, String>,
}

/// A service as it exists downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub version: u64,
    pub spec: ServiceSpec,
}

/// A secret as it exists downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub version: u64,
    pub spec: SecretSpec,
}

/// A config as it exists downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub id: String,
    pub version: u64,
    pub spec: ConfigSpec,
}

/// A network as it exists downstream. Networks carry no revision because the
/// downstream API has no network-update operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub spec: NetworkSpec,
}
