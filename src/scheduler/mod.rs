//! Remote container scheduler contract.
//!
//! Shaped after a cloud task scheduler: named, tagged task definitions;
//! one-off task runs inside a cluster; status and network attachment
//! lookups; stop with a reason. All calls block. [`crate::manager`] moves
//! them off the async runtime.

mod docker;

pub use docker::DockerScheduler;

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_STOPPED: &str = "STOPPED";
pub const ATTACHMENT_ATTACHED: &str = "ATTACHED";

/// Attachment detail holding the network interface id.
pub const NETWORK_INTERFACE_DETAIL: &str = "networkInterfaceId";

/// Statuses from which a task never comes back to RUNNING.
const TERMINAL_STATUSES: [&str; 4] = ["DEACTIVATING", "STOPPING", "DEPROVISIONING", STATUS_STOPPED];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Everything needed to register a task definition for one engine image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionSpec {
    pub family: String,
    pub container_name: String,
    pub image: String,
    /// CPU units (1024 = one vCPU).
    pub cpu: u32,
    /// Memory in MiB.
    pub memory: u32,
    pub container_port: u16,
    pub tags: Vec<Tag>,
}

/// A registered task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub family: String,
    pub revision: u32,
    pub tags: Vec<Tag>,
}

impl TaskDefinition {
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskRequest {
    pub cluster: String,
    /// Task definition family to launch.
    pub task_definition: String,
    pub capacity_provider: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub status: String,
    pub details: HashMap<String, String>,
}

impl Attachment {
    pub fn network_interface(&self) -> Option<&str> {
        self.details.get(NETWORK_INTERFACE_DETAIL).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task: String,
    pub last_status: String,
    pub stopped_reason: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl TaskDescription {
    pub fn is_running(&self) -> bool {
        self.last_status == STATUS_RUNNING
    }

    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATUSES.contains(&self.last_status.as_str())
    }
}

/// Externally reachable address of a network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicEndpoint {
    pub ip: Option<IpAddr>,
    /// Host port mapped to the container port, for schedulers that remap
    /// ports. `None` means the container port is reachable as-is.
    pub port: Option<u16>,
}

pub trait Scheduler: Send + Sync + 'static {
    /// `Ok(None)` if no definition with that family exists.
    fn describe_task_definition(&self, family: &str) -> Result<Option<TaskDefinition>>;

    /// Register a new revision. Registering the same spec twice is harmless.
    fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<TaskDefinition>;

    /// Launch one task; returns its handle.
    fn run_task(&self, request: &RunTaskRequest) -> Result<String>;

    fn describe_task(&self, cluster: &str, task: &str) -> Result<TaskDescription>;

    fn stop_task(&self, cluster: &str, task: &str, reason: &str) -> Result<()>;

    fn describe_network_interface(&self, interface: &str) -> Result<PublicEndpoint>;
}

impl<S: Scheduler> Scheduler for std::sync::Arc<S> {
    fn describe_task_definition(&self, family: &str) -> Result<Option<TaskDefinition>> {
        (**self).describe_task_definition(family)
    }

    fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<TaskDefinition> {
        (**self).register_task_definition(spec)
    }

    fn run_task(&self, request: &RunTaskRequest) -> Result<String> {
        (**self).run_task(request)
    }

    fn describe_task(&self, cluster: &str, task: &str) -> Result<TaskDescription> {
        (**self).describe_task(cluster, task)
    }

    fn stop_task(&self, cluster: &str, task: &str, reason: &str) -> Result<()> {
        (**self).stop_task(cluster, task, reason)
    }

    fn describe_network_interface(&self, interface: &str) -> Result<PublicEndpoint> {
        (**self).describe_network_interface(interface)
    }
}
