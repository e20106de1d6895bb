//! Local scheduler backed by the `docker` CLI.
//!
//! Task definitions live in memory; tasks are containers. Each container
//! publishes its engine port on a random loopback port, which is reported
//! through [`PublicEndpoint::port`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ATTACHMENT_ATTACHED, Attachment, NETWORK_INTERFACE_DETAIL, PublicEndpoint, RunTaskRequest,
    STATUS_RUNNING, STATUS_STOPPED, Scheduler, TaskDefinition, TaskDefinitionSpec,
    TaskDescription,
};
use crate::error::{Error, Result};

const TASK_DEFINITION_LABEL: &str = "chessnet.task-definition";
const CLUSTER_LABEL: &str = "chessnet.cluster";

pub struct DockerScheduler {
    binary: String,
    definitions: Mutex<HashMap<String, (TaskDefinition, TaskDefinitionSpec)>>,
}

impl Default for DockerScheduler {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerScheduler {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            definitions: Mutex::new(HashMap::new()),
        }
    }

    fn docker(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "docker");
        let output = Command::new(&self.binary).args(args).output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(Error::Scheduler(format!(
                "docker {} exited with status {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn spec(&self, family: &str) -> Option<TaskDefinitionSpec> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(family)
            .map(|(_, spec)| spec.clone())
    }
}

fn is_missing_container(err: &Error) -> bool {
    matches!(err, Error::Scheduler(msg) if msg.contains("No such container"))
}

/// Map `docker inspect` state onto scheduler task statuses.
fn task_status(state: &str) -> &'static str {
    match state {
        "running" => STATUS_RUNNING,
        "exited" | "dead" => STATUS_STOPPED,
        "removing" => "STOPPING",
        _ => "PENDING",
    }
}

/// First host binding in `docker port` output, e.g.
/// `3333/tcp -> 127.0.0.1:49153`.
fn parse_port_binding(output: &str) -> Option<SocketAddr> {
    output
        .lines()
        .filter_map(|line| line.split("->").nth(1))
        .find_map(|addr| addr.trim().parse().ok())
}

impl Scheduler for DockerScheduler {
    fn describe_task_definition(&self, family: &str) -> Result<Option<TaskDefinition>> {
        Ok(self
            .definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(family)
            .map(|(def, _)| def.clone()))
    }

    fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<TaskDefinition> {
        let mut definitions = self.definitions.lock().unwrap_or_else(PoisonError::into_inner);
        let revision = definitions
            .get(&spec.family)
            .map_or(1, |(def, _)| def.revision + 1);
        let definition = TaskDefinition {
            family: spec.family.clone(),
            revision,
            tags: spec.tags.clone(),
        };
        definitions.insert(spec.family.clone(), (definition.clone(), spec.clone()));
        info!(family = %spec.family, revision, image = %spec.image, "task definition registered");
        Ok(definition)
    }

    fn run_task(&self, request: &RunTaskRequest) -> Result<String> {
        let spec = self.spec(&request.task_definition).ok_or_else(|| {
            Error::Scheduler(format!(
                "unknown task definition {}",
                request.task_definition
            ))
        })?;

        let name = format!("{}-{}", spec.container_name, &Uuid::new_v4().simple().to_string()[..8]);
        let cpus = format!("{:.2}", f64::from(spec.cpu) / 1024.0);
        let memory = format!("{}m", spec.memory);
        let publish = format!("127.0.0.1::{}", spec.container_port);
        let family_label = format!("{TASK_DEFINITION_LABEL}={}", spec.family);
        let cluster_label = format!("{CLUSTER_LABEL}={}", request.cluster);

        let container = self.docker(&[
            "run",
            "--detach",
            "--name",
            &name,
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "--publish",
            &publish,
            "--label",
            &family_label,
            "--label",
            &cluster_label,
            &spec.image,
        ])?;
        info!(container = %container, image = %spec.image, "container started");
        Ok(container)
    }

    fn describe_task(&self, _cluster: &str, task: &str) -> Result<TaskDescription> {
        let raw = self.docker(&[
            "inspect",
            "--format",
            "{{.State.Status}}|{{.State.ExitCode}}|{{.State.Error}}",
            task,
        ])?;
        let mut fields = raw.splitn(3, '|');
        let state = fields.next().unwrap_or_default();
        let exit_code = fields.next().unwrap_or_default();
        let error = fields.next().unwrap_or_default();

        let last_status = task_status(state);
        let stopped_reason = (last_status == STATUS_STOPPED).then(|| {
            if error.is_empty() {
                format!("container exited with code {exit_code}")
            } else {
                format!("container exited with code {exit_code}: {error}")
            }
        });
        // The container itself stands in for the network interface.
        let attachment = Attachment {
            status: if last_status == STATUS_RUNNING {
                ATTACHMENT_ATTACHED.to_string()
            } else {
                "PRECREATED".to_string()
            },
            details: HashMap::from([(NETWORK_INTERFACE_DETAIL.to_string(), task.to_string())]),
        };

        Ok(TaskDescription {
            task: task.to_string(),
            last_status: last_status.to_string(),
            stopped_reason,
            attachments: vec![attachment],
        })
    }

    fn stop_task(&self, _cluster: &str, task: &str, reason: &str) -> Result<()> {
        info!(container = %task, reason, "stopping container");
        match self.docker(&["rm", "--force", task]) {
            Err(e) if is_missing_container(&e) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn describe_network_interface(&self, interface: &str) -> Result<PublicEndpoint> {
        let output = self.docker(&["port", interface])?;
        Ok(match parse_port_binding(&output) {
            Some(addr) => PublicEndpoint {
                ip: Some(addr.ip()),
                port: Some(addr.port()),
            },
            None => PublicEndpoint::default(),
        })
    }
}
