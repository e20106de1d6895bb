//! Remote engine lifecycle: task definitions, launch, readiness, teardown.
//!
//! One provisioning request walks
//! `REQUESTED → TASK_DEFINITION_RESOLVED → TASK_STARTED →
//! WAITING_FOR_NETWORK_ATTACH → READY`, failing at any step or timing out
//! once the poll schedule is exhausted. Scheduler calls block, so the async
//! entry points run them on tokio's blocking pool behind a semaphore.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{ENGINE_ID_SEPARATOR, Engine};
use crate::scheduler::{ATTACHMENT_ATTACHED, RunTaskRequest, Scheduler, Tag, TaskDefinitionSpec};
use crate::telemetry::metrics;

/// Bumped whenever the shape of registered task definitions changes;
/// definitions carrying an older tag are re-registered.
pub const TASK_DEFINITION_VERSION: u32 = 2;

pub const VERSION_TAG_KEY: &str = "task_definition_version";

/// Port every engine image listens on.
pub const ENGINE_PORT: u16 = 3333;

pub fn version_tag() -> Tag {
    Tag::new(VERSION_TAG_KEY, format!("v{TASK_DEFINITION_VERSION}"))
}

/// Scheduler-safe name for an engine id. The separator becomes `-`, and
/// literal `_` and `-` are escaped with `_`, so distinct ids never map to
/// the same name.
pub fn safe_name(engine_id: &str) -> String {
    let mut name = String::with_capacity(engine_id.len() + 4);
    for c in engine_id.chars() {
        match c {
            ENGINE_ID_SEPARATOR => name.push('-'),
            '_' => name.push_str("__"),
            '-' => name.push_str("_-"),
            c => name.push(c),
        }
    }
    name
}

/// A provisioned, reachable engine container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningEngine {
    pub task: String,
    pub address: IpAddr,
    pub port: u16,
}

impl RunningEngine {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub cluster: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub capacity_provider: String,
    /// CPU units per engine task.
    pub cpu: u32,
    /// Memory (MiB) per engine task.
    pub memory: u32,
    pub engine_port: u16,
    /// Delay before each readiness poll, in seconds.
    pub poll_schedule_secs: Vec<u64>,
    pub max_concurrent_provisions: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cluster: "chess-net".to_string(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            capacity_provider: "FARGATE_SPOT".to_string(),
            cpu: 2048,
            memory: 4096,
            engine_port: ENGINE_PORT,
            poll_schedule_secs: vec![0, 5, 5, 10, 10, 30, 30, 60, 60],
            max_concurrent_provisions: 8,
        }
    }
}

impl ManagerConfig {
    pub fn poll_schedule(&self) -> Vec<Duration> {
        self.poll_schedule_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }
}

struct Inner<S> {
    scheduler: S,
    config: ManagerConfig,
    poll_schedule: Vec<Duration>,
}

/// Provisions and tears down engine containers. Cheap to clone.
pub struct EngineManager<S> {
    inner: Arc<Inner<S>>,
    permits: Arc<Semaphore>,
}

impl<S> Clone for EngineManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<S: Scheduler> EngineManager<S> {
    pub fn new(scheduler: S, config: ManagerConfig) -> Self {
        let poll_schedule = config.poll_schedule();
        Self::with_poll_schedule(scheduler, config, poll_schedule)
    }

    /// Like [`EngineManager::new`] with an explicit schedule, for delays
    /// finer than a second.
    pub fn with_poll_schedule(
        scheduler: S,
        config: ManagerConfig,
        poll_schedule: Vec<Duration>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_provisions.max(1)));
        Self {
            inner: Arc::new(Inner {
                scheduler,
                config,
                poll_schedule,
            }),
            permits,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &S {
        &self.inner.scheduler
    }

    fn task_definition_spec(&self, engine: &Engine) -> TaskDefinitionSpec {
        let name = safe_name(&engine.id());
        TaskDefinitionSpec {
            family: name.clone(),
            container_name: name,
            image: engine.image.clone(),
            cpu: self.inner.config.cpu,
            memory: self.inner.config.memory,
            container_port: self.inner.config.engine_port,
            tags: vec![version_tag()],
        }
    }

    /// Find an up-to-date task definition for `engine`, registering one if
    /// it is missing or carries an older version tag. Returns its family.
    pub fn resolve_task_definition(&self, engine: &Engine) -> Result<String> {
        let spec = self.task_definition_spec(engine);
        match self.inner.scheduler.describe_task_definition(&spec.family) {
            Ok(Some(existing)) if existing.has_tag(&version_tag()) => {
                debug!(family = %existing.family, revision = existing.revision, "task definition up to date");
                return Ok(existing.family);
            }
            Ok(Some(existing)) => {
                info!(family = %existing.family, "task definition outdated, re-registering");
            }
            Ok(None) => {}
            Err(e) => {
                // Registration is idempotent, so treat lookup failures as absent.
                warn!(family = %spec.family, error = %e, "task definition lookup failed");
            }
        }

        self.inner
            .scheduler
            .register_task_definition(&spec)
            .map(|def| def.family)
            .map_err(|e| Error::Provisioning(format!("registering {}: {e}", spec.family)))
    }

    /// Resolve the task definition and start one task. Returns the task
    /// handle.
    pub fn launch(&self, engine: &Engine) -> Result<String> {
        let family = self.resolve_task_definition(engine)?;
        let config = &self.inner.config;
        let request = RunTaskRequest {
            cluster: config.cluster.clone(),
            task_definition: family.clone(),
            capacity_provider: config.capacity_provider.clone(),
            subnets: config.subnets.clone(),
            security_groups: config.security_groups.clone(),
            assign_public_ip: true,
        };
        let task = self
            .inner
            .scheduler
            .run_task(&request)
            .map_err(|e| Error::Provisioning(format!("running {family}: {e}")))?;
        info!(engine = %engine.id(), task = %task, "engine task started");
        Ok(task)
    }

    /// Poll `task` on the back-off schedule until it is running with a
    /// public address.
    pub fn wait_until_ready(&self, task: &str) -> Result<RunningEngine> {
        let started = Instant::now();
        let config = &self.inner.config;
        let scheduler = &self.inner.scheduler;

        for delay in &self.inner.poll_schedule {
            if !delay.is_zero() {
                std::thread::sleep(*delay);
            }

            let description = scheduler.describe_task(&config.cluster, task)?;
            if description.is_terminal() {
                return Err(Error::TaskStopped {
                    task: task.to_string(),
                    reason: description
                        .stopped_reason
                        .unwrap_or_else(|| description.last_status.clone()),
                });
            }
            if !description.is_running() {
                debug!(task, status = %description.last_status, "waiting for task");
                continue;
            }

            let Some(attachment) = description.attachments.first() else {
                debug!(task, "waiting for network attachment");
                continue;
            };
            if attachment.status != ATTACHMENT_ATTACHED {
                debug!(task, status = %attachment.status, "waiting for network attachment");
                continue;
            }
            let interface = attachment.network_interface().ok_or_else(|| {
                Error::Provisioning(format!("task {task} attachment has no network interface"))
            })?;

            let endpoint = scheduler.describe_network_interface(interface)?;
            let Some(address) = endpoint.ip else {
                debug!(task, interface, "waiting for public address");
                continue;
            };

            let running = RunningEngine {
                task: task.to_string(),
                address,
                port: endpoint.port.unwrap_or(config.engine_port),
            };
            info!(task, addr = %running.socket_addr(), "engine task ready");
            return Ok(running);
        }

        Err(Error::ProvisioningTimeout {
            task: task.to_string(),
            waited: started.elapsed(),
        })
    }

    /// Blocking provision. A task that was launched but never became ready
    /// is stopped before the error is returned.
    pub fn provision_blocking(&self, engine: &Engine) -> Result<RunningEngine> {
        let started = Instant::now();
        let result = self.launch(engine).and_then(|task| {
            self.wait_until_ready(&task).inspect_err(|e| {
                let reason = format!("provisioning failed: {e}");
                if let Err(stop) = self.terminate_blocking(&task, &reason) {
                    warn!(task = %task, error = %stop, "failed to stop unready task");
                }
            })
        });

        let label = match &result {
            Ok(_) => "ok",
            Err(Error::ProvisioningTimeout { .. }) => "timeout",
            Err(Error::TaskStopped { .. }) => "stopped",
            Err(_) => "error",
        };
        metrics::provisions().add(1, &[KeyValue::new("result", label)]);
        if result.is_ok() {
            metrics::provision_duration_secs().record(started.elapsed().as_secs_f64(), &[]);
        }
        result
    }

    pub fn terminate_blocking(&self, task: &str, reason: &str) -> Result<()> {
        info!(task, reason, "stopping engine task");
        self.inner
            .scheduler
            .stop_task(&self.inner.config.cluster, task, reason)
    }

    /// Provision a container for `engine` without blocking the runtime.
    pub async fn provision(&self, engine: &Engine) -> Result<RunningEngine> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("provisioning pool closed".to_string()))?;
        let manager = self.clone();
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            manager.provision_blocking(&engine)
        })
        .await
        .map_err(|e| Error::Other(format!("provisioning worker failed: {e}")))?
    }

    /// Stop a provisioned container, recording `reason` with the scheduler.
    pub async fn terminate(&self, running: &RunningEngine, reason: &str) -> Result<()> {
        let manager = self.clone();
        let task = running.task.clone();
        let reason = reason.to_string();
        tokio::task::spawn_blocking(move || manager.terminate_blocking(&task, &reason))
            .await
            .map_err(|e| Error::Other(format!("termination worker failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_replaces_separator() {
        assert_eq!(safe_name("stockfish#main#11"), "stockfish-main-11");
        assert_eq!(safe_name("lc0-nnue#main#0.30"), "lc0_-nnue-main-0.30");
    }

    #[test]
    fn safe_name_keeps_ids_apart() {
        assert_ne!(
            safe_name("stockfish_dev#main#1"),
            safe_name("stockfish#dev_main#1")
        );
        assert_ne!(safe_name("a-#b#c"), safe_name("a#-b#c"));
        assert_ne!(safe_name("a_#b#c"), safe_name("a#_b#c"));
    }

    #[test]
    fn default_schedule_matches_backoff() {
        let schedule = ManagerConfig::default().poll_schedule();
        assert_eq!(schedule.len(), 9);
        assert_eq!(schedule[0], Duration::ZERO);
        assert_eq!(schedule.iter().sum::<Duration>(), Duration::from_secs(210));
    }

    #[test]
    fn version_tag_is_prefixed() {
        assert_eq!(version_tag(), Tag::new("task_definition_version", "v2"));
    }
}
