//! Shared fakes for integration tests: a scripted scheduler, an in-process
//! UCI engine speaking over TCP, and a scripted runner.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use chessnet::board::Board;
use chessnet::error::{Error, Result};
use chessnet::manager::{EngineManager, ManagerConfig};
use chessnet::model::Engine;
use chessnet::runner::{EngineRunner, RunnerFactory};
use chessnet::scheduler::{
    ATTACHMENT_ATTACHED, Attachment, NETWORK_INTERFACE_DETAIL, PublicEndpoint, RunTaskRequest,
    STATUS_RUNNING, STATUS_STOPPED, Scheduler, TaskDefinition, TaskDefinitionSpec,
    TaskDescription,
};
use chessnet::uci::Limit;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Position};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub fn stockfish() -> Engine {
    Engine::new("stockfish", "main", "11", "andrijdavid/stockfish:11")
}

pub fn alphazero() -> Engine {
    Engine::new("alphazero", "main", "1.0.0", "chessnet/alphazero:1.0.0")
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// How tasks launched on the [`FakeScheduler`] behave.
#[derive(Debug, Clone)]
pub enum TaskBehavior {
    /// Running and attached right away, reachable at `addr`.
    Ready(SocketAddr),
    /// Running, but the network attachment never completes.
    NeverAttached,
    /// Reports STOPPED with this reason on the first poll.
    Stopped(String),
}

#[derive(Debug, Default)]
pub struct SchedulerLog {
    pub registered: Vec<TaskDefinitionSpec>,
    pub launched: Vec<String>,
    pub stopped: Vec<(String, String)>,
    pub describe_calls: usize,
}

pub struct FakeScheduler {
    behavior: TaskBehavior,
    definitions: Mutex<HashMap<String, TaskDefinition>>,
    fail_describe_definition: bool,
    pub log: Mutex<SchedulerLog>,
}

impl FakeScheduler {
    pub fn new(behavior: TaskBehavior) -> Self {
        Self {
            behavior,
            definitions: Mutex::new(HashMap::new()),
            fail_describe_definition: false,
            log: Mutex::new(SchedulerLog::default()),
        }
    }

    /// Make task definition lookups fail, as an unreachable API would.
    pub fn failing_lookups(mut self) -> Self {
        self.fail_describe_definition = true;
        self
    }

    /// Seed an existing definition with the given tags.
    pub fn with_definition(self, family: &str, tags: Vec<chessnet::scheduler::Tag>) -> Self {
        self.definitions.lock().unwrap().insert(
            family.to_string(),
            TaskDefinition {
                family: family.to_string(),
                revision: 1,
                tags,
            },
        );
        self
    }

    pub fn stopped(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().stopped.clone()
    }

    pub fn launched(&self) -> Vec<String> {
        self.log.lock().unwrap().launched.clone()
    }

    pub fn registered(&self) -> usize {
        self.log.lock().unwrap().registered.len()
    }
}

impl Scheduler for FakeScheduler {
    fn describe_task_definition(&self, family: &str) -> Result<Option<TaskDefinition>> {
        if self.fail_describe_definition {
            return Err(Error::Scheduler("AccessDenied".to_string()));
        }
        Ok(self.definitions.lock().unwrap().get(family).cloned())
    }

    fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<TaskDefinition> {
        let mut definitions = self.definitions.lock().unwrap();
        let revision = definitions.get(&spec.family).map_or(1, |d| d.revision + 1);
        let definition = TaskDefinition {
            family: spec.family.clone(),
            revision,
            tags: spec.tags.clone(),
        };
        definitions.insert(spec.family.clone(), definition.clone());
        self.log.lock().unwrap().registered.push(spec.clone());
        Ok(definition)
    }

    fn run_task(&self, request: &RunTaskRequest) -> Result<String> {
        let mut log = self.log.lock().unwrap();
        let task = format!("task/{}/{}", request.task_definition, log.launched.len());
        log.launched.push(task.clone());
        Ok(task)
    }

    fn describe_task(&self, _cluster: &str, task: &str) -> Result<TaskDescription> {
        self.log.lock().unwrap().describe_calls += 1;
        let attached = |status: &str| Attachment {
            status: status.to_string(),
            details: HashMap::from([(NETWORK_INTERFACE_DETAIL.to_string(), format!("eni-{task}"))]),
        };
        Ok(match &self.behavior {
            TaskBehavior::Ready(_) => TaskDescription {
                task: task.to_string(),
                last_status: STATUS_RUNNING.to_string(),
                stopped_reason: None,
                attachments: vec![attached(ATTACHMENT_ATTACHED)],
            },
            TaskBehavior::NeverAttached => TaskDescription {
                task: task.to_string(),
                last_status: STATUS_RUNNING.to_string(),
                stopped_reason: None,
                attachments: vec![attached("PRECREATED")],
            },
            TaskBehavior::Stopped(reason) => TaskDescription {
                task: task.to_string(),
                last_status: STATUS_STOPPED.to_string(),
                stopped_reason: Some(reason.clone()),
                attachments: Vec::new(),
            },
        })
    }

    fn stop_task(&self, _cluster: &str, task: &str, reason: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .stopped
            .push((task.to_string(), reason.to_string()));
        Ok(())
    }

    fn describe_network_interface(&self, _interface: &str) -> Result<PublicEndpoint> {
        Ok(match &self.behavior {
            TaskBehavior::Ready(addr) => PublicEndpoint {
                ip: Some(addr.ip()),
                port: Some(addr.port()),
            },
            _ => PublicEndpoint::default(),
        })
    }
}

/// Manager over `scheduler` with a millisecond poll schedule.
pub fn fast_manager<S: Scheduler>(scheduler: S) -> EngineManager<S> {
    EngineManager::with_poll_schedule(
        scheduler,
        ManagerConfig::default(),
        vec![Duration::ZERO, Duration::from_millis(5), Duration::from_millis(5)],
    )
}

// ---------------------------------------------------------------------------
// UCI engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UciBehavior {
    /// Plays legal moves: mates first, then captures, then the first legal
    /// move.
    Normal,
    /// Hangs up as soon as it receives `uci`.
    RefuseHandshake,
    /// Hangs up instead of answering the nth `go` (1-based).
    HangUpOnGo(usize),
}

/// Serve a UCI engine on a loopback port. Every connection gets its own
/// engine state.
pub async fn spawn_uci_engine(behavior: UciBehavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_uci(socket, behavior));
        }
    });
    addr
}

async fn serve_uci(socket: tokio::net::TcpStream, behavior: UciBehavior) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut position = Chess::default();
    let mut searches = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match line.split_whitespace().next() {
            Some("uci") if behavior == UciBehavior::RefuseHandshake => return,
            Some("uci") => "id name Fake\nid author chessnet\noption name Hash type spin default 16 min 1 max 1024\nuciok\n".to_string(),
            Some("isready") => "readyok\n".to_string(),
            Some("position") => {
                position = parse_position(&line);
                continue;
            }
            Some("go") => {
                searches += 1;
                if behavior == UciBehavior::HangUpOnGo(searches) {
                    return;
                }
                match choose_move(&position) {
                    Some(mv) => format!("info depth 1 score cp 0\nbestmove {mv}\n"),
                    None => "bestmove (none)\n".to_string(),
                }
            }
            Some("quit") => return,
            _ => continue,
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn parse_position(line: &str) -> Chess {
    let mut position = Chess::default();
    let Some((_, moves)) = line.split_once(" moves ") else {
        return position;
    };
    for token in moves.split_whitespace() {
        let m = token
            .parse::<UciMove>()
            .unwrap()
            .to_move(&position)
            .unwrap();
        position.play_unchecked(&m);
    }
    position
}

fn choose_move(position: &Chess) -> Option<String> {
    let moves = position.legal_moves();
    let mate = moves.iter().find(|m| {
        let mut after = position.clone();
        after.play_unchecked(m);
        after.is_checkmate()
    });
    mate.or_else(|| moves.iter().find(|m| m.is_capture()))
        .or_else(|| moves.first())
        .map(|m| UciMove::from_move(m, CastlingMode::Standard).to_string())
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runner that replays a fixed list of replies.
pub struct ScriptedRunner {
    engine: Engine,
    fail_run: Option<String>,
    replies: VecDeque<std::result::Result<String, String>>,
    ready: bool,
    pub runs: usize,
    pub plays: usize,
    pub shutdowns: Vec<String>,
}

impl ScriptedRunner {
    pub fn new(engine: Engine, moves: &[&str]) -> Self {
        Self {
            engine,
            fail_run: None,
            replies: moves.iter().map(|m| Ok(m.to_string())).collect(),
            ready: false,
            runs: 0,
            plays: 0,
            shutdowns: Vec::new(),
        }
    }

    /// `run` fails with a provisioning error carrying `reason`.
    pub fn failing_run(mut self, reason: &str) -> Self {
        self.fail_run = Some(reason.to_string());
        self
    }

    /// After the scripted moves, the next `play` fails with `reason`.
    pub fn then_fail(mut self, reason: &str) -> Self {
        self.replies.push_back(Err(reason.to_string()));
        self
    }
}

impl EngineRunner for ScriptedRunner {
    async fn run(&mut self) -> Result<()> {
        self.runs += 1;
        if let Some(reason) = &self.fail_run {
            let err = Error::Provisioning(reason.clone());
            self.shutdown(&format!("engine failed to start: {err}")).await?;
            return Err(err);
        }
        self.ready = true;
        Ok(())
    }

    async fn play(&mut self, _board: &Board, _limit: &Limit) -> Result<String> {
        if !self.ready {
            return Err(Error::NotReady);
        }
        self.plays += 1;
        match self.replies.pop_front() {
            Some(Ok(mv)) => Ok(mv),
            Some(Err(reason)) => Err(Error::Protocol(reason)),
            None => Err(Error::Protocol("script exhausted".to_string())),
        }
    }

    async fn shutdown(&mut self, reason: &str) -> Result<()> {
        self.ready = false;
        self.shutdowns.push(reason.to_string());
        Ok(())
    }

    fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Factory handing each engine its own script, keyed by engine id.
#[derive(Default)]
pub struct ScriptedRunners {
    scripts: HashMap<String, Vec<String>>,
}

impl ScriptedRunners {
    pub fn with_script(mut self, engine: &Engine, moves: &[&str]) -> Self {
        self.scripts
            .insert(engine.id(), moves.iter().map(|m| m.to_string()).collect());
        self
    }
}

impl RunnerFactory for ScriptedRunners {
    type Runner = ScriptedRunner;

    fn runner(&self, engine: Engine) -> ScriptedRunner {
        let moves: Vec<&str> = self
            .scripts
            .get(&engine.id())
            .map(|moves| moves.iter().map(String::as_str).collect())
            .unwrap_or_default();
        ScriptedRunner::new(engine, &moves)
    }
}
