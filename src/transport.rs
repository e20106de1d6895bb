//! Process-shaped pipes for talking to an engine.
//!
//! The UCI session only needs a writable stdin, a line-buffered stdout and
//! an exit status. [`SocketProcess`] provides those over a TCP connection
//! to a remote engine container; [`ChildProcess`] over a local child.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How long a child gets to exit after `quit` before it is killed.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Something that looks like an engine subprocess.
pub trait EngineProcess: Send {
    type Stdin: AsyncWrite + Unpin + Send;
    type Stdout: AsyncBufRead + Unpin + Send;

    fn stdin(&mut self) -> &mut Self::Stdin;

    fn stdout(&mut self) -> &mut Self::Stdout;

    /// `None` while the engine is running, its exit code afterwards.
    fn returncode(&mut self) -> Option<i32>;

    fn pid(&self) -> Option<u32>;

    /// Release the pipes and wait for the engine to go away.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// Reader that flips a shared flag once the peer hangs up or the
/// connection fails.
pub struct LivenessReader<R> {
    inner: R,
    alive: Arc<AtomicBool>,
}

impl<R: AsyncRead + Unpin> AsyncRead for LivenessReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let wanted = buf.remaining() > 0;
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        match &poll {
            Poll::Ready(Ok(())) if wanted && buf.filled().len() == before => {
                self.alive.store(false, Ordering::SeqCst);
            }
            Poll::Ready(Err(_)) => self.alive.store(false, Ordering::SeqCst),
            _ => {}
        }
        poll
    }
}

/// An engine reached over a raw TCP stream.
///
/// The single connection serves as both stdin and stdout. There is no real
/// process behind it, so the exit status is synthetic: `None` while the
/// connection is up, `Some(0)` once it has been lost or closed.
pub struct SocketProcess {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    reader: BufReader<LivenessReader<OwnedReadHalf>>,
    alive: Arc<AtomicBool>,
}

impl SocketProcess {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    /// Wrap an established connection and mark it alive.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read, writer) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = BufReader::new(LivenessReader {
            inner: read,
            alive: Arc::clone(&alive),
        });
        debug!(%peer, "engine connection established");
        Ok(Self {
            peer,
            writer,
            reader,
            alive,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl EngineProcess for SocketProcess {
    type Stdin = OwnedWriteHalf;
    type Stdout = BufReader<LivenessReader<OwnedReadHalf>>;

    fn stdin(&mut self) -> &mut Self::Stdin {
        &mut self.writer
    }

    fn stdout(&mut self) -> &mut Self::Stdout {
        &mut self.reader
    }

    fn returncode(&mut self) -> Option<i32> {
        if self.is_alive() { None } else { Some(0) }
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    async fn close(&mut self) -> Result<()> {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        if was_alive {
            debug!(peer = %self.peer, "closing engine connection");
        }
        // The peer may already have torn the connection down.
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "engine connection shutdown failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Child process
// ---------------------------------------------------------------------------

/// A local engine executable with piped stdio.
pub struct ChildProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildProcess {
    pub fn spawn(program: &str) -> Result<Self> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other(format!("{program}: stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other(format!("{program}: stdout not captured")))?;

        debug!(program, pid = ?child.id(), "engine process spawned");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

impl EngineProcess for ChildProcess {
    type Stdin = ChildStdin;
    type Stdout = BufReader<ChildStdout>;

    fn stdin(&mut self) -> &mut Self::Stdin {
        &mut self.stdin
    }

    fn stdout(&mut self) -> &mut Self::Stdout {
        &mut self.stdout
    }

    fn returncode(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.stdin.shutdown().await {
            debug!(pid = ?self.child.id(), error = %e, "engine stdin shutdown failed");
        }
        match tokio::time::timeout(CHILD_EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                debug!(status = ?status?, "engine process exited");
            }
            Err(_) => {
                warn!(pid = ?self.child.id(), "engine process ignored quit, killing");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
