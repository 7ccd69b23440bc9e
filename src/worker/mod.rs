//! Worker processes.
//!
//! A [`Worker`] owns one backend child process. The child reads frames from
//! its standard input and writes replies to its standard output; standard
//! error is left to the parent so backend logs show up alongside the
//! client's own.
use std::{
    fmt, io,
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use log::{debug, warn};
use thiserror::Error;
use url::Url;

use crate::protocol::{ChannelError, CommandChannel, FrameError, FrameHandler, FrameSender};

pub mod backend;
pub mod pool;
pub mod reaper;

pub use backend::{Backend, BackendRegistry, BackendResolver, BackendSpec, BackendSpecError};
pub use pool::{PooledWorker, WorkerPool};
pub use reaper::{Reaper, ReaperHandle};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not launch {}: {source}", .executable.display())]
    Launch {
        executable: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("could not signal worker: {0}")]
    Signal(io::Error),
}

/// Who a worker is connected as. Absent URL parts are empty strings so two
/// identities compare equal exactly when every part matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    pub protocol: String,
    pub host: String,
    pub user: String,
    pub credential: String,
}

impl WorkerIdentity {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            ..Default::default()
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self {
            protocol: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            user: url.username().to_string(),
            credential: url.password().unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol)?;
        if !self.user.is_empty() {
            write!(f, "{}@", self.user)?;
        }
        write!(f, "{}", self.host)
    }
}

/// One running backend process and the channel to it.
#[derive(Debug)]
pub struct Worker {
    pid: u32,
    protocol: String,
    channel: CommandChannel<ChildStdout, ChildStdin>,
    child: Option<Child>,
    reaper: ReaperHandle,
    suspended: bool,
}

impl Worker {
    /// Launches `executable` with no arguments and its standard streams
    /// wired to a fresh channel.
    pub fn spawn(
        executable: &Path,
        protocol: &str,
        reaper: ReaperHandle,
        max_payload: usize,
    ) -> Result<Self, WorkerError> {
        let launch = |source| WorkerError::Launch {
            executable: executable.to_path_buf(),
            source,
        };

        let mut child = Command::new(executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(launch)?;

        let pipes = child.stdin.take().zip(child.stdout.take());
        let Some((stdin, stdout)) = pipes else {
            reaper.collect(child);
            return Err(launch(io::Error::other("child pipes were not created")));
        };

        let pid = child.id();
        debug!("spawned {protocol} worker {pid} ({})", executable.display());

        Ok(Self {
            pid,
            protocol: protocol.to_string(),
            channel: CommandChannel::with_max_payload(stdout, stdin, max_payload),
            child: Some(child),
            reaper,
            suspended: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn max_payload(&self) -> usize {
        self.channel.max_payload()
    }

    /// The descriptor a readiness loop should watch.
    pub fn readable_fd(&self) -> RawFd {
        self.channel.input().as_raw_fd()
    }

    /// Receives and handles one frame. `Ok(false)` means the worker closed
    /// its end of the channel.
    pub fn dispatch<H: FrameHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<bool, ChannelError> {
        self.channel.dispatch(handler)
    }

    /// Stops the owner from reading frames until [`Worker::resume`]. The
    /// process itself keeps running and blocks once the pipe fills.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("{} worker {} exited: {status}", self.protocol, self.pid);
                false
            }
            Some(Err(e)) => {
                warn!("failed to poll worker {}: {e}", self.pid);
                false
            }
            None => false,
        }
    }

    /// Sends SIGTERM and hands the process to the reaper. There is no
    /// shutdown handshake.
    ///
    /// A process that has already been waited for is never signalled: its
    /// pid may belong to someone else by now.
    pub fn terminate(&mut self) -> Result<(), WorkerError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!("{} worker {} already exited: {status}", self.protocol, self.pid);
            return Ok(());
        }

        debug!("terminating {} worker {}", self.protocol, self.pid);
        let result = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
        let outcome = if result == 0 {
            Ok(())
        } else {
            let err = io::Error::last_os_error();
            // Already exited; the reaper still has to wait for it.
            if err.raw_os_error() == Some(libc::ESRCH) {
                Ok(())
            } else {
                Err(WorkerError::Signal(err))
            }
        };

        self.reaper.collect(child);
        outcome
    }
}

impl FrameSender for Worker {
    fn send_frame(&mut self, command: u16, payload: &[u8]) -> Result<(), FrameError> {
        self.channel.send_frame(command, payload)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("{e}");
        }
    }
}
