use std::io::{Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tidepool_core::ViewportGeometry;

#[derive(thiserror::Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(String),
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("failed to resize pty: {0}")]
    Resize(String),
    #[error("pty io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    /// An interactive shell with the colour hints terminals expect.
    pub fn shell(program: impl Into<String>) -> Self {
        Self::new(program)
            .env("TERM", "xterm-256color")
            .env("COLORTERM", "truecolor")
    }
}

pub type PtyReader = Box<dyn Read + Send>;

/// A child process on the slave side of a pseudo-terminal.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawns `command` at `geometry`. The returned reader yields the
    /// child's output until it exits; reads block.
    pub fn spawn(command: &Command, geometry: ViewportGeometry) -> Result<(Self, PtyReader), PtyError> {
        let pair = native_pty_system()
            .openpty(pty_size(geometry))
            .map_err(|err| PtyError::Open(err.to_string()))?;

        let mut builder = CommandBuilder::new(&command.program);
        for arg in &command.args {
            builder.arg(arg);
        }
        for (key, value) in &command.env {
            builder.env(key, value);
        }
        if let Some(cwd) = &command.cwd {
            builder.cwd(cwd);
        }
        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| PtyError::Spawn {
                program: command.program.clone(),
                message: err.to_string(),
            })?;
        // The child holds its own copy of the slave; ours would keep the
        // reader from ever seeing EOF.
        drop(pair.slave);

        let master = pair.master;
        let reader = master
            .try_clone_reader()
            .map_err(|err| PtyError::Open(err.to_string()))?;
        let writer = master
            .take_writer()
            .map_err(|err| PtyError::Open(err.to_string()))?;
        let pid = child.process_id();

        let process = Self {
            master: Mutex::new(master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            pid,
        };
        Ok((process, reader))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), PtyError> {
        let mut writer = self.writer.lock();
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn resize(&self, geometry: ViewportGeometry) -> Result<(), PtyError> {
        self.master
            .lock()
            .resize(pty_size(geometry))
            .map_err(|err| PtyError::Resize(err.to_string()))
    }

    /// Asks the child to terminate.
    pub fn terminate(&self) {
        self.signal(libc::SIGTERM);
    }

    pub fn kill(&self) {
        self.signal(libc::SIGKILL);
    }

    /// Collects the exit status if the child is gone.
    pub fn reap(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(Some(_)))
    }

    fn signal(&self, signal: libc::c_int) {
        let Some(pid) = self.pid else {
            return;
        };
        // A reaped pid may already belong to someone else.
        if self.reap() {
            return;
        }
        // SAFETY: kill(2) has no memory-safety preconditions.
        let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if result != 0 {
            tracing::debug!(pid, signal, error = %std::io::Error::last_os_error(), "signal not delivered");
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if !self.reap() {
            self.kill();
            let _ = self.child.lock().wait();
        }
    }
}

fn pty_size(geometry: ViewportGeometry) -> PtySize {
    PtySize {
        rows: geometry.rows(),
        cols: geometry.cols(),
        pixel_width: 0,
        pixel_height: 0,
    }
}
