use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:19080";
pub const DEFAULT_SCROLLBACK_BYTES: usize = 100 * 1024;
const FALLBACK_SHELL: &str = "/bin/bash";

#[derive(Debug, Parser)]
#[command(
    name = "tidepool-server",
    author,
    version,
    about = "PTY session backend for the tidepool terminal client"
)]
pub struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "TIDEPOOL_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// Sessions start in `<workspace>/<project_id>`.
    #[arg(long, env = "TIDEPOOL_WORKSPACE_DIR", default_value = "./workspace")]
    pub workspace_dir: PathBuf,

    /// Shell spawned for every session. Defaults to `$SHELL`, then /bin/bash.
    #[arg(long, env = "TIDEPOOL_SHELL")]
    pub shell: Option<String>,

    /// Output kept per session for replay to newly attached clients.
    #[arg(long, env = "TIDEPOOL_SCROLLBACK_BYTES", default_value_t = DEFAULT_SCROLLBACK_BYTES)]
    pub scrollback_bytes: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "TIDEPOOL_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub sessions: SessionConfig,
    pub shutdown_grace: Duration,
}

/// What the session manager needs to spawn and buffer sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub workspace_dir: PathBuf,
    pub shell: String,
    pub scrollback_bytes: usize,
}

impl SessionConfig {
    pub fn new(workspace_dir: impl Into<PathBuf>, shell: impl Into<String>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            shell: shell.into(),
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
        }
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.scrollback_bytes == 0 {
            anyhow::bail!("scrollback must hold at least one byte");
        }
        let shell = cli
            .shell
            .or_else(|| std::env::var("SHELL").ok())
            .filter(|shell| !shell.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_SHELL.to_string());
        Ok(ServerConfig {
            listen_addr,
            sessions: SessionConfig {
                workspace_dir: cli.workspace_dir,
                shell,
                scrollback_bytes: cli.scrollback_bytes,
            },
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["tidepool-server"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test_timeout::timeout]
    fn explicit_flags_win() {
        let config = ServerConfig::try_from(parse(&[
            "--listen-addr",
            "0.0.0.0:9000",
            "--shell",
            "/bin/sh",
            "--scrollback-bytes",
            "4096",
            "--shutdown-grace-secs",
            "0",
        ]))
        .expect("config");
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.sessions.shell, "/bin/sh");
        assert_eq!(config.sessions.scrollback_bytes, 4096);
        assert_eq!(config.shutdown_grace, Duration::ZERO);
    }

    #[test_timeout::timeout]
    fn bad_listen_addr_is_rejected() {
        let err = ServerConfig::try_from(parse(&["--listen-addr", "not-an-addr"]))
            .expect_err("invalid address");
        assert!(err.to_string().contains("not-an-addr"));
    }

    #[test_timeout::timeout]
    fn empty_scrollback_is_rejected() {
        assert!(ServerConfig::try_from(parse(&["--scrollback-bytes", "0"])).is_err());
    }
}
