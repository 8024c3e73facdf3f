use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tidepool_client::{
    keys::{KeyAction, PrefixCommand, PrefixDecoder},
    surface::{Surface, TerminalProbe, TerminalSurface},
    telemetry::{self, LogConfig, LogLevel},
    ClientConfig, ClientError, HttpSessionBackend, Notice, Orchestrator, ViewportProbe,
    WebSocketConnector, DEFAULT_SERVER_URL,
};
use tidepool_core::{ProjectId, SessionId, DEFAULT_SHELL_NAME};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

#[derive(Parser, Debug)]
#[command(name = "tidepool", version, about = "Switch between a project's remote shell sessions")]
struct Cli {
    /// Session backend base URL.
    #[arg(long, env = "TIDEPOOL_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    #[arg(long, env = "TIDEPOOL_PROJECT", default_value = "default")]
    project: String,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Log file used while attached (defaults to tidepool.log in the temp dir).
    #[arg(long, env = "TIDEPOOL_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the project's sessions.
    List,
    /// Create a session running the default shell or a named tool.
    Create {
        #[arg(default_value = DEFAULT_SHELL_NAME)]
        name: String,
    },
    Close { id: String },
    Clear { id: String },
    Stop { id: String },
    Kill { id: String },
    /// Attach this terminal. Ctrl-] then d/n/p/c/x/l detaches, cycles,
    /// creates, closes or clears; Ctrl-] twice sends a literal Ctrl-].
    Attach {
        id: Option<String>,
        /// Create a session running NAME and attach to it.
        #[arg(long, value_name = "NAME", conflicts_with = "id")]
        new: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let attaching = matches!(cli.command, Command::Attach { .. });
    let log_file = if attaching {
        Some(
            cli.log_file
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("tidepool.log")),
        )
    } else {
        cli.log_file.clone()
    };
    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: log_file,
    })
    .context("failed to initialise logging")?;

    let project_id = ProjectId::from(cli.project.as_str());
    let backend = HttpSessionBackend::new(&cli.server).context("invalid --server")?;
    let connector = WebSocketConnector::new(&cli.server).context("invalid --server")?;
    let mut orch = Orchestrator::new(
        project_id,
        Arc::new(backend),
        Arc::new(connector),
        Arc::new(TerminalProbe),
        &ClientConfig::from_env(),
    );

    match cli.command {
        Command::List => {
            let summary = orch.refresh().await.context("failed to list sessions")?;
            if summary.is_empty() {
                println!("no sessions in project {}", cli.project);
            }
            for line in summary.render_lines() {
                println!("{line}");
            }
        }
        Command::Create { name } => {
            let session = orch
                .create_session(&name)
                .await
                .context("failed to create session")?;
            println!("{}  {}  {}", session.id, session.display_name, session.status);
        }
        Command::Close { id } => {
            orch.close_session(&SessionId::from(id))
                .await
                .context("failed to close session")?;
        }
        Command::Clear { id } => {
            orch.clear_output(&SessionId::from(id))
                .await
                .context("failed to clear session")?;
        }
        Command::Stop { id } => {
            let session = orch
                .stop_session(&SessionId::from(id))
                .await
                .context("failed to stop session")?;
            println!("{}  {}", session.id, session.status);
        }
        Command::Kill { id } => {
            let session = orch
                .kill_session(&SessionId::from(id))
                .await
                .context("failed to kill session")?;
            println!("{}  {}", session.id, session.status);
        }
        Command::Attach { id, new } => attach(&mut orch, id, new).await?,
    }
    Ok(())
}

async fn attach(orch: &mut Orchestrator, id: Option<String>, new: Option<String>) -> Result<()> {
    let probe = TerminalProbe;
    let mut last_size = probe.measure();
    if let Some(geometry) = last_size {
        orch.observe_geometry(geometry);
    }

    orch.refresh().await.context("failed to list sessions")?;
    match (id, new) {
        (_, Some(name)) => {
            orch.launch(&name).await.context("failed to create session")?;
        }
        (Some(id), None) => {
            orch.switch_to(SessionId::from(id));
        }
        (None, None) => match orch.reported_active().cloned() {
            Some(active) => {
                orch.switch_to(active);
            }
            None => {
                orch.launch(DEFAULT_SHELL_NAME)
                    .await
                    .context("failed to create session")?;
            }
        },
    }

    eprintln!("[tidepool] attached; Ctrl-] d detaches\r");
    let mut surface = TerminalSurface::enter().context("failed to enter raw mode")?;
    let mut stdin_rx = spawn_stdin_reader();
    let mut keys = PrefixDecoder::default();
    let mut size_poll = tokio::time::interval(Duration::from_millis(200));
    size_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = orch.next_event() => {
                surface.apply(&event).context("failed to write to terminal")?;
            }
            Some(bytes) = stdin_rx.recv() => {
                for action in keys.feed(&bytes) {
                    match action {
                        KeyAction::Input(input) => {
                            orch.send_input(&input);
                        }
                        KeyAction::Command(PrefixCommand::Detach) => {
                            orch.detach();
                            drop(surface);
                            eprintln!("\r\n[tidepool] detached");
                            return Ok(());
                        }
                        KeyAction::Command(command) => {
                            if let Err(err) = run_prefix_command(orch, command).await {
                                surface
                                    .show_notice(&Notice::Failure(err.to_string()))
                                    .context("failed to write to terminal")?;
                            }
                        }
                    }
                }
            }
            _ = size_poll.tick() => {
                let size = probe.measure();
                if size != last_size {
                    last_size = size;
                    if let Some(geometry) = size {
                        tracing::debug!(target = "tidepool::local_resize", %geometry, "terminal resized");
                        orch.observe_geometry(geometry);
                    }
                }
            }
        }
    }
}

async fn run_prefix_command(orch: &mut Orchestrator, command: PrefixCommand) -> Result<(), ClientError> {
    match command {
        PrefixCommand::Next | PrefixCommand::Previous => {
            let step = if command == PrefixCommand::Next { 1 } else { -1 };
            orch.refresh().await?;
            let target = orch.summary().neighbour(orch.selected(), step).cloned();
            if let Some(target) = target {
                orch.switch_to(target);
            }
        }
        PrefixCommand::Create => {
            orch.launch(DEFAULT_SHELL_NAME).await?;
        }
        PrefixCommand::CloseCurrent => {
            if let Some(current) = orch.selected().cloned() {
                orch.close_session(&current).await?;
            }
        }
        PrefixCommand::Clear => {
            if let Some(current) = orch.selected().cloned() {
                orch.clear_output(&current).await?;
            }
        }
        PrefixCommand::Detach => orch.detach(),
    }
    Ok(())
}

/// Raw stdin bytes, read on a plain thread because the read blocks.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
