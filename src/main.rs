//! Hatch - category-driven sandbox containers
//!
//! This is the main CLI entry point for Hatch.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hatch::config::SandboxConfig;
use hatch::container::{
    Category, ConfigBuilder, Container, EnvironmentRequest, ExecSessionManager, ImageReference,
    LifecycleManager,
};
use hatch::runtime::{DockerClient, ExecStreams, RuntimeClient};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Hatch - sandbox containers by category
#[derive(Parser)]
#[command(name = "hatch")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Provision and operate categorized sandbox containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start an environment
    Create {
        /// Category (exec, build, bootstrap, code, service)
        #[arg(long)]
        category: Category,
        /// Unique identity, used as the container name
        #[arg(long)]
        uid: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Image to use
        #[arg(long)]
        image: String,
        /// Command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Start a container
    Start {
        /// Container ID or name
        container: String,
    },

    /// Stop and remove a container
    #[command(name = "rm")]
    Remove {
        /// Container ID or name
        container: String,
    },

    /// List containers
    #[command(name = "ps")]
    Ps {
        /// Only containers with this label set (repeatable, any matches)
        #[arg(short, long)]
        label: Vec<String>,
        /// Only show IDs
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show a container as JSON
    Inspect {
        /// Container ID or name
        container: String,
    },

    /// Run a command in a running container
    Exec {
        /// Container ID or name
        container: String,
        /// Attach stdin
        #[arg(short, long)]
        interactive: bool,
        /// Command to execute
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Run a command and print its captured output
    Run {
        /// Container ID or name
        container: String,
        /// Command to execute
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Send a signal to a container
    Kill {
        /// Container ID or name
        container: String,
        /// Signal name
        #[arg(short, long, default_value = "KILL")]
        signal: String,
    },

    /// Wait for a container to exit
    Wait {
        /// Container ID or name
        container: String,
    },

    /// Attach to a container's main process
    Attach {
        /// Container ID or name
        container: String,
    },

    /// Pull an image
    Pull {
        /// Image name
        image: String,
    },

    /// Check whether an image is present locally
    #[command(name = "image-exists")]
    ImageExists {
        /// Image name
        image: String,
    },
}

/// What a terminal resize applies to
#[derive(Clone)]
enum ResizeTarget {
    Exec(String),
    Container(String),
}

/// Puts the terminal in raw mode for as long as it lives
struct RawMode;

impl RawMode {
    fn enable() -> anyhow::Result<Self> {
        crossterm::terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Forward window size changes until `cancel` fires
fn watch_window_size(exec: ExecSessionManager, target: ResizeTarget, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut winch = match signal(SignalKind::window_change()) {
            Ok(winch) => winch,
            Err(e) => {
                warn!("Cannot watch window size: {}", e);
                return;
            }
        };

        loop {
            if let Ok((width, height)) = crossterm::terminal::size() {
                let result = match &target {
                    ResizeTarget::Exec(id) => exec.resize_exec_tty(id, height, width).await,
                    ResizeTarget::Container(id) => {
                        exec.resize_container_tty(id, height, width).await
                    }
                };
                if let Err(e) = result {
                    debug!("Resize failed: {}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                received = winch.recv() => if received.is_none() { break },
            }
        }
    });
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

/// Exit as soon as a session with stdin attached is over
///
/// The pending read on `tokio::io::stdin()` sits on a blocking thread that
/// runtime shutdown would otherwise wait on until the next keypress.
fn exit_after_attached_session(outcome: hatch::Result<i64>) -> ! {
    if let Err(e) = &outcome {
        eprintln!("Error: {}", e);
    }
    std::process::exit(session_exit_code(&outcome))
}

/// Process exit code for a finished session
fn session_exit_code(outcome: &hatch::Result<i64>) -> i32 {
    match outcome {
        Ok(code) => *code as i32,
        Err(_) => 1,
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SandboxConfig> {
    let path = path.unwrap_or_else(SandboxConfig::default_path);
    if path.exists() {
        SandboxConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        debug!("No config at {}, using defaults", path.display());
        Ok(SandboxConfig::default())
    }
}

fn print_containers(containers: &[Container], quiet: bool) {
    if quiet {
        for c in containers {
            println!("{}", c.id);
        }
        return;
    }

    println!(
        "{:<14} {:<20} {:<25} {:<12} {:<20}",
        "CONTAINER ID", "NAME", "IMAGE", "STATUS", "CREATED"
    );
    for c in containers {
        println!(
            "{:<14} {:<20} {:<25} {:<12} {:<20}",
            &c.id[..c.id.len().min(12)],
            c.short_name(),
            c.image,
            c.status.to_string(),
            c.created
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config)?;

    let client: Arc<dyn RuntimeClient> =
        Arc::new(DockerClient::connect().context("Failed to connect to the container runtime")?);
    let lifecycle = LifecycleManager::new(client.clone(), &config);
    let exec = ExecSessionManager::new(client, &config);

    match cli.command {
        Commands::Create {
            category,
            uid,
            name,
            image,
            command,
        } => {
            let builder = ConfigBuilder::new(config.resolve_app()?);

            let mut request = EnvironmentRequest::new(category, &uid, &image)?;
            if let Some(name) = name {
                request = request.name(&name);
            }
            if !command.is_empty() {
                request = request.command(command);
            }

            let container = lifecycle.provision(&builder, &request).await?;
            println!("{}", container.id);
        }

        Commands::Start { container } => {
            lifecycle.start(&container).await?;
            println!("{}", container);
        }

        Commands::Remove { container } => {
            lifecycle.remove(&container).await?;
            println!("{}", container);
        }

        Commands::Ps { label, quiet } => {
            let containers = lifecycle.list(label.as_slice()).await?;
            print_containers(&containers, quiet);
        }

        Commands::Inspect { container } => {
            let container = lifecycle.get(&container).await?;
            println!("{}", serde_json::to_string_pretty(&container)?);
        }

        Commands::Exec {
            container,
            interactive,
            command,
        } => {
            let container = lifecycle.get(&container).await?;
            let session = exec
                .create_exec(&container.id, command, interactive, true, true)
                .await?;

            let cancel = CancellationToken::new();
            let tty = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();

            let outcome = {
                let _raw = if interactive && tty {
                    watch_window_size(
                        exec.clone(),
                        ResizeTarget::Exec(session.id.clone()),
                        cancel.clone(),
                    );
                    Some(RawMode::enable()?)
                } else {
                    cancel_on_ctrl_c(cancel.clone());
                    None
                };

                let mut stdin = tokio::io::stdin();
                let mut stdout = tokio::io::stdout();
                let mut stderr = tokio::io::stderr();
                let mut streams = ExecStreams::output(&mut stdout).with_stderr(&mut stderr);
                if interactive {
                    streams = streams.with_stdin(&mut stdin);
                }

                let outcome = exec.run_exec_until(&session, streams, &cancel).await;
                cancel.cancel();
                let _ = stdout.flush().await;
                outcome
            };

            if interactive {
                exit_after_attached_session(outcome.map(|r| r.exit_code.unwrap_or(0)));
            }
            let code = outcome?.exit_code.unwrap_or(0);
            if code != 0 {
                std::process::exit(code as i32);
            }
        }

        Commands::Run { container, command } => {
            let container = lifecycle.get(&container).await?;
            let captured = exec.exec_in_container(&container.id, &command).await;

            let mut stdout = tokio::io::stdout();
            stdout.write_all(&captured.output).await?;
            stdout.flush().await?;
            captured.result?;
        }

        Commands::Kill { container, signal } => {
            exec.kill_container(&container, &signal).await?;
            println!("{}", container);
        }

        Commands::Wait { container } => {
            let code = lifecycle.wait(&container).await?;
            println!("{}", code);
        }

        Commands::Attach { container } => {
            let container = lifecycle.get(&container).await?;
            let cancel = CancellationToken::new();

            let outcome = {
                let _raw = if std::io::stdin().is_terminal() {
                    watch_window_size(
                        exec.clone(),
                        ResizeTarget::Container(container.id.clone()),
                        cancel.clone(),
                    );
                    Some(RawMode::enable()?)
                } else {
                    cancel_on_ctrl_c(cancel.clone());
                    None
                };

                let mut stdin = tokio::io::stdin();
                let mut stdout = tokio::io::stdout();
                let streams = ExecStreams::output(&mut stdout).with_stdin(&mut stdin);
                let outcome = lifecycle.attach_until(&container.id, streams, &cancel).await;
                cancel.cancel();
                let _ = stdout.flush().await;
                outcome
            };

            exit_after_attached_session(outcome.map(|()| 0));
        }

        Commands::Pull { image } => {
            let image = ImageReference::parse(&image)?;
            lifecycle.update_image(&image).await?;
            println!("{}", image);
        }

        Commands::ImageExists { image } => {
            let image = ImageReference::parse(&image)?;
            let exists = lifecycle.image_exists(&image).await;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
