//! `kanban`: command-line front end for the task board.
//!
//! Drives the session, store, sync and board components against either the
//! local data directory or a remote backend. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/kanban/config.toml`).
//!
//! ```bash
//! # Local mode
//! cargo run --bin kanban -- login 1
//! cargo run --bin kanban -- add Write report
//! cargo run --bin kanban -- list
//!
//! # Remote mode against a running kanban-backend
//! cargo run --bin kanban -- --mode remote --backend-url ws://127.0.0.1:9000/ws watch
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use kanban::backend::BackendError;
use kanban::backend::ws::WsBackend;
use kanban::config::{CliArgs, ClientConfig, ConfigError, StorageMode};
use kanban::persistence::TaskStore;
use kanban::persistence::local::LocalTaskStore;
use kanban::persistence::remote::RemoteTaskStore;
use kanban::session::{IdentityProvider, LocalIdentity, RemoteIdentity, SessionError};
use kanban::storage::{FileStorage, StorageError};
use kanban::sync::SyncEngine;
use kanban::view;
use kanban_proto::task::TaskId;
use kanban_proto::user::UserId;

#[derive(Parser, Debug)]
#[command(version, about = "Kanban task board with local and realtime-synced storage")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Account(AccountCommand),

    #[command(flatten)]
    Board(BoardCommand),
}

/// Commands that manage the session.
#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// List known users.
    Users,
    /// Create a user and log in as them.
    Register {
        /// Display name.
        name: String,
        /// Email address; must be unique.
        email: String,
    },
    /// Log in as an existing user.
    Login {
        /// User id, as shown by `users`.
        user_id: String,
    },
    /// End the current session.
    Logout,
    /// Show the logged-in user.
    Whoami,
}

/// Commands that operate on the logged-in user's board.
#[derive(Subcommand, Debug)]
enum BoardCommand {
    /// Show the board.
    List,
    /// Add a task.
    Add {
        /// Task text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Flip a task between pending and completed.
    Toggle {
        /// Task id.
        id: u64,
    },
    /// Delete a task and its comments.
    Delete {
        /// Task id.
        id: u64,
    },
    /// Comment on a task.
    Comment {
        /// Task id.
        id: u64,
        /// Comment text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Move a task to the position of another.
    Move {
        /// Task to move.
        id: u64,
        /// Task whose position it takes.
        over: u64,
    },
    /// Show the board and redraw it on every change until interrupted.
    Watch,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("not logged in; run `kanban users` then `kanban login <user-id>`")]
    NotLoggedIn,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file so stdout carries only board output.
    let _log_guard = init_logging(&cli.args.log_level, cli.args.log_file.as_deref());

    tracing::info!(mode = ?config.mode, data_dir = %config.data_dir.display(), "kanban starting");

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("kanban.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Wires the storage variant selected by `config` and runs `command`.
async fn run(config: &ClientConfig, command: Command) -> Result<(), AppError> {
    let kv = Arc::new(FileStorage::open(config.data_dir.clone())?);

    match config.mode {
        StorageMode::Local => {
            let identity = LocalIdentity::new(Arc::clone(&kv));
            let store = LocalTaskStore::new(kv);
            dispatch(&identity, store, config, command).await
        }
        StorageMode::Remote => {
            let url = config
                .backend_url
                .as_ref()
                .ok_or(ConfigError::MissingBackendUrl)?;
            let backend = Arc::new(WsBackend::connect(url.as_str(), config.ws_options()).await?);
            let identity = RemoteIdentity::new(Arc::clone(&backend), kv);
            let store = RemoteTaskStore::new(backend);
            dispatch(&identity, store, config, command).await
        }
    }
}

async fn dispatch<I, S>(
    identity: &I,
    store: S,
    config: &ClientConfig,
    command: Command,
) -> Result<(), AppError>
where
    I: IdentityProvider,
    S: TaskStore + 'static,
{
    match command {
        Command::Account(command) => account(identity, command).await,
        Command::Board(command) => {
            let session = identity.restore().await?.ok_or(AppError::NotLoggedIn)?;
            board(SyncEngine::new(store, session), config, command).await
        }
    }
}

async fn account<I: IdentityProvider>(identity: &I, command: AccountCommand) -> Result<(), AppError> {
    match command {
        AccountCommand::Users => {
            let current = identity.restore().await?;
            let users = identity.users().await;
            print!(
                "{}",
                view::render_users(&users, current.as_ref().map(|s| &s.user))
            );
        }
        AccountCommand::Register { name, email } => {
            let session = identity.register(&name, &email).await?;
            println!(
                "registered and logged in as {} (id {})",
                session.user.name, session.user.id
            );
        }
        AccountCommand::Login { user_id } => {
            let session = identity.login(&UserId::new(user_id)).await?;
            println!("logged in as {}", session.user.name);
        }
        AccountCommand::Logout => {
            identity.logout().await?;
            println!("logged out");
        }
        AccountCommand::Whoami => match identity.restore().await? {
            Some(session) => println!(
                "{} <{}> (id {})",
                session.user.name, session.user.email, session.user.id
            ),
            None => println!("not logged in"),
        },
    }
    Ok(())
}

async fn board<S: TaskStore + 'static>(
    engine: SyncEngine<S>,
    config: &ClientConfig,
    command: BoardCommand,
) -> Result<(), AppError> {
    let format = config.timestamp_format.as_str();

    match command {
        BoardCommand::List => {}
        BoardCommand::Add { text } => {
            if engine.create(&text.join(" ")).await.is_none() {
                println!("nothing added");
            }
        }
        BoardCommand::Toggle { id } => {
            if !engine.toggle(TaskId::new(id)).await {
                println!("no task #{id}");
            }
        }
        BoardCommand::Delete { id } => {
            if !engine.delete(TaskId::new(id)).await {
                println!("no task #{id}");
            }
        }
        BoardCommand::Comment { id, text } => {
            if engine
                .add_comment(TaskId::new(id), &text.join(" "))
                .await
                .is_none()
            {
                println!("no comment added");
            }
        }
        BoardCommand::Move { id, over } => {
            engine.reload().await;
            engine.drag_start(TaskId::new(id));
            if !engine.drag_end(Some(TaskId::new(over))).await {
                println!("order unchanged");
            }
        }
        BoardCommand::Watch => {
            watch(&engine, format).await;
            return Ok(());
        }
    }

    engine.reload().await;
    print!("{}", view::render(&engine.board(), format));
    Ok(())
}

/// Redraws the board after every change until ctrl-c.
async fn watch<S: TaskStore + 'static>(engine: &SyncEngine<S>, format: &str) {
    let mut updates = engine.subscribe_updates();
    let handle = engine.start().await;
    if !handle.is_live() {
        println!("(no change feed in this mode; showing a snapshot)");
    }
    updates.borrow_and_update();
    print!("{}", view::render(&engine.board(), format));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("---");
                print!("{}", view::render(&engine.board(), format));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.close();
    tracing::info!("watch ended");
}
