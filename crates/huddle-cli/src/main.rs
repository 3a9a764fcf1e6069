//! Huddle terminal client.
//!
//! Runs the session runtime against an in-process simulated backend and reads
//! commands from stdin, one per line.
//!
//! # Usage
//!
//! ```bash
//! # Fresh session, nothing persisted
//! huddle --nickname Alice
//!
//! # Durable session: restarting rejoins the last room
//! huddle --nickname Alice --session-file huddle.redb
//!
//! # Deep link into a room
//! huddle --nickname Bob --room ABC123
//! ```

mod command;

use std::path::PathBuf;

use clap::Parser;
use command::{Command, HELP};
use huddle_app::{RuntimeConfig, SessionHandle, SystemEnv, spawn};
use huddle_client::{
    ChatMessage, RoomId, SessionIdentity,
    store::{MemorySessionStore, RedbSessionStore, SessionStore},
};
use huddle_harness::{SimBackend, SimConnector};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Terminal client for shared chat rooms
#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Terminal client for huddle chat rooms")]
#[command(version)]
struct Args {
    /// Nickname used when a command does not name one
    #[arg(short, long)]
    nickname: Option<String>,

    /// Room to enter on start (deep link)
    #[arg(short, long)]
    room: Option<String>,

    /// Persist the session in this redb file instead of memory
    #[arg(long)]
    session_file: Option<PathBuf>,

    /// Seed for the simulated backend's room ids
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match args.session_file.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "using durable session store");
            run(args, RedbSessionStore::open(path)?).await
        },
        None => run(args, MemorySessionStore::new()).await,
    }
}

async fn run<S: SessionStore>(args: Args, store: S) -> Result<(), BoxError> {
    let backend = SimBackend::new(args.seed);
    let deep_link = args.room.as_deref().map(RoomId::new);
    if let Some(room) = &deep_link
        && !backend.room_exists(room)
    {
        backend.seed_room(room.clone(), Vec::new());
    }

    let restoring = !store.load().unwrap_or_default().is_empty();
    let config = RuntimeConfig { deep_link: deep_link.clone(), ..RuntimeConfig::default() };
    let (handle, task) = spawn(SimConnector::new(backend), store, SystemEnv::new(), config);

    let mut out = tokio::io::stdout();
    handle.wait_ready().await?;
    if restoring || deep_link.is_some() {
        handle.wait_restored().await?;
    }

    // A deep link without a persisted nickname falls back to --nickname
    if let (Some(room), None, Some(nickname)) = (&deep_link, handle.session(), &args.nickname) {
        let result = handle.join_room(nickname.as_str(), room.clone(), None).await;
        report(&mut out, result).await?;
    }

    let view = tokio::spawn(render(handle.clone()));
    write_line(&mut out, "type /help for commands").await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let nickname = args.nickname.clone().unwrap_or_default();
        match command::parse(&line) {
            Command::Create { nickname: given } => {
                let result = handle.create_room(given.unwrap_or(nickname), None).await;
                report(&mut out, result.map(drop)).await?;
            },
            Command::Join { room, nickname: given } => {
                let room = RoomId::new(room);
                let result = handle.join_room(given.unwrap_or(nickname), room, None).await;
                report(&mut out, result).await?;
            },
            Command::Leave => report(&mut out, handle.leave_room().await).await?,
            Command::Typing(typing) => {
                report(&mut out, handle.set_typing(typing).await).await?;
            },
            Command::Who => who(&mut out, &handle).await?,
            Command::Help => write_line(&mut out, HELP).await?,
            Command::Quit => break,
            Command::Say(body) if body.trim().is_empty() => {},
            Command::Say(body) => report(&mut out, handle.send_message(body).await).await?,
            Command::Invalid(line) => {
                write_line(&mut out, &format!("unknown command: {line}")).await?;
            },
        }
    }

    handle.shutdown().await;
    view.abort();
    task.await?;
    Ok(())
}

/// Print session, message and typing changes as they arrive.
async fn render(handle: SessionHandle) {
    let mut session = handle.subscribe_session();
    let mut messages = handle.subscribe_messages();
    let mut typing = handle.subscribe_typing();
    let mut out = tokio::io::stdout();
    let mut shown: Vec<ChatMessage> = Vec::new();

    loop {
        tokio::select! {
            changed = session.changed() => {
                if changed.is_err() {
                    return;
                }
                let line = describe_session(session.borrow_and_update().as_ref());
                if write_line(&mut out, &line).await.is_err() {
                    return;
                }
            }
            changed = messages.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = messages.borrow_and_update().clone();
                // History replaced or cleared: start over
                if !current.starts_with(&shown) {
                    shown.clear();
                }
                for message in &current[shown.len()..] {
                    if write_line(&mut out, &format_message(message)).await.is_err() {
                        return;
                    }
                }
                shown = current;
            }
            changed = typing.changed() => {
                if changed.is_err() {
                    return;
                }
                let anyone = *typing.borrow_and_update();
                if anyone && write_line(&mut out, "* someone is typing").await.is_err() {
                    return;
                }
            }
        }
    }
}

fn describe_session(session: Option<&SessionIdentity>) -> String {
    match session {
        Some(session) => format!("-- {} in room {}", session.nickname, session.room_id),
        None => "-- not in a room".to_owned(),
    }
}

fn format_message(message: &ChatMessage) -> String {
    if message.is_system_message {
        format!("-- {}", message.body)
    } else {
        format!("<{}> {}", message.user_nickname, message.body)
    }
}

async fn who(out: &mut Stdout, handle: &SessionHandle) -> Result<(), BoxError> {
    let connection = if handle.is_ready() { "ready" } else { "not ready" };
    let line = match handle.session() {
        Some(session) => format!(
            "{connection}; {} in room {}{}",
            session.nickname,
            session.room_id,
            if session.is_creator { " (creator)" } else { "" }
        ),
        None if handle.is_restoring() => format!("{connection}; restoring session"),
        None => format!("{connection}; not in a room"),
    };
    write_line(out, &line).await
}

async fn report<E: std::fmt::Display>(
    out: &mut Stdout,
    result: Result<(), E>,
) -> Result<(), BoxError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => write_line(out, &format!("error: {e}")).await,
    }
}

async fn write_line(out: &mut Stdout, line: &str) -> Result<(), BoxError> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
