//! courier demo
//!
//! Starts a `Courier`, drives a few in-memory sessions through it and prints
//! the shutdown report as JSON.
//!
//! ```text
//! RUST_LOG=courier_core=debug courier --sessions 4 --messages 50
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use courier_core::app::{Courier, RegistrationTable};
use courier_core::config::{ConfigError, CourierConfig};
use courier_core::domain::{Message, Opcode};
use courier_core::error::{DispatchError, HandlerError, StartupError};
use courier_core::impls::{MemorySession, TracingEventSink};
use courier_core::ports::SessionRef;
use courier_core::typed::{Handler, RawDescriptor, Request, RequestHandler};

const ECHO: Opcode = Opcode::new(1);
const UNKNOWN: Opcode = Opcode::new(99);

/// Drive in-memory sessions through the dispatcher.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Opcode dispatch demo")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of sessions to open.
    #[arg(long, default_value_t = 4)]
    sessions: usize,

    /// Messages per session.
    #[arg(long, default_value_t = 20)]
    messages: usize,

    /// Do not attach sequencers; messages of one session may run in any order.
    #[arg(long)]
    unordered: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

/// Opcode 1: logs the payload back.
#[derive(Default)]
struct EchoHandler {
    seen: AtomicU64,
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, session: &SessionRef, message: &Message) -> Result<(), HandlerError> {
        let n = self.seen.fetch_add(1, Ordering::Relaxed);
        info!(
            session = %session.id(),
            n,
            payload = %String::from_utf8_lossy(message.payload()),
            "echo"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Greet {
    name: String,
}

impl Request for Greet {
    const OPCODE: Opcode = Opcode::new(2);
    const NAME: &'static str = "greet";
}

struct GreetHandler;

#[async_trait]
impl RequestHandler<Greet> for GreetHandler {
    async fn handle(&self, session: &SessionRef, request: Greet) -> Result<(), HandlerError> {
        if request.name.is_empty() {
            return Err(HandlerError::failed("empty name"));
        }
        info!(session = %session.id(), name = %request.name, "hello");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CourierConfig::load(path)?,
        None => CourierConfig::default(),
    };

    let table = RegistrationTable::new()
        .handler(ECHO, EchoHandler::default, || {
            RawDescriptor::new("echo").with_max_len(1024)
        })
        .route::<Greet, _>(|| GreetHandler)
        .expect_opcodes(&[ECHO, Greet::OPCODE]);
    let courier = Courier::start(table, &config, Arc::new(TracingEventSink))?;

    let sessions: Vec<SessionRef> = (0..cli.sessions)
        .map(|_| Arc::new(MemorySession::new()) as SessionRef)
        .collect();
    if !cli.unordered {
        for session in &sessions {
            courier.dispatcher().attach_sequencer(session);
        }
    }

    for i in 0..cli.messages {
        for (s, session) in sessions.iter().enumerate() {
            let message = if i % 5 == 4 {
                let name = if i % 10 == 9 { String::new() } else { format!("session {s}") };
                let body = serde_json::json!({ "name": name }).to_string();
                Message::new(Greet::OPCODE, body)
            } else {
                Message::new(ECHO, Bytes::from(format!("message {i}")))
            };
            courier.dispatcher().handle(session, message)?;
        }
    }

    // one stray frame; its session gets closed
    if let Some(session) = sessions.first() {
        courier
            .dispatcher()
            .handle(session, Message::new(UNKNOWN, Bytes::from_static(b"??")))?;
    }

    let report = courier.stop_default().await;
    if !report.graceful {
        warn!(unfinished_workers = report.unfinished_workers, "shutdown was not graceful");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
