//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arcade_server -- [--addr 127.0.0.1:40000] [--tick-hz 60] [--workers 4]
//!                                 [--config server.json] [--level level.json]
//!                                 [--name admin --password secret]
//!
//! `--name`/`--password` seed one account so a fresh server is usable
//! without a register round-trip.
//!
//! Console commands:
//!   status                       - Show server status
//!   rooms                        - List rooms
//!   kick <session_id> [reason]   - Kick a session from its room
//!   debug <room_id> on|off       - Toggle room debug mode
//!   quit                         - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use arcade_server::{auth::InMemoryAccounts, GameServer};
use arcade_shared::{config::EngineConfig, templates::LevelDefinition};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Default)]
struct Args {
    cfg: EngineConfig,
    level: Option<String>,
    account: Option<(String, String)>,
}

fn value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match value(&args, "--config") {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
            EngineConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        None => EngineConfig::default(),
    };
    if let Some(addr) = value(&args, "--addr") {
        cfg.server_addr = addr;
    }
    if let Some(hz) = value(&args, "--tick-hz") {
        cfg.tick_hz = hz.parse().context("--tick-hz")?;
    }
    if let Some(workers) = value(&args, "--workers") {
        cfg.worker_threads = workers.parse().context("--workers")?;
    }
    let account = value(&args, "--name").zip(value(&args, "--password"));

    Ok(Args {
        cfg,
        level: value(&args, "--level"),
        account,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.cfg.worker_threads.max(1))
        .enable_all()
        .build()
        .context("build runtime")?
        .block_on(serve(args))
}

async fn serve(args: Args) -> anyhow::Result<()> {
    let Args { cfg, level, account } = args;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        workers = cfg.worker_threads,
        "Starting server"
    );

    let accounts = match &account {
        Some((name, password)) => {
            InMemoryAccounts::with_accounts([(name.as_str(), password.as_str())])
        }
        None => InMemoryAccounts::new(),
    };
    let mut server = GameServer::bind(cfg, Arc::new(accounts))
        .await
        .context("create server")?;
    if let Some(path) = level {
        let text = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
        let level = LevelDefinition::from_json_str(&text).with_context(|| format!("parse {path}"))?;
        info!(level_id = level.id, name = %level.name, "Level loaded");
        server.add_level(level);
    }
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'rooms' to list rooms, 'quit' to exit.");
    println!();

    server.run().await
}
