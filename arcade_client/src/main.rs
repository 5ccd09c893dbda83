//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arcade_client -- [--addr 127.0.0.1:40000] [--config client.json]
//!                                 [--name Player --password secret] [--register]
//!
//! The client connects, logs in, then runs a fixed-rate loop that sends the
//! held input, pings the server and prints presentation events.
//!
//! Console commands:
//!   rooms                 - List rooms
//!   create <name> [max]   - Create and join a room
//!   join <room_id>        - Join a room
//!   spectate <room_id>    - Join a room as spectator
//!   leave                 - Leave the current room
//!   ready [off]           - Toggle ready
//!   say <message>         - Room chat
//!   keys <wasd +>         - Hold keys (space shoots, + charges); `keys` releases
//!   ping                  - Measure round trip
//!   status                - Show client status
//!   quit                  - Exit client

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use arcade_client::{
    client::{ClientState, GameClient},
    events::{ChatMessage, EntityDestroyed, GameEnded, GameStarted, Kicked, ServerDisconnect},
    input::{InputSampler, InputState},
};
use arcade_shared::{components::WeaponKind, config::EngineConfig};
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tracing::{info, warn};

struct Args {
    cfg: EngineConfig,
    password: String,
    register: bool,
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
    if let Some(name) = value(&args, "--name") {
        cfg.player_name = name;
    }
    Ok(Args {
        cfg,
        password: value(&args, "--password").unwrap_or_else(|| "password".to_string()),
        register: args.iter().any(|a| a == "--register"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args {
        cfg,
        password,
        register,
    } = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    let registered = register && client.register(&cfg.player_name, &password).await?;
    if register && !registered {
        warn!(name = %cfg.player_name, "register refused, trying login");
    }
    if !registered
        && !client
            .login(&cfg.player_name, &password, WeaponKind::Classic)
            .await?
    {
        anyhow::bail!("login refused for '{}'", cfg.player_name);
    }

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
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

    println!("Logged in. Type 'rooms', 'create <name>', 'join <id>', 'status' or 'quit'.");
    println!();

    let mut sampler = InputSampler::default();
    let mut tick = time::interval(cfg.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ping = time::interval(cfg.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                client.poll()?;
                if let ClientState::InRoom(_) = client.state() {
                    if let Some(mask) = sampler.sample() {
                        client.send_input(mask).await?;
                    }
                }
                print_events(&mut client);
            }
            _ = ping.tick() => client.ping().await?,
            line = console_rx.recv() => {
                let Some(line) = line else { break };
                let mut tokens = line.splitn(2, ' ');
                match tokens.next() {
                    Some("quit") | Some("exit") => break,
                    Some("keys") => sampler.set(InputState::from_keys(tokens.next().unwrap_or(""))),
                    _ => match client.exec_console(&line).await {
                        Ok(output) => output.iter().for_each(|l| println!("{l}")),
                        Err(e) => println!("Error: {e}"),
                    },
                }
            }
        }

        if client.state() == ClientState::Disconnected {
            println!("Disconnected from server.");
            return Ok(());
        }
    }

    client.disconnect("quit").await.ok();
    Ok(())
}

fn print_events(client: &mut GameClient) {
    let events = client.events();
    for chat in events.drain::<ChatMessage>() {
        println!("<{}> {}", chat.username, chat.message);
    }
    for start in events.drain::<GameStarted>() {
        println!("Game started in room {}", start.room_id);
    }
    for end in events.drain::<GameEnded>() {
        println!("Game over in room {}", end.room_id);
    }
    for kick in events.drain::<Kicked>() {
        println!("Kicked: {}", kick.reason);
    }
    for bye in events.drain::<ServerDisconnect>() {
        println!("Server: {}", bye.reason);
    }
    // Explosions are a renderer concern; a headless client only drops them.
    events.drain::<EntityDestroyed>();
}
