//! Courier terminal client.
//!
//! Connects to the marketplace messaging endpoint, streams direct messages
//! and sends from stdin. Doubles as a debugging tool for the live channel.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use courier::{ChatClient, ConnectionState, SendError, Settings, UserId};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Courier - terminal client for marketplace direct messages"
)]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the default config to --config PATH and exit
    #[arg(long, requires = "config")]
    init_config: bool,

    /// Override the messaging endpoint URL
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Bearer credential for the session
    #[arg(long, env = "COURIER_TOKEN", hide_env_values = true, default_value = "")]
    token: String,

    /// Your own user id
    #[arg(long = "user-id", default_value_t = 0)]
    user_id: UserId,

    /// Correspondent to open the conversation with
    #[arg(long, value_name = "USER_ID")]
    to: Option<UserId>,

    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Reduce output to only errors
    #[arg(short, long)]
    quiet: bool,

    /// Output machine readable JSON logs
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(io::stderr(), "{err:?}");
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.init_config {
        let path = cli.config.as_deref().expect("clap enforces --config");
        std::fs::write(path, Settings::default_toml())
            .with_context(|| format!("writing config file to {}", path.display()))?;
        println!("wrote default config to {}", path.display());
        return Ok(());
    }

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(server) = cli.server.clone() {
        settings.chat.ws_url = server;
    }
    if cli.token.is_empty() {
        anyhow::bail!("no credential: pass --token or set COURIER_TOKEN");
    }
    if cli.user_id == 0 {
        anyhow::bail!("--user-id is required");
    }

    run(cli, settings)
}

#[tokio::main]
async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let client = ChatClient::connect(&settings, &cli.token, cli.user_id);
    let mut view = client.conversation_view();
    if let Some(to) = cli.to {
        view.select_correspondent(to);
        println!("conversation with user#{to}");
    }

    spawn_state_printer(&client);
    spawn_message_printer(&client);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("commands: /to <user-id>, /who, /quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("/to ") {
            match rest.trim().parse::<UserId>() {
                Ok(id) => {
                    view.select_correspondent(id);
                    println!("conversation with user#{id}");
                }
                Err(_) => println!("usage: /to <user-id>"),
            }
        } else if line == "/who" {
            print_who(&client, &view).await;
        } else if line == "/quit" {
            break;
        } else {
            match view.send_to_active(line) {
                Ok(()) => {}
                Err(SendError::NoCorrespondent) => println!("select someone first: /to <user-id>"),
                Err(SendError::NotConnected) => println!("offline - reconnecting, try again"),
                Err(err) => println!("not sent: {err}"),
            }
        }
    }

    client.close();
    Ok(())
}

fn spawn_state_printer(client: &ChatClient) {
    let mut state_rx = client.watch_connection_state();
    tokio::spawn(async move {
        let mut last = *state_rx.borrow();
        loop {
            match last {
                ConnectionState::Open => println!("[connected]"),
                ConnectionState::Closed => println!("[offline - retrying]"),
                ConnectionState::Connecting => {}
            }
            if state_rx.changed().await.is_err() {
                break;
            }
            last = *state_rx.borrow();
        }
    });
}

fn spawn_message_printer(client: &ChatClient) {
    let mut events = client.subscribe();
    let directory = client.directory();
    let self_id = client.self_id();
    tokio::spawn(async move {
        loop {
            let message = match events.recv().await {
                Ok(message) => message,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "message printer lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let sender = if message.sender_id == self_id {
                "you".to_string()
            } else {
                match directory.resolve(message.sender_id).await {
                    Ok(profile) => profile.username,
                    // Placeholder until the directory settles or on failure.
                    Err(_) => format!("user#{}", message.sender_id),
                }
            };
            let stamp = message.sent_at.with_timezone(&chrono::Local).format("%H:%M");
            println!("[{stamp}] {sender}: {}", message.content);
        }
    });
}

async fn print_who(client: &ChatClient, view: &courier::ConversationView) {
    println!("state: {}", client.connection_state());
    match view.active_correspondent() {
        Some(id) => match client.directory().peek(id) {
            Some(profile) => println!("talking to: {} (user#{id})", profile.username),
            None => println!("talking to: user#{id}"),
        },
        None => println!("no conversation selected"),
    }
    let store = client.store();
    let partners = store.read().await.correspondents(client.self_id());
    if !partners.is_empty() {
        let list: Vec<String> = partners.iter().map(|id| format!("user#{id}")).collect();
        println!("recent: {}", list.join(", "));
    }
}

fn init_logging(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if cli.quiet {
        log::set_max_level(log::LevelFilter::Off);
        return;
    }

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("courier={level}")));

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init()
        .ok();
}
