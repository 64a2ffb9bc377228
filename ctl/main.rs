#![forbid(unsafe_code)]

//! `agent-fleet-ctl`: command-line operator for the `agent-fleet`
//! control channel.
//!
//! Connects over WebSocket with the shared password, sends one command and
//! prints the log stream until the reply arrives or the wait expires.

use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use agent_fleet::control::ServerEvent;
use agent_fleet::models::telemetry::strip_color_tokens;

#[derive(Debug, Parser)]
#[command(
    name = "agent-fleet-ctl",
    about = "Operator CLI for the agent-fleet control channel",
    version,
    long_about = None
)]
struct Cli {
    /// Control channel URL.
    #[arg(long, default_value = "ws://127.0.0.1:25565/")]
    url: String,

    /// Control password; falls back to `FLEET_CONTROL_PASSWORD`.
    #[arg(long)]
    password: Option<String>,

    /// Address a single agent on a shared listener.
    #[arg(long)]
    agent: Option<String>,

    /// Seconds to keep printing server events after sending.
    #[arg(long, default_value_t = 2)]
    wait: u64,

    /// Keep printing server events until the connection closes.
    #[arg(long)]
    follow: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe liveness; prints the server timestamp.
    Ping,

    /// Start the agent session.
    Start {
        /// Eat automatically when hungry.
        #[arg(long)]
        auto_gap: bool,
        /// Keep a defensive item equipped.
        #[arg(long)]
        auto_totem: bool,
        /// Accept teleport requests from this player (repeatable).
        #[arg(long = "auto-tpa")]
        auto_tpa: Vec<String>,
    },

    /// Send a chat line.
    Chat {
        /// Chat text.
        text: String,
    },

    /// Navigate to a block position.
    Goto {
        /// X coordinate.
        #[arg(allow_negative_numbers = true)]
        x: f64,
        /// Y coordinate.
        #[arg(allow_negative_numbers = true)]
        y: f64,
        /// Z coordinate.
        #[arg(allow_negative_numbers = true)]
        z: f64,
    },

    /// Eat now.
    Eat,

    /// Close every operator connection and stop the fleet.
    Exit,
}

impl Command {
    fn to_request(&self, agent: Option<&str>) -> serde_json::Value {
        let mut request = match self {
            Self::Ping => serde_json::json!({ "type": "ping" }),
            Self::Start {
                auto_gap,
                auto_totem,
                auto_tpa,
            } => serde_json::json!({
                "type": "start",
                "autoGap": auto_gap,
                "autoTotem": auto_totem,
                "autoTpa": auto_tpa,
            }),
            Self::Chat { text } => serde_json::json!({ "type": "chat", "text": text }),
            Self::Goto { x, y, z } => serde_json::json!({ "type": "goto", "pos": [x, y, z] }),
            Self::Eat => serde_json::json!({ "type": "eat" }),
            Self::Exit => serde_json::json!({ "type": "exit" }),
        };
        if let Some(agent) = agent {
            request["agent"] = serde_json::Value::String(agent.to_owned());
        }
        request
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Cli::parse();

    let Some(password) = args
        .password
        .clone()
        .or_else(|| std::env::var("FLEET_CONTROL_PASSWORD").ok())
    else {
        eprintln!("Error: no password given (use --password or FLEET_CONTROL_PASSWORD)");
        std::process::exit(2);
    };

    if let Err(err) = run(&args, &password).await {
        eprintln!("Error: {err}");
        eprintln!("Is agent-fleet listening at '{}'?", args.url);
        std::process::exit(1);
    }
}

async fn run(args: &Cli, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    let separator = if args.url.contains('?') { '&' } else { '?' };
    let url = format!(
        "{}{separator}password={}",
        args.url,
        urlencoding::encode(password)
    );
    let (mut socket, _) = connect_async(url.as_str()).await?;

    let request = args.command.to_request(args.agent.as_deref());
    socket.send(Message::Text(request.to_string())).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.wait));
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            () = &mut deadline, if !args.follow => break,
            frame = socket.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::Log { message }) => println!("{}", strip_color_tokens(&message)),
                Ok(ServerEvent::Pong { timestamp }) => {
                    println!("pong {timestamp}");
                    if matches!(args.command, Command::Ping) {
                        break;
                    }
                }
                Err(_) => println!("{text}"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }

    let _ = socket.close(None).await;
    Ok(())
}
