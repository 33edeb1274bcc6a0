use anyhow::Result;
use bigblue::{
    configuration::AppConfig,
    direction::Direction,
    link::transport_from_config,
    logging,
    platform::TracingHaptics,
    remote::{Remote, RemoteStatus, UiEvent},
};
use clap::Parser;
use std::{io::BufRead, path::PathBuf, sync::Arc};
use tokio::sync::{mpsc, watch};
use tracing::*;

#[derive(Parser, Debug)]
#[command(
    version,
    author = "David M. Weis <dweis7@gmail.com>",
    about = "Big Blue rover remote"
)]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// connect on startup
    #[arg(long)]
    connect: bool,

    /// log as json
    #[arg(long)]
    json_logs: bool,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

enum ShellLine {
    Event(UiEvent),
    Status,
    Help,
}

fn parse_line(line: &str) -> Result<ShellLine> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let argument = words.next();
    let direction = || -> Result<Direction> {
        let argument = argument.ok_or_else(|| anyhow::anyhow!("missing direction"))?;
        Ok(argument.parse::<Direction>()?)
    };
    let line = match command {
        "press" | "p" => ShellLine::Event(UiEvent::DirectionPressStart(direction()?)),
        "release" | "r" => ShellLine::Event(UiEvent::DirectionPressEnd(direction()?)),
        "spiral" => ShellLine::Event(UiEvent::SpiralToggle),
        "speed" => ShellLine::Event(UiEvent::SpeedCycle),
        "connect" | "disconnect" => ShellLine::Event(UiEvent::ConnectToggle),
        "quit" | "exit" => ShellLine::Event(UiEvent::Shutdown),
        "status" => ShellLine::Status,
        "help" | "" => ShellLine::Help,
        other => anyhow::bail!("unknown command {:?}", other),
    };
    Ok(line)
}

const HELP: &str = "commands: connect | press <dir> | release <dir> | spiral | speed | status | quit";

async fn print_notices(mut status: watch::Receiver<RemoteStatus>) {
    let mut last_notice = None;
    while status.changed().await.is_ok() {
        let notice = status.borrow_and_update().notice.clone();
        if notice.is_some() && notice != last_notice {
            if let Some(text) = &notice {
                println!("{}", text);
            }
            last_notice = notice;
        }
    }
}

/// Stdin gets its own thread so an unanswered read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (lines_tx, lines_rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if lines_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!("Failed to read stdin: {}", err);
                    break;
                }
            }
        }
    });
    lines_rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity, args.json_logs);

    let app_config = AppConfig::load_config(&args.config)?;
    let transport = transport_from_config(&app_config);
    let remote = Remote::new(&app_config, transport, Arc::new(TracingHaptics));

    let status = remote.subscribe_status();
    tokio::spawn(print_notices(status.clone()));

    let (ui_tx, ui_rx) = mpsc::channel(32);
    let remote_task = tokio::spawn(remote.run(ui_rx));

    if args.connect {
        ui_tx.send(UiEvent::ConnectToggle).await?;
    }
    println!("{}", HELP);

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match parse_line(line.trim()) {
                    Ok(ShellLine::Event(UiEvent::Shutdown)) => break,
                    Ok(ShellLine::Event(event)) => ui_tx.send(event).await?,
                    Ok(ShellLine::Status) => {
                        println!("{}", serde_json::to_string(&*status.borrow())?);
                    }
                    Ok(ShellLine::Help) => println!("{}", HELP),
                    Err(err) => println!("{}", err),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Caught interrupt");
                break;
            }
        }
    }

    if ui_tx.send(UiEvent::Shutdown).await.is_err() {
        warn!("Remote already stopped");
    }
    remote_task.await?;
    Ok(())
}
