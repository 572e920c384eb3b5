//! `pa-client`: operator console and receiver display for the relay.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pa_client::config::{parse_relay_url, ClientConfig};
use pa_client::preferences::resolve_languages;
use pa_client::{
    BroadcastOutcome, DemoFallback, HistoryCache, NoFallback, OfflineFallback, Session,
    SessionConfig, SessionNotice, Storage,
};
use pa_shared::{Announcement, Priority};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pa-client")]
#[command(about = "Broadcast and receive public-address announcements", long_about = None)]
#[command(version)]
struct Cli {
    /// Relay WebSocket URL (overrides PA_RELAY_URL)
    #[arg(long, global = true)]
    relay_url: Option<String>,

    /// Simulate a connection when the relay is unreachable (overrides PA_DEMO_MODE)
    #[arg(long, global = true)]
    demo: bool,

    /// Directory for history and the last announcement
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read announcements from stdin, one per line, and broadcast them
    ///
    /// Lines starting with a slash are commands: /retry, /count, /status, /quit.
    Operator {
        /// normal, warning or emergency
        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// Comma-separated language codes (default: last selection, or en)
        #[arg(short, long = "lang", value_delimiter = ',')]
        languages: Option<Vec<String>>,
    },

    /// Print announcements as they arrive
    Receiver,

    /// Show the most recent broadcasts from this machine
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is for announcements; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pa_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.relay_url {
        config.relay_url = parse_relay_url(url)?;
    }
    config.demo_mode |= cli.demo;

    let storage = match cli.data_dir {
        Some(dir) => Storage::new(dir),
        None => Storage::default_location()?,
    };
    let fallback: Box<dyn OfflineFallback> = if config.demo_mode {
        Box::new(DemoFallback)
    } else {
        Box::new(NoFallback)
    };

    match cli.command {
        Commands::Operator {
            priority,
            languages,
        } => run_operator(config, storage, fallback, priority, languages).await,
        Commands::Receiver => run_receiver(config, storage, fallback).await,
        Commands::History => show_history(&storage),
    }
}

async fn run_operator(
    config: ClientConfig,
    storage: Storage,
    fallback: Box<dyn OfflineFallback>,
    priority: Priority,
    languages: Option<Vec<String>>,
) -> Result<()> {
    let languages = resolve_languages(&storage, languages);
    let mut history = HistoryCache::load(&storage).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "starting with empty history");
        HistoryCache::new()
    });

    let session = Session::new(SessionConfig::operator(config.relay_url), fallback);
    let printer = spawn_notice_printer(session.subscribe_notices());
    session.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/retry" => session.retry_connection(),
            "/count" => session.request_clients_count(),
            "/status" => {
                let status = session.status();
                println!(
                    "{:?} clients={} attempts={}{}",
                    status.state,
                    status.connected_clients,
                    status.reconnect_attempts,
                    if status.simulated { " (simulated)" } else { "" }
                );
            }
            text => {
                let announcement = match Announcement::new(text, priority, languages.clone()) {
                    Ok(announcement) => announcement,
                    Err(e) => {
                        eprintln!("not sent: {}", e);
                        continue;
                    }
                };

                history.record(announcement.clone());
                if let Err(e) = history.save(&storage) {
                    tracing::warn!(error = %e, "failed to save history");
                }

                match session.broadcast(announcement).await? {
                    BroadcastOutcome::Sent => {}
                    BroadcastOutcome::Offline => {
                        eprintln!("relay offline, announcement kept in history only")
                    }
                }
            }
        }
    }

    session.shutdown().await;
    printer.abort();
    Ok(())
}

async fn run_receiver(
    config: ClientConfig,
    storage: Storage,
    fallback: Box<dyn OfflineFallback>,
) -> Result<()> {
    let mut session = Session::new(
        SessionConfig::receiver(config.relay_url)
            .with_storage(storage)
            .with_feed(),
        fallback,
    );
    if let Some(last) = session.last_announcement() {
        println!("last: {}", format_announcement(&last));
    }

    let mut feed = session
        .take_announcements()
        .context("announcement feed already taken")?;
    let printer = spawn_notice_printer(session.subscribe_notices());
    session.connect();

    loop {
        tokio::select! {
            Some(announcement) = feed.recv() => println!("{}", format_announcement(&announcement)),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    printer.abort();
    Ok(())
}

fn show_history(storage: &Storage) -> Result<()> {
    let history = HistoryCache::load(storage).context("failed to read history")?;
    if history.is_empty() {
        println!("No broadcasts yet");
    }
    for announcement in history.entries() {
        println!("{}", format_announcement(announcement));
    }
    Ok(())
}

fn format_announcement(announcement: &Announcement) -> String {
    let time = chrono::DateTime::from_timestamp_millis(announcement.timestamp())
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{} [{}] ({}) {}",
        time,
        announcement.priority().label(),
        announcement.languages().join(","),
        announcement.preview(50)
    )
}

fn spawn_notice_printer(
    mut notices: broadcast::Receiver<SessionNotice>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => eprintln!("* {}", describe(&notice)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "notice printer fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe(notice: &SessionNotice) -> String {
    match notice {
        SessionNotice::Connected => "connected to relay".to_string(),
        SessionNotice::Disconnected { reason } => format!("disconnected ({})", reason),
        SessionNotice::ConnectError { error } => format!("connection failed: {}", error),
        SessionNotice::ReconnectAttempt(n) => format!("reconnecting, attempt {}", n),
        SessionNotice::ReconnectFailed => "could not reach relay, type /retry".to_string(),
        SessionNotice::Simulated { clients } => {
            format!("demo mode, simulating {} clients", clients)
        }
        SessionNotice::ClientsCount(n) => format!("{} clients connected", n),
        SessionNotice::BroadcastAcknowledged(receipt) => {
            format!("delivered to {} clients", receipt.clients)
        }
        SessionNotice::BroadcastFailed { message } => format!("relay rejected: {}", message),
    }
}
