use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use stationwatch::commands::{EndOfInput, Input, HELP};
use stationwatch::config::Settings;
use stationwatch::monitor::{Command, LivenessMonitor, LogEntry, LogSink, MessageLog};
use stationwatch::mqtt::MqttConnector;
use stationwatch::notify::Notifier;

#[derive(Parser, Debug)]
#[command(
    name = "stationwatch",
    version,
    about = "Watch an MQTT status topic and alert when devices go offline"
)]
struct Cli {
    /// Broker host, e.g. 10.0.0.5
    #[arg(long)]
    host: Option<String>,

    /// Topic carrying the status payloads
    #[arg(long)]
    topic: Option<String>,

    /// Settings file, defaults to the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the log level from the settings file
    #[arg(long)]
    log_level: Option<String>,
}

/// Message log that also prints every entry as it is appended.
#[derive(Default)]
struct ConsoleLog {
    inner: MessageLog,
}

impl LogSink for ConsoleLog {
    fn append(&mut self, entry: LogEntry) {
        println!("{}", entry.render());
        self.inner.append(entry);
    }

    fn clear(&mut self) {
        if !self.inner.is_empty() {
            println!("-- log cleared --");
        }
        self.inner.clear();
    }

    fn entries(&self) -> &[LogEntry] {
        self.inner.entries()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load_or_init(&settings_path)
        .await
        .map_err(|e| eyre!("Failed to load settings: {}", e))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    setup_logging_env(&level);
    info!("Using settings from {}", settings_path.display());

    let (mut notifier, mut notifications) = Notifier::new(
        settings.notifications.permission(),
        Box::new(std::io::stderr()),
    );
    notifier.announce_permission();

    let (event_tx, event_rx) = mpsc::channel(settings.broker.channel_capacity);
    let (command_tx, command_rx) = mpsc::channel(16);

    let monitor = LivenessMonitor::new(
        MqttConnector::new(settings.broker.clone()),
        ConsoleLog::default(),
        notifier,
        settings.alerts.policy,
        event_tx,
    );

    tokio::spawn(async move {
        while let Some(alert) = notifications.recv().await {
            println!("\x07[NOTIFY] {}", alert);
        }
    });

    let ctrl_c_tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = ctrl_c_tx.send(Command::Shutdown).await;
        }
    });

    let connect_requested = cli.host.is_some() || cli.topic.is_some();
    if connect_requested {
        command_tx
            .send(Command::Connect {
                host: cli.host.clone().unwrap_or_default(),
                topic: cli.topic.clone().unwrap_or_default(),
            })
            .await
            .map_err(|e| eyre!("Failed to queue initial connect: {}", e))?;
    }

    println!("{}", HELP);
    spawn_input_reader(command_tx, EndOfInput::for_startup(connect_requested));

    monitor.run(command_rx, event_rx).await;
    info!("Bye");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: &str) {
    let parsed = Level::from_str(level).ok();

    FmtSubscriber::builder()
        .with_max_level(parsed.unwrap_or(Level::INFO))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    if parsed.is_none() {
        warn!("Unknown log level {:?}, using INFO", level);
    }
}

/// Reads commands from stdin on a dedicated thread; blocking stdin reads
/// would otherwise hold up runtime shutdown.
fn spawn_input_reader(commands: mpsc::Sender<Command>, on_eof: EndOfInput) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            };

            let input = match Input::parse(&line) {
                Ok(Some(input)) => input,
                Ok(None) => continue,
                Err(e) => {
                    println!("{}\n{}", e, HELP);
                    continue;
                }
            };
            debug!("Input: {:?}", input);

            let delivered = match input {
                Input::Connect { host, topic } => commands
                    .blocking_send(Command::Connect { host, topic })
                    .is_ok(),
                Input::Disconnect => commands.blocking_send(Command::Disconnect).is_ok(),
                Input::Status => print_status(&commands, false),
                Input::Log => print_status(&commands, true),
                Input::Help => {
                    println!("{}", HELP);
                    true
                }
                Input::Quit => {
                    let _ = commands.blocking_send(Command::Shutdown);
                    return;
                }
            };

            if !delivered {
                return;
            }
        }

        match on_eof {
            EndOfInput::Shutdown => {
                let _ = commands.blocking_send(Command::Shutdown);
            }
            EndOfInput::KeepRunning => {
                info!("Input closed, monitoring continues until interrupted")
            }
        }
    });
}

fn print_status(commands: &mpsc::Sender<Command>, with_log: bool) -> bool {
    let (reply, response) = oneshot::channel();
    if commands.blocking_send(Command::Status { reply }).is_err() {
        return false;
    }
    let Ok(status) = response.blocking_recv() else {
        return false;
    };

    if with_log {
        for entry in &status.log {
            println!("{}", entry.render());
        }
    } else {
        let target = status
            .config
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:?} ({}), {} log entries",
            status.state,
            target,
            status.log.len()
        );
    }
    true
}
