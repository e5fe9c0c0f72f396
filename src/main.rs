//! Handset Engine main application

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::*;
use rustyline::error::ReadlineError;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use handset_engine::{
    config::{is_dial_char, EngineConfig},
    core::{BackgroundEvent, BackgroundWorker, Collaborators, EngineStatus, PhoneEngine, ResourceRegistry},
    interfaces::{
        AudioInput, AudioOutput, FsStorage, NullOutput, PcmReaderInput, PcmWriterOutput, ReqwestFetcher,
        SilenceInput, SimulatedLine, StaticNetwork,
    },
    services::CatalogDirectory,
    utils::{setup_logging, system_clock},
    Error, Result,
};

#[derive(Parser)]
#[command(name = "handset-engine")]
#[command(about = "Real-time engine for a networked analog telephone")]
#[command(version = handset_engine::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Raw 16-bit little-endian mono PCM to analyse (default: silence)
    #[arg(short, long, value_name = "FILE", global = true)]
    input: Option<PathBuf>,

    /// Where to write played PCM (default: discarded)
    #[arg(short, long, value_name = "FILE", global = true)]
    output: Option<PathBuf>,

    /// Treat the network as unreachable
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine
    Start {
        /// Start with the handset lifted
        #[arg(long)]
        off_hook: bool,
    },
    /// Start the engine with an interactive debug console
    Console,
    /// Validate configuration
    ValidateConfig,
    /// Generate default configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Requests from the console to the real-time thread
enum EngineCommand {
    Digits(String),
    Line(Option<bool>),
    Play(String),
    Stop,
    Volume(f32),
    Status(oneshot::Sender<EngineStatus>),
}

/// Shared handles the console reads directly
struct CatalogHandle {
    catalog: Arc<CatalogDirectory>,
    registry: Arc<ResourceRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(&cli)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    match &cli.command {
        Some(Commands::ValidateConfig) => return validate_configuration(&config),
        Some(Commands::GenerateConfig { output }) => return generate_default_config(output.clone()),
        _ => {}
    }

    let _log_guard = setup_logging(&config.logging)?;
    info!("Starting {} v{}", handset_engine::NAME, handset_engine::VERSION);

    match &cli.command {
        Some(Commands::Console) => run_engine(config, &cli, false, true).await,
        Some(Commands::Start { off_hook }) => run_engine(config, &cli, *off_hook, false).await,
        None => run_engine(config, &cli, false, false).await,
        Some(Commands::ValidateConfig) | Some(Commands::GenerateConfig { .. }) => Ok(()),
    }
}

fn load_configuration(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::load_from_env().unwrap_or_else(|_| EngineConfig::default_config()),
    };
    config.validate()?;
    Ok(config)
}

async fn run_engine(config: EngineConfig, cli: &Cli, off_hook: bool, console: bool) -> Result<()> {
    let storage = Arc::new(FsStorage::new(&config.general.storage_root)?);
    let fetcher = Arc::new(ReqwestFetcher::new(&config.general.user_agent)?);
    let line = Arc::new(SimulatedLine::new(off_hook));
    let network = Arc::new(StaticNetwork::new(!cli.offline));

    let output: Box<dyn AudioOutput> = match &cli.output {
        Some(path) => Box::new(PcmWriterOutput::new(BufWriter::new(File::create(path)?))),
        None => Box::new(NullOutput),
    };
    let input: Box<dyn AudioInput> = match &cli.input {
        Some(path) => Box::new(PcmReaderInput::new(BufReader::new(File::open(path)?))),
        None => Box::new(SilenceInput),
    };

    let mut engine = PhoneEngine::new(
        config.clone(),
        Collaborators {
            storage,
            fetcher,
            line,
            output,
            clock: system_clock(),
        },
    )?;
    engine.initialize()?;

    let catalog = engine.catalog();
    let registry = engine.registry();
    let mut playback_events = engine.subscribe();

    let mut worker = BackgroundWorker::new(catalog.clone(), network);
    let mut background_events = worker
        .take_event_receiver()
        .ok_or_else(|| Error::internal("Failed to get background event receiver"))?;
    worker.start();

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(AtomicBool::new(false));
    let realtime = spawn_realtime(engine, input, command_rx, shutdown.clone(), &config)?;

    let event_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = playback_events.recv() => info!("Playback: {:?}", event),
                Some(event) = background_events.recv() => handle_background_event(event),
                else => break,
            }
        }
    });

    if console {
        let handle = CatalogHandle { catalog, registry };
        let runtime = tokio::runtime::Handle::current();
        let console = tokio::task::spawn_blocking(move || run_console(command_tx, handle, runtime));
        match console.await {
            Ok(Err(e)) => error!("Console failed: {}", e),
            Err(e) => error!("Console task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    } else {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully"),
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
        drop(command_tx);
    }

    shutdown.store(true, Ordering::SeqCst);
    worker.stop().await;
    match tokio::task::spawn_blocking(move || realtime.join()).await {
        Ok(Ok(())) => {}
        _ => error!("Real-time thread panicked"),
    }
    event_task.abort();

    info!("Handset engine shutdown complete");
    Ok(())
}

fn spawn_realtime(
    mut engine: PhoneEngine,
    mut input: Box<dyn AudioInput>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    shutdown: Arc<AtomicBool>,
    config: &EngineConfig,
) -> Result<JoinHandle<()>> {
    let window_size = config.audio.window_size;
    let period = Duration::from_secs_f64(window_size as f64 / config.audio.sample_rate as f64);

    std::thread::Builder::new()
        .name("realtime".to_string())
        .spawn(move || {
            let mut window = vec![0i16; window_size];
            let mut input_done = false;
            let mut next = Instant::now();

            while !shutdown.load(Ordering::SeqCst) {
                while let Ok(command) = commands.try_recv() {
                    apply_command(&mut engine, command);
                }

                if !input_done {
                    match input.read_window(&mut window) {
                        Ok(n) if n == window_size => {}
                        Ok(n) => {
                            info!("Input exhausted, continuing with silence");
                            window[n..].fill(0);
                            input_done = true;
                        }
                        Err(e) => {
                            warn!("Input read failed: {}", e);
                            window.fill(0);
                            input_done = true;
                        }
                    }
                } else {
                    window.fill(0);
                }

                engine.process_window(&window);

                next += period;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
            info!("Real-time loop stopped");
        })
        .map_err(|e| Error::internal(format!("Failed to start real-time thread: {}", e)))
}

fn apply_command(engine: &mut PhoneEngine, command: EngineCommand) {
    match command {
        EngineCommand::Digits(digits) => {
            for digit in digits.chars() {
                if let Some(directive) = engine.inject_digit(digit) {
                    info!("'{}' -> {} ({:?})", directive.sequence, directive.key, directive.classification);
                }
            }
        }
        EngineCommand::Line(value) => engine.set_line_override(value),
        EngineCommand::Play(key) => {
            if let Err(e) = engine.playback().play_audio_key(&key, 0) {
                warn!("Cannot play '{}': {}", key, e);
            }
        }
        EngineCommand::Stop => engine.playback().stop(),
        EngineCommand::Volume(volume) => {
            if let Err(e) = engine.playback().set_volume(volume) {
                warn!("Volume not saved: {}", e);
            }
        }
        EngineCommand::Status(reply) => {
            let _ = reply.send(engine.status());
        }
    }
}

fn handle_background_event(event: BackgroundEvent) {
    match event {
        BackgroundEvent::CatalogRefreshed { entries } => info!("✓ Catalog refreshed ({} entries)", entries),
        BackgroundEvent::AudioReady { key } => info!("✓ Audio for '{}' cached", key),
        BackgroundEvent::Failed { message } => warn!("✗ {}", message),
    }
}

const CONSOLE_HELP: &str = "\
Commands:
  <digits>          dial digits (0-9 * # A-D)
  hook lift|hang|auto  force the line state or follow the signal
  state             engine status
  keys              registered audio keys
  catalog           catalog entries
  queue             pending downloads
  volume [0.0-1.0]  show or set the volume
  play <key>        play a key now
  stop              stop playback
  refresh           fetch the catalog now
  quit              exit";

fn run_console(
    commands: mpsc::UnboundedSender<EngineCommand>,
    handle: CatalogHandle,
    runtime: tokio::runtime::Handle,
) -> Result<()> {
    let mut editor =
        rustyline::DefaultEditor::new().map_err(|e| Error::internal(format!("Console unavailable: {}", e)))?;
    println!("{}", "Handset console. Type 'help' for commands.".bold());

    let send = |command: EngineCommand| {
        if commands.send(command).is_err() {
            println!("{}", "Engine is not running".red());
        }
    };

    loop {
        let line = match editor.readline("handset> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(Error::internal(format!("Console read failed: {}", e))),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let argument = words.next();

        match command {
            "help" | "?" => println!("{}", CONSOLE_HELP),
            "quit" | "exit" => break,
            "hook" => match argument {
                Some("lift") => send(EngineCommand::Line(Some(true))),
                Some("hang") => send(EngineCommand::Line(Some(false))),
                Some("auto") => send(EngineCommand::Line(None)),
                _ => println!("usage: hook lift|hang|auto"),
            },
            "state" => {
                let (tx, rx) = oneshot::channel();
                send(EngineCommand::Status(tx));
                match rx.blocking_recv() {
                    Ok(status) => print_status(&status),
                    Err(_) => println!("{}", "No status available".red()),
                }
            }
            "keys" => {
                for key in handle.registry.keys() {
                    if let Some(entry) = handle.registry.get(&key) {
                        println!(
                            "  {:<12} {:<10} {} {}",
                            key.cyan(),
                            entry.source.kind().to_string(),
                            entry.source.location(),
                            entry.description.unwrap_or_default().dimmed()
                        );
                    }
                }
            }
            "catalog" => {
                let entries = handle.catalog.entries().list();
                if entries.is_empty() {
                    println!("{}", "Catalog is empty".yellow());
                }
                for entry in entries {
                    println!(
                        "  {:<12} {:<9} {} {}",
                        entry.sequence.cyan(),
                        format!("{:?}", entry.entry_type).to_lowercase(),
                        entry.description,
                        entry.target.dimmed()
                    );
                }
            }
            "queue" => {
                let items = handle.catalog.list_download_queue();
                if items.is_empty() {
                    println!("{}", "Download queue is empty".green());
                }
                for item in items {
                    println!("  {:<12} {:?} {}", item.keys().join(",").cyan(), item.state, item.url);
                }
            }
            "volume" => match argument.map(str::parse::<f32>) {
                Some(Ok(volume)) => send(EngineCommand::Volume(volume)),
                Some(Err(_)) => println!("usage: volume 0.0-1.0"),
                None => {
                    let (tx, rx) = oneshot::channel();
                    send(EngineCommand::Status(tx));
                    if let Ok(status) = rx.blocking_recv() {
                        println!("  volume {:.2}", status.volume);
                    }
                }
            },
            "play" => match argument {
                Some(key) => send(EngineCommand::Play(key.to_string())),
                None => println!("usage: play <key>"),
            },
            "stop" => send(EngineCommand::Stop),
            "refresh" => match runtime.block_on(handle.catalog.refresh()) {
                Ok(count) => println!("{} {} entries", "✓".green(), count),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            digits if digits.chars().all(is_dial_char) => send(EngineCommand::Digits(digits.to_string())),
            other => println!("Unknown command '{}', type 'help'", other),
        }
    }
    Ok(())
}

fn print_status(status: &EngineStatus) {
    let line = if status.line_active { "off hook".green() } else { "on hook".normal() };
    let forced = if status.line_override.is_some() { " (forced)" } else { "" };
    println!("  line       {}{}", line, forced);
    println!("  dispatcher {:?} '{}'", status.dispatcher, status.buffer);
    println!(
        "  playing    {} ({} queued)",
        status.playing.as_deref().unwrap_or("-"),
        status.queued
    );
    println!("  volume     {:.2}", status.volume);
    println!(
        "  keys {}  catalog {}  downloads pending {}",
        status.registered_keys, status.catalog_entries, status.pending_downloads
    );
}

fn validate_configuration(config: &EngineConfig) -> Result<()> {
    config.validate()?;

    println!("✓ Configuration is valid");
    println!("  Device: {}", config.general.device_name);
    println!("  Storage root: {}", config.general.storage_root);
    println!("  Sample rate: {} Hz, window {} samples", config.audio.sample_rate, config.audio.window_size);
    println!("  Catalog URL: {}", config.catalog.url);
    println!("  Known numbers: {}", config.sequence.known_numbers.join(", "));
    println!("  Tones: {}", config.playback.tones.len());

    Ok(())
}

fn generate_default_config(output_path: Option<PathBuf>) -> Result<()> {
    let config = EngineConfig::default_config();
    let toml_content = toml::to_string_pretty(&config)
        .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, toml_content)?;
            println!("✓ Default configuration written to: {}", path.display());
        }
        None => println!("{}", toml_content),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_generation() {
        assert!(generate_default_config(None).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig::default_config();
        assert!(validate_configuration(&config).is_ok());
    }

    #[test]
    fn test_generated_config_round_trips_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handset.toml");
        generate_default_config(Some(path.clone())).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.audio.sample_rate, EngineConfig::default_config().audio.sample_rate);
    }
}
