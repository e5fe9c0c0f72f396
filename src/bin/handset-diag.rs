//! Handset Engine diagnostics tool

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;

use handset_engine::{
    config::EngineConfig,
    core::{Collaborators, PhoneEngine},
    interfaces::{FsStorage, HttpFetcher, NullOutput, ReqwestFetcher, SimulatedLine},
    protocols::{
        dtmf::{generate_digit, ToneDecoder, WindowVerdict},
        media::{wav_bytes, DecodedSource},
        tones::{SampleSource, SourceStatus},
    },
    services::catalog::parse_catalog,
    utils::{paths::extension_of, system_clock, ManualClock},
};

#[derive(Parser)]
#[command(name = "handset-diag")]
#[command(about = "Handset Engine diagnostics: tone decoding, test signals, catalog and key inspection")]
#[command(version = handset_engine::VERSION)]
struct DiagCli {
    #[command(subcommand)]
    command: DiagCommands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum DiagCommands {
    /// Decode DTMF digits from a WAV file or raw 16-bit PCM
    Decode {
        file: PathBuf,
        /// Sample rate of raw PCM input
        #[arg(short, long)]
        rate: Option<u32>,
    },

    /// Write a WAV file with the given digits
    Generate {
        digits: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Tone length per digit in milliseconds
        #[arg(long, default_value = "100")]
        tone_ms: u32,
        /// Silence between digits in milliseconds
        #[arg(long, default_value = "100")]
        gap_ms: u32,
        /// Peak amplitude per tone, 0.0-1.0
        #[arg(long, default_value = "0.3")]
        amplitude: f32,
    },

    /// Parse and list a catalog document from a file or URL
    Catalog { source: String },

    /// List the keys the engine registers at startup
    Keys,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = DiagCli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default_config(),
    };
    config.validate()?;

    match &cli.command {
        DiagCommands::Decode { file, rate } => decode(&config, file, *rate, cli.verbose),
        DiagCommands::Generate {
            digits,
            output,
            tone_ms,
            gap_ms,
            amplitude,
        } => generate(&config, digits, output, *tone_ms, *gap_ms, *amplitude),
        DiagCommands::Catalog { source } => catalog(&config, source).await,
        DiagCommands::Keys => keys(config),
    }
}

/// Read a whole file as mono samples, returning them with their rate
fn load_samples(path: &Path, raw_rate: Option<u32>, default_rate: u32) -> anyhow::Result<(Vec<i16>, u32)> {
    let ext = extension_of(&path.to_string_lossy());

    if ext.as_deref() == Some("pcm") || ext.as_deref() == Some("raw") || raw_rate.is_some() {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return Ok((samples, raw_rate.unwrap_or(default_rate)));
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut source = DecodedSource::new(Box::new(file), ext.as_deref())?;
    let rate = source.sample_rate();

    let mut samples = Vec::new();
    let mut chunk = vec![0i16; 4096];
    loop {
        match source.read(&mut chunk) {
            SourceStatus::Data(n) => samples.extend_from_slice(&chunk[..n]),
            SourceStatus::Pending => continue,
            SourceStatus::Exhausted => break,
        }
    }
    Ok((samples, rate))
}

fn decode(config: &EngineConfig, path: &Path, raw_rate: Option<u32>, verbose: bool) -> anyhow::Result<()> {
    let (samples, rate) = load_samples(path, raw_rate, config.audio.sample_rate)?;
    let window_size = config.audio.window_size;
    let window_time = Duration::from_secs_f64(window_size as f64 / rate as f64);

    println!("{}", "DTMF Decode".bold().blue());
    println!(
        "  {} samples at {} Hz, {} windows of {} samples",
        samples.len(),
        rate,
        samples.len() / window_size,
        window_size
    );

    let clock = ManualClock::new();
    let mut decoder = ToneDecoder::new(config.tone.clone(), rate, Arc::new(clock.clone()));
    let mut digits = String::new();

    for (index, window) in samples.chunks_exact(window_size).enumerate() {
        clock.advance(window_time);
        let at_ms = (index as f64 * window_time.as_secs_f64() * 1000.0) as u64;

        if verbose {
            let analysis = decoder.analyze(window);
            let verdict = match &analysis.verdict {
                WindowVerdict::BelowGate => "below gate".dimmed().to_string(),
                WindowVerdict::Candidate(c) => format!("candidate {}", c.digit).green().to_string(),
                other => format!("{:?}", other).yellow().to_string(),
            };
            println!("  {:>7} ms  {:>6.1} dBFS  {}", at_ms, analysis.level_dbfs, verdict);
        }

        if let Some(digit) = decoder.process(window) {
            println!("  {:>7} ms  {} {}", at_ms, "digit".bold(), digit.to_string().green().bold());
            digits.push(digit);
        }
    }

    if digits.is_empty() {
        println!("{}", "No digits detected".yellow());
    } else {
        println!("Sequence: {}", digits.bold());
    }
    Ok(())
}

fn generate(
    config: &EngineConfig,
    digits: &str,
    output: &Path,
    tone_ms: u32,
    gap_ms: u32,
    amplitude: f32,
) -> anyhow::Result<()> {
    let rate = config.audio.sample_rate;
    let gap = vec![0i16; (rate as u64 * gap_ms as u64 / 1000) as usize];

    let mut samples = gap.clone();
    for digit in digits.chars() {
        let tone = generate_digit(digit, tone_ms, rate, amplitude.clamp(0.0, 1.0));
        if tone.is_empty() {
            bail!("'{}' is not a DTMF digit", digit);
        }
        samples.extend(tone);
        samples.extend_from_slice(&gap);
    }

    std::fs::write(output, wav_bytes(&samples, rate)).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "{} wrote {} digits ({} ms) to {}",
        "✓".green(),
        digits.len(),
        samples.len() as u64 * 1000 / rate as u64,
        output.display()
    );
    Ok(())
}

async fn catalog(config: &EngineConfig, source: &str) -> anyhow::Result<()> {
    let body = if source.starts_with("http://") || source.starts_with("https://") {
        let fetcher = ReqwestFetcher::new(&config.general.user_agent)?;
        fetcher
            .fetch(
                source,
                Duration::from_secs(config.catalog.fetch_timeout_secs),
                Some(config.catalog.max_response_bytes),
            )
            .await?
            .to_vec()
    } else {
        std::fs::read(source).with_context(|| format!("reading {}", source))?
    };

    let entries = parse_catalog(&body, config.catalog.max_entries)?;
    println!("{} ({} entries)", "Catalog".bold().blue(), entries.len());
    for entry in entries.values() {
        let ring = if entry.ring_duration_ms > 0 {
            format!(" ring {} ms", entry.ring_duration_ms)
        } else {
            String::new()
        };
        println!(
            "  {:<12} {:<9} {}{} {}",
            entry.sequence.cyan(),
            format!("{:?}", entry.entry_type).to_lowercase(),
            entry.description,
            ring,
            entry.target.dimmed()
        );
    }
    Ok(())
}

fn keys(config: EngineConfig) -> anyhow::Result<()> {
    let storage = Arc::new(FsStorage::new(&config.general.storage_root)?);
    let fetcher = Arc::new(ReqwestFetcher::new(&config.general.user_agent)?);

    let mut engine = PhoneEngine::new(
        config,
        Collaborators {
            storage,
            fetcher,
            line: Arc::new(SimulatedLine::new(false)),
            output: Box::new(NullOutput),
            clock: system_clock(),
        },
    )?;
    let cached = engine.initialize()?;

    let registry = engine.registry();
    println!("{} ({} keys, {} cached catalog entries)", "Keys".bold().blue(), registry.len(), cached);
    for key in registry.keys() {
        if let Some(entry) = registry.get(&key) {
            println!(
                "  {:<12} {:<9} {} {}",
                key.cyan(),
                entry.source.kind().to_string(),
                entry.source.location(),
                entry.description.unwrap_or_default().dimmed()
            );
        }
    }

    let pending = engine.catalog().list_download_queue();
    if !pending.is_empty() {
        println!("{} ({})", "Awaiting download".bold().yellow(), pending.len());
        for item in pending {
            println!("  {:<12} {}", item.keys().join(","), item.url);
        }
    }
    Ok(())
}
