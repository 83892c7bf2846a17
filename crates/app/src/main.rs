use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use pulsedmx_core::{
    list_input_devices, AppConfig, ArtNetSink, AudioSource, ClickTrackSource, Control, ControlSurface, Effect,
    LightingError, ParameterSnapshot, ParameterStore, PatternId, Pipeline, PipelineHandle, ProgramId,
    ReaderSource, SilenceSource, SourceFactory, Telemetry, Theme,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_PARAMS_FILE: &str = "pulsedmx-params.json";
const STATUS_INTERVAL: Duration = Duration::from_secs(1);
const POLL: Duration = Duration::from_millis(100);

fn main() -> pulsedmx_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Devices => list_devices(),
        Commands::Programs => {
            list_programs();
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> pulsedmx_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    if let Some(address) = &args.daemon {
        config.output.daemon_address = address.clone();
    }
    if let Some(name) = &args.device {
        config.audio.device_name = Some(name.clone());
    }
    if args.seed.is_some() {
        config.render.seed = args.seed;
    }
    config.validate()?;

    let store = Arc::new(ParameterStore::new(ParameterSnapshot {
        light_count: config.render.default_light_count,
        ..ParameterSnapshot::default()
    }));
    if let Some(path) = args.params.as_deref().filter(|path| path.exists()) {
        if let Err(err) = store.load_json(path) {
            tracing::warn!(path = %path.display(), error = %err, "ignoring parameter file");
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %err, "could not install the interrupt handler");
    }

    let headless = args.headless || args.input == InputKind::Stdin;
    if headless && !args.headless {
        tracing::info!("stdin carries audio, running headless");
    }

    let sink = ArtNetSink::new(&config.output.daemon_address)?;
    tracing::info!(
        input = ?args.input,
        daemon = %config.output.daemon_address,
        headless,
        "starting live mode"
    );
    let source = source_factory(&args, &config);
    let handle = Pipeline::start(config, source, Box::new(sink), store)?;

    if headless {
        run_headless(&handle, &stop);
    } else {
        let params_path = args.params.unwrap_or_else(|| PathBuf::from(DEFAULT_PARAMS_FILE));
        run_console(&handle, &stop, &params_path);
    }

    handle.shutdown()
}

fn source_factory(args: &RunArgs, config: &AppConfig) -> SourceFactory {
    let (rate, size) = (config.audio.sample_rate, config.audio.block_size);
    match args.input {
        InputKind::Device => device_source(config),
        InputKind::Stdin => {
            let pace = args.pace;
            Box::new(move || {
                let source = ReaderSource::new(std::io::stdin(), rate, size);
                let source = if pace { source.paced() } else { source };
                Ok(Box::new(source) as Box<dyn AudioSource>)
            })
        }
        InputKind::Silence => Box::new(move || Ok(Box::new(SilenceSource::paced(rate, size)) as Box<dyn AudioSource>)),
        InputKind::Click => {
            let bpm = args.click_bpm;
            Box::new(move || Ok(Box::new(ClickTrackSource::new(rate, size, bpm).paced()) as Box<dyn AudioSource>))
        }
    }
}

#[cfg(feature = "device")]
fn device_source(config: &AppConfig) -> SourceFactory {
    let audio = config.audio.clone();
    Box::new(move || Ok(Box::new(pulsedmx_core::DeviceSource::open(&audio)?) as Box<dyn AudioSource>))
}

#[cfg(not(feature = "device"))]
fn device_source(_config: &AppConfig) -> SourceFactory {
    Box::new(|| {
        Err(LightingError::NoAudioSubsystem(
            "built without the `device` feature; use --input stdin or --input click".to_string(),
        ))
    })
}

fn run_headless(handle: &PipelineHandle, stop: &AtomicBool) {
    let mut next_status = Instant::now() + STATUS_INTERVAL;
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(POLL);
        if Instant::now() >= next_status {
            next_status += STATUS_INTERVAL;
            let telemetry = handle.telemetry();
            tracing::info!(
                bpm = telemetry.bpm.map(|bpm| bpm.round() as u32),
                loudness = %format!("{:.3}", telemetry.loudness),
                beats = telemetry.beat_count,
                audio = if telemetry.audio_active { "active" } else { "paused" },
                daemon = telemetry.daemon_connected,
                "status"
            );
        }
    }
    tracing::info!("interrupted, shutting down");
}

fn run_console(handle: &PipelineHandle, stop: &AtomicBool, params_path: &Path) {
    let control = handle.control();
    let lines = spawn_stdin_reader();
    println!("type `help` for commands");

    while !stop.load(Ordering::Relaxed) {
        let line = match lines.recv_timeout(POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match execute(&control, line.trim(), params_path) {
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::Quit) => break,
            Err(err) => println!("error: {err}"),
        }
    }
}

/// Reads stdin on its own thread so the console loop can still notice an
/// interrupt while waiting for input.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

enum Reply {
    Text(String),
    Quit,
}

fn execute(control: &ControlSurface, line: &str, params_path: &Path) -> pulsedmx_core::Result<Reply> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Reply::Text(String::new()));
    };
    let rest: Vec<&str> = words.collect();

    let reply = match (command, rest.as_slice()) {
        ("set", [name, value @ ..]) if !value.is_empty() => {
            control.set(name, &value.join(" "))?;
            format!("{name} <- {}", value.join(" "))
        }
        ("get", [name]) => format!("{name} = {}", control.get(name)?),
        ("status", []) => status_report(&control.telemetry()),
        ("reset", []) => {
            control.reset()?;
            "parameters reset".to_string()
        }
        ("save", []) => {
            control.save(params_path)?;
            format!("saved to {}", params_path.display())
        }
        ("save", [path]) => {
            control.save(path)?;
            format!("saved to {path}")
        }
        ("controls", []) => Control::ALL
            .iter()
            .map(|control| format!("{:<18} {}", control.name(), control.range()))
            .collect::<Vec<_>>()
            .join("\n"),
        ("help", []) => HELP.to_string(),
        ("quit" | "exit", []) => return Ok(Reply::Quit),
        _ => return Err(LightingError::msg(format!("unrecognised command `{line}`, try `help`"))),
    };
    Ok(Reply::Text(reply))
}

const HELP: &str = "\
set <control> <value>   change a control
get <control>           show a control
controls                list controls and their ranges
status                  show tempo, levels and output state
reset                   restore default parameters
save [file]             write parameters as JSON
quit                    blackout and exit";

fn status_report(telemetry: &Telemetry) -> String {
    let bpm = telemetry
        .bpm
        .map(|bpm| format!("{bpm:.1}"))
        .unwrap_or_else(|| "--".to_string());
    format!(
        "bpm {bpm}  loudness {:.3}  bass {:.2} mid {:.2} high {:.2}\n\
         beats {}  building {}  drop {}  genre {}  audio {}  overflows {}\n\
         frames sent {}  dropped {}  failures {}  daemon {}",
        telemetry.loudness,
        telemetry.bass,
        telemetry.mid,
        telemetry.high,
        telemetry.beat_count,
        telemetry.building,
        telemetry.drop,
        telemetry.genre,
        if telemetry.audio_active { "active" } else { "paused" },
        telemetry.input_overflows,
        telemetry.frames_sent,
        telemetry.frames_dropped,
        telemetry.transmit_failures,
        if telemetry.daemon_connected { "connected" } else { "disconnected" },
    )
}

fn list_devices() -> pulsedmx_core::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("no input devices found");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{marker}", device.name);
    }
    Ok(())
}

fn list_programs() {
    println!("programs: {}", ProgramId::names());
    println!("patterns: {}", PatternId::names());
    println!("effects:  {}", Effect::names());
    println!("themes:   {}", Theme::names());
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive DMX lighting controller", long_about = None)]
struct Cli {
    /// Log filter, e.g. `debug` or `pulsedmx_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen to audio and drive the lights.
    Run(RunArgs),
    /// List audio input devices.
    Devices,
    /// List programs, patterns, effects and themes.
    Programs,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Run without the interactive console, logging a status line every second.
    #[arg(long)]
    headless: bool,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parameter file loaded at startup and used by `save`.
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Where audio comes from.
    #[arg(short, long, value_enum, default_value_t = InputKind::Device)]
    input: InputKind,

    /// Input device name; the default device is used when omitted.
    #[arg(short, long)]
    device: Option<String>,

    /// Art-Net address of the lighting daemon.
    #[arg(long)]
    daemon: Option<String>,

    /// Seed for pattern randomness.
    #[arg(long)]
    seed: Option<u64>,

    /// Tempo of the `click` input.
    #[arg(long, default_value_t = 120.0)]
    click_bpm: f32,

    /// Pace `stdin` input at real time instead of reading as fast as it arrives.
    #[arg(long)]
    pace: bool,
}

/// Audio input selection.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum InputKind {
    /// Sound card capture (needs the `device` feature).
    Device,
    /// Raw little-endian f32 mono PCM on standard input.
    Stdin,
    /// Constant silence.
    Silence,
    /// Synthetic metronome.
    Click,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_options() {
        let cli = Cli::try_parse_from([
            "pulsedmx", "run", "--headless", "--input", "click", "--seed", "3", "--log-level", "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.headless);
        assert_eq!(args.input, InputKind::Click);
        assert_eq!(args.seed, Some(3));
    }

    #[test]
    fn status_report_marks_missing_tempo() {
        let report = status_report(&Telemetry::default());
        assert!(report.starts_with("bpm --"));
        assert!(report.contains("paused"));
    }
}
