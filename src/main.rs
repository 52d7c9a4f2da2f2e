//! EEG Blower Agent CLI
//!
//! Closed-loop EEG classification driving a blower actuator.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eeg_blower_agent::{
    acquisition::{AcquisitionSession, ReplaySession, SyntheticSession},
    config::{Config, PolicyKind},
    offline,
    pipeline::Pipeline,
    runner::{Runner, StopReason},
    stats::create_shared_log_with_persistence,
    transport::{open_transport, SerialTransport},
    VERSION,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eeg-blower")]
#[command(version = VERSION)]
#[command(about = "Closed-loop EEG classification driving a blower", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Software headset generating signals in real time
    Synthetic,
    /// Real-time replay of a recorded capture CSV
    Replay,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Threshold,
    Majority,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live acquisition loop
    Run {
        /// Where samples come from
        #[arg(long, value_enum, default_value = "synthetic")]
        source: Source,

        /// Capture CSV for --source replay
        #[arg(long)]
        replay_file: Option<PathBuf>,

        /// Serial port of the actuator controller
        #[arg(long)]
        serial_port: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        serial_baud: Option<u32>,

        /// Actuator controller host; takes precedence over serial
        #[arg(long)]
        wifi_host: Option<String>,

        /// Actuator controller TCP port
        #[arg(long)]
        wifi_port: Option<u16>,

        /// Do not open any actuator link
        #[arg(long)]
        no_output: bool,

        /// Decision stabilizer policy
        #[arg(long, value_enum)]
        policy: Option<Policy>,

        /// Stop after this many ticks
        #[arg(long)]
        max_ticks: Option<u64>,
    },

    /// Classify one pasted feature row and exit
    TestFeatures {
        /// Feature values; read from stdin when omitted
        row: Option<String>,
    },

    /// Extract features from one pasted interleaved raw row, classify and exit
    TestRaw {
        /// Raw values `ch1[0] ch2[0] .. chC[0] ch1[1] ..`; read from stdin when omitted
        row: Option<String>,
    },

    /// Fit the feature standardization asset from training rows
    FitScaler {
        /// CSV of training feature rows
        #[arg(long, short)]
        input: PathBuf,

        /// Where to write the scaler JSON
        #[arg(long, short)]
        output: PathBuf,

        /// Fit on the raw values instead of log10 of them
        #[arg(long)]
        no_log: bool,
    },

    /// Show configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List serial ports
    Ports,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::config_path);

    let result = match cli.command {
        Commands::Run {
            source,
            replay_file,
            serial_port,
            serial_baud,
            wifi_host,
            wifi_port,
            no_output,
            policy,
            max_ticks,
        } => load_config(&config_path).and_then(|mut config| {
            let t = &mut config.transport;
            if serial_port.is_some() {
                t.serial_port = serial_port;
            }
            if let Some(baud) = serial_baud {
                t.serial_baud = baud;
            }
            if wifi_host.is_some() {
                t.wifi_host = wifi_host;
            }
            if let Some(port) = wifi_port {
                t.wifi_port = port;
            }
            if no_output {
                t.enabled = false;
            }
            if let Some(policy) = policy {
                config.stabilizer.policy = match policy {
                    Policy::Threshold => PolicyKind::Threshold,
                    Policy::Majority => PolicyKind::Majority,
                };
            }
            if max_ticks.is_some() {
                config.runner.max_ticks = max_ticks;
            }
            cmd_run(config, source, replay_file)
        }),
        Commands::TestFeatures { row } => cmd_test_features(&config_path, row),
        Commands::TestRaw { row } => cmd_test_raw(&config_path, row),
        Commands::FitScaler {
            input,
            output,
            no_log,
        } => cmd_fit_scaler(&config_path, &input, &output, no_log),
        Commands::Config => cmd_config(&config_path),
        Commands::InitConfig { force } => cmd_init_config(&config_path, force),
        Commands::Ports => {
            cmd_ports();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("eeg_blower_agent=info,eeg_blower=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn cmd_run(config: Config, source: Source, replay_file: Option<PathBuf>) -> Result<()> {
    config.validate().context("invalid configuration")?;

    println!("EEG Blower Agent v{VERSION}");
    println!();

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let pipeline = Pipeline::from_config(&config).context("building pipeline")?;

    let dsp = &config.dsp;
    let session: Box<dyn AcquisitionSession> = match source {
        Source::Synthetic => Box::new(SyntheticSession::new(dsp.sample_rate_hz, dsp.channels)),
        Source::Replay => {
            let Some(path) = replay_file else {
                bail!("--source replay needs --replay-file");
            };
            Box::new(ReplaySession::new(path, dsp.sample_rate_hz, dsp.channels))
        }
    };

    println!("Starting acquisition...");
    println!(
        "  Window: {} samples ({:.2}s) @ {} Hz, {} channels",
        dsp.window_samples,
        dsp.window_duration().as_secs_f64(),
        dsp.sample_rate_hz,
        dsp.channels
    );
    println!("  Stride: {}ms", config.runner.stride.as_millis());
    println!(
        "  Policy: {}",
        match config.stabilizer.policy {
            PolicyKind::Threshold => "threshold",
            PolicyKind::Majority => "majority",
        }
    );

    let link = open_transport(&config.transport);
    println!("  Output: {}", link.describe());

    let stats = create_shared_log_with_persistence(config.data_path.join("session_stats.json"));
    println!("  Run ID: {}", stats.run_id());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc_handler(shutdown.clone())?;

    let mut runner = Runner::new(config.runner.clone(), session, pipeline, link, stats.clone());
    let result = runner.run(&shutdown);
    drop(runner);

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save session stats: {e}");
    }

    println!();
    println!("{}", stats.summary());

    match result? {
        StopReason::Interrupted => println!("Stopped by user."),
        StopReason::MaxTicks => println!("Reached tick limit."),
    }
    Ok(())
}

fn read_row(row: Option<String>) -> Result<String> {
    match row {
        Some(row) => Ok(row),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading row from stdin")?;
            Ok(buf)
        }
    }
}

fn cmd_test_features(config_path: &Path, row: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let text = read_row(row)?;
    let mut pipeline = Pipeline::from_config(&config).context("building pipeline")?;

    let report = offline::test_features(&mut pipeline, &text)?;
    println!("Feature test");
    println!("============");
    println!("{report}");
    Ok(())
}

fn cmd_test_raw(config_path: &Path, row: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let text = read_row(row)?;
    let mut pipeline = Pipeline::from_config(&config).context("building pipeline")?;

    let report = offline::test_raw(&mut pipeline, &text)?;
    println!("Raw window test");
    println!("===============");
    println!("{report}");
    Ok(())
}

fn cmd_fit_scaler(config_path: &Path, input: &Path, output: &Path, no_log: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let eps = (!no_log).then_some(config.dsp.log_epsilon);

    let scaler = offline::fit_scaler(input, output, eps)
        .with_context(|| format!("fitting scaler from {}", input.display()))?;

    println!(
        "Scaler saved: {} features -> {}",
        scaler.len(),
        output.display()
    );
    let preview = scaler.len().min(3);
    println!("  mean[0..{preview}] = {:?}", &scaler.mean()[..preview]);
    println!("  std[0..{preview}]  = {:?}", &scaler.std()[..preview]);
    Ok(())
}

fn cmd_config(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", config_path);
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    if let Err(e) = config.validate() {
        println!();
        println!("Warning: {e}");
    }
    Ok(())
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    Config::default().save_to(config_path)?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}

fn cmd_ports() {
    let ports = SerialTransport::list_ports();
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{port}");
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
