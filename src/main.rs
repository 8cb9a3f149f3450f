use allsky::{AllskyConfig, AllskyOrchestrator, CaptureMode, SnapRequest};
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// Exit code when no camera or camera SDK is available
const EXIT_NO_CAMERA: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "allsky")]
#[command(about = "Unattended all-sky camera controller")]
#[command(version)]
#[command(long_about = "Drives an all-sky camera through the day and night: adaptive \
exposure per sky phase, periodic gain 0 reference frames, and dark-frame calibrated \
JPEG output. Also builds the dark library and corrects single FIT files.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "allsky.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write daily rotated log files to this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Use the simulated camera instead of the configured driver
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture scheduler until SIGINT/SIGTERM (default)
    Run,
    /// Capture a single frame
    Snap {
        /// Exposure in milliseconds
        #[arg(short, long)]
        exposure: Option<f64>,
        /// Analog gain (0-100)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=100))]
        gain: Option<u32>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Jpg)]
        format: OutputFormat,
        /// Output file name
        #[arg(short, long)]
        name: Option<PathBuf>,
        /// Pick the exposure automatically for the current sky phase
        #[arg(short, long)]
        auto_exposure: bool,
    },
    /// Capture missing dark frames and merge masters
    Darks,
    /// Dark-correct a FIT file into a JPEG
    Correct {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the current sky phase and the next transition
    Phase,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Jpg,
    Fit,
    /// 16-bit raw mosaic
    Tiff,
}

impl From<OutputFormat> for CaptureMode {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Jpg => CaptureMode::LiveJpeg,
            OutputFormat::Fit => CaptureMode::CalibratedFit,
            OutputFormat::Tiff => CaptureMode::RawTiff,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Keep the file writer alive for the whole process
    let _guard = init_logging(&args)?;

    info!("Starting allsky v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match AllskyConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = AllskyOrchestrator::new(config)?;
    orchestrator.set_simulate(args.simulate);

    let exit_code = match execute(&mut orchestrator, args.command.unwrap_or(Command::Run)).await {
        Ok(code) => code,
        Err(e) if e.is_camera_missing() => {
            error!("No camera available: {}", e);
            eprintln!("✗ No camera detected: {}", e);
            EXIT_NO_CAMERA
        }
        Err(e) => {
            error!("Command failed: {}", e);
            return Err(e.into());
        }
    };

    info!("allsky exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

async fn execute(orchestrator: &mut AllskyOrchestrator, command: Command) -> allsky::Result<i32> {
    match command {
        Command::Run => orchestrator.run().await,
        Command::Snap {
            exposure,
            gain,
            format,
            name,
            auto_exposure,
        } => {
            let request = SnapRequest {
                exposure_us: exposure.map(|ms| (ms * 1000.0).round().max(1.0) as u64),
                gain,
                mode: format.into(),
                output: name,
                auto_exposure,
            };
            let path = orchestrator.snap(&request).await?;
            println!("{}", path.display());
            Ok(0)
        }
        Command::Darks => {
            let report = orchestrator.build_darks().await?;
            println!(
                "Temperature bucket {:?}: {} captured, {} merged, {} directories pruned",
                report.temperature_dc, report.captured, report.merged, report.pruned_dirs
            );
            if let Some(reason) = report.interrupted {
                println!("Capture interrupted: {}", reason);
            }
            Ok(0)
        }
        Command::Correct { input, output } => {
            let path = orchestrator.correct(&input, output).await?;
            println!("{}", path.display());
            Ok(0)
        }
        Command::Phase => {
            let report = orchestrator.phase_report(Utc::now());
            let tz = orchestrator.tz();
            match report.phase {
                Some(phase) => println!("Sky phase: {}", phase),
                None => println!("Sky phase: unknown"),
            }
            println!("Sun altitude: {:.2} deg", report.sun_altitude_deg);
            if let Some((when, next)) = report.next_transition {
                println!("Next: {} at {}", next, when.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z"));
            }
            Ok(0)
        }
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("allsky={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "allsky.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Allsky Configuration File");
    println!("# This is the default configuration with all available options");
    println!();
    print!("{}", toml::to_string_pretty(&AllskyConfig::default())?);
    Ok(())
}
