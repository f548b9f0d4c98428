use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hbl_core::{
    AbortFlag, BootloaderSession, ChannelObserver, DeviceFamily, HexParser, HidSession, LogLevel,
    SerialSettings, ToolConfig, TracingObserver, UartSession, UpdateEvent, UpdateObserver,
    UpdateOrchestrator,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "HID/UART bootloader update tool", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tool configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Erase, program, verify and start a firmware image
    Flash {
        /// Firmware file (.hex, or .bin for UART)
        file: PathBuf,

        #[command(subcommand)]
        link: Link,
    },
    /// Read the HID bootloader version
    Info {
        #[arg(long, value_parser = parse_u16)]
        vid: Option<u16>,
        #[arg(long, value_parser = parse_u16)]
        pid: Option<u16>,
    },
    /// Print the flash regions of an Intel HEX file
    Inspect {
        file: PathBuf,
    },
    /// List device families from a JSON file
    Families {
        #[arg(long)]
        families: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum Link {
    /// USB HID bootloader
    Hid {
        #[arg(long, value_parser = parse_u16)]
        vid: Option<u16>,
        #[arg(long, value_parser = parse_u16)]
        pid: Option<u16>,
    },
    /// Serial bootloader
    Uart {
        /// Serial port (e.g. /dev/ttyACM0, COM3)
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        /// Device family name
        #[arg(long)]
        family: Option<String>,
        /// Device families JSON file
        #[arg(long)]
        families: Option<PathBuf>,
    },
}

/// Accept `0x4d63` as well as decimal.
fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid id '{s}': {e}"))
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) if path.exists() => ToolConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        _ => ToolConfig::default(),
    };

    match cli.command {
        Commands::Flash { file, link } => {
            let (tx, rx) = mpsc::channel();
            let observer: Arc<dyn UpdateObserver> = Arc::new(ChannelObserver::new(tx));
            let session = open_session(&mut config, link, &file, Arc::clone(&observer))?;
            flash(session, observer, rx)?;
            if let Some(path) = &cli.config {
                config.last_file = Some(file);
                config.save_to_file(path)?;
                debug!(path = %path.display(), "Configuration saved");
            }
            Ok(())
        }
        Commands::Info { vid, pid } => {
            let vid = vid.unwrap_or(config.vid);
            let pid = pid.unwrap_or(config.pid);
            let mut session =
                HidSession::open(vid, pid, Arc::new(TracingObserver), AbortFlag::new())?;
            let version = session.read_boot_info()?;
            session.disconnect()?;
            println!(
                "Bootloader {:04x}:{:04x} version {}.{}",
                vid,
                pid,
                version >> 8,
                version & 0xFF
            );
            Ok(())
        }
        Commands::Inspect { file } => inspect(&file),
        Commands::Families { families } => {
            for family in DeviceFamily::load_all(&families)? {
                println!(
                    "{:<16} app start 0x{:08X}  erase block {} bytes",
                    family.name, family.app_start_address, family.erase_block_size
                );
            }
            Ok(())
        }
    }
}

/// Open the link and load the firmware file.
fn open_session(
    config: &mut ToolConfig,
    link: Link,
    file: &Path,
    observer: Arc<dyn UpdateObserver>,
) -> Result<BootloaderSession> {
    let abort = AbortFlag::new();

    let mut session: BootloaderSession = match link {
        Link::Hid { vid, pid } => {
            let vid = vid.unwrap_or(config.vid);
            let pid = pid.unwrap_or(config.pid);
            info!(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid), "Opening HID device");
            HidSession::open(vid, pid, observer, abort)?.into()
        }
        Link::Uart {
            port,
            baud,
            family,
            families,
        } => {
            if let Some(port) = port {
                config.port = Some(port);
            }
            if let Some(baud) = baud {
                config.baud_rate = baud;
            }
            if family.is_some() {
                config.family = family;
            }
            if families.is_some() {
                config.families_path = families;
            }
            let Some(port) = config.port.clone() else {
                bail!("No serial port given (use --port)");
            };
            let family = config.resolve_family()?;
            info!(
                port = %port,
                family = %family.name,
                block = family.erase_block_size,
                "Opening serial port"
            );
            let settings = SerialSettings::new(port, config.baud_rate);
            UartSession::open(&settings, family, observer, abort)?.into()
        }
    };

    session
        .set_file(file)
        .with_context(|| format!("loading {}", file.display()))?;
    Ok(session)
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    Ok(pb)
}

/// Run the update on a worker thread and render its events until it finishes.
fn flash(
    session: BootloaderSession,
    observer: Arc<dyn UpdateObserver>,
    rx: mpsc::Receiver<UpdateEvent>,
) -> Result<()> {
    // The receiver ends when the worker drops the last observer.
    let handle = UpdateOrchestrator::new(observer).spawn(session);

    let abort = handle.abort_flag();
    ctrlc::set_handler(move || {
        abort.request();
    })?;

    let pb = progress_bar()?;
    for event in rx.iter() {
        match event {
            UpdateEvent::Progress { percent } => pb.set_position(u64::from(percent)),
            UpdateEvent::PhaseChanged { to, .. } => {
                pb.set_position(0);
                pb.set_message(to.to_string());
            }
            UpdateEvent::Message { level, text } => match level {
                LogLevel::Error | LogLevel::Warn => pb.println(text),
                _ => pb.set_message(text),
            },
            UpdateEvent::Packet { .. } => {}
            UpdateEvent::Finished { .. } => break,
        }
    }
    pb.finish_and_clear();

    let (mut session, success) = handle
        .join()
        .map_err(|_| anyhow::anyhow!("update worker panicked"))?;
    if let Err(e) = session.disconnect() {
        warn!(error = %e, "Closing the link failed");
    }
    if !success {
        bail!("Update failed ({})", session.state());
    }
    info!("Device updated and started");
    Ok(())
}

fn inspect(file: &Path) -> Result<()> {
    let hex = HexParser::new().parse_file(file)?;
    println!("{} records, {} regions", hex.records().len(), hex.regions().len());
    for region in hex.regions() {
        println!(
            "  0x{:08X}..0x{:08X}  {:>8} bytes  crc16 0x{:04X}",
            region.start_address,
            region.end_address(),
            region.length,
            region.crc16
        );
    }
    let image = hex.image();
    println!(
        "Image: 0x{:08X}..0x{:08X} ({} bytes)",
        image.base_address(),
        image.end_address(),
        image.len()
    );
    Ok(())
}
