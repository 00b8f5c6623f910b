//! tula-io - scale reader and weight hub daemon
//!
//! ## Modes
//!
//! - **server** (default): reads the scale on the configured serial port (or
//!   the simulated scale) and serves readings to viewers over TCP
//! - **client**: joins a server hub and shows its readings
//!
//! Both modes print each reading with the net weight of the configured tare.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tula_io::config::{Config, HubMode};
use tula_io::error::{Error, Result};
use tula_io::hub::{
    ClientHub, CredentialVerifier, OpenAccess, PasswordVerifier, ServerHub, WeightSource,
};
use tula_io::tare::{self, NetMode, TareConfiguration};
use tula_io::transport::{Connector, SerialConnector, SimulatedConnector};
use tula_io::{ReadingStream, ScaleFormat, VersionedReading};

/// How often the display loop checks for shutdown
const DISPLAY_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "tula-io", version, about = "Scale reader and weight hub")]
struct Args {
    /// Configuration file (defaults apply when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override hub mode
    #[arg(short, long, value_enum)]
    mode: Option<HubMode>,

    /// Override serial port
    #[arg(short, long)]
    port: Option<String>,

    /// Override server address (client mode)
    #[arg(short, long)]
    server: Option<String>,

    /// Override scale frame format
    #[arg(short, long, value_enum)]
    format: Option<ScaleFormat>,

    /// Use the simulated scale
    #[arg(long)]
    simulate: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(mode) = args.mode {
        config.hub.mode = mode;
    }
    if let Some(port) = &args.port {
        config.scale.port = port.clone();
    }
    if let Some(server) = &args.server {
        config.hub.server_address = server.clone();
    }
    if let Some(format) = args.format {
        config.scale.format = format;
    }
    if args.simulate {
        config.scale.simulate = true;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("tula-io v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        log::info!("Using config: {}", path.display());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let tare = config.tare.configuration()?;

    match config.hub.mode {
        HubMode::Server => run_server(&config, tare, &running),
        HubMode::Client => run_client(&config, tare, &running),
    }
}

fn run_server(
    config: &Config,
    tare: Option<TareConfiguration>,
    running: &AtomicBool,
) -> Result<()> {
    let connector: Box<dyn Connector> = if config.scale.simulate {
        Box::new(SimulatedConnector::new(
            config.scale.format,
            config.decoder.el05_decimals,
            config.simulate_interval(),
            config.scale.simulate_seed,
        ))
    } else {
        Box::new(SerialConnector::new(
            &config.scale.port,
            config.scale.baud_rate,
            config.read_timeout(),
        ))
    };

    let stream = ReadingStream::open(connector, config.scale.format, config.stream_config())?;
    let verifier: Arc<dyn CredentialVerifier> = match &config.hub.password {
        Some(password) => Arc::new(PasswordVerifier::new(password.clone())),
        None => {
            log::warn!("No hub password configured; any viewer may connect");
            Arc::new(OpenAccess)
        }
    };

    let mut hub = ServerHub::start(stream, config.hub_config(), verifier)?;
    log::info!("tula-io running. Press Ctrl-C to stop.");
    display_loop(&hub, tare, config.tare.mode, running);

    hub.shutdown();
    log::info!("tula-io stopped");
    Ok(())
}

fn run_client(
    config: &Config,
    tare: Option<TareConfiguration>,
    running: &AtomicBool,
) -> Result<()> {
    let mut hub = ClientHub::connect(
        &config.hub.server_address,
        config.hub.password.clone(),
        config.hub_config(),
    )?;
    log::info!(
        "Viewing hub {} (session {}). Press Ctrl-C to stop.",
        hub.server_addr(),
        hub.session_id()
    );
    display_loop(&hub, tare, config.tare.mode, running);

    hub.close();
    log::info!("tula-io stopped");
    Ok(())
}

/// Print every new reading until shutdown
fn display_loop<S: WeightSource>(
    source: &S,
    tare: Option<TareConfiguration>,
    mode: NetMode,
    running: &AtomicBool,
) {
    let mut updates = source.subscribe();
    show(&source.current_reading(), tare.as_ref(), mode);

    while running.load(Ordering::Relaxed) {
        match updates.recv_timeout(DISPLAY_POLL) {
            Ok(update) => show(&update, tare.as_ref(), mode),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                log::warn!("Reading source closed");
                break;
            }
        }
    }
}

fn show(update: &VersionedReading, tare: Option<&TareConfiguration>, mode: NetMode) {
    let net = match tare.map(|t| tare::net(&update.reading, t, mode)) {
        Some(Ok(result)) if result.clamped => format!("  net {:.2} kg (below tare)", result.value),
        Some(Ok(result)) => format!("  net {:.2} kg", result.value),
        Some(Err(e)) => format!("  net -- ({})", e),
        None => String::new(),
    };
    let link = format!("{:?}", update.link);
    println!("#{:<6} {:<12} {}{}", update.version, link, update.reading, net);
}
