//! Serial frame dumper
//!
//! Opens the scale's serial port and prints every frame in hex next to what
//! the decoder makes of it. Useful when bringing up a new scale model.
//!
//! ```text
//! cargo run --example frame_dump -- /dev/ttyUSB0 9600 el05 10
//! ```

use std::time::{Duration, Instant};
use tula_io::decoder::{self, DecodeLimits, Framed, LineFramer, MAX_FRAME_LEN, ScaleFormat};
use tula_io::transport::{SerialTransport, Transport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud: u32 = args.next().map_or(Ok(9600), |s| s.parse())?;
    let format = match args.next().as_deref() {
        None | Some("el05") => ScaleFormat::El05,
        Some("cond") => ScaleFormat::Cond,
        Some(other) => return Err(format!("unknown format '{}'", other).into()),
    };
    let seconds: u64 = args.next().map_or(Ok(10), |s| s.parse())?;

    log::info!("=== Scale Frame Dumper ===");
    log::info!("Opening {} at {} baud ({})", port, baud, format);
    let mut transport = SerialTransport::open(&port, baud, Duration::from_millis(100))?;
    transport.clear_input()?;

    let limits = DecodeLimits::default();
    let mut framer = LineFramer::new(format.terminator(), MAX_FRAME_LEN);
    let mut buffer = [0u8; 256];
    let mut frames = 0usize;
    let mut failures = 0usize;

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(seconds) {
        let n = transport.read(&mut buffer)?;
        if n == 0 {
            continue;
        }
        framer.push(&buffer[..n]);

        while let Some(framed) = framer.next_frame() {
            match framed {
                Framed::Frame(raw) => {
                    frames += 1;
                    let verdict = match decoder::decode(&raw, format, &limits) {
                        Ok(reading) => reading.to_string(),
                        Err(e) => {
                            failures += 1;
                            format!("ERROR {}", e)
                        }
                    };
                    println!(
                        "[{:8.3}s] {:<40} {}",
                        start.elapsed().as_secs_f64(),
                        decoder::hex_dump(&raw),
                        verdict
                    );
                }
                Framed::Overflow(dropped) => {
                    failures += 1;
                    println!("  --> {} bytes without terminator dropped", dropped);
                }
            }
        }
    }

    log::info!("");
    log::info!("=== Summary ===");
    log::info!("Frames: {}", frames);
    log::info!("Failures: {}", failures);
    if frames == 0 {
        log::warn!("No frames seen. Check the baud rate and the format's terminator.");
    }
    Ok(())
}
