//! gestureprint — hand-gesture-driven G-code streamer.
//!
//! Tracks a hand in camera space, classifies its depth gesture, and
//! streams motion/extrusion commands to a printer without blocking the
//! sensing loop on device I/O.

mod gcode;
mod gesture;
mod pose;
mod queue;
mod runner;
mod tracker;

use clap::Parser;
use tracing::info;

use gcode::{MotionTranslator, PrinterConfig};
use gesture::{GestureConfig, GestureMachine};
use queue::{CommandQueue, CommandSink, NullSink, SerialPortSink, StdoutSink};
use runner::{GesturePrintLoop, LoopConfig};
use tracker::UdpTracker;

#[derive(Parser, Debug)]
#[command(name = "gestureprint", about = "Hand-gesture-driven G-code streamer")]
struct Cli {
    /// Command sink: stdout, null, or serial:<path>
    #[arg(long, default_value = "stdout")]
    sink: String,

    /// UDP address the pose tracker listens on
    #[arg(long, default_value = "127.0.0.1:7110")]
    listen: String,

    /// Tracker poll window per frame, in milliseconds
    #[arg(long, default_value_t = 33)]
    poll_interval: u64,

    /// Exit after N seconds (unattended/soak runs)
    #[arg(long)]
    exit_after: Option<u64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("gestureprint {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gestureprint=info".into()),
        )
        .init();

    info!("gestureprint v{} starting", env!("CARGO_PKG_VERSION"));
    info!("sink: {}", cli.sink);

    let sink: Box<dyn CommandSink> = match cli.sink.as_str() {
        "stdout" => Box::new(StdoutSink::new()),
        "null" => Box::new(NullSink),
        other => match other.strip_prefix("serial:") {
            Some(path) => Box::new(SerialPortSink::new(path)),
            None => {
                eprintln!("Unknown sink: {other}. Use: stdout, null, or serial:<path>");
                std::process::exit(1);
            }
        },
    };

    let tracker = UdpTracker::bind(&cli.listen)?;

    let queue = CommandQueue::start(sink)?;
    let translator = MotionTranslator::new(PrinterConfig::default(), queue);

    runner::install_signal_handlers();

    let print_loop = GesturePrintLoop::new(
        LoopConfig {
            poll_timeout_ms: cli.poll_interval,
            status_interval_secs: 60,
            exit_after_secs: cli.exit_after,
        },
        Box::new(tracker),
        GestureMachine::new(GestureConfig::default()),
        translator,
    );

    let summary = print_loop.run()?;
    info!(
        "done: {} frame(s), {} layer(s), {} command(s) delivered",
        summary.frames, summary.layers, summary.commands_written
    );
    Ok(())
}
