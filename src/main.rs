use bluetrax::scanner::hci::HciSocket;
use bluetrax::{RecordWriter, ScanError, ScanLoop, ScanOptions, SignalCoordinator, logging};
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use tracing::error;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Arm periodic inquiry and record results until SIGINT/SIGTERM.
///
/// This function:
/// 1. Opens the output sink (file or stdout)
/// 2. Installs the signal listener
/// 3. Runs the scan loop against the selected controller
/// 4. Flushes whatever the loop left buffered
async fn run(options: ScanOptions) -> Result<(), ScanError> {
    let config = options.scan_config();
    let sink = options.open_output().map_err(ScanError::WriteFailure)?;

    let signals = SignalCoordinator::new();
    let _listener = signals.listen().map_err(ScanError::Signal)?;

    let mut writer = RecordWriter::new(sink, config.flush);
    ScanLoop::new(&config, &mut writer, &signals)
        .run(|| HciSocket::open(config.device))
        .await?;
    writer.flush()
}

// One worker keeps the signal listener running even if the scan loop stalls.
#[tokio::main(flavor = "multi_thread", worker_threads = 1)]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that restart the scanner
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = ScanOptions::parse();
    logging::init(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
