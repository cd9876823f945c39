use bluetrax::{CsvFormatter, UnpackError, UnpackOptions, logging, unpack};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::panic::{self, PanicHookInfo};
use tracing::error;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Render the binary log from a file or stdin as CSV on stdout.
fn run(options: &UnpackOptions) -> Result<u64, UnpackError> {
    let input: Box<dyn Read> = match &options.file {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin().lock()),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    unpack(BufReader::new(input), &CsvFormatter::local(), &mut out)
}

fn main() {
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = UnpackOptions::parse();
    logging::init(options.verbose);

    match run(&options) {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
