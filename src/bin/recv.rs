//! `ftcp-recv`: receive one file, then exit.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use ftcp::protocol::DEFAULT_PORT;
use ftcp::receiver::FileReceiver;

/// File transfer receiver
#[derive(Parser, Debug)]
#[command(name = "ftcp-recv", version, about = "Receive a file from an ftcp sender")]
struct Args {
    /// Port to listen on
    #[arg(short = 'p', value_name = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Output directory for the received file
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Verbose logging
    #[arg(short = 'v')]
    verbose: bool,

    /// Log to file
    #[arg(short = 'l', value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn run(args: &Args) -> ftcp::Result<()> {
    let mut receiver = FileReceiver::bind(&args.output_dir, args.port)?;
    tracing::info!("Waiting for a connection...");
    let path = receiver.serve_one()?;
    tracing::info!("Saved {}", path.display());
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = ftcp::init_logging(args.verbose, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    tracing::info!("File Transfer Receiver starting...");
    if let Err(e) = run(&args) {
        tracing::error!("Transfer failed: {}", e);
        process::exit(1);
    }
}
