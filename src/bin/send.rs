//! `ftcp-send`: transfer one file to a listening receiver.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};

use ftcp::protocol::DEFAULT_PORT;
use ftcp::sender::FileSender;

/// File transfer sender
#[derive(Parser, Debug)]
#[command(name = "ftcp-send", version, about = "Send a file to an ftcp receiver")]
#[command(disable_help_flag = true)]
struct Args {
    /// Receiver hostname or IP address
    #[arg(short = 'h', value_name = "HOST")]
    host: String,

    /// File to transfer
    #[arg(short = 'f', value_name = "FILE")]
    file: PathBuf,

    /// Receiver port
    #[arg(short = 'p', value_name = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Verbose logging
    #[arg(short = 'v')]
    verbose: bool,

    /// Log to file
    #[arg(short = 'l', value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Show this help message
    #[arg(long = "help", action = ArgAction::Help)]
    help: Option<bool>,
}

fn run(args: &Args) -> ftcp::Result<()> {
    let mut sender = FileSender::new(&args.file)?;
    let stats = sender.send_to(&args.host, args.port)?;
    tracing::info!(
        "Sent {} bytes in {} chunks ({:.2} MB/s)",
        stats.bytes_sent,
        stats.chunks_sent,
        stats.throughput_mbps()
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = ftcp::init_logging(args.verbose, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    tracing::info!("File Transfer Sender starting...");
    if let Err(e) = run(&args) {
        tracing::error!("File transfer failed: {}", e);
        process::exit(1);
    }
}
