use clap::Parser;
use distwt::pipeline;
use distwt::validate::validate;
use distwt::{Config, SymbolWidth};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "distwt")]
#[command(about = "Build a wavelet tree over a text with several workers")]
struct Args {
    /// Input file of fixed-width little-endian symbols
    file: PathBuf,

    /// Bytes per symbol: 1, 2, 4 or 5
    #[arg(short, long, default_value = "1")]
    width: SymbolWidth,

    /// Only use the first BYTES bytes of the input
    #[arg(short, long, value_name = "BYTES")]
    prefix: Option<u64>,

    /// Read buffer size in symbols
    #[arg(short, long, value_name = "SYMBOLS")]
    rbuf: Option<usize>,

    /// Output path prefix for the level and histogram files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// The input already holds effective codes
    #[arg(short, long)]
    effective: bool,

    /// Decode the written tree and compare it against the input
    #[arg(short, long)]
    validate: bool,

    /// Number of workers
    #[arg(short = 'n', long, default_value = "1")]
    workers: usize,

    /// Threads per worker
    #[arg(short, long)]
    threads: Option<usize>,

    /// Keep node bit vectors alive until the merge is done
    #[arg(long)]
    keep_nodes: bool,

    /// Fail a receive that waits longer than this many seconds
    #[arg(long, value_name = "SECS")]
    recv_timeout: Option<u64>,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            input: self.file,
            output: self.output,
            width: self.width,
            prefix: self.prefix,
            read_buffer: self.rbuf,
            effective: self.effective,
            validate: self.validate,
            workers: self.workers,
            threads: self.threads,
            discard: !self.keep_nodes,
            recv_timeout: self.recv_timeout.map(Duration::from_secs),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("distwt=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // clap exits with status 2 on parse errors, including unsupported widths
    let config = Args::parse().into_config();
    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::from(2);
    }

    let stats = match pipeline::run(&config) {
        Ok(stats) => stats,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("{}", stats.readable());
    match stats.to_json() {
        Ok(json) => println!("RESULT {}", json),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    if let (true, Some(output)) = (config.validate, &config.output) {
        match validate(&config, output) {
            Ok(report) if report.is_ok() => {}
            Ok(report) => {
                error!(
                    mismatches = report.mismatches.len(),
                    checked = report.checked,
                    "Validation failed"
                );
                return ExitCode::from(3);
            }
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    info!("Done");
    ExitCode::SUCCESS
}
