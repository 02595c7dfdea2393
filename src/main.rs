//! s3-testbed - Local S3 emulator fixture
//!
//! Starts an emulator with the scenario buckets, probes an endpoint, or
//! prints the secure-bucket policy.

use clap::{Parser, Subcommand};
use s3_testbed::config::ConfigLoader;
use s3_testbed::emulator::{probe_client, probe_endpoint};
use s3_testbed::fixture::S3Fixture;
use s3_testbed::{logging, s3};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// s3-testbed - S3 emulator fixture and policy helper
#[derive(Parser, Debug)]
#[command(name = "s3-testbed")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the emulator, provision buckets, and wait for Ctrl-C
    Up {
        /// Path to fixture configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check whether an emulator answers on the configured endpoint
    Probe {
        /// Path to fixture configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the deny-unencrypted-uploads bucket policy
    Policy {
        /// Bucket the policy applies to
        #[arg(short, long, default_value = s3::SECURE_BUCKET)]
        bucket: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    logging::init_json(&args.log_level)?;

    match args.command {
        Command::Up { config } => {
            info!("Starting s3-testbed v{}", s3_testbed::VERSION);
            let config = ConfigLoader::load_or_default(config.as_ref())?;
            let fixture = S3Fixture::start(&config).await?;

            println!("endpoint: {}", fixture.endpoint());
            for bucket in fixture.buckets() {
                println!("bucket: {}", bucket);
            }

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, tearing down");
            fixture.stop().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Probe { config } => {
            let config = ConfigLoader::load_or_default(config.as_ref())?;
            let endpoint = config.emulator.endpoint();
            let client = probe_client()?;

            if probe_endpoint(&client, &endpoint).await {
                println!("up: {}", endpoint);
                Ok(ExitCode::SUCCESS)
            } else {
                println!("down: {}", endpoint);
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Policy { bucket } => {
            println!("{}", s3::secure_bucket_policy(&bucket));
            Ok(ExitCode::SUCCESS)
        }
    }
}
