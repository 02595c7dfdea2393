//! S3 Testbed Library
//!
//! Test scaffolding for code that talks to S3.
//!
//! # Features
//!
//! - **Emulator Fixture**: Starts `moto_server` on a fixed port, waits for it, tears it down
//! - **Bucket Provisioning**: Plain, versioned, and deny-unencrypted-uploads buckets
//! - **In-Process Mock**: A mock context answering an async client without a network
//!
//! # Example
//!
//! ```no_run
//! use s3_testbed::{config::FixtureConfig, fixture::S3Fixture};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fixture = S3Fixture::start(&FixtureConfig::default()).await?;
//!     let buckets = fixture.client().list_buckets().send().await?;
//!     println!("{} buckets", buckets.buckets().len());
//!     fixture.teardown()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod emulator;
pub mod fixture;
pub mod logging;
pub mod metrics;
pub mod s3;
pub mod shim;

// Re-export commonly used types
pub use config::FixtureConfig;
pub use fixture::{FixtureError, MockFixture, S3Fixture};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Skip the current test when `moto_server` is not on `PATH`
#[macro_export]
macro_rules! skip_if_no_emulator {
    () => {
        if !$crate::emulator::command_available("moto_server") {
            eprintln!("moto_server not found on PATH, skipping");
            return;
        }
    };
}
