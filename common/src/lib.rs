//! Core library for `archivist`
//!
//! `archivist` replicates files with selected extensions from one source tree into one or more
//! destination trees. Every copied file gets a SHA-256 line in the destination's
//! `sha256sums.txt`, every problem gets a line in the destination's `errors.log`.
//!
//! # Overview
//!
//! A run goes through these steps (see [`archive::archive`]):
//!
//! 1. the source and destination roots are validated
//! 2. one [`destlog::DestinationLog`] is opened per destination
//! 3. [`scan::scan`] walks the source tree and materializes the list of candidate files
//! 4. [`replicate::replicate_file`] copies each file to all destinations with a single read pass,
//!    hashing as it goes, after a free-space preflight ([`space::check`])
//! 5. all logs are closed, and empty logs are removed
//!
//! # Failure policy
//!
//! A destination that cannot be validated, logged to, opened or written, or that lacks the free
//! space for the next file, aborts the run. Unreadable sources, checksum log write failures and
//! failed source deletions are recorded in the error logs and the run goes on.
//!
//! # Example
//!
//! ```rust,no_run
//! use common::{Extensions, ReplicationConfig, space::Statvfs};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ReplicationConfig::new(
//!     "/home/me/Downloads".into(),
//!     vec!["/Volumes/ARCHIVE_0".into(), "/Volumes/ARCHIVE_1".into()],
//!     Extensions::new(["jpg", "heic"])?,
//!     false,
//!     common::DEFAULT_CHUNK_SIZE,
//! )?;
//! let summary = common::archive(&config, std::sync::Arc::new(Statvfs)).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

use tracing_subscriber::EnvFilter;

pub mod archive;
pub mod config;
pub mod destlog;
pub mod replicate;
pub mod scan;
pub mod space;

#[cfg(test)]
mod testutils;

pub use archive::archive;
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_EXTENSIONS, Extensions, OutputConfig, ReplicationConfig,
    RuntimeConfig,
};
pub use replicate::{Fatal, Summary};

fn init_tracing(output: &OutputConfig) {
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if output.quiet && output.verbose == 0 {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    // a subscriber may already be installed (e.g. by tests), keep it in that case
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Set up logging and the tokio runtime, then drive `func` to completion.
///
/// Returns `None` if the runtime could not be built or `func` failed; the error is logged.
pub fn run<Fut, S, E>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<S>
where
    S: std::fmt::Display,
    E: std::fmt::Display,
    Fut: std::future::Future<Output = Result<S, E>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed building tokio runtime: {}", &error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{}", &summary);
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            None
        }
    }
}
