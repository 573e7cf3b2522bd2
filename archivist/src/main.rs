use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "archivist",
    version,
    about = "Replicate selected files into several destination trees with SHA-256 manifests",
    long_about = "`archivist` copies every file with an accepted extension from a source tree into
each destination tree, reading each file once and writing it to all destinations together.

Each destination root gets a `sha256sums.txt` manifest (compatible with `sha256sum -c`)
and an `errors.log`. Both are appended to across runs and removed if a run leaves them empty.

The run aborts if any destination lacks the free space for the next file, or if a destination
cannot be written to; files that cannot be read are recorded in the error logs and skipped.

EXAMPLES:
    # Copy photos to two archive volumes
    archivist ~/Downloads --dst /Volumes/ARCHIVE_0 --dst /Volumes/ARCHIVE_1 --summary

    # Copy raw files and remove them from the source once copied
    archivist /media/card -d /mnt/backup -x cr2,dng --delete-source"
)]
struct Args {
    // Replication options
    /// Destination root (can be specified multiple times, order is preserved)
    #[arg(
        short = 'd',
        long = "dst",
        value_name = "PATH",
        required = true,
        action = clap::ArgAction::Append,
        help_heading = "Replication options"
    )]
    destinations: Vec<std::path::PathBuf>,

    /// Accepted file extension, case-insensitive (repeatable or comma separated)
    #[arg(
        short = 'x',
        long = "ext",
        value_name = "EXT",
        value_delimiter = ',',
        default_values_t = common::DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()),
        help_heading = "Replication options"
    )]
    extensions: Vec<String>,

    /// Delete each source file once it was copied to every destination
    #[arg(long, help_heading = "Replication options")]
    delete_source: bool,

    /// Size of the chunks the source is streamed in
    #[arg(
        long,
        default_value = "1MiB",
        value_name = "SIZE",
        help_heading = "Replication options"
    )]
    chunk_size: bytesize::ByteSize,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Source directory
    #[arg()]
    src: std::path::PathBuf,
}

#[instrument]
async fn async_main(args: Args) -> Result<common::Summary> {
    let config = common::ReplicationConfig::new(
        args.src,
        args.destinations,
        common::Extensions::new(&args.extensions)?,
        args.delete_source,
        args.chunk_size.as_u64(),
    )?;
    tracing::info!(
        "replicating {:?} ({}) to {:?}",
        config.source(),
        config.extensions(),
        config.destinations()
    );
    match common::archive(&config, std::sync::Arc::new(common::space::Statvfs)).await {
        Ok(summary) => Ok(summary),
        Err(error) => {
            if args.summary {
                return Err(anyhow!("{}\n\n{}", error, &error.summary));
            }
            Err(anyhow!("{}", error))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
