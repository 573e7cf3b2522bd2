use anyhow::{Context, Result};
use tracing::instrument;

/// Source of free-space information for destination roots.
///
/// Queries may block, [`check`] runs them on the blocking thread pool.
pub trait SpaceProbe: std::fmt::Debug + Send + Sync {
    /// Bytes available to an unprivileged writer under `root`
    fn available(&self, root: &std::path::Path) -> Result<u64>;
}

/// Free space as reported by `statvfs(3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Statvfs;

impl SpaceProbe for Statvfs {
    fn available(&self, root: &std::path::Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(root)
            .with_context(|| format!("failed querying free space of {:?}", root))?;
        #[allow(clippy::useless_conversion)]
        let available = u64::from(stat.blocks_available()) * u64::from(stat.fragment_size());
        Ok(available)
    }
}

/// Outcome of checking one file against all destinations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    Ok,
    Insufficient {
        destination: std::path::PathBuf,
        available: u64,
    },
}

/// Verify every destination can hold `file_size` more bytes.
///
/// Destinations are checked in order and the first one short on space is reported.
#[instrument(skip(probe, destinations))]
pub async fn check(
    file_size: u64,
    destinations: &[std::path::PathBuf],
    probe: &std::sync::Arc<dyn SpaceProbe>,
) -> Result<Preflight> {
    for destination in destinations {
        let available = {
            let probe = probe.clone();
            let root = destination.clone();
            tokio::task::spawn_blocking(move || probe.available(&root))
                .await
                .context("free space query task failed")??
        };
        tracing::trace!("{:?}: {} bytes available", destination, available);
        if available < file_size {
            tracing::error!(
                "insufficient space in {:?}: {} needed, {} available",
                destination,
                bytesize::ByteSize(file_size),
                bytesize::ByteSize(available)
            );
            return Ok(Preflight::Insufficient {
                destination: destination.clone(),
                available,
            });
        }
    }
    Ok(Preflight::Ok)
}
