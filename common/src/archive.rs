use anyhow::Context;
use nix::unistd::AccessFlags;
use std::sync::Arc;
use tracing::instrument;

use crate::config::ReplicationConfig;
use crate::destlog::{DestinationLog, close_all, record_error_all};
use crate::replicate::{self, Fatal, Summary};
use crate::scan;
use crate::space::SpaceProbe;

/// Error type for a run that preserves the summary of what was done before the abort.
///
/// The Display implementation shows the full error chain.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }

    /// The fatal condition behind this error, if it was one of the known ones
    pub fn fatal(&self) -> Option<&Fatal> {
        self.source.downcast_ref::<Fatal>()
    }
}

async fn check_root(
    path: &std::path::Path,
    access: AccessFlags,
    denied: &str,
) -> Result<(), String> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err("path does not exist".to_string());
        }
        Err(error) => return Err(format!("failed reading metadata: {}", error)),
    };
    if !metadata.is_dir() {
        return Err("path is not a directory".to_string());
    }
    if !scan::is_accessible(path, access).await {
        return Err(denied.to_string());
    }
    Ok(())
}

/// Source needs to be listable, destinations need to accept new entries.
#[instrument(skip(config))]
async fn validate_roots(config: &ReplicationConfig) -> Result<(), Fatal> {
    check_root(
        config.source(),
        AccessFlags::R_OK | AccessFlags::X_OK,
        "insufficient permissions to read from",
    )
    .await
    .map_err(|reason| Fatal::Source {
        path: config.source().to_owned(),
        reason,
    })?;
    for destination in config.destinations() {
        check_root(
            destination,
            AccessFlags::W_OK | AccessFlags::X_OK,
            "insufficient permissions to write to",
        )
        .await
        .map_err(|reason| Fatal::Destination {
            path: destination.clone(),
            reason,
        })?;
    }
    Ok(())
}

async fn replicate_all(
    config: &ReplicationConfig,
    logs: &mut [DestinationLog],
    probe: &Arc<dyn SpaceProbe>,
    summary: &mut Summary,
) -> anyhow::Result<()> {
    let scan = scan::scan(config.source(), config.extensions()).await?;
    replicate_scanned(config, logs, probe, &scan, summary).await
}

/// Report every rejected path in all logs, then replicate the selected files in order.
async fn replicate_scanned(
    config: &ReplicationConfig,
    logs: &mut [DestinationLog],
    probe: &Arc<dyn SpaceProbe>,
    scan: &scan::Scan,
    summary: &mut Summary,
) -> anyhow::Result<()> {
    for rejected in &scan.rejected {
        record_error_all(logs, &rejected.path, &rejected.message).await;
    }
    summary.files_rejected += scan.rejected.len();
    tracing::info!(
        "replicating {} files to {} destinations",
        scan.files.len(),
        logs.len()
    );
    for file in &scan.files {
        *summary = *summary + replicate::replicate_file(config, logs, probe, file).await?;
    }
    Ok(())
}

/// Run a full replication: validate roots, open logs, scan, copy file by file, close logs.
///
/// Every log that was opened is closed before this returns, on success and on every abort path.
#[instrument(skip(config, probe), fields(source = ?config.source()))]
pub async fn archive(
    config: &ReplicationConfig,
    probe: Arc<dyn SpaceProbe>,
) -> Result<Summary, Error> {
    validate_roots(config)
        .await
        .map_err(|fatal| Error::new(fatal.into(), Summary::default()))?;
    let mut logs = Vec::with_capacity(config.destinations().len());
    for destination in config.destinations() {
        match DestinationLog::open(destination).await {
            Ok(log) => logs.push(log),
            Err(error) => {
                if let Err(close_error) = close_all(logs).await {
                    tracing::error!("{:#}", &close_error);
                }
                return Err(Error::new(error, Summary::default()));
            }
        }
    }
    let mut summary = Summary::default();
    let result = replicate_all(config, &mut logs, &probe, &mut summary).await;
    let closed = close_all(logs)
        .await
        .context("failed closing destination logs");
    match (result, closed) {
        (Ok(()), Ok(())) => Ok(summary),
        (Err(error), closed) => {
            if let Err(close_error) = closed {
                tracing::error!("{:#}", &close_error);
            }
            Err(Error::new(error, summary))
        }
        (Ok(()), Err(close_error)) => Err(Error::new(close_error, summary)),
    }
}
