use anyhow::{Context, Result};
use sha2::Digest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::config::ReplicationConfig;
use crate::destlog::{DestinationLog, record_error_all};
use crate::scan::CandidateFile;
use crate::space::{self, Preflight, SpaceProbe};

/// Conditions that abort the whole run.
///
/// Each variant is recorded in the destination logs (where they are open) before it is returned.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    #[error("source {path:?} is not usable: {reason}")]
    Source {
        path: std::path::PathBuf,
        reason: String,
    },
    #[error("destination {path:?} is not usable: {reason}")]
    Destination {
        path: std::path::PathBuf,
        reason: String,
    },
    #[error("insufficient space in destination {destination:?} for {file:?}")]
    InsufficientSpace {
        destination: std::path::PathBuf,
        file: std::path::PathBuf,
        required: u64,
        available: u64,
    },
    #[error("failed opening {path:?} for writing")]
    DestinationOpen {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed writing to destination {destination:?}")]
    DestinationWrite {
        destination: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub files_rejected: usize,
    pub files_failed: usize,
    pub checksum_failures: usize,
    pub sources_deleted: usize,
    pub delete_failures: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_copied: self.files_copied + other.files_copied,
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_rejected: self.files_rejected + other.files_rejected,
            files_failed: self.files_failed + other.files_failed,
            checksum_failures: self.checksum_failures + other.checksum_failures,
            sources_deleted: self.sources_deleted + other.sources_deleted,
            delete_failures: self.delete_failures + other.delete_failures,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files copied: {}\n\
            bytes copied: {}\n\
            files rejected: {}\n\
            files failed: {}\n\
            checksum failures: {}\n\
            sources deleted: {}\n\
            delete failures: {}",
            self.files_copied,
            bytesize::ByteSize(self.bytes_copied),
            self.files_rejected,
            self.files_failed,
            self.checksum_failures,
            self.sources_deleted,
            self.delete_failures,
        )
    }
}

enum StreamError {
    Read(std::io::Error),
    Write {
        index: usize,
        source: std::io::Error,
    },
}

/// Create `dst` and any missing parent directories.
///
/// Directories that did not exist are pushed to `created_dirs`, deepest first, before they are
/// created, so a failed copy can be cleaned up even after a partial `create_dir_all`.
async fn create_output(
    dst: &std::path::Path,
    created_dirs: &mut Vec<std::path::PathBuf>,
) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = dst.parent() {
        for dir in parent.ancestors() {
            if dir.as_os_str().is_empty() || tokio::fs::symlink_metadata(dir).await.is_ok() {
                break;
            }
            created_dirs.push(dir.to_owned());
        }
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::File::create(dst).await
}

/// Read `src` once, hashing every chunk and writing it to all outputs before reading the next.
///
/// Returns the hex digest and the number of bytes streamed. Outputs are flushed and synced.
async fn stream(
    src: &std::path::Path,
    outputs: &mut [tokio::fs::File],
    chunk_size: usize,
    expected_size: u64,
) -> Result<(String, u64), StreamError> {
    let mut reader = tokio::fs::File::open(src).await.map_err(StreamError::Read)?;
    let mut hasher = sha2::Sha256::new();
    // small files don't need a full chunk
    let buffer_size = usize::try_from(expected_size)
        .unwrap_or(usize::MAX)
        .min(chunk_size)
        .max(1);
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer).await.map_err(StreamError::Read)?;
        if n == 0 {
            break;
        }
        let chunk = &buffer[..n];
        hasher.update(chunk);
        for (index, output) in outputs.iter_mut().enumerate() {
            output
                .write_all(chunk)
                .await
                .map_err(|source| StreamError::Write { index, source })?;
        }
        total += n as u64;
    }
    for (index, output) in outputs.iter_mut().enumerate() {
        output
            .flush()
            .await
            .map_err(|source| StreamError::Write { index, source })?;
        output
            .sync_all()
            .await
            .map_err(|source| StreamError::Write { index, source })?;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Remove the copies of a file that did not make it to every destination, then the directories
/// created for them.
async fn remove_partial_copies(
    dst_paths: &[std::path::PathBuf],
    created_dirs: &[std::path::PathBuf],
) {
    for dst in dst_paths {
        if let Err(error) = tokio::fs::remove_file(dst).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed removing partial copy {:?}: {}", dst, &error);
            }
        }
    }
    for dir in created_dirs {
        if let Err(error) = tokio::fs::remove_dir(dir).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed removing directory {:?}: {}", dir, &error);
            }
        }
    }
}

/// Copy one file to every destination, log its checksum everywhere and optionally delete it.
///
/// Per-file problems (unreadable source, checksum log failure, failed deletion) are recorded in
/// the logs and reflected in the returned summary. Errors returned from here are fatal for the run.
#[instrument(skip(config, logs, probe, file), fields(file = ?file.relative))]
pub async fn replicate_file(
    config: &ReplicationConfig,
    logs: &mut [DestinationLog],
    probe: &std::sync::Arc<dyn SpaceProbe>,
    file: &CandidateFile,
) -> Result<Summary> {
    let src_metadata = match tokio::fs::metadata(&file.path).await {
        Ok(metadata) => metadata,
        Err(error) => {
            tracing::error!("failed reading metadata from {:?}: {}", &file.path, &error);
            let message = format!("Failed to read source file: {}", error);
            record_error_all(logs, &file.path, &message).await;
            return Ok(Summary {
                files_failed: 1,
                ..Default::default()
            });
        }
    };
    let file_size = src_metadata.len();
    tracing::debug!("running space preflight for {} bytes", file_size);
    let preflight = match space::check(file_size, config.destinations(), probe).await {
        Ok(preflight) => preflight,
        Err(error) => {
            let message = format!("Failed to query free space: {:#}", error);
            record_error_all(logs, &file.path, &message).await;
            return Err(error);
        }
    };
    if let Preflight::Insufficient {
        destination,
        available,
    } = preflight
    {
        let message = format!("Insufficient space in destination {}", destination.display());
        record_error_all(logs, &file.path, &message).await;
        return Err(Fatal::InsufficientSpace {
            destination,
            file: file.path.clone(),
            required: file_size,
            available,
        }
        .into());
    }
    let dst_paths: Vec<std::path::PathBuf> = config
        .destinations()
        .iter()
        .map(|root| root.join(&file.relative))
        .collect();
    let mut outputs = Vec::with_capacity(dst_paths.len());
    let mut created_dirs = vec![];
    for (index, (root, dst)) in config.destinations().iter().zip(&dst_paths).enumerate() {
        match create_output(dst, &mut created_dirs).await {
            Ok(output) => outputs.push(output),
            Err(source) => {
                drop(outputs);
                remove_partial_copies(&dst_paths[..index], &created_dirs).await;
                let message = format!(
                    "Failed to open destination file in {}: {}",
                    root.display(),
                    source
                );
                record_error_all(logs, &file.path, &message).await;
                return Err(Fatal::DestinationOpen {
                    path: dst.clone(),
                    source,
                }
                .into());
            }
        }
    }
    tracing::debug!("streaming to {} destinations", outputs.len());
    let streamed = stream(&file.path, &mut outputs, config.chunk_size(), file_size).await;
    drop(outputs);
    let (digest, bytes) = match streamed {
        Ok(streamed) => streamed,
        Err(StreamError::Read(error)) => {
            tracing::error!("failed reading {:?}: {}", &file.path, &error);
            remove_partial_copies(&dst_paths, &created_dirs).await;
            let message = format!("Failed to read source file: {}", error);
            record_error_all(logs, &file.path, &message).await;
            return Ok(Summary {
                files_failed: 1,
                ..Default::default()
            });
        }
        Err(StreamError::Write { index, source }) => {
            remove_partial_copies(&dst_paths, &created_dirs).await;
            let destination = config.destinations()[index].clone();
            let message = format!(
                "Failed to write to destination {}: {}",
                destination.display(),
                source
            );
            record_error_all(logs, &file.path, &message).await;
            return Err(Fatal::DestinationWrite {
                destination,
                source,
            }
            .into());
        }
    };
    let mut summary = Summary {
        files_copied: 1,
        bytes_copied: bytes,
        ..Default::default()
    };
    for log in logs.iter_mut() {
        if let Err(error) = log.record_checksum(&file.relative, &digest).await {
            tracing::error!("{:#}", &error);
            log.record_error(&file.path, &format!("Error adding checksum: {:#}", error))
                .await;
            summary.checksum_failures += 1;
        }
    }
    tracing::info!("copied {:?} ({})", &file.relative, &digest);
    if config.delete_source() {
        match tokio::fs::remove_file(&file.path)
            .await
            .with_context(|| format!("failed removing source {:?}", &file.path))
        {
            Ok(()) => summary.sources_deleted += 1,
            Err(error) => {
                tracing::error!("{:#}", &error);
                let message = format!("Failed to remove file: {}", error.root_cause());
                record_error_all(logs, &file.path, &message).await;
                summary.delete_failures += 1;
            }
        }
    }
    Ok(summary)
}
