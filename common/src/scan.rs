use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::Extensions;

/// Error message recorded for matching files the process cannot read
pub const UNREADABLE_FILE: &str = "Insufficient permissions to read from";
/// Error message recorded for subdirectories that cannot be listed
pub const UNREADABLE_DIR: &str = "Insufficient permissions to read directory";

/// A source file selected for replication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// location under the source root
    pub path: std::path::PathBuf,
    /// location relative to the source root, reused verbatim under every destination root
    pub relative: std::path::PathBuf,
}

/// A path excluded from the scan that must be reported in every destination's error log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub path: std::path::PathBuf,
    pub message: String,
}

/// Materialized result of walking the source tree
#[derive(Debug, Default)]
pub struct Scan {
    pub files: Vec<CandidateFile>,
    pub rejected: Vec<Rejected>,
}

/// Check read access for the real user, the same way `access(2)` does.
pub async fn is_accessible(path: &std::path::Path, mode: nix::unistd::AccessFlags) -> bool {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || nix::unistd::access(&path, mode).is_ok())
        .await
        .unwrap_or(false)
}

/// Read check used by [`scan`]: `access(2)` with `R_OK` for the real user
pub fn readable_by_user(path: &std::path::Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::R_OK).is_ok()
}

/// Walk `source_root` and collect every readable regular file with an accepted extension.
///
/// Entries of each directory are visited in file name order so the result is deterministic.
/// Symlinks are never followed nor selected.
pub async fn scan(source_root: &std::path::Path, extensions: &Extensions) -> Result<Scan> {
    scan_with(source_root, extensions, readable_by_user).await
}

/// [`scan`] with a custom check deciding which matching files are readable.
///
/// The check may block, it runs on the blocking thread pool.
#[instrument(skip(extensions, readable))]
pub async fn scan_with(
    source_root: &std::path::Path,
    extensions: &Extensions,
    readable: fn(&std::path::Path) -> bool,
) -> Result<Scan> {
    let mut scan = Scan::default();
    let entries = read_dir_sorted(source_root)
        .await
        .with_context(|| format!("cannot open source directory {:?} for reading", source_root))?;
    walk_entries(source_root, entries, extensions, readable, &mut scan).await;
    tracing::info!(
        "scan found {} files, rejected {}",
        scan.files.len(),
        scan.rejected.len()
    );
    Ok(scan)
}

async fn read_dir_sorted(dir: &std::path::Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = vec![];
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Kept as an alias so `async_recursion` does not rewrite the elided lifetime.
type ReadableFn = fn(&std::path::Path) -> bool;

#[async_recursion]
async fn walk_entries(
    source_root: &std::path::Path,
    entries: Vec<std::path::PathBuf>,
    extensions: &Extensions,
    readable: ReadableFn,
    scan: &mut Scan,
) {
    for path in entries {
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!("failed reading metadata from {:?}: {}", &path, &error);
                scan.rejected.push(Rejected {
                    path,
                    message: format!("Failed to read metadata: {}", error),
                });
                continue;
            }
        };
        if metadata.is_dir() {
            match read_dir_sorted(&path).await {
                Ok(children) => {
                    walk_entries(source_root, children, extensions, readable, scan).await
                }
                Err(error) => {
                    tracing::warn!("cannot open directory {:?} for reading: {}", &path, &error);
                    scan.rejected.push(Rejected {
                        path,
                        message: UNREADABLE_DIR.to_string(),
                    });
                }
            }
            continue;
        }
        if !metadata.is_file() {
            tracing::debug!("skipping {:?}, not a regular file", &path);
            continue;
        }
        if !extensions.matches(&path) {
            continue;
        }
        let is_readable = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || readable(&path))
                .await
                .unwrap_or(false)
        };
        if !is_readable {
            tracing::warn!("{:?} is not readable, excluding it", &path);
            scan.rejected.push(Rejected {
                path,
                message: UNREADABLE_FILE.to_string(),
            });
            continue;
        }
        // every walked path is built by joining onto source_root
        let relative = match path.strip_prefix(source_root) {
            Ok(relative) => relative.to_owned(),
            Err(_) => continue,
        };
        tracing::trace!("selected {:?}", &relative);
        scan.files.push(CandidateFile { path, relative });
    }
}
