use anyhow::{Context, Result};
use std::os::unix::ffi::OsStrExt;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Checksum manifest kept in every destination root, `sha256sum -c` compatible
pub const CHECKSUM_LOG: &str = "sha256sums.txt";
/// Human readable error log kept in every destination root
pub const ERROR_LOG: &str = "errors.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only checksum and error logs for one destination root.
///
/// Every append is written with a single call, flushed and synced before returning, so a crash
/// leaves the logs consistent with everything recorded up to that point.
#[derive(Debug)]
pub struct DestinationLog {
    root: std::path::PathBuf,
    checksums: tokio::fs::File,
    errors: tokio::fs::File,
}

async fn open_append(path: &std::path::Path) -> Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open log file {:?}", path))
}

async fn append_synced(file: &mut tokio::fs::File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Resolve the path used in error lines: canonical if the file still exists, absolute otherwise.
async fn absolute_path(path: &std::path::Path) -> std::path::PathBuf {
    match tokio::fs::canonicalize(path).await {
        Ok(resolved) => resolved,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_owned()),
    }
}

impl DestinationLog {
    #[instrument]
    pub async fn open(root: &std::path::Path) -> Result<Self> {
        let checksums = open_append(&root.join(CHECKSUM_LOG))
            .await
            .with_context(|| format!("failed creating checksum file for {:?}", root))?;
        let errors = open_append(&root.join(ERROR_LOG))
            .await
            .with_context(|| format!("failed creating error log file for {:?}", root))?;
        tracing::debug!("opened destination logs");
        Ok(Self {
            root: root.to_owned(),
            checksums,
            errors,
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Append `<digest> *<relative path>` to the checksum manifest.
    ///
    /// The path is written as its raw bytes so it always names the file in the destination.
    /// On failure the caller is expected to route the event into [`DestinationLog::record_error`].
    #[instrument(skip(self), fields(root = ?self.root))]
    pub async fn record_checksum(
        &mut self,
        relative: &std::path::Path,
        digest: &str,
    ) -> Result<()> {
        let relative = relative.as_os_str().as_bytes();
        let mut line = Vec::with_capacity(digest.len() + relative.len() + 3);
        line.extend_from_slice(digest.as_bytes());
        line.extend_from_slice(b" *");
        line.extend_from_slice(relative);
        line.push(b'\n');
        append_synced(&mut self.checksums, &line)
            .await
            .with_context(|| {
                format!(
                    "failed writing checksum to {:?}",
                    self.root.join(CHECKSUM_LOG)
                )
            })
    }

    /// Append `<timestamp> - <message> - <absolute path>` to the error log.
    ///
    /// Best effort: a failure is reported on the diagnostic stream and `false` is returned.
    #[instrument(skip(self), fields(root = ?self.root))]
    pub async fn record_error(&mut self, path: &std::path::Path, message: &str) -> bool {
        let line = format!(
            "{} - {} - {}\n",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            message,
            absolute_path(path).await.display()
        );
        match append_synced(&mut self.errors, line.as_bytes()).await {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(
                    "failed writing error to {:?}: {}; lost entry: {}",
                    self.root.join(ERROR_LOG),
                    &error,
                    line.trim_end()
                );
                false
            }
        }
    }

    /// Flush, sync and close both logs, then remove any log that ended up empty.
    #[instrument(skip(self), fields(root = ?self.root))]
    pub async fn close(self) -> Result<()> {
        let Self {
            root,
            checksums,
            errors,
        } = self;
        let mut result = Ok(());
        for (name, mut file) in [(CHECKSUM_LOG, checksums), (ERROR_LOG, errors)] {
            let path = root.join(name);
            let closed = async {
                file.flush().await?;
                file.sync_all().await?;
                drop(file);
                let metadata = tokio::fs::symlink_metadata(&path).await?;
                if metadata.len() == 0 {
                    tracing::debug!("removing empty log {:?}", &path);
                    match tokio::fs::remove_file(&path).await {
                        Err(error) if error.kind() != std::io::ErrorKind::NotFound => {
                            return Err(error);
                        }
                        _ => {}
                    }
                }
                Ok::<(), std::io::Error>(())
            }
            .await
            .with_context(|| format!("failed closing log file {:?}", &path));
            // keep going so the second log still gets closed
            if let Err(error) = closed {
                tracing::error!("{:#}", &error);
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }
}

/// Record the same error event in every destination's log.
pub async fn record_error_all(
    logs: &mut [DestinationLog],
    path: &std::path::Path,
    message: &str,
) {
    for log in logs.iter_mut() {
        log.record_error(path, message).await;
    }
}

/// Close every log, reporting (but not stopping on) failures.
pub async fn close_all(logs: Vec<DestinationLog>) -> Result<()> {
    let mut result = Ok(());
    for log in logs {
        if let Err(error) = log.close().await {
            if result.is_ok() {
                result = Err(error);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn clean_log_leaves_no_files() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let log = DestinationLog::open(tmp_dir.path()).await?;
        assert!(tmp_dir.path().join(CHECKSUM_LOG).exists());
        assert!(tmp_dir.path().join(ERROR_LOG).exists());
        log.close().await?;
        assert!(!tmp_dir.path().join(CHECKSUM_LOG).exists());
        assert!(!tmp_dir.path().join(ERROR_LOG).exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn checksum_lines_use_binary_marker() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let mut log = DestinationLog::open(tmp_dir.path()).await?;
        let digest = "0".repeat(64);
        log.record_checksum(std::path::Path::new("a.jpg"), &digest).await?;
        log.record_checksum(std::path::Path::new("sub/b.jpg"), &digest).await?;
        log.close().await?;
        let contents = tokio::fs::read_to_string(tmp_dir.path().join(CHECKSUM_LOG)).await?;
        assert_eq!(contents, format!("{digest} *a.jpg\n{digest} *sub/b.jpg\n"));
        // only the error log was empty
        assert!(!tmp_dir.path().join(ERROR_LOG).exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn checksum_lines_keep_non_utf8_names() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let mut log = DestinationLog::open(tmp_dir.path()).await?;
        let name = std::ffi::OsStr::from_bytes(b"album/a\xff.jpg");
        log.record_checksum(std::path::Path::new(name), "ab").await?;
        log.close().await?;
        let contents = tokio::fs::read(tmp_dir.path().join(CHECKSUM_LOG)).await?;
        assert_eq!(contents, b"ab *album/a\xff.jpg\n");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn error_lines_have_timestamp_message_and_absolute_path() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let missing = tmp_dir.path().join("gone.jpg");
        let mut log = DestinationLog::open(tmp_dir.path()).await?;
        assert!(log.record_error(&missing, "something broke").await);
        log.close().await?;
        assert!(!tmp_dir.path().join(CHECKSUM_LOG).exists());
        let contents = tokio::fs::read_to_string(tmp_dir.path().join(ERROR_LOG)).await?;
        let line = contents.strip_suffix('\n').unwrap();
        let (timestamp, rest) = line.split_once(" - ").unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).is_ok());
        assert_eq!(rest, format!("something broke - {}", missing.display()));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn reopening_appends() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        for _ in 0..2 {
            let mut log = DestinationLog::open(tmp_dir.path()).await?;
            log.record_checksum(std::path::Path::new("a.jpg"), "ab").await?;
            log.close().await?;
        }
        let contents = tokio::fs::read_to_string(tmp_dir.path().join(CHECKSUM_LOG)).await?;
        assert_eq!(contents, "ab *a.jpg\nab *a.jpg\n");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn open_fails_for_missing_root() {
        let tmp_dir = tempfile::tempdir().unwrap();
        assert!(
            DestinationLog::open(&tmp_dir.path().join("nope"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn errors_are_routed_to_every_log() -> Result<()> {
        let dst0 = tempfile::tempdir()?;
        let dst1 = tempfile::tempdir()?;
        let mut logs = vec![
            DestinationLog::open(dst0.path()).await?,
            DestinationLog::open(dst1.path()).await?,
        ];
        record_error_all(&mut logs, std::path::Path::new("/src/x.jpg"), "oops").await;
        close_all(logs).await?;
        for dst in [&dst0, &dst1] {
            let contents = tokio::fs::read_to_string(dst.path().join(ERROR_LOG)).await?;
            assert!(contents.ends_with(" - oops - /src/x.jpg\n"));
            assert!(!dst.path().join(CHECKSUM_LOG).exists());
        }
        Ok(())
    }
}
