//! Configuration types for replication, runtime and output settings

use anyhow::{Context, anyhow};

/// Default size of a single read/write chunk while streaming a file (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Extensions accepted when no explicit list is given
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "heic"];

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Set of accepted file extensions, stored lowercase with a leading `.`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extensions {
    accepted: std::collections::BTreeSet<String>,
}

impl Extensions {
    /// Normalize and collect the given extensions.
    ///
    /// `jpg`, `.JPG` and ` Jpg ` all normalize to `.jpg`.
    pub fn new<I, S>(extensions: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut accepted = std::collections::BTreeSet::new();
        for ext in extensions {
            accepted.insert(normalize_extension(ext.as_ref())?);
        }
        if accepted.is_empty() {
            return Err(anyhow!("at least one file extension must be accepted"));
        }
        Ok(Self { accepted })
    }

    /// Check whether the path's extension is accepted (case-insensitive)
    pub fn matches(&self, path: &std::path::Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.accepted.contains(&ext)
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(String::as_str)
    }
}

impl std::fmt::Display for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(","))
    }
}

fn normalize_extension(ext: &str) -> anyhow::Result<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("invalid extension {:?}: must not be empty", ext));
    }
    if trimmed.contains(['/', '\\', '.']) {
        return Err(anyhow!(
            "invalid extension {:?}: must be a single suffix without separators",
            ext
        ));
    }
    Ok(format!(".{}", trimmed.to_lowercase()))
}

/// Immutable description of a single replication run.
///
/// Built once at startup and passed by reference to every component.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    source: std::path::PathBuf,
    destinations: Vec<std::path::PathBuf>,
    extensions: Extensions,
    delete_source: bool,
    chunk_size: u64,
}

impl ReplicationConfig {
    pub fn new(
        source: std::path::PathBuf,
        destinations: Vec<std::path::PathBuf>,
        extensions: Extensions,
        delete_source: bool,
        chunk_size: u64,
    ) -> anyhow::Result<Self> {
        let config = Self {
            source,
            destinations,
            extensions,
            delete_source,
            chunk_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration and return errors if invalid
    fn validate(&self) -> anyhow::Result<()> {
        if self.destinations.is_empty() {
            return Err(anyhow!("at least one destination must be specified"));
        }
        if self.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than 0"));
        }
        usize::try_from(self.chunk_size)
            .with_context(|| format!("chunk_size {} is too large", self.chunk_size))?;
        Ok(())
    }

    pub fn source(&self) -> &std::path::Path {
        &self.source
    }

    pub fn destinations(&self) -> &[std::path::PathBuf] {
        &self.destinations
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn delete_source(&self) -> bool {
        self.delete_source
    }

    /// Chunk size in bytes, guaranteed non-zero and addressable
    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }
}
