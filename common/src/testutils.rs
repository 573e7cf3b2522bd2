use anyhow::{Context, anyhow};

/// Space probe returning fixed values, for exercising the preflight without filling a disk
#[derive(Debug, Default)]
pub struct FixedSpace {
    available: std::collections::HashMap<std::path::PathBuf, u64>,
}

impl FixedSpace {
    pub fn new<I, P>(available: I) -> Self
    where
        I: IntoIterator<Item = (P, u64)>,
        P: Into<std::path::PathBuf>,
    {
        Self {
            available: available
                .into_iter()
                .map(|(path, bytes)| (path.into(), bytes))
                .collect(),
        }
    }
}

/// [`FixedSpace`] ready to be handed to the replication functions
pub fn fixed_space<I, P>(available: I) -> std::sync::Arc<dyn crate::space::SpaceProbe>
where
    I: IntoIterator<Item = (P, u64)>,
    P: Into<std::path::PathBuf>,
{
    std::sync::Arc::new(FixedSpace::new(available))
}

impl crate::space::SpaceProbe for FixedSpace {
    fn available(&self, root: &std::path::Path) -> anyhow::Result<u64> {
        self.available
            .get(root)
            .copied()
            .ok_or_else(|| anyhow!("no space configured for {:?}", root))
    }
}

pub async fn setup_source_dir() -> anyhow::Result<tempfile::TempDir> {
    let tmp_dir = tempfile::tempdir().context("failed creating temp dir")?;
    // src
    // |- a.jpg         "X"
    // |- b.txt
    // |- album
    //    |- c.heic
    //    |- deep
    //       |- d.JPG
    //    |- empty.jpg  (zero bytes)
    // dst0
    // dst1
    let src = tmp_dir.path().join("src");
    let album = src.join("album");
    let deep = album.join("deep");
    tokio::fs::create_dir_all(&deep).await?;
    tokio::fs::write(src.join("a.jpg"), "X").await?;
    tokio::fs::write(src.join("b.txt"), "not a photo").await?;
    tokio::fs::write(album.join("c.heic"), "heic heic heic").await?;
    tokio::fs::write(deep.join("d.JPG"), vec![7u8; 10_000]).await?;
    tokio::fs::write(album.join("empty.jpg"), "").await?;
    tokio::fs::create_dir(tmp_dir.path().join("dst0")).await?;
    tokio::fs::create_dir(tmp_dir.path().join("dst1")).await?;
    Ok(tmp_dir)
}

pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(sha2::Sha256::digest(data))
}

/// Parse a checksum manifest into `(digest, relative path)` pairs
pub async fn read_manifest(path: &std::path::Path) -> anyhow::Result<Vec<(String, String)>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed reading manifest {:?}", path))?;
    contents
        .lines()
        .map(|line| {
            line.split_once(" *")
                .map(|(digest, path)| (digest.to_string(), path.to_string()))
                .ok_or_else(|| anyhow!("malformed manifest line {:?}", line))
        })
        .collect()
}
