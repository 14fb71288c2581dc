//! Snapshot sources

use eyre::{eyre, Result};
use std::future::Future;
use std::path::PathBuf;
use tracing::info;

use super::MarketSnapshot;

/// Anything that can produce a market snapshot
pub trait SnapshotSource {
    fn load(&self) -> impl Future<Output = Result<MarketSnapshot>> + Send;
}

/// Snapshot stored as JSON on disk
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotSource for FileSnapshotSource {
    async fn load(&self) -> Result<MarketSnapshot> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| eyre!("Failed to read snapshot {}: {}", self.path.display(), e))?;
        let snapshot = MarketSnapshot::from_json(&text)
            .map_err(|e| eyre!("Failed to parse snapshot {}: {}", self.path.display(), e))?;
        info!("📂 Loaded snapshot from {}: {}", self.path.display(), snapshot.summary());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_source_round_trip() {
        let path = std::env::temp_dir().join(format!("pricer-snapshot-{}.json", std::process::id()));
        let snapshot = MarketSnapshot::new(17_000_000, 1_690_000_000);
        snapshot.save_to_file(&path).unwrap();

        let loaded = tokio_test::block_on(FileSnapshotSource::new(&path).load()).unwrap();
        assert_eq!(loaded, snapshot);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let source = FileSnapshotSource::new("/definitely/not/here.json");
        assert!(tokio_test::block_on(source.load()).is_err());
    }
}
