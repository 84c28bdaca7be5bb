//! File-backed cold archive store.
//!
//! Each archived record is a payload file plus a sibling `.sha256`
//! digest, written payload-first so a crash between the two writes
//! leaves a copy that fails verification rather than one that lies.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::traits::ColdStore;
use crate::archive::error::ArchiveResult;
use crate::archive::types::digest_bytes;

/// Cold store keeping `<id>.payload` and `<id>.sha256` under
/// `base_path`.
pub struct FileColdStore {
    base_path: PathBuf,
}

impl FileColdStore {
    pub async fn open(base_path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_path).await?;
        info!("Opened file cold store at {}", base_path.display());
        Ok(Self { base_path })
    }

    fn payload_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.payload", id))
    }

    fn digest_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.sha256", id))
    }

    /// Number of archived records.
    pub async fn count(&self) -> ArchiveResult<usize> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(".payload") {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl ColdStore for FileColdStore {
    async fn put(&self, id: &str, bytes: &[u8]) -> ArchiveResult<()> {
        let digest = digest_bytes(bytes);

        tokio::fs::write(self.payload_path(id), bytes).await?;
        tokio::fs::write(self.digest_path(id), digest.as_bytes()).await?;

        debug!("Archived record {} ({} bytes, digest {})", id, bytes.len(), digest);
        Ok(())
    }

    async fn get(&self, id: &str) -> ArchiveResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.payload_path(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn verify(&self, id: &str, expected_digest: &str) -> ArchiveResult<bool> {
        let stored_digest = match tokio::fs::read_to_string(self.digest_path(id)).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if stored_digest.trim() != expected_digest {
            warn!(
                "Digest mismatch for record {}: stored {}, expected {}",
                id,
                stored_digest.trim(),
                expected_digest
            );
            return Ok(false);
        }

        // Recompute from the payload so a corrupted payload with an
        // intact digest file still fails verification.
        let payload = match self.get(id).await? {
            Some(bytes) => bytes,
            None => return Ok(false),
        };
        let recomputed = digest_bytes(&payload);
        if recomputed != expected_digest {
            warn!(
                "Payload corruption for record {}: recomputed {}, expected {}",
                id, recomputed, expected_digest
            );
            return Ok(false);
        }

        Ok(true)
    }
}
