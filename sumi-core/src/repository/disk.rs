//! # Disk-backed textures
//!
//! One fixed-size raw-byte file per record in a dedicated directory, named by the
//! id's hex form, no header - the session extent implies the length. File I/O runs
//! on the blocking pool; callers uphold the same per-id serialization contract as
//! every other backend.

use std::path::{Path, PathBuf};

use super::{check_len, downsample, TextureError, Textures, Thumbnail};
use crate::{texture::Extent, TextureId};

pub struct DiskTextures {
    extent: Extent,
    dir: PathBuf,
    thumbnails: tokio::sync::broadcast::Sender<Thumbnail>,
}
impl DiskTextures {
    const THUMBNAIL_CAPACITY: usize = 16;

    /// Open the repository rooted at `dir`, validating its contents against the
    /// layer ids the session expects. Returns the repository and whether the
    /// on-disk set was `resumed`: the file-name set must *exactly* equal
    /// `expected`, otherwise everything present is discarded and the caller
    /// starts from a blank layer.
    ///
    /// The check is deliberately coarse - names only, no per-file checksum - so
    /// partial-write corruption from a crash is undetectable here. A latent gap
    /// inherited from the design, recorded in DESIGN.md.
    pub async fn open(
        dir: PathBuf,
        extent: Extent,
        expected: &[TextureId],
    ) -> Result<(Self, bool), TextureError> {
        let expected: hashbrown::HashSet<TextureId> = expected.iter().copied().collect();
        let scan_dir = dir.clone();
        let resumed = tokio::task::spawn_blocking(move || -> Result<bool, TextureError> {
            std::fs::create_dir_all(&scan_dir)?;
            let mut present = hashbrown::HashSet::new();
            let mut foreign = Vec::new();
            for entry in std::fs::read_dir(&scan_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                match entry
                    .file_name()
                    .to_str()
                    .and_then(TextureId::from_file_name)
                {
                    Some(id) => {
                        present.insert(id);
                    }
                    // A file we didn't write. Its presence alone fails validity.
                    None => foreign.push(entry.path()),
                }
            }
            if foreign.is_empty() && !expected.is_empty() && present == expected {
                Ok(true)
            } else {
                if !present.is_empty() || !foreign.is_empty() {
                    log::warn!(
                        "texture store {} does not match the expected layer set, reinitializing",
                        scan_dir.display()
                    );
                }
                wipe(&scan_dir)?;
                Ok(false)
            }
        })
        .await
        .map_err(join_error)??;

        let (thumbnails, _) = tokio::sync::broadcast::channel(Self::THUMBNAIL_CAPACITY);
        Ok((
            Self {
                extent,
                dir,
                thumbnails,
            },
            resumed,
        ))
    }
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
    fn path_of(&self, id: TextureId) -> PathBuf {
        self.dir.join(id.file_name())
    }
    fn emit_thumbnail(&self, id: TextureId, bytes: &[u8]) {
        if self.thumbnails.receiver_count() > 0 {
            let _ = self.thumbnails.send(downsample(id, self.extent, bytes));
        }
    }
    /// Write-to-temp-then-rename, so a record is either the old bytes or the new
    /// bytes - never a torn intermediate.
    async fn persist(&self, id: TextureId, bytes: Vec<u8>) -> Result<Vec<u8>, TextureError> {
        check_len(self.extent, &bytes)?;
        let path = self.path_of(id);
        let tmp = path.with_extension("tmp");
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TextureError> {
            std::fs::write(&tmp, &bytes)?;
            std::fs::rename(&tmp, &path)?;
            Ok(bytes)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait::async_trait]
impl Textures for DiskTextures {
    fn extent(&self) -> Extent {
        self.extent
    }
    async fn create(&self, id: TextureId, bytes: Vec<u8>) -> Result<(), TextureError> {
        let bytes = self.persist(id, bytes).await?;
        self.emit_thumbnail(id, &bytes);
        Ok(())
    }
    async fn read(&self, id: TextureId) -> Result<Vec<u8>, TextureError> {
        let path = self.path_of(id);
        let extent = self.extent;
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TextureError> {
            let bytes = std::fs::read(&path).map_err(|e| not_found(e, id))?;
            check_len(extent, &bytes)?;
            Ok(bytes)
        })
        .await
        .map_err(join_error)?
    }
    async fn update(&self, id: TextureId, bytes: Vec<u8>) -> Result<(), TextureError> {
        // Existence check up front: update must not create.
        let probe = self.path_of(id);
        let exists = tokio::task::spawn_blocking(move || probe.exists())
            .await
            .map_err(join_error)?;
        if !exists {
            return Err(TextureError::NotFound(id));
        }
        let bytes = self.persist(id, bytes).await?;
        self.emit_thumbnail(id, &bytes);
        Ok(())
    }
    async fn remove(&self, id: TextureId) -> Result<(), TextureError> {
        let path = self.path_of(id);
        tokio::task::spawn_blocking(move || -> Result<(), TextureError> {
            std::fs::remove_file(&path).map_err(|e| not_found(e, id))
        })
        .await
        .map_err(join_error)?
    }
    async fn remove_all(&self) -> Result<(), TextureError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || wipe(&dir))
            .await
            .map_err(join_error)?
    }
    async fn has_all(&self, ids: &[TextureId]) -> Result<bool, TextureError> {
        let paths: Vec<PathBuf> = ids.iter().map(|&id| self.path_of(id)).collect();
        tokio::task::spawn_blocking(move || paths.iter().all(|path| path.exists()))
            .await
            .map_err(join_error)
    }
    fn thumbnails(&self) -> tokio::sync::broadcast::Receiver<Thumbnail> {
        self.thumbnails.subscribe()
    }
}

/// Remove every plain file directly inside `dir`, leaving the directory itself.
fn wipe(dir: &Path) -> Result<(), TextureError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn not_found(e: std::io::Error, id: TextureId) -> TextureError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TextureError::NotFound(id)
    } else {
        TextureError::Unavailable(e)
    }
}

/// A blocking task panicked or was cancelled at runtime shutdown.
fn join_error(e: tokio::task::JoinError) -> TextureError {
    TextureError::Unavailable(std::io::Error::other(e))
}

#[cfg(test)]
mod test {
    use super::*;

    fn extent() -> Extent {
        Extent::new(16, 16).unwrap()
    }
    async fn fresh(dir: &Path) -> DiskTextures {
        let (repo, resumed) = DiskTextures::open(dir.to_path_buf(), extent(), &[])
            .await
            .unwrap();
        assert!(!resumed);
        repo
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = fresh(tmp.path()).await;
        let id = TextureId::random();
        let bytes = vec![3u8; extent().byte_len()];

        repo.create(id, bytes.clone()).await.unwrap();
        assert_eq!(repo.read(id).await.unwrap(), bytes);

        let updated = vec![5u8; extent().byte_len()];
        repo.update(id, updated.clone()).await.unwrap();
        assert_eq!(repo.read(id).await.unwrap(), updated);

        repo.remove(id).await.unwrap();
        assert!(matches!(
            repo.read(id).await,
            Err(TextureError::NotFound(_))
        ));
    }
    #[tokio::test]
    async fn update_requires_existing_record() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = fresh(tmp.path()).await;
        let result = repo
            .update(TextureId::random(), vec![0; extent().byte_len()])
            .await;
        assert!(matches!(result, Err(TextureError::NotFound(_))));
    }
    #[tokio::test]
    async fn truncated_record_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = fresh(tmp.path()).await;
        let id = TextureId::random();
        repo.create_blank(id).await.unwrap();

        // Truncate the file behind the repository's back.
        std::fs::write(tmp.path().join(id.file_name()), [0u8; 12]).unwrap();
        assert!(matches!(
            repo.read(id).await,
            Err(TextureError::SizeMismatch {
                actual: 12,
                ..
            })
        ));
    }
    #[tokio::test]
    async fn reopen_resumes_matching_set() {
        let tmp = tempfile::tempdir().unwrap();
        let ids = [TextureId::random(), TextureId::random()];
        {
            let repo = fresh(tmp.path()).await;
            for id in ids {
                repo.create_blank(id).await.unwrap();
            }
        }
        let (repo, resumed) = DiskTextures::open(tmp.path().to_path_buf(), extent(), &ids)
            .await
            .unwrap();
        assert!(resumed);
        assert!(repo.has_all(&ids).await.unwrap());
    }
    #[tokio::test]
    async fn mismatched_set_reinitializes() {
        let tmp = tempfile::tempdir().unwrap();
        let ids = [TextureId::random(), TextureId::random()];
        {
            let repo = fresh(tmp.path()).await;
            // Only one of the two expected records is present.
            repo.create_blank(ids[0]).await.unwrap();
        }
        let (repo, resumed) = DiskTextures::open(tmp.path().to_path_buf(), extent(), &ids)
            .await
            .unwrap();
        assert!(!resumed);
        // The store was wiped clean.
        assert!(!repo.has_all(&ids[..1]).await.unwrap());
    }
    #[tokio::test]
    async fn foreign_file_fails_validity() {
        let tmp = tempfile::tempdir().unwrap();
        let id = TextureId::random();
        {
            let repo = fresh(tmp.path()).await;
            repo.create_blank(id).await.unwrap();
        }
        std::fs::write(tmp.path().join("stray.dat"), b"?").unwrap();
        let (_, resumed) = DiskTextures::open(tmp.path().to_path_buf(), extent(), &[id])
            .await
            .unwrap();
        assert!(!resumed);
    }
}
