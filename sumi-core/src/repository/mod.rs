//! # Texture repository
//!
//! Async keyed CRUD for per-layer raster bytes. Two interchangeable backends share
//! the [`Textures`] contract: [`MemoryTextures`] (non-durable, also the usual home
//! of undo snapshots) and [`disk::DiskTextures`] (one raw file per record).
//!
//! Concurrency contract: operations on *different* ids may run concurrently;
//! operations on the *same* id must be serialized by the caller. The repository
//! performs no per-id locking - the one-stroke-at-a-time drawing discipline
//! provides the serialization.

pub mod disk;
pub use disk::DiskTextures;

use crate::{
    texture::{Extent, ExtentError, BYTES_PER_PIXEL},
    TextureId,
};

/// Longest edge of an emitted thumbnail, pixels.
pub const THUMBNAIL_EDGE: u32 = 128;

#[derive(thiserror::Error, Debug)]
pub enum TextureError {
    #[error("texture {0} not found")]
    NotFound(TextureId),
    /// The stored byte length disagrees with the session extent - a corrupt or
    /// stale record. Callers substitute a blank texture and log.
    #[error("texture has {actual} bytes where {expected} were expected")]
    SizeMismatch { expected: usize, actual: usize },
    /// The backend itself failed. No rollback of previously persisted state is
    /// attempted.
    #[error("texture backend unavailable")]
    Unavailable(#[from] std::io::Error),
    #[error("invalid canvas configuration: {0}")]
    InvalidConfiguration(#[from] ExtentError),
}

/// A downsampled preview, emitted on every update. Carries no durability
/// guarantee - lagging subscribers simply miss frames.
#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    /// RGBA8, premultiplied, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

/// The repository contract. All operations are fallible and async; backends may
/// complete them on background executors, so consumers that mutate shared state
/// re-marshal onto the coordinating context.
#[async_trait::async_trait]
pub trait Textures: Send + Sync {
    /// The fixed extent every record of this repository must match.
    fn extent(&self) -> Extent;
    /// Insert a new record. The bytes must be exactly `extent().byte_len()` long.
    async fn create(&self, id: TextureId, bytes: Vec<u8>) -> Result<(), TextureError>;
    async fn read(&self, id: TextureId) -> Result<Vec<u8>, TextureError>;
    /// Replace an existing record atomically. Fails with [`TextureError::NotFound`]
    /// if absent - use [`Self::create`] for new records.
    async fn update(&self, id: TextureId, bytes: Vec<u8>) -> Result<(), TextureError>;
    async fn remove(&self, id: TextureId) -> Result<(), TextureError>;
    async fn remove_all(&self) -> Result<(), TextureError>;
    /// Read several records, in the order of `ids`. Fails on the first error.
    async fn read_many(&self, ids: &[TextureId]) -> Result<Vec<Vec<u8>>, TextureError> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(self.read(id).await?);
        }
        Ok(out)
    }
    /// Does the repository hold a record for every one of `ids`? Used at session
    /// start to choose between resuming existing layers and starting blank.
    async fn has_all(&self, ids: &[TextureId]) -> Result<bool, TextureError>;
    /// Subscribe to the thumbnail side channel.
    fn thumbnails(&self) -> tokio::sync::broadcast::Receiver<Thumbnail>;
    /// Convenience: a new all-transparent record.
    async fn create_blank(&self, id: TextureId) -> Result<(), TextureError> {
        self.create(id, vec![0; self.extent().byte_len()]).await
    }
}

/// Reject bytes whose length disagrees with the session extent.
fn check_len(extent: Extent, bytes: &[u8]) -> Result<(), TextureError> {
    if bytes.len() == extent.byte_len() {
        Ok(())
    } else {
        Err(TextureError::SizeMismatch {
            expected: extent.byte_len(),
            actual: bytes.len(),
        })
    }
}

/// Box-filter `bytes` down so the longest edge is at most [`THUMBNAIL_EDGE`].
/// Premultiplied channels average componentwise, so no unmultiply round trip.
fn downsample(id: TextureId, extent: Extent, bytes: &[u8]) -> Thumbnail {
    let step = (extent.width().max(extent.height()) + THUMBNAIL_EDGE - 1) / THUMBNAIL_EDGE;
    let step = step.max(1);
    let out_w = (extent.width() / step).max(1);
    let out_h = (extent.height() / step).max(1);

    let mut pixels = Vec::with_capacity(out_w as usize * out_h as usize * BYTES_PER_PIXEL);
    let row_len = extent.width() as usize * BYTES_PER_PIXEL;
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut acc = [0u32; 4];
            for dy in 0..step {
                let y = (oy * step + dy) as usize;
                for dx in 0..step {
                    let x = (ox * step + dx) as usize;
                    let base = y * row_len + x * BYTES_PER_PIXEL;
                    for (channel, value) in acc.iter_mut().zip(&bytes[base..base + 4]) {
                        *channel += u32::from(*value);
                    }
                }
            }
            let area = step * step;
            pixels.extend(acc.iter().map(|&channel| (channel / area) as u8));
        }
    }
    Thumbnail {
        id,
        width: out_w,
        height: out_h,
        pixels,
    }
}

/// Keyed in-memory backend. Non-durable; contents vanish with the value. This is
/// also the usual backend for the undo snapshot store.
pub struct MemoryTextures {
    extent: Extent,
    records: parking_lot::RwLock<hashbrown::HashMap<TextureId, Vec<u8>>>,
    thumbnails: tokio::sync::broadcast::Sender<Thumbnail>,
}
impl MemoryTextures {
    /// Previews are transient; a small buffer is plenty.
    const THUMBNAIL_CAPACITY: usize = 16;

    #[must_use]
    pub fn new(extent: Extent) -> Self {
        let (thumbnails, _) = tokio::sync::broadcast::channel(Self::THUMBNAIL_CAPACITY);
        Self {
            extent,
            records: parking_lot::RwLock::default(),
            thumbnails,
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
    fn emit_thumbnail(&self, id: TextureId, bytes: &[u8]) {
        // Skip the downsample entirely when nobody is listening.
        if self.thumbnails.receiver_count() > 0 {
            let _ = self.thumbnails.send(downsample(id, self.extent, bytes));
        }
    }
}
#[async_trait::async_trait]
impl Textures for MemoryTextures {
    fn extent(&self) -> Extent {
        self.extent
    }
    async fn create(&self, id: TextureId, bytes: Vec<u8>) -> Result<(), TextureError> {
        check_len(self.extent, &bytes)?;
        self.emit_thumbnail(id, &bytes);
        self.records.write().insert(id, bytes);
        Ok(())
    }
    async fn read(&self, id: TextureId) -> Result<Vec<u8>, TextureError> {
        let records = self.records.read();
        let bytes = records.get(&id).ok_or(TextureError::NotFound(id))?;
        check_len(self.extent, bytes)?;
        Ok(bytes.clone())
    }
    async fn update(&self, id: TextureId, bytes: Vec<u8>) -> Result<(), TextureError> {
        check_len(self.extent, &bytes)?;
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(TextureError::NotFound(id))?;
        *record = bytes;
        self.emit_thumbnail(id, record);
        Ok(())
    }
    async fn remove(&self, id: TextureId) -> Result<(), TextureError> {
        self.records
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(TextureError::NotFound(id))
    }
    async fn remove_all(&self) -> Result<(), TextureError> {
        self.records.write().clear();
        Ok(())
    }
    async fn has_all(&self, ids: &[TextureId]) -> Result<bool, TextureError> {
        let records = self.records.read();
        Ok(ids.iter().all(|id| records.contains_key(id)))
    }
    fn thumbnails(&self) -> tokio::sync::broadcast::Receiver<Thumbnail> {
        self.thumbnails.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::texture::Texture;

    fn extent() -> Extent {
        Extent::new(16, 16).unwrap()
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let repo = MemoryTextures::new(extent());
        let id = TextureId::random();
        let bytes = vec![7u8; extent().byte_len()];

        repo.create(id, bytes.clone()).await.unwrap();
        assert_eq!(repo.read(id).await.unwrap(), bytes);

        let updated = vec![9u8; extent().byte_len()];
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
        let repo = MemoryTextures::new(extent());
        let id = TextureId::random();
        let result = repo.update(id, vec![0; extent().byte_len()]).await;
        assert!(matches!(result, Err(TextureError::NotFound(other)) if other == id));
    }
    #[tokio::test]
    async fn length_mismatch_is_corrupt() {
        let repo = MemoryTextures::new(extent());
        let id = TextureId::random();
        let result = repo.create(id, vec![0; 3]).await;
        assert!(matches!(
            result,
            Err(TextureError::SizeMismatch {
                expected,
                actual: 3,
            }) if expected == extent().byte_len()
        ));
    }
    #[tokio::test]
    async fn has_all_and_read_many() {
        let repo = MemoryTextures::new(extent());
        let ids = [TextureId::random(), TextureId::random()];
        for id in ids {
            repo.create_blank(id).await.unwrap();
        }
        assert!(repo.has_all(&ids).await.unwrap());
        assert!(!repo.has_all(&[ids[0], TextureId::random()]).await.unwrap());

        let many = repo.read_many(&ids).await.unwrap();
        assert_eq!(many.len(), 2);
        assert!(many.iter().all(|bytes| bytes.len() == extent().byte_len()));
    }
    #[tokio::test]
    async fn remove_all_empties() {
        let repo = MemoryTextures::new(extent());
        for _ in 0..4 {
            repo.create_blank(TextureId::random()).await.unwrap();
        }
        assert_eq!(repo.len(), 4);
        repo.remove_all().await.unwrap();
        assert!(repo.is_empty());
    }
    #[tokio::test]
    async fn thumbnails_emit_on_update() {
        let repo = MemoryTextures::new(extent());
        let id = TextureId::random();
        repo.create_blank(id).await.unwrap();

        let mut thumbnails = repo.thumbnails();
        let mut texture = Texture::blank(extent());
        texture.fill([255, 0, 0, 255]);
        repo.update(id, texture.into_bytes()).await.unwrap();

        let thumbnail = thumbnails.try_recv().unwrap();
        assert_eq!(thumbnail.id, id);
        assert!(thumbnail.width <= THUMBNAIL_EDGE && thumbnail.height <= THUMBNAIL_EDGE);
        assert_eq!(
            thumbnail.pixels.len(),
            thumbnail.width as usize * thumbnail.height as usize * 4
        );
        // A solid red source downsamples to solid red.
        assert_eq!(&thumbnail.pixels[..4], &[255, 0, 0, 255]);
    }
    #[test]
    fn downsample_shrinks_to_edge() {
        let extent = Extent::new(512, 256).unwrap();
        let bytes = vec![128u8; extent.byte_len()];
        let thumb = downsample(TextureId::random(), extent, &bytes);
        assert_eq!(thumb.width, 128);
        assert_eq!(thumb.height, 64);
        assert!(thumb.pixels.iter().all(|&b| b == 128));
    }
}
