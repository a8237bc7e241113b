//! # Undo/redo
//!
//! Texture-snapshot history. Every completed stroke contributes one record holding
//! the affected layer's *pre-stroke* bytes, captured before any pixel was touched
//! and stored in a secondary snapshot repository (usually the in-memory backend -
//! history does not survive the session). The redo half of a record is captured
//! lazily, at the moment undo is invoked, making redo structurally symmetric.
//!
//! Depth is bounded. Eviction releases a record's backing snapshots from the
//! snapshot repository *exactly once*: a snapshot id lives in exactly one record,
//! and release happens by consuming the record - an explicit eviction list rather
//! than anything tied to drop timing.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    repository::{TextureError, Textures},
    TextureId,
};

/// Default bound on undo depth.
pub const DEFAULT_DEPTH: usize = 8;

struct Record {
    /// The layer this stroke drew into.
    layer: TextureId,
    /// Pre-stroke bytes, captured at stroke begin.
    undo: TextureId,
    /// Post-stroke bytes, captured lazily by the first undo over this record.
    redo: Option<TextureId>,
}

pub struct History {
    /// Primary repository - committed layer textures.
    layers: Arc<dyn Textures>,
    /// Secondary repository - snapshot storage, possibly a different backend.
    snapshots: Arc<dyn Textures>,
    records: VecDeque<Record>,
    /// How many records are currently applied. Everything at `cursor..` is the
    /// redo side.
    cursor: usize,
    depth: usize,
}
impl History {
    #[must_use]
    pub fn new(layers: Arc<dyn Textures>, snapshots: Arc<dyn Textures>, depth: usize) -> Self {
        Self {
            layers,
            snapshots,
            records: VecDeque::with_capacity(depth.min(64)),
            cursor: 0,
            depth,
        }
    }
    /// Strokes currently undoable.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.cursor
    }
    /// Strokes currently redoable.
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.records.len() - self.cursor
    }

    /// Snapshot `layer`'s current bytes into the snapshot repository. Call at
    /// stroke begin, *before* any pixel is modified; pass the returned id to
    /// [`Self::commit`] when the stroke completes, or [`Self::discard`] if it
    /// is preempted or cancelled.
    pub async fn capture(&self, layer: TextureId) -> Result<TextureId, TextureError> {
        let bytes = self.layers.read(layer).await?;
        let id = TextureId::random();
        self.snapshots.create(id, bytes).await?;
        Ok(id)
    }
    /// Release a captured snapshot that never became a record.
    pub async fn discard(&self, snapshot: TextureId) {
        if let Err(e) = self.snapshots.remove(snapshot).await {
            log::warn!("failed to release discarded snapshot {snapshot}: {e}");
        }
    }
    /// Record a completed stroke. Discards any redo branch, then evicts the
    /// oldest records beyond the depth bound, releasing their snapshots.
    pub async fn commit(&mut self, layer: TextureId, snapshot: TextureId) {
        while self.records.len() > self.cursor {
            // Redo branch is dead the moment a new stroke lands.
            if let Some(record) = self.records.pop_back() {
                self.release(record).await;
            }
        }
        self.records.push_back(Record {
            layer,
            undo: snapshot,
            redo: None,
        });
        self.cursor = self.records.len();
        while self.records.len() > self.depth {
            if let Some(record) = self.records.pop_front() {
                self.release(record).await;
                self.cursor -= 1;
            }
        }
    }
    /// Step one record back, restoring the pre-stroke texture. Returns `false`
    /// if there is nothing to undo. A record whose snapshot is missing or
    /// corrupt is skipped with a logged error - the pointer advances regardless,
    /// so a broken entry can never wedge the history.
    pub async fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let index = self.cursor;
        if let Err(e) = self.apply_undo(index).await {
            let layer = self.records[index].layer;
            log::error!("undo of layer {layer} failed, skipping entry: {e}");
        }
        true
    }
    /// Step one record forward again. Symmetric to [`Self::undo`].
    pub async fn redo(&mut self) -> bool {
        if self.cursor == self.records.len() {
            return false;
        }
        let index = self.cursor;
        self.cursor += 1;
        if let Err(e) = self.apply_redo(index).await {
            let layer = self.records[index].layer;
            log::error!("redo of layer {layer} failed, skipping entry: {e}");
        }
        true
    }

    async fn apply_undo(&mut self, index: usize) -> Result<(), TextureError> {
        let (layer, undo) = {
            let record = &self.records[index];
            (record.layer, record.undo)
        };
        // Lazily capture the redo half before the layer is overwritten.
        if self.records[index].redo.is_none() {
            let current = self.layers.read(layer).await?;
            let redo = TextureId::random();
            self.snapshots.create(redo, current).await?;
            self.records[index].redo = Some(redo);
        }
        let bytes = self.snapshots.read(undo).await?;
        self.layers.update(layer, bytes).await
    }
    async fn apply_redo(&mut self, index: usize) -> Result<(), TextureError> {
        let record = &self.records[index];
        let layer = record.layer;
        // Only reachable after an undo stepped over this record, which captured
        // the redo half. Missing means that capture failed; nothing to restore.
        let Some(redo) = record.redo else {
            return Err(TextureError::NotFound(record.undo));
        };
        let bytes = self.snapshots.read(redo).await?;
        self.layers.update(layer, bytes).await
    }
    /// Consume a record, releasing its snapshots. Sole owner: each snapshot id
    /// lives in exactly one record, so each release happens exactly once.
    async fn release(&self, record: Record) {
        if let Err(e) = self.snapshots.remove(record.undo).await {
            log::warn!("failed to release undo snapshot {}: {e}", record.undo);
        }
        if let Some(redo) = record.redo {
            if let Err(e) = self.snapshots.remove(redo).await {
                log::warn!("failed to release redo snapshot {redo}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        repository::MemoryTextures,
        texture::Extent,
    };

    fn extent() -> Extent {
        Extent::new(16, 16).unwrap()
    }
    fn repos() -> (Arc<MemoryTextures>, Arc<MemoryTextures>) {
        (
            Arc::new(MemoryTextures::new(extent())),
            Arc::new(MemoryTextures::new(extent())),
        )
    }
    fn bytes_of(value: u8) -> Vec<u8> {
        vec![value; extent().byte_len()]
    }
    /// Paint `layer` to a solid value as one recorded stroke.
    async fn stroke(
        history: &mut History,
        layers: &Arc<MemoryTextures>,
        layer: TextureId,
        value: u8,
    ) {
        let snapshot = history.capture(layer).await.unwrap();
        layers.update(layer, bytes_of(value)).await.unwrap();
        history.commit(layer, snapshot).await;
    }

    #[tokio::test]
    async fn undo_redo_are_byte_exact() {
        let (layers, snapshots) = repos();
        let layer = TextureId::random();
        layers.create(layer, bytes_of(0)).await.unwrap();

        let mut history = History::new(layers.clone(), snapshots, DEFAULT_DEPTH);
        for value in 1..=4u8 {
            stroke(&mut history, &layers, layer, value).await;
        }
        // Four undos restore the pre-stroke-1 bytes...
        for _ in 0..4 {
            assert!(history.undo().await);
        }
        assert!(!history.undo().await);
        assert_eq!(layers.read(layer).await.unwrap(), bytes_of(0));
        // ...and four redos restore the post-stroke-4 bytes.
        for _ in 0..4 {
            assert!(history.redo().await);
        }
        assert!(!history.redo().await);
        assert_eq!(layers.read(layer).await.unwrap(), bytes_of(4));
    }
    #[tokio::test]
    async fn depth_bound_evicts_and_releases_oldest() {
        let (layers, snapshots) = repos();
        let layer = TextureId::random();
        layers.create(layer, bytes_of(0)).await.unwrap();

        let mut history = History::new(layers.clone(), snapshots.clone(), 8);
        // Keep the first stroke's snapshot id to watch it get released.
        let first_snapshot = history.capture(layer).await.unwrap();
        layers.update(layer, bytes_of(1)).await.unwrap();
        history.commit(layer, first_snapshot).await;
        for value in 2..=9u8 {
            stroke(&mut history, &layers, layer, value).await;
        }

        // Nine strokes at depth eight: only eight recoverable.
        let mut undos = 0;
        while history.undo().await {
            undos += 1;
        }
        assert_eq!(undos, 8);
        // The oldest stroke survived every undo...
        assert_eq!(layers.read(layer).await.unwrap(), bytes_of(1));
        // ...and its snapshot was released from the secondary repository.
        assert!(matches!(
            snapshots.read(first_snapshot).await,
            Err(TextureError::NotFound(_))
        ));
    }
    #[tokio::test]
    async fn new_stroke_discards_redo_branch() {
        let (layers, snapshots) = repos();
        let layer = TextureId::random();
        layers.create(layer, bytes_of(0)).await.unwrap();

        let mut history = History::new(layers.clone(), snapshots.clone(), 8);
        stroke(&mut history, &layers, layer, 1).await;
        stroke(&mut history, &layers, layer, 2).await;
        assert!(history.undo().await);
        assert_eq!(history.redo_depth(), 1);

        // A fresh stroke kills the branch.
        stroke(&mut history, &layers, layer, 3).await;
        assert_eq!(history.redo_depth(), 0);
        assert!(!history.redo().await);
        assert_eq!(layers.read(layer).await.unwrap(), bytes_of(3));
        // One live snapshot per remaining record (the discarded record's undo
        // and redo snapshots are both gone).
        assert_eq!(snapshots.len(), history.undo_depth());
    }
    #[tokio::test]
    async fn broken_entry_is_skipped_not_sticky() {
        let (layers, snapshots) = repos();
        let layer = TextureId::random();
        layers.create(layer, bytes_of(0)).await.unwrap();

        let mut history = History::new(layers.clone(), snapshots.clone(), 8);
        let snapshot = history.capture(layer).await.unwrap();
        layers.update(layer, bytes_of(1)).await.unwrap();
        history.commit(layer, snapshot).await;
        stroke(&mut history, &layers, layer, 2).await;

        // Corrupt the older record's snapshot behind history's back.
        snapshots.remove(snapshot).await.unwrap();

        assert!(history.undo().await);
        assert_eq!(layers.read(layer).await.unwrap(), bytes_of(1));
        // This undo fails internally, but the pointer still advances.
        assert!(history.undo().await);
        assert_eq!(history.undo_depth(), 0);
        assert!(!history.undo().await);
        // The layer keeps the last successfully restored bytes.
        assert_eq!(layers.read(layer).await.unwrap(), bytes_of(1));
    }
    #[tokio::test]
    async fn discard_releases_pending_snapshot() {
        let (layers, snapshots) = repos();
        let layer = TextureId::random();
        layers.create(layer, bytes_of(0)).await.unwrap();

        let history = History::new(layers, snapshots.clone(), 8);
        let snapshot = history.capture(layer).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        history.discard(snapshot).await;
        assert!(snapshots.is_empty());
    }
}
