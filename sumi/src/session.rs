//! # Session
//!
//! The composition root. A session owns the repositories, layer stack, history,
//! and compositor outright - no process-wide singletons - and runs them on one
//! coordinating context: every consumer of async repository results re-marshals
//! here before touching the stack or the composite caches.
//!
//! Stroke lifecycle: begin captures the pre-stroke snapshot (before any pixel is
//! touched) and starts the frame ticker; each tick stamps newly emitted curve
//! vertices into the live texture and recomposes; end flushes the curve, writes
//! the repository exactly once, and records the undo entry. Pen input preempts a
//! finger stroke, discarding its partial raster and pending snapshot.

use std::sync::Arc;

use anyhow::Context;
use sumi_core::{
    curve::{CurveGenerator, CurveVertex, StrokeStyle},
    history::History,
    layers::{Layer, LayerPatch, LayerStack, StackEvent},
    repository::{DiskTextures, MemoryTextures, TextureError, Textures, Thumbnail},
    texture::{Extent, Texture},
    touch::{TouchPoint, TouchSource},
    TextureId,
};

use crate::{
    compositor::{Compositor, MergeSource},
    config::{Backend, Preferences},
    frame::FrameTicker,
    input::{InputAction, Normalizer, StrokeId, ViewGesture},
    raster::{Paint, StrokeMask},
    view_transform::ViewTransform,
};

/// The canvas's own fill - opaque white, premultiplied.
const CANVAS_BACKGROUND: [u8; 4] = [255, 255, 255, 255];
/// Out-of-canvas space at present time, visually distinct from the canvas fill.
pub const VOID_COLOR: [u8; 4] = [54, 57, 62, 255];

/// Everything belonging to the one stroke currently in flight.
struct InProgress {
    id: StrokeId,
    source: TouchSource,
    generator: CurveGenerator,
    /// Append-only vertex stream; `stamped` marks how far the mask has consumed.
    vertices: Vec<CurveVertex>,
    stamped: usize,
    mask: StrokeMask,
    live: Texture,
    /// Pre-stroke snapshot id, or `None` if the capture failed - the stroke
    /// still draws, it just won't be undoable.
    snapshot: Option<TextureId>,
    paint: Paint,
}

pub struct Session {
    extent: Extent,
    textures: Arc<dyn Textures>,
    stack: LayerStack,
    stack_events: tokio::sync::broadcast::Receiver<StackEvent>,
    history: History,
    compositor: Compositor,
    view: ViewTransform,
    normalizer: Normalizer,
    frame: FrameTicker,
    /// Resident committed bytes of the selected layer.
    selected_committed: Texture,
    stroke: Option<InProgress>,
    brush_style: StrokeStyle,
    paint: Paint,
}

impl Session {
    /// Open a session per the preferences, resuming `manifest` if the backend
    /// still holds exactly its texture set, else starting from a single blank
    /// layer. Failure to create that initial blank texture is the one fatal
    /// error in the system - without a canvas nothing else can function.
    pub async fn open(preferences: &Preferences, manifest: Vec<Layer>) -> anyhow::Result<Self> {
        let extent = preferences
            .extent()
            .map_err(TextureError::from)
            .context("canvas configuration")?;
        let (textures, resumed): (Arc<dyn Textures>, bool) = match preferences.storage.backend {
            Backend::Memory => (Arc::new(MemoryTextures::new(extent)), false),
            Backend::Disk => {
                let ids: Vec<TextureId> = manifest.iter().map(|layer| layer.id).collect();
                let (repository, resumed) =
                    DiskTextures::open(preferences.storage_dir(), extent, &ids)
                        .await
                        .context("opening texture store")?;
                (Arc::new(repository), resumed)
            }
        };
        let stack = if resumed {
            LayerStack::from_manifest(manifest).context("layer manifest is invalid")?
        } else {
            let layer = Layer::new("Background");
            textures
                .create_blank(layer.id)
                .await
                .context("failed to create the initial blank texture")?;
            LayerStack::new(layer)
        };
        let snapshots: Arc<dyn Textures> = Arc::new(MemoryTextures::new(extent));
        Self::assemble(preferences, textures, snapshots, stack).await
    }

    /// Wire up a session from already-constructed parts.
    async fn assemble(
        preferences: &Preferences,
        textures: Arc<dyn Textures>,
        snapshots: Arc<dyn Textures>,
        stack: LayerStack,
    ) -> anyhow::Result<Self> {
        let extent = textures.extent();
        let stack_events = stack.subscribe();
        let history = History::new(textures.clone(), snapshots, preferences.history.depth);
        let selected_committed = read_or_blank(&*textures, extent, stack.selected().id).await;
        let mut session = Self {
            extent,
            textures,
            stack,
            stack_events,
            history,
            compositor: Compositor::new(extent, CANVAS_BACKGROUND),
            view: ViewTransform::identity(),
            normalizer: Normalizer::new(),
            frame: FrameTicker::new(preferences.frame.refresh_hz),
            selected_committed,
            stroke: None,
            brush_style: StrokeStyle {
                diameter: preferences.brush.diameter,
                blur: preferences.brush.blur,
            },
            paint: Paint::brush([0.0, 0.0, 0.0, 1.0]),
        };
        session.sync_composite().await;
        Ok(session)
    }

    #[must_use]
    pub fn extent(&self) -> Extent {
        self.extent
    }
    /// The most recently composed canvas.
    #[must_use]
    pub fn canvas(&self) -> &Texture {
        self.compositor.canvas()
    }
    #[must_use]
    pub fn layers(&self) -> &LayerStack {
        &self.stack
    }
    #[must_use]
    pub fn view(&self) -> &ViewTransform {
        &self.view
    }
    /// Replace the view transform outright (e.g. a fit-to-viewport reset).
    pub fn set_view(&mut self, view: ViewTransform) {
        self.view = view;
    }
    /// Subscribe to the primary repository's thumbnail side channel.
    #[must_use]
    pub fn thumbnails(&self) -> tokio::sync::broadcast::Receiver<Thumbnail> {
        self.textures.thumbnails()
    }
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.history.undo_depth()
    }
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.history.redo_depth()
    }
    /// Paint for subsequent strokes (current strokes keep theirs).
    pub fn set_paint(&mut self, paint: Paint) {
        self.paint = paint;
    }
    /// Stroke shape for subsequent strokes.
    pub fn set_brush_style(&mut self, style: StrokeStyle) {
        self.brush_style = style;
    }
    /// Present the canvas through the current view transform.
    pub fn present(&self, viewport: Extent) -> Texture {
        match self.compositor.present(&self.view, viewport, VOID_COLOR) {
            Ok(texture) => texture,
            Err(e) => {
                // Degenerate view transform; show only void rather than fail.
                log::error!("view transform is unusable, presenting void: {e}");
                let mut out = Texture::blank(viewport);
                out.fill(VOID_COLOR);
                out
            }
        }
    }

    /// Actor loop: consume raw input until the channel closes, pacing live
    /// raster updates with the frame ticker (which only runs mid-stroke).
    pub async fn run(&mut self, mut input: tokio::sync::mpsc::UnboundedReceiver<TouchPoint>) {
        loop {
            tokio::select! {
                biased;
                point = input.recv() => match point {
                    Some(point) => self.ingest(point).await,
                    None => return,
                },
                () = self.frame.tick() => self.tick_frame().await,
            }
        }
    }

    /// Feed one raw input sample through classification.
    pub async fn ingest(&mut self, point: TouchPoint) {
        for action in self.normalizer.feed(point) {
            self.handle(action).await;
        }
    }
    /// Apply one classified action.
    pub async fn handle(&mut self, action: InputAction) {
        log::trace!("input action: {}", action.as_ref());
        match action {
            InputAction::StrokeBegan { id, source, point } => {
                self.begin_stroke(id, source, point).await;
            }
            InputAction::StrokeMoved { id, point } => self.extend_stroke(id, point),
            InputAction::StrokeEnded { id, point } => {
                self.extend_stroke(id, point);
                self.commit_stroke(id).await;
            }
            InputAction::StrokeCancelled { id } => self.cancel_stroke(id).await,
            InputAction::Transform(gesture) => self.apply_gesture(gesture),
        }
    }

    /// One frame: stamp freshly emitted vertices into the live texture, then
    /// recompose. Driven by the ticker during a stroke; callable directly by
    /// anything that needs the canvas brought up to date.
    pub async fn tick_frame(&mut self) {
        if let Some(stroke) = &mut self.stroke {
            if stroke.stamped < stroke.vertices.len() {
                stroke.mask.stamp(&stroke.vertices[stroke.stamped..]);
                stroke.stamped = stroke.vertices.len();
                stroke
                    .mask
                    .apply(&self.selected_committed, stroke.paint, &mut stroke.live);
            }
        }
        self.sync_composite().await;
    }

    /// Step the history back one stroke. No-op mid-stroke.
    pub async fn undo(&mut self) {
        if self.stroke.is_some() || !self.history.undo().await {
            return;
        }
        self.after_history_swap().await;
    }
    /// Step the history forward one stroke. No-op mid-stroke.
    pub async fn redo(&mut self) {
        if self.stroke.is_some() || !self.history.redo().await {
            return;
        }
        self.after_history_swap().await;
    }
    async fn after_history_swap(&mut self) {
        // The restored layer can sit anywhere in the stack, so the cached
        // partials cannot be trusted.
        self.reload_selected().await;
        self.compositor.invalidate_partials();
        self.sync_composite().await;
    }

    /// Create a blank layer directly above the selection and select it.
    /// Propagates repository failure without touching the stack.
    pub async fn add_layer(&mut self, title: impl Into<String>) -> Result<TextureId, TextureError> {
        let layer = Layer::new(title);
        let id = layer.id;
        self.textures.create_blank(id).await?;
        let index = self.stack.selected_index() + 1;
        if let Err(e) = self.stack.insert(index, layer) {
            // Index and id are valid by construction; this is unreachable in
            // practice but must not take the session down.
            log::error!("failed to insert freshly created layer {id}: {e}");
        }
        self.reload_selected().await;
        self.sync_composite().await;
        Ok(id)
    }
    /// Remove the selected layer and its texture record. The last layer stays.
    pub async fn remove_selected_layer(&mut self) -> anyhow::Result<()> {
        let removed = self.stack.remove_selected()?;
        if let Err(e) = self.textures.remove(removed.id).await {
            log::warn!("failed to remove texture of deleted layer {}: {e}", removed.id);
        }
        self.reload_selected().await;
        self.sync_composite().await;
        Ok(())
    }
    pub async fn select_layer(&mut self, id: TextureId) -> anyhow::Result<()> {
        self.stack.select(id)?;
        self.reload_selected().await;
        self.sync_composite().await;
        Ok(())
    }
    pub async fn move_layer(&mut self, from: usize, to: usize) -> anyhow::Result<()> {
        self.stack.move_layer(from, to)?;
        self.sync_composite().await;
        Ok(())
    }
    pub async fn update_layer(&mut self, id: TextureId, patch: LayerPatch) -> anyhow::Result<()> {
        self.stack.update(id, patch)?;
        self.sync_composite().await;
        Ok(())
    }

    async fn begin_stroke(&mut self, id: StrokeId, source: TouchSource, point: TouchPoint) {
        // The normalizer cancels before preempting, but a stroke must never
        // stack on another regardless.
        if let Some(stale) = self.stroke.take() {
            self.discard_stroke(stale).await;
        }
        let layer = self.stack.selected().id;
        // Captured before any pixel is modified.
        let snapshot = match self.history.capture(layer).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::error!("failed to capture undo snapshot of layer {layer}: {e}");
                None
            }
        };
        log::debug!("stroke {id} began ({source:?}) on layer {layer}");
        let mut stroke = InProgress {
            id,
            source,
            generator: CurveGenerator::new(self.brush_style),
            vertices: Vec::new(),
            stamped: 0,
            mask: StrokeMask::new(self.extent),
            live: self.selected_committed.clone(),
            snapshot,
            paint: self.paint,
        };
        push_point(&mut stroke, &self.view, point);
        self.stroke = Some(stroke);
        self.frame.start();
    }
    fn extend_stroke(&mut self, id: StrokeId, point: TouchPoint) {
        match &mut self.stroke {
            Some(stroke) if stroke.id == id => push_point(stroke, &self.view, point),
            // Tail of a superseded stroke; let it complete and ignore it.
            _ => {}
        }
    }
    async fn commit_stroke(&mut self, id: StrokeId) {
        let Some(mut stroke) = self.stroke.take() else {
            return;
        };
        if stroke.id != id {
            self.stroke = Some(stroke);
            return;
        }
        self.frame.stop();
        // Flush the buffered tail as the terminal segment.
        stroke.generator.finish(&mut stroke.vertices);
        if stroke.vertices.is_empty() {
            // Sub-threshold stroke (a single sample): nothing was drawn, so
            // neither the repository nor the history should hear about it.
            if let Some(snapshot) = stroke.snapshot {
                self.history.discard(snapshot).await;
            }
            self.sync_composite().await;
            return;
        }
        if stroke.stamped < stroke.vertices.len() {
            stroke.mask.stamp(&stroke.vertices[stroke.stamped..]);
            stroke.stamped = stroke.vertices.len();
        }
        stroke
            .mask
            .apply(&self.selected_committed, stroke.paint, &mut stroke.live);

        let layer = self.stack.selected().id;
        // The stroke's single repository write.
        match self
            .textures
            .update(layer, stroke.live.bytes().to_vec())
            .await
        {
            Ok(()) => {
                self.selected_committed = stroke.live;
                if let Some(snapshot) = stroke.snapshot {
                    self.history.commit(layer, snapshot).await;
                }
            }
            Err(e) => {
                // Persist failed, no rollback: the committed record stands and
                // the live result is dropped.
                log::error!("failed to persist stroke to layer {layer}: {e}");
                if let Some(snapshot) = stroke.snapshot {
                    self.history.discard(snapshot).await;
                }
            }
        }
        self.sync_composite().await;
    }
    async fn cancel_stroke(&mut self, id: StrokeId) {
        let Some(stroke) = self.stroke.take() else {
            return;
        };
        if stroke.id != id {
            self.stroke = Some(stroke);
            return;
        }
        self.discard_stroke(stroke).await;
        self.sync_composite().await;
    }
    /// Drop a stroke's partial raster and release its pending snapshot.
    async fn discard_stroke(&mut self, stroke: InProgress) {
        log::debug!("stroke {} ({:?}) discarded", stroke.id, stroke.source);
        self.frame.stop();
        if let Some(snapshot) = stroke.snapshot {
            self.history.discard(snapshot).await;
        }
    }

    /// Gestures move the view, never the pixels - no recomposite needed.
    fn apply_gesture(&mut self, gesture: ViewGesture) {
        let center = cgmath::point2(gesture.center[0], gesture.center[1]);
        self.view
            .pan(cgmath::vec2(gesture.pan[0], gesture.pan[1]));
        self.view.scale_about(center, gesture.zoom);
        self.view.rotate_about(center, cgmath::Rad(gesture.rotate));
    }

    /// Drain recomposite signals, refresh stale partials, compose one frame.
    async fn sync_composite(&mut self) {
        self.drain_stack_events();
        self.refresh_partials().await;
        self.compose();
    }
    fn drain_stack_events(&mut self) {
        loop {
            match self.stack_events.try_recv() {
                Ok(StackEvent::Full) => self.compositor.invalidate_partials(),
                // The selected layer is re-merged every frame anyway.
                Ok(StackEvent::Fast) => {}
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {
                    // Missed signals; assume the worst.
                    self.compositor.invalidate_partials();
                }
                Err(_) => break,
            }
        }
    }
    /// Rebuild the cached below/above composites from committed bytes.
    /// Unreadable or mis-sized layers are skipped with a logged error so one
    /// bad record never takes the whole frame down.
    async fn refresh_partials(&mut self) {
        if self.compositor.partials_valid() {
            return;
        }
        let below_meta: Vec<(TextureId, u8)> = visible_meta(self.stack.below_selection());
        let above_meta: Vec<(TextureId, u8)> = visible_meta(self.stack.above_selection());
        let below = self.read_sources(&below_meta).await;
        let above = self.read_sources(&above_meta).await;
        let below_sources: Vec<MergeSource> = merge_sources(&below);
        let above_sources: Vec<MergeSource> = merge_sources(&above);
        self.compositor
            .rebuild_partials(&below_sources, &above_sources);
    }
    async fn read_sources(&self, meta: &[(TextureId, u8)]) -> Vec<(TextureId, u8, Vec<u8>)> {
        let mut out = Vec::with_capacity(meta.len());
        for &(id, alpha) in meta {
            match self.textures.read(id).await {
                Ok(bytes) => out.push((id, alpha, bytes)),
                Err(e) => {
                    log::error!("failed to read layer texture {id}, skipping in composite: {e}");
                }
            }
        }
        out
    }
    fn compose(&mut self) {
        let selected = self.stack.selected();
        let bytes = match &self.stroke {
            // Mid-stroke the live texture stands in for the committed one.
            Some(stroke) => stroke.live.bytes(),
            None => self.selected_committed.bytes(),
        };
        let source = selected.is_visible.then_some(MergeSource {
            id: selected.id,
            alpha: selected.alpha,
            bytes,
        });
        self.compositor.compose(source);
    }
    async fn reload_selected(&mut self) {
        self.selected_committed =
            read_or_blank(&*self.textures, self.extent, self.stack.selected().id).await;
    }
}

/// Read a texture record, substituting blank (with a logged error) for missing
/// or corrupt bytes - the drawing surface must stay usable.
async fn read_or_blank(textures: &dyn Textures, extent: Extent, id: TextureId) -> Texture {
    match textures.read(id).await {
        Ok(bytes) => match Texture::from_bytes(extent, bytes) {
            Some(texture) => texture,
            None => {
                log::error!("texture {id} has the wrong byte length, substituting blank");
                Texture::blank(extent)
            }
        },
        Err(e) => {
            log::error!("failed to read texture {id}, substituting blank: {e}");
            Texture::blank(extent)
        }
    }
}

fn push_point(stroke: &mut InProgress, view: &ViewTransform, point: TouchPoint) {
    let Ok(pos) = view.unproject(cgmath::point2(point.pos[0], point.pos[1])) else {
        // Ill-formed view transform; the sample has no texture-space meaning.
        return;
    };
    stroke
        .generator
        .push([pos.x, pos.y], point.pressure_clamped(), &mut stroke.vertices);
}

fn visible_meta(layers: &[Layer]) -> Vec<(TextureId, u8)> {
    layers
        .iter()
        .filter(|layer| layer.is_visible)
        .map(|layer| (layer.id, layer.alpha))
        .collect()
}
fn merge_sources(read: &[(TextureId, u8, Vec<u8>)]) -> Vec<MergeSource> {
    read.iter()
        .map(|(id, alpha, bytes)| MergeSource {
            id: *id,
            alpha: *alpha,
            bytes,
        })
        .collect()
}
