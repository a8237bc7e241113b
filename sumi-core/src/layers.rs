//! # Layer stack
//!
//! The ordered list of layer descriptors plus the selection. Position in the list
//! *is* the compositing order, bottom to top. The stack never touches pixel data -
//! a layer's id keys its committed texture in the repository.
//!
//! Mutations publish [`StackEvent`]s on a typed broadcast stream, subscribed at
//! composition time. Structural changes (shape, order, visibility) demand a full
//! recomposite; alpha or selection changes touching only the selected layer allow
//! the cheaper fast path.

use crate::TextureId;

/// One layer descriptor. The id is persistent and also names the layer's
/// committed texture record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    pub id: TextureId,
    pub title: String,
    /// Compositing weight, 0 (transparent) to 255 (fully weighted).
    pub alpha: u8,
    pub is_visible: bool,
}
impl Layer {
    /// A fresh, fully-opaque, visible layer with a random id.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: TextureId::random(),
            title: title.into(),
            alpha: 255,
            is_visible: true,
        }
    }
}

/// Partial update applied by [`LayerStack::update`]. `None` fields are untouched.
#[derive(Clone, Debug, Default)]
pub struct LayerPatch {
    pub alpha: Option<u8>,
    pub title: Option<String>,
    pub is_visible: Option<bool>,
}

/// Recomposite demand published after each mutation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StackEvent {
    /// Layer set, order, or visibility changed - cached partial composites are stale.
    Full,
    /// Only the selected layer's alpha or the selection itself changed; cached
    /// partials remain valid.
    Fast,
}

/// Row of the enumeration handed to the project-bundle boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: TextureId,
    pub alpha: u8,
    pub is_visible: bool,
    /// Bottom-to-top position.
    pub order: usize,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StackError {
    #[error("layer {0} is not in the stack")]
    UnknownLayer(TextureId),
    #[error("layer {0} is already in the stack")]
    DuplicateLayer(TextureId),
    #[error("index {index} out of bounds for {len} layers")]
    OutOfBounds { index: usize, len: usize },
    #[error("the last layer cannot be removed")]
    LastLayer,
}

/// Invariants, maintained by every operation:
/// * layer ids are unique;
/// * the stack is never empty and the selection index is always valid;
/// * after a move, the selection follows the moved layer's id, not its old index.
pub struct LayerStack {
    layers: Vec<Layer>,
    selected: usize,
    events: tokio::sync::broadcast::Sender<StackEvent>,
}
impl LayerStack {
    /// Event stream capacity. A lagging subscriber only ever needs the *demand*,
    /// not the history, so overflow degrades to an extra full recomposite.
    const EVENT_CAPACITY: usize = 64;

    /// A stack holding its initial layer, which is selected.
    #[must_use]
    pub fn new(first: Layer) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(Self::EVENT_CAPACITY);
        Self {
            layers: vec![first],
            selected: 0,
            events,
        }
    }
    /// Rehydrate from a manifest enumeration, bottom to top. Ids must be unique.
    /// The topmost layer starts selected. `None` if the manifest is empty.
    #[must_use]
    pub fn from_manifest(layers: Vec<Layer>) -> Option<Self> {
        if layers.is_empty() {
            return None;
        }
        let mut seen = hashbrown::HashSet::with_capacity(layers.len());
        if !layers.iter().all(|layer| seen.insert(layer.id)) {
            return None;
        }
        let (events, _) = tokio::sync::broadcast::channel(Self::EVENT_CAPACITY);
        Some(Self {
            selected: layers.len() - 1,
            layers,
            events,
        })
    }
    /// Subscribe to recomposite demands. Subscribe *before* mutating - events
    /// published with no receiver are dropped, not queued.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StackEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        // Invariant says no, but keep the standard pair.
        self.layers.is_empty()
    }
    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.layers.iter()
    }
    #[must_use]
    pub fn get(&self, id: TextureId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }
    #[must_use]
    pub fn selected(&self) -> &Layer {
        &self.layers[self.selected]
    }
    #[must_use]
    pub fn selected_index(&self) -> usize {
        self.selected
    }
    /// Layers strictly below the selection, bottom to top.
    #[must_use]
    pub fn below_selection(&self) -> &[Layer] {
        &self.layers[..self.selected]
    }
    /// Layers strictly above the selection, bottom to top.
    #[must_use]
    pub fn above_selection(&self) -> &[Layer] {
        &self.layers[self.selected + 1..]
    }
    /// Enumeration for the external project-bundle boundary.
    pub fn manifest(&self) -> impl Iterator<Item = ManifestEntry> + '_ {
        self.layers.iter().enumerate().map(|(order, layer)| ManifestEntry {
            id: layer.id,
            alpha: layer.alpha,
            is_visible: layer.is_visible,
            order,
        })
    }

    /// Insert at `index` (0 = bottom, `len` = top) and select the new layer.
    pub fn insert(&mut self, index: usize, layer: Layer) -> Result<(), StackError> {
        if index > self.layers.len() {
            return Err(StackError::OutOfBounds {
                index,
                len: self.layers.len(),
            });
        }
        if self.get(layer.id).is_some() {
            return Err(StackError::DuplicateLayer(layer.id));
        }
        self.layers.insert(index, layer);
        self.selected = index;
        self.publish(StackEvent::Full);
        Ok(())
    }
    /// Remove the selected layer, clamping the selection to a valid neighbor.
    /// The last remaining layer is not removable.
    pub fn remove_selected(&mut self) -> Result<Layer, StackError> {
        if self.layers.len() == 1 {
            return Err(StackError::LastLayer);
        }
        let removed = self.layers.remove(self.selected);
        self.selected = self.selected.min(self.layers.len() - 1);
        self.publish(StackEvent::Full);
        Ok(removed)
    }
    /// Move the layer at `from` to position `to`. The selection follows ids:
    /// whatever layer was selected before stays selected after, at its new index.
    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<(), StackError> {
        let len = self.layers.len();
        if from >= len {
            return Err(StackError::OutOfBounds { index: from, len });
        }
        if to >= len {
            return Err(StackError::OutOfBounds { index: to, len });
        }
        if from == to {
            return Ok(());
        }
        let selected_id = self.selected().id;
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        // Unwrap is fine - the selected layer is still in the stack.
        self.selected = self
            .layers
            .iter()
            .position(|layer| layer.id == selected_id)
            .unwrap();
        self.publish(StackEvent::Full);
        Ok(())
    }
    /// Apply a partial update to the layer with `id`.
    ///
    /// Visibility changes, and any change to a non-selected layer, invalidate
    /// the cached partials. An alpha or title change on the selected layer is
    /// the fast path.
    pub fn update(&mut self, id: TextureId, patch: LayerPatch) -> Result<(), StackError> {
        let selected_id = self.selected().id;
        let Some(layer) = self.layers.iter_mut().find(|layer| layer.id == id) else {
            return Err(StackError::UnknownLayer(id));
        };
        let mut structural = false;
        let mut changed = false;
        if let Some(alpha) = patch.alpha {
            changed |= layer.alpha != alpha;
            layer.alpha = alpha;
            // Cached partials bake in the alpha of every layer but the
            // selected one.
            structural |= id != selected_id;
        }
        if let Some(visible) = patch.is_visible {
            structural |= layer.is_visible != visible;
            changed |= layer.is_visible != visible;
            layer.is_visible = visible;
        }
        if let Some(title) = patch.title {
            changed |= layer.title != title;
            layer.title = title;
        }
        if changed {
            self.publish(if structural {
                StackEvent::Full
            } else {
                StackEvent::Fast
            });
        }
        Ok(())
    }
    /// Select the layer with `id`. The selection boundary moves, so the cached
    /// below/above partition is stale - that is a full recomposite.
    pub fn select(&mut self, id: TextureId) -> Result<(), StackError> {
        let Some(index) = self.layers.iter().position(|layer| layer.id == id) else {
            return Err(StackError::UnknownLayer(id));
        };
        if index != self.selected {
            self.selected = index;
            self.publish(StackEvent::Full);
        }
        Ok(())
    }

    fn publish(&self, event: StackEvent) {
        // No receivers is fine - nothing is composing yet.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stack_of(n: usize) -> LayerStack {
        let mut stack = LayerStack::new(Layer::new("layer 0"));
        for i in 1..n {
            stack.insert(i, Layer::new(format!("layer {i}"))).unwrap();
        }
        stack
    }

    #[test]
    fn insert_selects_new_layer() {
        let stack = stack_of(3);
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.selected_index(), 2);
        assert_eq!(stack.selected().title, "layer 2");
    }
    #[test]
    fn ids_are_unique() {
        let mut stack = stack_of(2);
        let duplicate = stack.selected().clone();
        assert!(matches!(
            stack.insert(0, duplicate),
            Err(StackError::DuplicateLayer(_))
        ));
    }
    #[test]
    fn remove_clamps_selection() {
        let mut stack = stack_of(3);
        // Select the top layer, remove it; selection must clamp to the new top.
        let top = stack.iter().last().unwrap().id;
        stack.select(top).unwrap();
        stack.remove_selected().unwrap();
        assert_eq!(stack.selected_index(), 1);
        assert_eq!(stack.len(), 2);
    }
    #[test]
    fn last_layer_is_not_removable() {
        let mut stack = stack_of(1);
        assert_eq!(stack.remove_selected(), Err(StackError::LastLayer));
    }
    #[test]
    fn move_keeps_selected_id() {
        let mut stack = stack_of(4);
        let selected_id = stack.selected().id;
        let from = stack.selected_index();
        assert_eq!(from, 3);
        stack.move_layer(from, 0).unwrap();
        assert_eq!(stack.selected_index(), 0);
        assert_eq!(stack.selected().id, selected_id);
    }
    #[test]
    fn move_across_selection_keeps_selected_id() {
        let mut stack = stack_of(4);
        let bottom = stack.iter().next().unwrap().id;
        let selected_id = stack.selected().id;
        // Hoist the bottom layer over the selected top layer.
        stack.move_layer(0, 3).unwrap();
        assert_eq!(stack.selected().id, selected_id);
        assert_eq!(stack.selected_index(), 2);
        assert_eq!(stack.iter().last().unwrap().id, bottom);
    }
    #[test]
    fn recomposite_signals() {
        let mut stack = stack_of(2);
        let mut events = stack.subscribe();
        let selected = stack.selected().id;
        let other = stack.iter().next().unwrap().id;

        // Alpha on the selected layer: fast.
        stack
            .update(
                selected,
                LayerPatch {
                    alpha: Some(128),
                    ..LayerPatch::default()
                },
            )
            .unwrap();
        assert_eq!(events.try_recv(), Ok(StackEvent::Fast));

        // Alpha on a non-selected layer is baked into a cached partial: full.
        stack
            .update(
                other,
                LayerPatch {
                    alpha: Some(10),
                    ..LayerPatch::default()
                },
            )
            .unwrap();
        assert_eq!(events.try_recv(), Ok(StackEvent::Full));

        // Visibility: full.
        stack
            .update(
                selected,
                LayerPatch {
                    is_visible: Some(false),
                    ..LayerPatch::default()
                },
            )
            .unwrap();
        assert_eq!(events.try_recv(), Ok(StackEvent::Full));

        // Selection change: full (the partition boundary moved).
        stack.select(other).unwrap();
        assert_eq!(events.try_recv(), Ok(StackEvent::Full));

        // No-op patch publishes nothing.
        stack.update(other, LayerPatch::default()).unwrap();
        assert!(events.try_recv().is_err());
    }
    #[test]
    fn manifest_enumerates_in_order() {
        let stack = stack_of(3);
        let manifest: Vec<_> = stack.manifest().collect();
        assert_eq!(manifest.len(), 3);
        for (i, entry) in manifest.iter().enumerate() {
            assert_eq!(entry.order, i);
            assert_eq!(entry.alpha, 255);
            assert!(entry.is_visible);
        }
    }
    #[test]
    fn from_manifest_rejects_duplicates() {
        let layer = Layer::new("a");
        assert!(LayerStack::from_manifest(vec![layer.clone(), layer]).is_none());
        assert!(LayerStack::from_manifest(vec![]).is_none());
    }
}
