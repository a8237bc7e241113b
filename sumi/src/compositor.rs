//! # Canvas compositor
//!
//! Produces the displayed canvas at a per-frame cost independent of layer count.
//! The stack is partitioned at the selection into "below" and "above" sub-stacks,
//! each cached as one composite texture and rebuilt only on full-recomposite
//! signals. A drawing frame is then a constant number of merge passes:
//! background fill, cached below, the selected layer (live while drawing),
//! cached above.
//!
//! When writing new merge logic here, remember that:
//! * merging with alpha 0 must leave the destination byte-identical;
//! * merging a fully opaque source at alpha 255 must yield the source exactly;
//! * everything is premultiplied, so channels never exceed alpha.

use rayon::prelude::*;
use sumi_core::{
    texture::{Extent, Texture, BYTES_PER_PIXEL},
    TextureId,
};

use crate::view_transform::{TransformError, ViewTransform};

/// One layer's committed pixels, ready to merge: the stack alpha and the raw
/// bytes read from the repository.
#[derive(Copy, Clone)]
pub struct MergeSource<'a> {
    pub id: TextureId,
    pub alpha: u8,
    pub bytes: &'a [u8],
}

/// Premultiplied-alpha-weighted accumulation of `src` over `dst`, `alpha`
/// normalized from 0-255. Slices must be the same length and a whole number of
/// RGBA8 pixels.
pub fn merge(src: &[u8], alpha: u8, dst: &mut [u8]) {
    debug_assert_eq!(src.len(), dst.len());
    let alpha = u32::from(alpha);
    dst.par_chunks_exact_mut(BYTES_PER_PIXEL)
        .zip(src.par_chunks_exact(BYTES_PER_PIXEL))
        .for_each(|(out, pixel)| {
            // Effective source coverage after the layer weight.
            let coverage = (u32::from(pixel[3]) * alpha + 127) / 255;
            let keep = 255 - coverage;
            for channel in 0..BYTES_PER_PIXEL {
                let src_term = (u32::from(pixel[channel]) * alpha + 127) / 255;
                let dst_term = (u32::from(out[channel]) * keep + 127) / 255;
                out[channel] = (src_term + dst_term).min(255) as u8;
            }
        });
}

pub struct Compositor {
    extent: Extent,
    /// The canvas's own fill, distinct from the out-of-canvas void color used
    /// at present time.
    background: [u8; 4],
    below: Texture,
    above: Texture,
    canvas: Texture,
    partials_valid: bool,
}
impl Compositor {
    #[must_use]
    pub fn new(extent: Extent, background: [u8; 4]) -> Self {
        Self {
            extent,
            background,
            below: Texture::blank(extent),
            above: Texture::blank(extent),
            canvas: Texture::blank(extent),
            partials_valid: false,
        }
    }
    #[must_use]
    pub fn extent(&self) -> Extent {
        self.extent
    }
    /// The most recently composed canvas.
    #[must_use]
    pub fn canvas(&self) -> &Texture {
        &self.canvas
    }
    #[must_use]
    pub fn partials_valid(&self) -> bool {
        self.partials_valid
    }
    /// Mark the cached sub-stack composites stale. Called on every full
    /// recomposite signal.
    pub fn invalidate_partials(&mut self) {
        self.partials_valid = false;
    }
    /// Rebuild both cached partials from committed layer bytes, bottom to top.
    /// Hidden layers must already be filtered out by the caller.
    pub fn rebuild_partials(&mut self, below: &[MergeSource], above: &[MergeSource]) {
        self.below.fill([0; 4]);
        self.above.fill([0; 4]);
        for source in below {
            Self::merge_checked(self.extent, *source, &mut self.below);
        }
        for source in above {
            Self::merge_checked(self.extent, *source, &mut self.above);
        }
        self.partials_valid = true;
    }
    /// One frame's merge chain. `selected` is the live texture mid-stroke, the
    /// committed one otherwise, or `None` when the selected layer is hidden.
    /// Cost is O(1) merges regardless of stack depth.
    pub fn compose(&mut self, selected: Option<MergeSource>) -> &Texture {
        self.canvas.fill(self.background);
        // The partials hold premultiplied results of already-weighted layers,
        // so they merge at full weight.
        merge(self.below.bytes(), 255, self.canvas.bytes_mut());
        if let Some(source) = selected {
            Self::merge_checked(self.extent, source, &mut self.canvas);
        }
        merge(self.above.bytes(), 255, self.canvas.bytes_mut());
        &self.canvas
    }
    /// Map the canvas through the view transform into a viewport-sized texture.
    /// Space outside the canvas reads as `void`, visually distinct from the
    /// canvas's own background fill.
    pub fn present(
        &self,
        view: &ViewTransform,
        viewport: Extent,
        void: [u8; 4],
    ) -> Result<Texture, TransformError> {
        use cgmath::Transform;
        let inverse = view.inverse()?;
        let mut out = Texture::blank(viewport);
        let row_len = viewport.width() as usize * BYTES_PER_PIXEL;
        let canvas_row = self.extent.width() as usize * BYTES_PER_PIXEL;
        let canvas_bytes = self.canvas.bytes();
        let extent = self.extent;
        out.bytes_mut()
            .par_chunks_exact_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..viewport.width() as usize {
                    let screen = cgmath::point2(x as f32 + 0.5, y as f32 + 0.5);
                    let canvas = inverse.transform_point(screen);
                    let (cx, cy) = (canvas.x.floor() as i64, canvas.y.floor() as i64);
                    let pixel = if extent.contains(cx, cy) {
                        let base = cy as usize * canvas_row + cx as usize * BYTES_PER_PIXEL;
                        let mut pixel = [0; 4];
                        pixel.copy_from_slice(&canvas_bytes[base..base + 4]);
                        pixel
                    } else {
                        void
                    };
                    row[x * BYTES_PER_PIXEL..(x + 1) * BYTES_PER_PIXEL].copy_from_slice(&pixel);
                }
            });
        Ok(out)
    }

    /// Merge one layer source, skipping (with a logged error) any whose byte
    /// length disagrees with the canvas - a stale or corrupt record must never
    /// fail the whole frame.
    fn merge_checked(extent: Extent, source: MergeSource, dst: &mut Texture) {
        if source.bytes.len() == extent.byte_len() {
            merge(source.bytes, source.alpha, dst.bytes_mut());
        } else {
            log::error!(
                "layer texture {} is {} bytes where the canvas needs {}; skipping layer",
                source.id,
                source.bytes.len(),
                extent.byte_len(),
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn extent() -> Extent {
        Extent::new(32, 32).unwrap()
    }
    fn solid(color: [u8; 4]) -> Texture {
        let mut texture = Texture::blank(extent());
        texture.fill(color);
        texture
    }
    fn source<'a>(texture: &'a Texture, alpha: u8) -> MergeSource<'a> {
        MergeSource {
            id: TextureId::random(),
            alpha,
            bytes: texture.bytes(),
        }
    }

    #[test]
    fn merge_alpha_zero_is_identity() {
        let src = solid([200, 100, 50, 255]);
        let mut dst = solid([10, 20, 30, 255]);
        let before = dst.bytes().to_vec();
        merge(src.bytes(), 0, dst.bytes_mut());
        assert_eq!(dst.bytes(), &before[..]);
    }
    #[test]
    fn merge_opaque_at_full_alpha_replaces() {
        let src = solid([200, 100, 50, 255]);
        let mut dst = solid([10, 20, 30, 255]);
        merge(src.bytes(), 255, dst.bytes_mut());
        assert_eq!(dst.bytes(), src.bytes());
    }
    #[test]
    fn merge_transparent_source_is_identity() {
        let src = Texture::blank(extent());
        let mut dst = solid([10, 20, 30, 200]);
        let before = dst.bytes().to_vec();
        merge(src.bytes(), 255, dst.bytes_mut());
        assert_eq!(dst.bytes(), &before[..]);
    }
    #[test]
    fn compose_is_idempotent() {
        let a = solid([64, 0, 0, 128]);
        let b = solid([0, 64, 0, 160]);
        let mut compositor = Compositor::new(extent(), [255, 255, 255, 255]);
        compositor.rebuild_partials(&[source(&a, 200)], &[source(&b, 90)]);

        let first = compositor.compose(None).bytes().to_vec();
        let second = compositor.compose(None).bytes().to_vec();
        assert_eq!(first, second);
    }
    #[test]
    fn topmost_opaque_layer_wins() {
        // Two fully-visible opaque layers painting disjoint halves, plus an
        // opaque top layer over the whole canvas: wherever the top covers, its
        // pixel wins exactly.
        let mut bottom = Texture::blank(extent());
        for (i, pixel) in bottom.pixels_mut().iter_mut().enumerate() {
            if i % 2 == 0 {
                *pixel = [255, 0, 0, 255];
            }
        }
        let top = solid([0, 0, 255, 255]);
        let mut compositor = Compositor::new(extent(), [255, 255, 255, 255]);
        compositor.rebuild_partials(&[source(&bottom, 255)], &[source(&top, 255)]);
        let canvas = compositor.compose(None);
        assert!(canvas.pixels().iter().all(|&p| p == [0, 0, 255, 255]));
    }
    #[test]
    fn wrong_size_layer_is_skipped_not_fatal() {
        let good = solid([0, 255, 0, 255]);
        let stale = vec![0u8; 16];
        let mut compositor = Compositor::new(extent(), [255, 255, 255, 255]);
        compositor.rebuild_partials(
            &[
                MergeSource {
                    id: TextureId::random(),
                    alpha: 255,
                    bytes: &stale,
                },
                source(&good, 255),
            ],
            &[],
        );
        let canvas = compositor.compose(None);
        // The stale layer vanished; the good one still composited.
        assert!(canvas.pixels().iter().all(|&p| p == [0, 255, 0, 255]));
    }
    #[test]
    fn selected_layer_merges_between_partials() {
        let below = solid([255, 0, 0, 255]);
        let selected = solid([0, 255, 0, 255]);
        let mut compositor = Compositor::new(extent(), [255, 255, 255, 255]);
        compositor.rebuild_partials(&[source(&below, 255)], &[]);
        let canvas = compositor.compose(Some(source(&selected, 255)));
        assert!(canvas.pixels().iter().all(|&p| p == [0, 255, 0, 255]));
    }
    #[test]
    fn present_identity_and_void() {
        let layer = solid([9, 9, 9, 255]);
        let mut compositor = Compositor::new(extent(), [255, 255, 255, 255]);
        compositor.rebuild_partials(&[source(&layer, 255)], &[]);
        compositor.compose(None);

        // Viewport twice the canvas: the top-left quadrant shows the canvas,
        // the rest is void.
        let viewport = Extent::new(64, 64).unwrap();
        let out = compositor
            .present(&ViewTransform::identity(), viewport, [1, 2, 3, 255])
            .unwrap();
        let pixel_at = |x: usize, y: usize| {
            let base = (y * 64 + x) * BYTES_PER_PIXEL;
            &out.bytes()[base..base + 4]
        };
        assert_eq!(pixel_at(10, 10), &[9, 9, 9, 255]);
        assert_eq!(pixel_at(50, 10), &[1, 2, 3, 255]);
        assert_eq!(pixel_at(10, 50), &[1, 2, 3, 255]);
    }
}
