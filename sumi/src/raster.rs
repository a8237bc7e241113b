//! # Stroke rasterizer
//!
//! Burns the curve generator's vertex stream into a per-stroke coverage mask,
//! then colorizes the mask and merges it over the committed layer texture to
//! produce the live texture shown while drawing. A brush merges; an eraser
//! subtracts. The mask accumulates monotonically, so each frame only stamps the
//! vertices that arrived since the last one and re-applies.

use rayon::prelude::*;
use sumi_core::{
    curve::CurveVertex,
    texture::{Extent, Texture, BYTES_PER_PIXEL},
};

/// What a stroke deposits: a premultiplied color for brushes, or removal for
/// erasers.
#[derive(Copy, Clone, Debug)]
pub struct Paint {
    /// Premultiplied RGBA, each channel in `[0, 1]`.
    pub color: [f32; 4],
    pub is_eraser: bool,
}
impl Paint {
    #[must_use]
    pub fn brush(color: [f32; 4]) -> Self {
        Self {
            color,
            is_eraser: false,
        }
    }
    #[must_use]
    pub fn eraser() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            is_eraser: true,
        }
    }
}

/// Per-stroke coverage mask, the CPU stand-in for the GPU mask texture.
/// Coverage only ever grows during a stroke.
pub struct StrokeMask {
    extent: Extent,
    /// One `[0, 1]` coverage value per pixel.
    coverage: Vec<f32>,
}
impl StrokeMask {
    #[must_use]
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            coverage: vec![0.0; extent.pixel_count()],
        }
    }
    pub fn clear(&mut self) {
        self.coverage.fill(0.0);
    }
    #[must_use]
    pub fn coverage_at(&self, x: u32, y: u32) -> f32 {
        self.coverage[y as usize * self.extent.width() as usize + x as usize]
    }
    /// Stamp vertices into the mask. Each vertex deposits a disk of its
    /// diameter with a linear falloff over the blur ring; overlapping stamps
    /// take the maximum, so re-stamping is harmless and stamping in increments
    /// equals stamping all at once.
    pub fn stamp(&mut self, vertices: &[CurveVertex]) {
        let width = self.extent.width() as i64;
        let height = self.extent.height() as i64;
        for vertex in vertices {
            let radius = vertex.diameter * 0.5;
            let inner = (radius - vertex.blur).max(0.0);
            let x0 = ((vertex.pos[0] - radius).floor() as i64).max(0);
            let y0 = ((vertex.pos[1] - radius).floor() as i64).max(0);
            let x1 = ((vertex.pos[0] + radius).ceil() as i64).min(width - 1);
            let y1 = ((vertex.pos[1] + radius).ceil() as i64).min(height - 1);
            for y in y0..=y1 {
                let row = y as usize * width as usize;
                for x in x0..=x1 {
                    let dx = x as f32 + 0.5 - vertex.pos[0];
                    let dy = y as f32 + 0.5 - vertex.pos[1];
                    let distance = (dx * dx + dy * dy).sqrt();
                    let falloff = if distance <= inner {
                        1.0
                    } else if distance >= radius || radius <= inner {
                        0.0
                    } else {
                        (radius - distance) / (radius - inner)
                    };
                    if falloff > 0.0 {
                        let cell = &mut self.coverage[row + x as usize];
                        *cell = cell.max(falloff * vertex.brightness.clamp(0.0, 1.0));
                    }
                }
            }
        }
    }
    /// Colorize the mask and combine it with the committed layer into `live`.
    /// Brush: mask-weighted paint over committed. Eraser: committed scaled down
    /// by mask coverage. `committed` itself is never touched - the repository
    /// record stays pristine until the stroke commits.
    pub fn apply(&self, committed: &Texture, paint: Paint, live: &mut Texture) {
        assert_eq!(committed.extent(), self.extent);
        assert_eq!(live.extent(), self.extent);
        let row_len = self.extent.width() as usize * BYTES_PER_PIXEL;
        let row_px = self.extent.width() as usize;
        live.bytes_mut()
            .par_chunks_exact_mut(row_len)
            .zip(committed.bytes().par_chunks_exact(row_len))
            .zip(self.coverage.par_chunks_exact(row_px))
            .for_each(|((live_row, committed_row), coverage_row)| {
                for (x, &coverage) in coverage_row.iter().enumerate() {
                    let base = x * BYTES_PER_PIXEL;
                    let dst = &mut live_row[base..base + 4];
                    let src = &committed_row[base..base + 4];
                    if coverage <= 0.0 {
                        dst.copy_from_slice(src);
                        continue;
                    }
                    // Deposited alpha, 0-255.
                    let deposit =
                        (coverage * paint.color[3].clamp(0.0, 1.0) * 255.0).round() as u32;
                    let keep = 255 - deposit.min(255);
                    if paint.is_eraser {
                        for channel in 0..BYTES_PER_PIXEL {
                            dst[channel] =
                                ((u32::from(src[channel]) * keep + 127) / 255) as u8;
                        }
                    } else {
                        for channel in 0..BYTES_PER_PIXEL {
                            let painted = (coverage * paint.color[channel].clamp(0.0, 1.0)
                                * 255.0)
                                .round() as u32;
                            let kept = (u32::from(src[channel]) * keep + 127) / 255;
                            dst[channel] = (painted + kept).min(255) as u8;
                        }
                    }
                }
            });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sumi_core::curve::CurveVertex;

    fn extent() -> Extent {
        Extent::new(64, 64).unwrap()
    }
    fn vertex(x: f32, y: f32) -> CurveVertex {
        CurveVertex {
            pos: [x, y],
            brightness: 1.0,
            diameter: 8.0,
            blur: 2.0,
        }
    }

    #[test]
    fn stamp_covers_center_not_corners() {
        let mut mask = StrokeMask::new(extent());
        mask.stamp(&[vertex(32.0, 32.0)]);
        assert!(mask.coverage_at(32, 32) >= 0.99);
        assert_eq!(mask.coverage_at(0, 0), 0.0);
        assert_eq!(mask.coverage_at(63, 63), 0.0);
    }
    #[test]
    fn incremental_stamping_matches_batch() {
        let vertices: Vec<_> = (0..10).map(|i| vertex(10.0 + i as f32 * 4.0, 20.0)).collect();
        let mut batch = StrokeMask::new(extent());
        batch.stamp(&vertices);
        let mut incremental = StrokeMask::new(extent());
        for chunk in vertices.chunks(3) {
            incremental.stamp(chunk);
        }
        assert_eq!(batch.coverage, incremental.coverage);
    }
    #[test]
    fn brush_paints_live_without_touching_committed() {
        let committed = Texture::blank(extent());
        let mut live = Texture::blank(extent());
        let mut mask = StrokeMask::new(extent());
        mask.stamp(&[vertex(32.0, 32.0)]);
        mask.apply(&committed, Paint::brush([1.0, 0.0, 0.0, 1.0]), &mut live);

        let center = live.pixels()[32 * 64 + 32];
        assert_eq!(center, [255, 0, 0, 255]);
        // Far corner untouched.
        assert_eq!(live.pixels()[0], [0, 0, 0, 0]);
        assert!(committed.pixels().iter().all(|&p| p == [0; 4]));
    }
    #[test]
    fn eraser_clears_covered_pixels() {
        let mut committed = Texture::blank(extent());
        committed.fill([0, 128, 0, 255]);
        let mut live = Texture::blank(extent());
        let mut mask = StrokeMask::new(extent());
        mask.stamp(&[vertex(32.0, 32.0)]);
        mask.apply(&committed, Paint::eraser(), &mut live);

        assert_eq!(live.pixels()[32 * 64 + 32], [0, 0, 0, 0]);
        // Uncovered pixels pass through unchanged.
        assert_eq!(live.pixels()[0], [0, 128, 0, 255]);
    }
    #[test]
    fn pressure_scales_deposited_alpha() {
        let committed = Texture::blank(extent());
        let mut live = Texture::blank(extent());
        let mut mask = StrokeMask::new(extent());
        let mut soft = vertex(32.0, 32.0);
        soft.brightness = 0.5;
        mask.stamp(&[soft]);
        mask.apply(&committed, Paint::brush([0.0, 0.0, 1.0, 1.0]), &mut live);

        let center = live.pixels()[32 * 64 + 32];
        assert_eq!(center[3], 128);
    }
}
