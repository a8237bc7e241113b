//! # Stroke curves
//!
//! Turns the raw sample stream of one stroke into a smooth, densely sampled vertex
//! stream for the rasterizer. The generator keeps a bounded look-back window instead
//! of reprocessing the whole stroke: every arriving pair of raw points is collapsed
//! to its midpoint, and four consecutive window points yield one cubic segment.
//! Output is append-only - once a vertex is emitted it is never rewritten.

/// Spacing, in texture pixels, between emitted samples along a segment. Segments
/// always emit at least one sample regardless of length.
pub const SAMPLE_SPACING: f32 = 2.0;

/// One point of the smoothed vertex stream, in texture space.
#[derive(bytemuck::Pod, bytemuck::Zeroable, Copy, Clone, PartialEq, Debug)]
#[repr(C)]
pub struct CurveVertex {
    pub pos: [f32; 2],
    /// Pressure-derived mask intensity, `[0, 1]`.
    pub brightness: f32,
    /// Stamp diameter, texture pixels.
    pub diameter: f32,
    /// Soft-edge radius, texture pixels.
    pub blur: f32,
}

/// Per-stroke shape parameters, fixed at stroke begin.
#[derive(Copy, Clone, Debug)]
pub struct StrokeStyle {
    /// Stamp diameter, texture pixels.
    pub diameter: f32,
    /// Soft-edge radius, texture pixels.
    pub blur: f32,
}
impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            diameter: 16.0,
            blur: 4.0,
        }
    }
}

/// A control point of the interpolation window: midpoint position plus the
/// pressure carried across the same parametric stride.
#[derive(Copy, Clone, Debug)]
struct Control {
    pos: [f32; 2],
    pressure: f32,
}
impl Control {
    fn midpoint(a: Self, b: Self) -> Self {
        Self {
            pos: [(a.pos[0] + b.pos[0]) * 0.5, (a.pos[1] + b.pos[1]) * 0.5],
            pressure: (a.pressure + b.pressure) * 0.5,
        }
    }
    /// Reflect `b` through `a`, standing in for the missing outer neighbor at
    /// the open end of a stroke.
    fn mirrored(a: Self, b: Self) -> Self {
        Self {
            pos: [2.0 * a.pos[0] - b.pos[0], 2.0 * a.pos[1] - b.pos[1]],
            pressure: a.pressure,
        }
    }
}

/// Uniform Catmull-Rom position at parameter `t` of the `p1..p2` span.
/// Collinear control points degenerate onto their common line.
fn cubic_at(p0: [f32; 2], p1: [f32; 2], p2: [f32; 2], p3: [f32; 2], t: f32) -> [f32; 2] {
    let t2 = t * t;
    let t3 = t2 * t;
    let component = |i: usize| {
        0.5 * (2.0 * p1[i]
            + (p2[i] - p0[i]) * t
            + (2.0 * p0[i] - 5.0 * p1[i] + 4.0 * p2[i] - p3[i]) * t2
            + (3.0 * p1[i] - p0[i] - 3.0 * p2[i] + p3[i]) * t3)
    };
    [component(0), component(1)]
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dx * dx + dy * dy).sqrt()
}

/// Streaming curve generator for a single stroke.
///
/// Feed texture-space samples with [`Self::push`], then exactly one of
/// [`Self::finish`] (phase `Ended`, flushes the buffered tail) or
/// [`Self::reset`] (phase `Cancelled`, discards it). Fewer than two raw
/// points produce no output at all.
pub struct CurveGenerator {
    style: StrokeStyle,
    /// Look-back window of control points. Never exceeds four.
    window: smallvec::SmallVec<[Control; 4]>,
    /// Raw point awaiting its pair for the midpoint split.
    last_raw: Option<Control>,
    raw_count: usize,
    /// Whether the leading segment (mirrored 3-point construction) went out.
    started: bool,
}
impl CurveGenerator {
    #[must_use]
    pub fn new(style: StrokeStyle) -> Self {
        Self {
            style,
            window: smallvec::SmallVec::new(),
            last_raw: None,
            raw_count: 0,
            started: false,
        }
    }
    #[must_use]
    pub fn style(&self) -> StrokeStyle {
        self.style
    }
    /// Feed one texture-space sample. Any vertices it completes are appended to
    /// `out`; earlier contents are never touched.
    pub fn push(&mut self, pos: [f32; 2], pressure: f32, out: &mut Vec<CurveVertex>) {
        let cur = Control {
            pos,
            pressure: pressure.clamp(0.0, 1.0),
        };
        self.raw_count += 1;
        match self.last_raw.replace(cur) {
            // The stroke's first sample anchors the curve directly.
            None => self.push_control(cur, out),
            Some(prev) => self.push_control(Control::midpoint(prev, cur), out),
        }
    }
    /// Flush buffered points as the terminal segment, then reset for reuse.
    /// Fewer than two raw points flush to nothing.
    pub fn finish(&mut self, out: &mut Vec<CurveVertex>) {
        if self.raw_count >= 2 {
            // The final raw point becomes the last control, so the curve lands
            // exactly where the touch lifted.
            if let Some(last) = self.last_raw {
                self.push_control(last, out);
            }
            // Two raw points still yield three controls (anchor, midpoint,
            // terminal), so the window always holds at least three here.
            let n = self.window.len();
            let p3 = Control::mirrored(self.window[n - 1], self.window[n - 2]);
            self.emit(
                self.window[n - 3],
                self.window[n - 2],
                self.window[n - 1],
                p3,
                false,
                out,
            );
        }
        self.reset();
    }
    /// Discard all buffered state without emitting. Used for cancelled and
    /// preempted strokes.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_raw = None;
        self.raw_count = 0;
        self.started = false;
    }

    fn push_control(&mut self, control: Control, out: &mut Vec<CurveVertex>) {
        self.window.push(control);
        if self.window.len() == 3 && !self.started {
            // Leading segment: mirror the missing left neighbor.
            let p0 = Control::mirrored(self.window[0], self.window[1]);
            self.emit(p0, self.window[0], self.window[1], self.window[2], true, out);
            self.started = true;
        }
        if self.window.len() == 4 {
            self.emit(
                self.window[0],
                self.window[1],
                self.window[2],
                self.window[3],
                false,
                out,
            );
            // Slide the look-back window.
            self.window.remove(0);
        }
    }

    /// Emit the `p1..p2` span. Sample count is proportional to the on-texture
    /// length (chord approximation), minimum one. `include_start` additionally
    /// emits the `t = 0` vertex - only wanted once, at the very head of a stroke,
    /// since each span's end is the next span's start.
    fn emit(
        &self,
        p0: Control,
        p1: Control,
        p2: Control,
        p3: Control,
        include_start: bool,
        out: &mut Vec<CurveVertex>,
    ) {
        let samples = ((distance(p1.pos, p2.pos) / SAMPLE_SPACING).ceil() as usize).max(1);
        if include_start {
            out.push(self.vertex(p1.pos, p1.pressure));
        }
        for step in 1..=samples {
            let t = step as f32 / samples as f32;
            let pos = cubic_at(p0.pos, p1.pos, p2.pos, p3.pos, t);
            let brightness = p1.pressure + (p2.pressure - p1.pressure) * t;
            out.push(self.vertex(pos, brightness));
        }
    }

    fn vertex(&self, pos: [f32; 2], brightness: f32) -> CurveVertex {
        CurveVertex {
            pos,
            brightness,
            diameter: self.style.diameter,
            blur: self.style.blur,
        }
    }
}
