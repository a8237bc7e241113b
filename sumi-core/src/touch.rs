//! # Touch input
//!
//! The raw sample stream at the input boundary: location, pressure, phase, source
//! identity, timestamp. Everything downstream of the normalizer consumes these.

// u32::MAX us == 71 minutes. One continuous stroke lasting that long has bigger problems.
#[derive(bytemuck::Pod, bytemuck::Zeroable, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct Microseconds(pub u32);
impl Microseconds {
    /// Microseconds elapsed from `earlier` to `self`, saturating at zero for
    /// out-of-order timestamps.
    #[must_use]
    pub fn since(self, earlier: Self) -> u32 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Lifecycle of one touch identity within a stroke.
#[derive(strum::AsRefStr, Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum TouchPhase {
    Began,
    Moved,
    Ended,
    Cancelled,
}

/// Which physical source produced a sample. Finger and pen are mutually
/// exclusive per stroke - a pen sample preempts an in-progress finger stroke.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum TouchSource {
    /// One finger, distinguished from its neighbors by the platform's touch id.
    Finger(u64),
    Pen,
}
impl TouchSource {
    #[must_use]
    pub fn is_pen(self) -> bool {
        matches!(self, Self::Pen)
    }
}

/// One raw input sample, in *screen* space.
#[derive(Copy, Clone, Debug)]
pub struct TouchPoint {
    pub pos: [f32; 2],
    /// Normalized force. Sources without a pressure axis report 1.0.
    pub pressure: f32,
    pub phase: TouchPhase,
    pub time: Microseconds,
    pub source: TouchSource,
}
impl TouchPoint {
    /// Pressure clamped into `[0, 1]`. Platforms occasionally report slight
    /// overshoot on hard presses.
    #[must_use]
    pub fn pressure_clamped(&self) -> f32 {
        self.pressure.clamp(0.0, 1.0)
    }
}
