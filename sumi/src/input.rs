//! # Input normalization
//!
//! Groups the raw sample stream by source identity and classifies it: one-finger
//! or pen input draws, near-simultaneous multi-finger input transforms the view.
//! Exactly one stroke is tracked at a time; pen input preempts an in-progress
//! finger stroke. A lone finger is held *pending* for a short window - if a second
//! finger lands inside it the pair becomes a gesture, otherwise the buffered
//! samples flush as the head of a drawing stroke.

use smallvec::SmallVec;
use sumi_core::{
    touch::{Microseconds, TouchPhase, TouchPoint, TouchSource},
    RuntimeId,
};

pub struct StrokeIdMarker;
pub type StrokeId = RuntimeId<StrokeIdMarker>;

/// How long a lone finger stays unclassified, waiting for a possible second one.
pub const CLASSIFY_WINDOW_US: u32 = 80_000;
/// A pending finger travelling this far is committed to drawing early - fast
/// strokes should not lag by the full window.
pub const CLASSIFY_TRAVEL_PX: f32 = 12.0;
/// Below this finger spread, zoom and rotation are numerically meaningless and
/// a gesture frame degrades to pan only.
pub const MIN_SPREAD_PX: f32 = 4.0;

/// Classified input, the sole feed of the session's stroke lifecycle.
#[derive(Clone, Debug, strum::AsRefStr)]
pub enum InputAction {
    StrokeBegan {
        id: StrokeId,
        source: TouchSource,
        point: TouchPoint,
    },
    StrokeMoved {
        id: StrokeId,
        point: TouchPoint,
    },
    StrokeEnded {
        id: StrokeId,
        point: TouchPoint,
    },
    /// Preempted or platform-cancelled; all partial results are discarded.
    StrokeCancelled {
        id: StrokeId,
    },
    Transform(ViewGesture),
}

/// One frame of a two-finger transform, as deltas against the previous frame.
#[derive(Copy, Clone, Debug)]
pub struct ViewGesture {
    /// Current centroid, screen space. Zoom and rotation pivot here.
    pub center: [f32; 2],
    pub pan: [f32; 2],
    /// Multiplicative scale step, 1.0 = none.
    pub zoom: f32,
    /// Rotation step, radians.
    pub rotate: f32,
}

type Actions = SmallVec<[InputAction; 4]>;

enum Mode {
    Idle,
    /// One finger down, drawing-vs-gesture undecided.
    Pending {
        finger: u64,
        began: Microseconds,
        origin: [f32; 2],
        buffered: SmallVec<[TouchPoint; 16]>,
    },
    Drawing {
        id: StrokeId,
        source: TouchSource,
    },
    /// Multi-finger transform. Tracks each finger's last position; the first
    /// two define the gesture frame.
    Gesture {
        fingers: SmallVec<[(u64, [f32; 2]); 4]>,
    },
}

#[derive(Copy, Clone)]
struct GestureFrame {
    center: [f32; 2],
    spread: f32,
    angle: f32,
}
fn frame_of(a: [f32; 2], b: [f32; 2]) -> GestureFrame {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    GestureFrame {
        center: [(a[0] + b[0]) * 0.5, (a[1] + b[1]) * 0.5],
        spread: (dx * dx + dy * dy).sqrt(),
        angle: dy.atan2(dx),
    }
}
fn gesture_pair(fingers: &[(u64, [f32; 2])]) -> Option<GestureFrame> {
    match fingers {
        [(_, a), (_, b), ..] => Some(frame_of(*a, *b)),
        _ => None,
    }
}
fn gesture_delta(prev: GestureFrame, next: GestureFrame) -> ViewGesture {
    let zoom = if prev.spread > MIN_SPREAD_PX && next.spread > MIN_SPREAD_PX {
        next.spread / prev.spread
    } else {
        1.0
    };
    let mut rotate = next.angle - prev.angle;
    // Shortest arc.
    if rotate > std::f32::consts::PI {
        rotate -= 2.0 * std::f32::consts::PI;
    } else if rotate < -std::f32::consts::PI {
        rotate += 2.0 * std::f32::consts::PI;
    }
    ViewGesture {
        center: next.center,
        pan: [
            next.center[0] - prev.center[0],
            next.center[1] - prev.center[1],
        ],
        zoom,
        rotate,
    }
}

pub struct Normalizer {
    mode: Mode,
}
impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
impl Normalizer {
    #[must_use]
    pub fn new() -> Self {
        Self { mode: Mode::Idle }
    }
    /// Feed one raw sample; zero or more classified actions result.
    pub fn feed(&mut self, point: TouchPoint) -> Actions {
        let mut out = Actions::new();
        match (point.source, point.phase) {
            (TouchSource::Pen, TouchPhase::Began) => self.pen_began(point, &mut out),
            (TouchSource::Pen, TouchPhase::Moved) => {
                if let Mode::Drawing {
                    id,
                    source: TouchSource::Pen,
                } = self.mode
                {
                    out.push(InputAction::StrokeMoved { id, point });
                }
            }
            (TouchSource::Pen, TouchPhase::Ended | TouchPhase::Cancelled) => {
                if let Mode::Drawing {
                    id,
                    source: TouchSource::Pen,
                } = self.mode
                {
                    self.mode = Mode::Idle;
                    out.push(if point.phase == TouchPhase::Ended {
                        InputAction::StrokeEnded { id, point }
                    } else {
                        InputAction::StrokeCancelled { id }
                    });
                }
            }
            (TouchSource::Finger(finger), TouchPhase::Began) => {
                self.finger_began(finger, point, &mut out);
            }
            (TouchSource::Finger(finger), TouchPhase::Moved) => {
                self.finger_moved(finger, point, &mut out);
            }
            (TouchSource::Finger(finger), TouchPhase::Ended | TouchPhase::Cancelled) => {
                self.finger_finished(finger, point, &mut out);
            }
        }
        out
    }

    /// Pen preempts whatever the fingers were doing.
    fn pen_began(&mut self, point: TouchPoint, out: &mut Actions) {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            Mode::Drawing { id, .. } => out.push(InputAction::StrokeCancelled { id }),
            // A pending finger never became a stroke; nothing to cancel.
            Mode::Pending { .. } | Mode::Gesture { .. } | Mode::Idle => {}
        }
        let id = StrokeId::next();
        self.mode = Mode::Drawing {
            id,
            source: TouchSource::Pen,
        };
        out.push(InputAction::StrokeBegan {
            id,
            source: TouchSource::Pen,
            point,
        });
    }

    fn finger_began(&mut self, finger: u64, point: TouchPoint, out: &mut Actions) {
        enum Decision {
            StartPending,
            ToGesture,
            PromoteThenIgnore,
            TrackGestureFinger,
            Ignore,
        }
        let decision = match &self.mode {
            Mode::Idle => Decision::StartPending,
            Mode::Pending {
                finger: pending,
                began,
                ..
            } if *pending != finger => {
                if point.time.since(*began) <= CLASSIFY_WINDOW_US {
                    Decision::ToGesture
                } else {
                    // The window is long past - the pending finger just never
                    // moved. Commit it, then ignore the newcomer: one identity
                    // per stroke.
                    Decision::PromoteThenIgnore
                }
            }
            Mode::Pending { .. } | Mode::Drawing { .. } => Decision::Ignore,
            Mode::Gesture { .. } => Decision::TrackGestureFinger,
        };
        match decision {
            Decision::StartPending => {
                let mut buffered = SmallVec::new();
                buffered.push(point);
                self.mode = Mode::Pending {
                    finger,
                    began: point.time,
                    origin: point.pos,
                    buffered,
                };
            }
            Decision::ToGesture => {
                // Second finger inside the window: this is a transform gesture.
                // The buffered samples are discarded - they were never a stroke.
                let Mode::Pending {
                    finger: pending,
                    buffered,
                    ..
                } = std::mem::replace(&mut self.mode, Mode::Idle)
                else {
                    unreachable!()
                };
                let last = buffered.last().map_or([0.0; 2], |sample| sample.pos);
                let mut fingers = SmallVec::new();
                fingers.push((pending, last));
                fingers.push((finger, point.pos));
                self.mode = Mode::Gesture { fingers };
            }
            Decision::PromoteThenIgnore => self.promote(out),
            Decision::TrackGestureFinger => {
                if let Mode::Gesture { fingers } = &mut self.mode {
                    if fingers.len() < 4 {
                        fingers.push((finger, point.pos));
                    }
                }
            }
            Decision::Ignore => {}
        }
    }

    fn finger_moved(&mut self, finger: u64, point: TouchPoint, out: &mut Actions) {
        let mut promote = false;
        match &mut self.mode {
            Mode::Pending {
                finger: pending,
                began,
                origin,
                buffered,
            } if *pending == finger => {
                buffered.push(point);
                let travel_x = point.pos[0] - origin[0];
                let travel_y = point.pos[1] - origin[1];
                let travelled = (travel_x * travel_x + travel_y * travel_y).sqrt();
                promote = point.time.since(*began) > CLASSIFY_WINDOW_US
                    || travelled > CLASSIFY_TRAVEL_PX;
            }
            Mode::Drawing { id, source } if *source == TouchSource::Finger(finger) => {
                out.push(InputAction::StrokeMoved { id: *id, point });
            }
            Mode::Gesture { fingers } => {
                let previous = gesture_pair(fingers);
                if let Some(slot) = fingers.iter_mut().find(|(id, _)| *id == finger) {
                    slot.1 = point.pos;
                }
                if let (Some(prev), Some(next)) = (previous, gesture_pair(fingers)) {
                    out.push(InputAction::Transform(gesture_delta(prev, next)));
                }
            }
            _ => {}
        }
        if promote {
            self.promote(out);
        }
    }

    fn finger_finished(&mut self, finger: u64, point: TouchPoint, out: &mut Actions) {
        enum Decision {
            TapPromote,
            DropPending,
            EndDrawing(StrokeId),
            CancelDrawing(StrokeId),
            ReleaseGestureFinger,
            Ignore,
        }
        let decision = match &self.mode {
            Mode::Pending {
                finger: pending, ..
            } if *pending == finger => {
                if point.phase == TouchPhase::Ended {
                    // A quick tap: the whole stroke happens at once.
                    Decision::TapPromote
                } else {
                    Decision::DropPending
                }
            }
            Mode::Drawing { id, source } if *source == TouchSource::Finger(finger) => {
                if point.phase == TouchPhase::Ended {
                    Decision::EndDrawing(*id)
                } else {
                    Decision::CancelDrawing(*id)
                }
            }
            Mode::Gesture { .. } => Decision::ReleaseGestureFinger,
            _ => Decision::Ignore,
        };
        match decision {
            Decision::TapPromote => {
                self.promote(out);
                if let Mode::Drawing { id, .. } = &self.mode {
                    out.push(InputAction::StrokeEnded { id: *id, point });
                }
                self.mode = Mode::Idle;
            }
            Decision::DropPending => self.mode = Mode::Idle,
            Decision::EndDrawing(id) => {
                self.mode = Mode::Idle;
                out.push(InputAction::StrokeEnded { id, point });
            }
            Decision::CancelDrawing(id) => {
                self.mode = Mode::Idle;
                out.push(InputAction::StrokeCancelled { id });
            }
            Decision::ReleaseGestureFinger => {
                let spent = if let Mode::Gesture { fingers } = &mut self.mode {
                    fingers.retain(|(id, _)| *id != finger);
                    fingers.len() < 2
                } else {
                    false
                };
                // A trailing lone finger is spent; it does not draw.
                if spent {
                    self.mode = Mode::Idle;
                }
            }
            Decision::Ignore => {}
        }
    }

    /// Commit a pending finger to drawing, flushing its buffered samples.
    fn promote(&mut self, out: &mut Actions) {
        let Mode::Pending {
            finger, buffered, ..
        } = std::mem::replace(&mut self.mode, Mode::Idle)
        else {
            return;
        };
        let source = TouchSource::Finger(finger);
        let id = StrokeId::next();
        let mut samples = buffered.into_iter();
        let Some(first) = samples.next() else {
            return;
        };
        out.push(InputAction::StrokeBegan {
            id,
            source,
            point: first,
        });
        for point in samples {
            out.push(InputAction::StrokeMoved { id, point });
        }
        self.mode = Mode::Drawing { id, source };
    }
}
