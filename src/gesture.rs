//! Depth-gesture classification.
//!
//! Turns the tracked hand's depth relative to a calibration centre
//! into one of three states: `Idle`, `Extruding` (hand pushed toward
//! the sensor), `Raising` (hand pulled away).  Entering `Raising` is
//! the one transition with a side effect: it advances the layer.

use tracing::debug;

use crate::pose::{HandPresence, Pose3D};

// ── States ─────────────────────────────────────────────────

/// Classified gesture state.  Only defined while a calibration centre
/// exists; forced to `Idle` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    Extruding,
    Raising,
}

impl GestureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extruding => "extruding",
            Self::Raising => "raising",
        }
    }
}

// ── Config ─────────────────────────────────────────────────

/// Depth-band thresholds.  `relative_depth` is measured against the
/// `start_threshold` baseline; `extrude_threshold` must sit below
/// `raise_threshold`.
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Baseline depth offset at calibration.
    pub start_threshold: f64,
    /// Below this relative depth the hand is extruding (strict `<`).
    pub extrude_threshold: f64,
    /// Above this relative depth the hand is raising (strict `>`).
    pub raise_threshold: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            start_threshold: 20.0,
            extrude_threshold: 13.0,
            raise_threshold: 27.0,
        }
    }
}

// ── State machine ──────────────────────────────────────────

/// What a frame observation asked the rest of the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    /// Nothing beyond the state itself.
    None,
    /// `Raising` was entered this frame: advance exactly one layer.
    LayerAdvance,
}

/// Gesture state machine with hand calibration.
///
/// The calibration centre is set exactly once, to the first `Present`
/// pose after an `Absent -> Present` edge, and cleared again when the
/// hand is lost.
pub struct GestureMachine {
    pub config: GestureConfig,
    state: GestureState,
    center: Option<Pose3D>,
}

impl GestureMachine {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            state: GestureState::Idle,
            center: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    /// The calibration centre, defined only while a hand is
    /// continuously tracked.
    pub fn center(&self) -> Option<Pose3D> {
        self.center
    }

    /// Depth of `point` relative to the calibration centre, in the
    /// threshold unit system.
    fn relative_depth(&self, center: &Pose3D, point: &Pose3D) -> f64 {
        self.config.start_threshold - (center.z - point.z) * 100.0
    }

    /// Feed one frame's presence observation.  Recomputes the state
    /// from scratch (no hysteresis) and reports whether this frame
    /// entered `Raising`.
    pub fn observe(&mut self, presence: HandPresence) -> GestureEvent {
        let point = match presence {
            HandPresence::Present(p) => p,
            HandPresence::Absent => {
                if self.center.is_some() {
                    debug!("hand lost, calibration cleared");
                }
                self.center = None;
                self.state = GestureState::Idle;
                return GestureEvent::None;
            }
        };

        let center = match self.center {
            Some(c) => c,
            None => {
                // First Present pose after an absence calibrates.
                debug!(
                    "calibrated at ({:.3}, {:.3}, {:.3})",
                    point.x, point.y, point.z
                );
                self.center = Some(point);
                self.state = GestureState::Idle;
                return GestureEvent::None;
            }
        };

        let depth = self.relative_depth(&center, &point);
        let next = if depth < self.config.extrude_threshold {
            GestureState::Extruding
        } else if depth > self.config.raise_threshold {
            GestureState::Raising
        } else {
            GestureState::Idle
        };

        let event = if next == GestureState::Raising && self.state != GestureState::Raising {
            debug!("raising entered at depth {:.2}", depth);
            GestureEvent::LayerAdvance
        } else {
            GestureEvent::None
        };

        if next != self.state {
            debug!("gesture {} -> {}", self.state.as_str(), next.as_str());
        }
        self.state = next;
        event
    }
}

// ── Tests ──────────────────────────────────────────────────
