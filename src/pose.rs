//! Hand pose data model.
//!
//! `Pose3D` is a normalized camera-space coordinate of a tracked hand
//! joint.  Absence of a hand is an explicit `HandPresence` variant,
//! never a sentinel pose.

/// Normalized camera-space position of a tracked hand joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Pose3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another pose.
    pub fn distance(&self, other: &Pose3D) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Planar (XY) distance to another pose.  Extrusion and movement
    /// gating ignore the depth axis.
    pub fn planar_distance(&self, other: &Pose3D) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Whether a hand is currently tracked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandPresence {
    Present(Pose3D),
    Absent,
}

impl HandPresence {
    /// The tracked pose, if any.
    pub fn pose(&self) -> Option<Pose3D> {
        match self {
            Self::Present(p) => Some(*p),
            Self::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// One frame-to-frame displacement of the tracked hand, in camera
/// space, tagged with whether the hand was in the extruding band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub start: Pose3D,
    pub end: Pose3D,
    pub extruding: bool,
}

// ── Tests ──────────────────────────────────────────────────
