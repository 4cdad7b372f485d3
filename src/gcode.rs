//! G-code generation and motion translation.
//!
//! `MotionTranslator` owns the command queue and all per-layer
//! bookkeeping: it maps camera-space poses onto the bed, gates
//! movement on a device-space epsilon, accumulates the extrusion
//! register, and emits the fixed startup/shutdown sequences.  Layer
//! advancement (triggered by the gesture machine entering `Raising`)
//! replays the layer's committed moves twice for adhesion before
//! stepping Z.
//!
//! The line grammar is a plain RepRap-style dialect: `G1` moves with
//! 3-decimal coordinates, integer feedrates and 4-decimal extrusion,
//! `G92` register/axis zeroing, `M104`/`M140` temperature targets,
//! `M116` temperature wait, `M84` motors off.  Compliance with any
//! particular firmware beyond this grammar is out of scope.

use std::f64::consts::PI;

use tracing::{debug, info};

use crate::pose::{Move, Pose3D};
use crate::queue::{CommandQueue, SinkError};

// ── Printer profile ────────────────────────────────────────

/// Fixed device configuration: bed geometry, filament, speeds, temps.
#[derive(Debug, Clone)]
pub struct PrinterConfig {
    /// Bed extent in mm; scales the normalized camera range per axis.
    pub bed_extent_mm: (f64, f64),
    /// Bed centre in mm; the calibrated hand pose maps here.
    pub bed_center_mm: (f64, f64),
    /// Height of one layer in mm.
    pub layer_height_mm: f64,
    /// Width of the extruded track in mm.
    pub extruded_width_mm: f64,
    /// Filament diameter in mm.
    pub filament_diameter_mm: f64,
    /// Extrudate packing density (dimensionless).
    pub packing_factor: f64,
    /// Nominal feedrate, mm/min.
    pub feedrate: f64,
    /// First-layer ("base") feedrate for bed adhesion, mm/min.
    pub base_feedrate: f64,
    /// Minimum mapped planar displacement that counts as movement, mm.
    pub min_move_mm: f64,
    /// Extruder target while printing the first layer, °C.
    pub first_layer_extruder_temp: u32,
    /// Extruder target after the first layer, °C.
    pub extruder_temp: u32,
    /// Bed target, °C.
    pub bed_temp: u32,
    /// Homing overtravel per axis, mm (moved in the negative
    /// direction to guarantee endstop contact).
    pub home_overtravel_mm: f64,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            bed_extent_mm: (200.0, 200.0),
            bed_center_mm: (100.0, 100.0),
            layer_height_mm: 0.3,
            extruded_width_mm: 0.6,
            filament_diameter_mm: 1.75,
            packing_factor: 0.97,
            feedrate: 4200.0,
            base_feedrate: 2100.0,
            min_move_mm: 0.5,
            first_layer_extruder_temp: 210,
            extruder_temp: 195,
            bed_temp: 60,
            home_overtravel_mm: 250.0,
        }
    }
}

impl PrinterConfig {
    /// Extrusion register increment per mm of planar travel.
    pub fn e_per_mm(&self) -> f64 {
        let filament_area = PI * (self.filament_diameter_mm / 2.0).powi(2);
        self.extruded_width_mm * self.layer_height_mm * self.packing_factor / filament_area
    }
}

// ── Line builders ──────────────────────────────────────────

fn move_line(x: f64, y: f64, z: f64, feedrate: f64, e: Option<f64>) -> String {
    match e {
        Some(e) => format!("G1 X{:.3} Y{:.3} Z{:.3} E{:.4} F{:.0}", x, y, z, e, feedrate),
        None => format!("G1 X{:.3} Y{:.3} Z{:.3} F{:.0}", x, y, z, feedrate),
    }
}

fn z_line(z: f64, feedrate: f64) -> String {
    format!("G1 Z{:.3} F{:.0}", z, feedrate)
}

fn set_extruder_temp(celsius: u32) -> String {
    format!("M104 S{}", celsius)
}

fn set_bed_temp(celsius: u32) -> String {
    format!("M140 S{}", celsius)
}

// ── Layer bookkeeping ──────────────────────────────────────

/// A move already emitted within the current layer, in device space.
/// Kept only so the layer can be replayed for adhesion.
#[derive(Debug, Clone, Copy)]
struct CommittedMove {
    x: f64,
    y: f64,
    planar_mm: f64,
    extruding: bool,
}

/// Mutable per-layer state, owned exclusively by the translator.
#[derive(Debug)]
struct LayerState {
    index: u32,
    z_mm: f64,
    e_register: f64,
    committed: Vec<CommittedMove>,
}

// ── Translator ─────────────────────────────────────────────

/// Converts consecutive hand poses into printer commands.
pub struct MotionTranslator {
    pub config: PrinterConfig,
    queue: CommandQueue,
    layer: LayerState,
    commands_emitted: u64,
}

impl MotionTranslator {
    pub fn new(config: PrinterConfig, queue: CommandQueue) -> Self {
        let layer = LayerState {
            index: 0,
            z_mm: config.layer_height_mm,
            e_register: 0.0,
            committed: Vec::new(),
        };
        Self {
            config,
            queue,
            layer,
            commands_emitted: 0,
        }
    }

    /// Current layer index (0-based).
    pub fn layer_index(&self) -> u32 {
        self.layer.index
    }

    /// Current extrusion register value.
    pub fn extrusion_register(&self) -> f64 {
        self.layer.e_register
    }

    /// Commands enqueued so far.
    pub fn commands_emitted(&self) -> u64 {
        self.commands_emitted
    }

    /// Whether the drain side has died on a sink error.
    pub fn queue_failed(&self) -> bool {
        self.queue.failed()
    }

    fn emit(&mut self, line: String) {
        self.queue.enqueue(line);
        self.commands_emitted += 1;
    }

    fn layer_feedrate(&self) -> f64 {
        if self.layer.index == 0 {
            self.config.base_feedrate
        } else {
            self.config.feedrate
        }
    }

    /// Map a camera-space pose onto the bed, relative to the
    /// calibration centre.  Depth does not participate; Z comes from
    /// the layer state.
    pub fn map_to_bed(&self, point: &Pose3D, center: &Pose3D) -> (f64, f64) {
        let (ex, ey) = self.config.bed_extent_mm;
        let (cx, cy) = self.config.bed_center_mm;
        ((point.x - center.x) * ex + cx, (point.y - center.y) * ey + cy)
    }

    /// Whether the displacement between two poses, mapped onto the
    /// bed, clears the minimum-distance epsilon.  Recomputed every
    /// frame; never latched.
    pub fn is_movement(&self, start: &Pose3D, end: &Pose3D, center: &Pose3D) -> bool {
        let (sx, sy) = self.map_to_bed(start, center);
        let (tx, ty) = self.map_to_bed(end, center);
        let d = ((tx - sx).powi(2) + (ty - sy).powi(2)).sqrt();
        d > self.config.min_move_mm
    }

    /// Translate one detected move into a command.  Extruding moves
    /// grow the register by planar distance × e-per-mm and carry the
    /// new register value; travel moves carry no E word.
    pub fn translate(&mut self, mv: &Move, center: &Pose3D) {
        let (sx, sy) = self.map_to_bed(&mv.start, center);
        let (tx, ty) = self.map_to_bed(&mv.end, center);
        let planar_mm = ((tx - sx).powi(2) + (ty - sy).powi(2)).sqrt();

        let e = if mv.extruding {
            self.layer.e_register += planar_mm * self.config.e_per_mm();
            Some(self.layer.e_register)
        } else {
            None
        };

        let line = move_line(tx, ty, self.layer.z_mm, self.layer_feedrate(), e);
        debug!("move: {}", line);
        self.emit(line);
        self.layer.committed.push(CommittedMove {
            x: tx,
            y: ty,
            planar_mm,
            extruding: mv.extruding,
        });
    }

    /// Replay every committed move of the current layer once, at the
    /// current Z, with extrusion recomputed against the running
    /// register.
    fn replay_layer(&mut self) {
        let feedrate = self.layer_feedrate();
        let e_per_mm = self.config.e_per_mm();
        for i in 0..self.layer.committed.len() {
            let cm = self.layer.committed[i];
            let e = if cm.extruding {
                self.layer.e_register += cm.planar_mm * e_per_mm;
                Some(self.layer.e_register)
            } else {
                None
            };
            self.emit(move_line(cm.x, cm.y, self.layer.z_mm, feedrate, e));
        }
    }

    /// Advance to the next layer.  Triggered exactly once per
    /// `Raising` entry.
    ///
    /// Replays the committed moves twice for adhesion (a no-op for an
    /// empty layer), steps Z by one layer height, and zeroes the
    /// extrusion register on both sides of the wire.
    pub fn advance_layer(&mut self) {
        if self.layer.index == 0 {
            // First layer done: drop the extruder to its running target.
            self.emit(set_extruder_temp(self.config.extruder_temp));
        }

        self.replay_layer();
        self.replay_layer();

        self.layer.index += 1;
        self.layer.z_mm += self.config.layer_height_mm;
        let z = z_line(self.layer.z_mm, self.layer_feedrate());
        self.emit(z);
        self.layer.e_register = 0.0;
        self.emit("G92 E0".to_string());
        self.layer.committed.clear();

        info!(
            "layer {} started at Z{:.3}",
            self.layer.index, self.layer.z_mm
        );
    }

    /// Enqueue the fixed bring-up sequence.  Must run before the
    /// first move is accepted; the order is not negotiable.
    pub fn begin(&mut self) {
        info!("startup sequence");
        let over = self.config.home_overtravel_mm;
        let base = self.config.base_feedrate;

        // Home by deliberate negative overtravel, then declare zero.
        self.emit(format!("G1 X-{:.0} F{:.0}", over, base));
        self.emit("G92 X0".to_string());
        self.emit(format!("G1 Y-{:.0} F{:.0}", over, base));
        self.emit("G92 Y0".to_string());
        self.emit(format!("G1 Z-{:.0} F{:.0}", over, base));
        self.emit("G92 Z0".to_string());

        self.emit("G90".to_string());
        self.emit("G92 E0".to_string());
        self.emit(set_bed_temp(self.config.bed_temp));
        self.emit(set_extruder_temp(self.config.first_layer_extruder_temp));

        // Park at the origin while heating, then wait and move out to
        // the print centre at first-layer height.
        self.emit(move_line(0.0, 0.0, self.layer.z_mm, base, None));
        self.emit("M116".to_string());
        let (cx, cy) = self.config.bed_center_mm;
        self.emit(move_line(cx, cy, self.layer.z_mm, base, None));
    }

    /// Enqueue the shutdown sequence, close the queue, and wait for
    /// the drain to deliver everything.  Returns the total number of
    /// commands written to the sink.
    pub fn finish(mut self) -> Result<u64, SinkError> {
        info!("shutdown sequence");
        self.emit(move_line(0.0, 0.0, self.layer.z_mm, self.config.base_feedrate, None));
        self.emit(set_extruder_temp(0));
        self.emit(set_bed_temp(0));
        self.emit("M84".to_string());
        self.queue.close_and_drain()
    }
}

// ── Tests ──────────────────────────────────────────────────
