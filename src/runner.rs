//! Per-frame orchestration.
//!
//! `GesturePrintLoop` ties the tracker, gesture machine, and motion
//! translator together: one bounded-timeout tracker poll per frame,
//! then calibration/classification, then movement detection and
//! command translation.  Nothing in this loop blocks on device I/O;
//! that is the drain thread's job.  This loop is the only writer of
//! the calibration centre, the gesture state, and the moving flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::gcode::MotionTranslator;
use crate::gesture::{GestureEvent, GestureMachine, GestureState};
use crate::pose::{HandPresence, Move, Pose3D};
use crate::queue::SinkError;
use crate::tracker::HandTracker;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

// ── Config ─────────────────────────────────────────────────

/// Frame loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Tracker poll window per frame, ms.  Doubles as the best-effort
    /// frame period; no hard real-time guarantee.
    pub poll_timeout_ms: u64,
    /// Interval between status log lines, seconds.
    pub status_interval_secs: u64,
    /// Stop after this many seconds (unattended runs).
    pub exit_after_secs: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 33,
            status_interval_secs: 60,
            exit_after_secs: None,
        }
    }
}

// ── Loop ───────────────────────────────────────────────────

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub frames: u64,
    pub commands_written: u64,
    pub layers: u32,
}

pub struct GesturePrintLoop {
    config: LoopConfig,
    tracker: Box<dyn HandTracker>,
    gesture: GestureMachine,
    translator: MotionTranslator,
    /// Anchor of the current displacement; advances only while moving.
    last_point: Option<Pose3D>,
    point: Option<Pose3D>,
    moving: bool,
    frames: u64,
}

impl GesturePrintLoop {
    pub fn new(
        config: LoopConfig,
        tracker: Box<dyn HandTracker>,
        gesture: GestureMachine,
        translator: MotionTranslator,
    ) -> Self {
        Self {
            config,
            tracker,
            gesture,
            translator,
            last_point: None,
            point: None,
            moving: false,
            frames: 0,
        }
    }

    /// Advance one frame from an already-polled observation.
    fn frame(&mut self, presence: HandPresence) {
        self.frames += 1;

        // The anchor follows the hand only while moving (or unset), so
        // sub-epsilon drift accumulates until it crosses the epsilon.
        if self.moving || self.last_point.is_none() {
            self.last_point = self.point;
        }
        self.point = presence.pose();

        let event = self.gesture.observe(presence);
        if !presence.is_present() {
            self.last_point = None;
            self.moving = false;
        }
        if event == GestureEvent::LayerAdvance {
            self.translator.advance_layer();
        }

        // Recomputed every frame from the distance test; never latched.
        self.moving = false;
        if let (Some(last), Some(point), Some(center)) =
            (self.last_point, self.point, self.gesture.center())
        {
            if self.translator.is_movement(&last, &point, &center) {
                self.moving = true;
                let mv = Move {
                    start: last,
                    end: point,
                    extruding: self.gesture.state() == GestureState::Extruding,
                };
                self.translator.translate(&mv, &center);
            }
        }
    }

    /// Run until a stop signal, the exit timer, or a sink failure,
    /// then drain the queue to completion.
    pub fn run(mut self) -> Result<RunSummary, SinkError> {
        self.translator.begin();

        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let status_interval = Duration::from_secs(self.config.status_interval_secs);
        let exit_after = self.config.exit_after_secs.map(Duration::from_secs);
        let started = Instant::now();
        let mut last_status = Instant::now();

        info!(
            "print loop running (poll window {}ms)",
            self.config.poll_timeout_ms
        );

        loop {
            if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                info!("shutdown signal received");
                break;
            }
            if let Some(dur) = exit_after {
                if started.elapsed() >= dur {
                    info!("exit timer fired after {}s", dur.as_secs());
                    break;
                }
            }
            if self.translator.queue_failed() {
                warn!("sink failure detected, stopping");
                break;
            }

            if last_status.elapsed() >= status_interval {
                info!(
                    "status: {} frame(s), {} command(s), layer {}, {}",
                    self.frames,
                    self.translator.commands_emitted(),
                    self.translator.layer_index(),
                    self.gesture.state().as_str(),
                );
                last_status = Instant::now();
            }

            let presence = self.tracker.pos(poll_timeout);
            debug!("frame {}: {:?}", self.frames, self.gesture.state());
            self.frame(presence);
        }

        let frames = self.frames;
        let layers = self.translator.layer_index();
        let commands_written = self.translator.finish()?;
        info!(
            "run complete: {} frame(s), {} command(s) delivered",
            frames, commands_written
        );
        Ok(RunSummary {
            frames,
            commands_written,
            layers,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::{MotionTranslator, PrinterConfig};
    use crate::gesture::GestureConfig;
    use crate::queue::{CommandQueue, MemorySink};
    use crate::tracker::ChannelTracker;
    use crossbeam_channel::unbounded;

    fn test_loop() -> (GesturePrintLoop, MemorySink) {
        let sink = MemorySink::new();
        let queue = CommandQueue::start(Box::new(sink.clone())).unwrap();
        let translator = MotionTranslator::new(PrinterConfig::default(), queue);
        let (_tx, rx) = unbounded();
        let lp = GesturePrintLoop::new(
            LoopConfig::default(),
            Box::new(ChannelTracker::new(rx)),
            GestureMachine::new(GestureConfig::default()),
            translator,
        );
        (lp, sink)
    }

    fn present(x: f64, y: f64, z: f64) -> HandPresence {
        HandPresence::Present(Pose3D::new(x, y, z))
    }

    #[test]
    fn test_calibration_on_present_edge() {
        let (mut lp, _sink) = test_loop();

        lp.frame(HandPresence::Absent);
        assert_eq!(lp.gesture.center(), None);

        let first = Pose3D::new(0.4, 0.4, 0.1);
        lp.frame(HandPresence::Present(first));
        assert_eq!(lp.gesture.center(), Some(first));

        // Centre holds across further Present frames.
        lp.frame(present(0.6, 0.6, 0.1));
        assert_eq!(lp.gesture.center(), Some(first));

        // Absent undefines it again.
        lp.frame(HandPresence::Absent);
        assert_eq!(lp.gesture.center(), None);
        assert!(!lp.moving);
        assert_eq!(lp.last_point, None);
    }

    #[test]
    fn test_moves_flow_to_sink() {
        let (mut lp, sink) = test_loop();

        // Calibrate, then push into the extrude band and sweep across
        // the bed.  z = -0.09 gives relative depth 11 < 13: extruding.
        lp.frame(present(0.5, 0.5, 0.0));
        lp.frame(present(0.5, 0.5, -0.09));
        lp.frame(present(0.55, 0.5, -0.09));
        lp.frame(present(0.60, 0.5, -0.09));

        drop(lp);
        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert!(line.starts_with("G1 X"), "{}", line);
            assert!(line.contains(" E"), "{}", line);
        }
        // Strict FIFO: X advances in enqueue order.
        assert!(lines[0].contains("X110.000"));
        assert!(lines[1].contains("X120.000"));
    }

    #[test]
    fn test_idle_band_produces_travel_moves() {
        let (mut lp, sink) = test_loop();

        lp.frame(present(0.5, 0.5, 0.0));
        // Stay near the baseline: Idle, but displaced enough to move.
        lp.frame(present(0.55, 0.5, 0.0));

        drop(lp);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains('E'), "{}", lines[0]);
    }

    #[test]
    fn test_sub_epsilon_motion_not_emitted() {
        let (mut lp, sink) = test_loop();

        lp.frame(present(0.5, 0.5, 0.0));
        // 0.0001 normalized is 0.02mm on the bed, far below 0.5mm.
        lp.frame(present(0.5001, 0.5, 0.0));
        lp.frame(present(0.5002, 0.5, 0.0));
        assert!(!lp.moving);

        drop(lp);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_drift_accumulates_against_anchor() {
        let (mut lp, sink) = test_loop();

        lp.frame(present(0.5, 0.5, 0.0));
        // Each step is 0.2mm (sub-epsilon), but the anchor stays put
        // while not moving, so the third step crosses 0.5mm.
        lp.frame(present(0.501, 0.5, 0.0));
        assert!(!lp.moving);
        lp.frame(present(0.502, 0.5, 0.0));
        assert!(!lp.moving);
        lp.frame(present(0.503, 0.5, 0.0));
        assert!(lp.moving);

        drop(lp);
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn test_raising_entry_advances_layer_once() {
        let (mut lp, sink) = test_loop();

        lp.frame(present(0.5, 0.5, 0.0));
        // depth 32 > 27: Raising.
        lp.frame(present(0.5, 0.5, 0.12));
        assert_eq!(lp.translator.layer_index(), 1);
        // Holding the raise does not advance again.
        lp.frame(present(0.5, 0.5, 0.13));
        assert_eq!(lp.translator.layer_index(), 1);

        drop(lp);
        // Empty first layer: temp drop, Z step, register reset only.
        assert_eq!(
            sink.lines(),
            vec!["M104 S195", "G1 Z0.600 F4200", "G92 E0"]
        );
    }

    #[test]
    fn test_hand_loss_recovers_without_commands() {
        let (mut lp, sink) = test_loop();

        lp.frame(present(0.5, 0.5, 0.0));
        lp.frame(present(0.55, 0.5, -0.09));
        lp.frame(HandPresence::Absent);
        assert_eq!(lp.gesture.state(), GestureState::Idle);

        // Reappearing far away recalibrates; no spurious move fires.
        let commands_before = lp.translator.commands_emitted();
        lp.frame(present(0.2, 0.8, 0.3));
        assert_eq!(lp.translator.commands_emitted(), commands_before);

        drop(lp);
        // Only the one extruding move from before the loss.
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn test_run_drains_on_exit_timer() {
        let sink = MemorySink::new();
        let queue = CommandQueue::start(Box::new(sink.clone())).unwrap();
        let translator = MotionTranslator::new(PrinterConfig::default(), queue);
        let (tx, rx) = unbounded();

        // Script one calibration frame and one extruding sweep.
        tx.send(present(0.5, 0.5, 0.0)).unwrap();
        tx.send(present(0.55, 0.5, -0.09)).unwrap();

        let lp = GesturePrintLoop::new(
            LoopConfig {
                poll_timeout_ms: 5,
                status_interval_secs: 60,
                exit_after_secs: Some(1),
            },
            Box::new(ChannelTracker::new(rx)),
            GestureMachine::new(GestureConfig::default()),
            translator,
        );
        let summary = lp.run().unwrap();

        let lines = sink.lines();
        assert_eq!(summary.commands_written as usize, lines.len());
        // Startup sequence first, shutdown sequence last, move between.
        assert_eq!(lines[0], "G1 X-250 F2100");
        assert_eq!(lines.last().unwrap(), "M84");
        assert!(lines.iter().any(|l| l.contains("X110.000")));
    }
}
