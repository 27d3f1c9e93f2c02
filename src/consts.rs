//! Project constants.

use std::time::Duration;

/// Overview position height above the deck, in mm. The camera sees the whole
/// dish from here.
pub const OVERVIEW_HEIGHT: f64 = 115.0;

/// Vertical clearance above the pickup height for the approach move, in mm.
pub const APPROACH_CLEARANCE: f64 = 20.0;

/// Relative z retract after an aspirate or dispense, in mm.
pub const RETRACT_DISTANCE: f64 = 20.0;

/// Height above the pickup height at which held liquid is dispensed back
/// into the dish, in mm.
pub const DEPOSIT_BACK_CLEARANCE: f64 = 0.5;

/// Z offset above the well top used when hovering over a destination well,
/// in mm.
pub const WELL_TOP_CLEARANCE: f64 = 5.0;

/// Settling time after moving to the overview position before capturing.
pub const SETTLE_AFTER_MOVE: Duration = Duration::from_millis(500);

/// Settling time before the verification capture.
pub const SETTLE_BEFORE_VERIFY: Duration = Duration::from_millis(750);

/// Settling time after dispensing back into the dish.
pub const SETTLE_AFTER_DEPOSIT_BACK: Duration = Duration::from_millis(500);

/// Deck location of the dish agitation sequence (x, y, z) in mm.
pub const SHAKE_LOCATION: (f64, f64, f64) = (235.0, 223.0, 65.0);

/// Lateral jog distance of one agitation stroke, in mm.
pub const SHAKE_JOG_DISTANCE: f64 = 10.0;

/// Number of full agitation strokes.
pub const SHAKE_JOG_COUNT: usize = 3;

/// Small final jog to re-center the dish contents, in mm.
pub const SHAKE_TAIL_DISTANCE: f64 = 2.0;

/// Pause between agitation strokes.
pub const SHAKE_STROKE_PAUSE: Duration = Duration::from_millis(500);

/// Settling time after the agitation sequence, letting the liquid calm down.
pub const SHAKE_SETTLE: Duration = Duration::from_secs(2);

/// Control loop polling interval, used between states and while paused.
pub const LOOP_INTERVAL: Duration = Duration::from_millis(100);

/// Delay before retrying a state after a transient failure.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Frame acquisition timeout.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Gaussian blur sigma applied before the main threshold (equivalent to an
/// 11x11 OpenCV kernel).
pub const BLUR_SIGMA: f32 = 2.0;

/// Window size of the main adaptive threshold, in px.
pub const THRESHOLD_BLOCK: u32 = 41;

/// Constant subtracted from the local mean by the main adaptive threshold.
pub const THRESHOLD_C: f64 = 3.0;

/// Window size of the artifact (bubble) adaptive threshold, in px. Runs on
/// the unblurred image to keep bubble rims sharp.
pub const ARTIFACT_BLOCK: u32 = 35;

/// Constant subtracted from the local mean by the artifact threshold.
pub const ARTIFACT_C: f64 = 5.0;

/// Square microns per square millimeter, for candidate diameter conversion.
pub const MICRON2_PER_MM2: f64 = 1e6;

/// Minimum number of point correspondences accepted by the least-squares
/// transform fit.
pub const MIN_CORRESPONDENCES: usize = 3;

/// Default overview camera identifier.
pub const OVERVIEW_CAMERA: &str = "overview_cam_2";
