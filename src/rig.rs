//! Hardware collaborators of the picking plan.
//!
//! The plan never talks to a robot, camera, or UI directly. It drives the
//! traits in this module, so a run can target real hardware or the
//! simulated rig in [`sim`] without changing plan code. All calls block
//! until the hardware settles; the plan runs them from its own worker
//! thread.

pub mod sim;

use crate::vision::Analysis;
use image::RgbImage;
use nalgebra::{Point3, Vector3};
use std::time::Duration;

/// Error raised by robot or camera hardware. Treated as transient by the
/// picking plan, which retries the interrupted step.
#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    /// The motion controller rejected or failed a command.
    #[error("robot command failed: {0}")]
    Command(String),
    /// A requested move would leave the reachable envelope.
    #[error("target {0:?} is outside the reachable envelope")]
    OutOfRange(Point3<f64>),
    /// The liquid handler failed to aspirate or dispense.
    #[error("liquid handling failed: {0}")]
    Liquid(String),
    /// The camera produced no frame within the timeout.
    #[error("camera {camera:?} produced no frame within {timeout:?}")]
    FrameTimeout {
        /// Camera identifier.
        camera: String,
        /// How long the capture waited.
        timeout: Duration,
    },
}

/// Cartesian axis of the gantry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// Left-right across the deck.
    X,
    /// Front-back across the deck.
    Y,
    /// Vertical.
    Z,
}

/// Tool mount on the gantry head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mount {
    /// Left mount, carrying the picking tip.
    Left,
    /// Right mount.
    Right,
}

/// Vertical reference inside a destination well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WellLocation {
    /// Top rim of the well.
    Top,
    /// Bottom of the well.
    Bottom,
}

/// Motion and liquid-handling commands of the picking robot.
///
/// Every method blocks until the hardware has settled or returns a
/// [`RobotError`] wrapped in [`eyre::Report`].
pub trait RobotArm: Send {
    /// Homes all axes.
    fn home(&mut self) -> eyre::Result<()>;

    /// Turns the deck illumination on or off.
    fn toggle_lights(&mut self) -> eyre::Result<()>;

    /// Whether the deck illumination is currently on.
    fn lights_on(&self) -> bool;

    /// Retracts the given mount's axis to its safe travel height.
    fn retract_axis(&mut self, mount: Mount) -> eyre::Result<()>;

    /// Moves the active tool to absolute deck coordinates.
    ///
    /// With `force_direct` the controller takes the straight path instead of
    /// retracting first; `min_z_height` bounds how low the travel may dip.
    fn move_to_coordinates(
        &mut self,
        target: Point3<f64>,
        min_z_height: f64,
        force_direct: bool,
    ) -> eyre::Result<()>;

    /// Jogs one axis by a signed distance in millimeters.
    fn move_relative(&mut self, axis: Axis, distance: f64) -> eyre::Result<()>;

    /// Aspirates `volume` microliters at the current position.
    fn aspirate_in_place(&mut self, volume: f64, flow_rate: f64) -> eyre::Result<()>;

    /// Dispenses `volume` microliters at the current position.
    fn dispense_in_place(&mut self, volume: f64, flow_rate: f64) -> eyre::Result<()>;

    /// Moves the active tool over `well` of the plate in `slot`, vertically
    /// referenced to `location` and shifted by `offset`.
    fn move_to_well(
        &mut self,
        slot: &str,
        well: &str,
        location: WellLocation,
        offset: Vector3<f64>,
    ) -> eyre::Result<()>;

    /// Moves into `well` of the plate in `slot` and dispenses `volume`
    /// microliters there.
    #[allow(clippy::too_many_arguments)]
    fn dispense(
        &mut self,
        slot: &str,
        well: &str,
        location: WellLocation,
        offset: Vector3<f64>,
        volume: f64,
        flow_rate: f64,
    ) -> eyre::Result<()>;

    /// Current position of the active tool.
    fn position(&self) -> Point3<f64>;
}

/// Source of overview camera frames.
pub trait FrameSource: Send {
    /// Captures one frame from `camera`, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when the camera simply had no frame ready, which
    /// the plan retries without treating it as a fault.
    fn capture_frame(
        &mut self,
        camera: &str,
        timeout: Duration,
    ) -> eyre::Result<Option<RgbImage>>;

    /// Removes lens distortion from a captured frame.
    fn undistort(&self, frame: RgbImage) -> RgbImage;
}

/// Annotated frame plus detection counters, published after every analysis.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    /// Overview frame with detection overlays drawn in.
    pub image: RgbImage,
    /// Total candidates that survived the contour filter.
    pub total: usize,
    /// Candidates inside the size window.
    pub in_size_range: usize,
    /// Candidates passing every pick criterion.
    pub pickable: usize,
    /// Pickable candidates with no close neighbor.
    pub isolated: usize,
    /// Well currently being filled, if any.
    pub current_well: Option<String>,
    /// Whether the plan is paused.
    pub paused: bool,
}

impl AnnotatedFrame {
    /// Builds the counter fields from an analysis.
    #[must_use]
    pub fn new(image: RgbImage, analysis: &Analysis) -> Self {
        Self {
            image,
            total: analysis.candidates.len(),
            in_size_range: analysis.in_size_range_count(),
            pickable: analysis.pickable_count(),
            isolated: analysis.isolated_count(),
            current_well: None,
            paused: false,
        }
    }
}

/// Broad flavor of a status update, for operator-facing display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTone {
    /// Waiting for the operator.
    Idle,
    /// Actively working.
    Busy,
    /// Paused by the operator.
    Paused,
    /// Something transient went wrong.
    Warning,
    /// A run finished successfully.
    Success,
    /// A run halted on a fatal error.
    Failure,
}

/// One operator-facing status line.
#[derive(Clone, Debug)]
pub struct StatusUpdate {
    /// Name of the plan state that produced this update.
    pub state: String,
    /// Human-readable message.
    pub message: String,
    /// Display flavor.
    pub tone: StatusTone,
}

/// Consumer of frames and status updates, typically a UI or a log relay.
///
/// Takes `&self` so the plan can publish while holding mutable borrows of
/// the robot and camera.
pub trait StatusSink: Send {
    /// Publishes an annotated frame.
    fn frame(&self, frame: AnnotatedFrame);

    /// Publishes a status update.
    fn status(&self, update: StatusUpdate);
}

/// The full set of collaborators a plan runs against.
pub struct Rig<R, F, S> {
    /// Motion and liquid handling.
    pub robot: R,
    /// Overview camera.
    pub frames: F,
    /// Operator-facing output.
    pub sink: S,
}

impl<R: RobotArm, F: FrameSource, S: StatusSink> Rig<R, F, S> {
    /// Bundles the collaborators into a rig.
    pub fn new(robot: R, frames: F, sink: S) -> Self {
        Self { robot, frames, sink }
    }
}
