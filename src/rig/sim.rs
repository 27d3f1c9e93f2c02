//! Simulated rig for development and tests.
//!
//! A shared [`Dish`] models the physical petri dish: the fake camera renders
//! its contents into frames and the fake robot removes or re-adds objects as
//! it aspirates and dispenses, so a full picking run plays out end to end
//! without hardware.

use super::{
    AnnotatedFrame, Axis, FrameSource, Mount, RobotArm, RobotError, StatusSink, StatusUpdate,
    WellLocation,
};
use crate::calibration::Calibration;
use eyre::Result;
use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

const BACKGROUND: Rgb<u8> = Rgb([230, 230, 230]);
const TISSUE: Rgb<u8> = Rgb([40, 40, 40]);

/// How close the tip must land to an object's center to pick it up, in
/// pixels.
const PICK_TOLERANCE_PX: f64 = 5.0;

/// One object sitting in the simulated dish, in pixel coordinates of the
/// overview camera.
#[derive(Clone, Copy, Debug)]
pub struct Disc {
    /// Center column.
    pub x: f64,
    /// Center row.
    pub y: f64,
    /// Radius in pixels.
    pub r: f64,
    /// Render as a ring instead of a solid disc, mimicking a bubble.
    pub hollow: bool,
}

/// Mutable contents of the simulated dish.
#[derive(Debug, Default)]
pub struct DishState {
    /// Objects currently in the dish.
    pub discs: Vec<Disc>,
    /// Render this many upcoming frames with an empty dish, regardless of
    /// contents. Drives the no-candidates path.
    pub blank_frames: u32,
    /// Silently drop this many upcoming aspirations, leaving the object in
    /// place. Drives the missed-pick path.
    pub failed_picks: u32,
}

/// Dish shared between the fake robot and the fake camera.
pub type Dish = Arc<Mutex<DishState>>;

/// Creates a dish holding the given objects.
#[must_use]
pub fn dish(discs: Vec<Disc>) -> Dish {
    Arc::new(Mutex::new(DishState { discs, ..DishState::default() }))
}

/// Calibration matching the simulated camera: a pure scale-and-translate
/// transform at 0.022 mm per pixel.
#[must_use]
pub fn calibration() -> Calibration {
    let scale = 0.022;
    Calibration {
        transform_matrix: Matrix3::new(scale, 0.0, 150.0, 0.0, scale, 80.0, 0.0, 0.0, 1.0),
        calib_origin: Point2::new(200.0, 160.0),
        offset: Vector2::zeros(),
        area_to_physical_ratio: scale * scale,
        pixel_to_mm_ratio: scale,
    }
}

/// Fake motion and liquid handling, journaling every command it receives.
pub struct SimRobot {
    dish: Dish,
    inverse_transform: Matrix3<f64>,
    offset: Vector2<f64>,
    position: Point3<f64>,
    lights: bool,
    /// Human-readable journal of every command, in order.
    pub journal: Vec<String>,
    /// Number of aspirations currently held in the tip.
    pub held: u32,
}

impl SimRobot {
    /// Creates a robot over `dish` using `calibration` to map its physical
    /// position back to dish pixels.
    pub fn new(dish: Dish, calibration: &Calibration) -> Result<Self> {
        let inverse_transform = calibration
            .transform_matrix
            .try_inverse()
            .ok_or_else(|| RobotError::Command("calibration transform is singular".into()))?;
        Ok(Self {
            dish,
            inverse_transform,
            offset: calibration.offset,
            position: Point3::new(0.0, 0.0, 150.0),
            lights: false,
            journal: Vec::new(),
            held: 0,
        })
    }

    /// Pixel under the tip, assuming the plan derived the target with the
    /// calibration origin as its reference.
    fn tip_pixel(&self) -> (f64, f64) {
        let physical = Vector3::new(
            self.position.x - self.offset.x,
            self.position.y - self.offset.y,
            1.0,
        );
        let px = self.inverse_transform * physical;
        (px.x, px.y)
    }
}

impl RobotArm for SimRobot {
    fn home(&mut self) -> Result<()> {
        self.journal.push("home".into());
        self.position = Point3::new(0.0, 0.0, 150.0);
        Ok(())
    }

    fn toggle_lights(&mut self) -> Result<()> {
        self.lights = !self.lights;
        self.journal.push(format!("lights {}", if self.lights { "on" } else { "off" }));
        Ok(())
    }

    fn lights_on(&self) -> bool {
        self.lights
    }

    fn retract_axis(&mut self, mount: Mount) -> Result<()> {
        self.journal.push(format!("retract {mount:?}"));
        self.position.z = 150.0;
        Ok(())
    }

    fn move_to_coordinates(
        &mut self,
        target: Point3<f64>,
        min_z_height: f64,
        force_direct: bool,
    ) -> Result<()> {
        if target.z < min_z_height {
            return Err(RobotError::OutOfRange(target).into());
        }
        self.journal.push(format!(
            "move ({:.2}, {:.2}, {:.2}){}",
            target.x,
            target.y,
            target.z,
            if force_direct { " direct" } else { "" }
        ));
        self.position = target;
        Ok(())
    }

    fn move_relative(&mut self, axis: Axis, distance: f64) -> Result<()> {
        self.journal.push(format!("jog {axis:?} {distance:+.2}"));
        match axis {
            Axis::X => self.position.x += distance,
            Axis::Y => self.position.y += distance,
            Axis::Z => self.position.z += distance,
        }
        Ok(())
    }

    fn aspirate_in_place(&mut self, volume: f64, flow_rate: f64) -> Result<()> {
        self.journal.push(format!("aspirate {volume:.1} @ {flow_rate:.1}"));
        let (px, py) = self.tip_pixel();
        let mut dish = self
            .dish
            .lock()
            .map_err(|_| RobotError::Command("dish state poisoned".into()))?;
        if dish.failed_picks > 0 {
            dish.failed_picks -= 1;
            self.held += 1;
            return Ok(());
        }
        let nearest = dish
            .discs
            .iter()
            .enumerate()
            .map(|(i, d)| (i, ((d.x - px).powi(2) + (d.y - py).powi(2)).sqrt()))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((i, distance)) = nearest {
            if distance <= PICK_TOLERANCE_PX {
                dish.discs.swap_remove(i);
            }
        }
        self.held += 1;
        Ok(())
    }

    fn dispense_in_place(&mut self, volume: f64, flow_rate: f64) -> Result<()> {
        self.journal.push(format!("dispense {volume:.1} @ {flow_rate:.1}"));
        self.held = 0;
        Ok(())
    }

    fn move_to_well(
        &mut self,
        slot: &str,
        well: &str,
        location: WellLocation,
        offset: Vector3<f64>,
    ) -> Result<()> {
        self.journal.push(format!(
            "well {slot}/{well} {location:?} ({:+.2}, {:+.2}, {:+.2})",
            offset.x, offset.y, offset.z
        ));
        // Plate sits in a fixed deck area; only the height depends on the
        // well reference.
        let z = match location {
            WellLocation::Top => 50.0,
            WellLocation::Bottom => 12.0,
        };
        self.position = Point3::new(300.0 + offset.x, 100.0 + offset.y, z + offset.z);
        Ok(())
    }

    fn dispense(
        &mut self,
        slot: &str,
        well: &str,
        location: WellLocation,
        offset: Vector3<f64>,
        volume: f64,
        flow_rate: f64,
    ) -> Result<()> {
        self.move_to_well(slot, well, location, offset)?;
        self.dispense_in_place(volume, flow_rate)
    }

    fn position(&self) -> Point3<f64> {
        self.position
    }
}

/// Fake overview camera rendering the dish contents.
pub struct SimFrameSource {
    dish: Dish,
    width: u32,
    height: u32,
}

impl SimFrameSource {
    /// Creates a camera of the given frame size over `dish`.
    #[must_use]
    pub fn new(dish: Dish, width: u32, height: u32) -> Self {
        Self { dish, width, height }
    }
}

impl FrameSource for SimFrameSource {
    fn capture_frame(&mut self, _camera: &str, _timeout: Duration) -> Result<Option<RgbImage>> {
        let mut frame = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let mut dish = self
            .dish
            .lock()
            .map_err(|_| RobotError::Command("dish state poisoned".into()))?;
        if dish.blank_frames > 0 {
            dish.blank_frames -= 1;
            return Ok(Some(frame));
        }
        for disc in &dish.discs {
            let r = disc.r.ceil() as i64;
            let (cx, cy) = (disc.x.round() as i64, disc.y.round() as i64);
            for y in (cy - r).max(0)..=(cy + r).min(i64::from(self.height) - 1) {
                for x in (cx - r).max(0)..=(cx + r).min(i64::from(self.width) - 1) {
                    let d2 = ((x - cx).pow(2) + (y - cy).pow(2)) as f64;
                    let inside = d2 <= disc.r * disc.r;
                    let in_wall = inside && d2 >= (disc.r - 4.0).max(0.0).powi(2);
                    if (disc.hollow && in_wall) || (!disc.hollow && inside) {
                        frame.put_pixel(x as u32, y as u32, TISSUE);
                    }
                }
            }
        }
        Ok(Some(frame))
    }

    fn undistort(&self, frame: RgbImage) -> RgbImage {
        frame
    }
}

/// Sink that records everything published to it.
#[derive(Default)]
pub struct CollectingSink {
    /// Status updates in publish order.
    pub updates: Mutex<Vec<StatusUpdate>>,
    /// Annotated frames in publish order.
    pub frames: Mutex<Vec<AnnotatedFrame>>,
}

impl StatusSink for CollectingSink {
    fn frame(&self, frame: AnnotatedFrame) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame);
        }
    }

    fn status(&self, update: StatusUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}

/// Sink that forwards status updates to the log and drops frames.
#[derive(Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn frame(&self, frame: AnnotatedFrame) {
        log::debug!(
            "frame: {} objects, {} pickable, {} isolated",
            frame.total,
            frame.pickable,
            frame.isolated
        );
    }

    fn status(&self, update: StatusUpdate) {
        log::info!("[{}] {}", update.state, update.message);
    }
}
