//! Picking procedure state machine.
//!
//! [`Plan::run`] drives the whole camera-pick-verify-deposit cycle against a
//! [`Rig`] until the routine completes, the operator cancels, or a fatal
//! error halts it. Hardware faults are transient: the interrupted state is
//! retried after a delay. Malformed configuration, calibration, or plan data
//! is fatal.

use crate::{
    annotate,
    calibration::{Calibration, CalibrationError},
    config::{ConfigError, PickingConfig},
    consts::{
        APPROACH_CLEARANCE, DEPOSIT_BACK_CLEARANCE, FRAME_TIMEOUT, LOOP_INTERVAL,
        OVERVIEW_HEIGHT, RETRACT_DISTANCE, RETRY_DELAY, SETTLE_AFTER_DEPOSIT_BACK,
        SETTLE_AFTER_MOVE, SETTLE_BEFORE_VERIFY, SHAKE_JOG_COUNT, SHAKE_JOG_DISTANCE,
        SHAKE_LOCATION, SHAKE_SETTLE, SHAKE_STROKE_PAUSE, SHAKE_TAIL_DISTANCE,
        WELL_TOP_CLEARANCE,
    },
    rig::{
        AnnotatedFrame, Axis, FrameSource, Mount, Rig, RobotArm, StatusSink, StatusTone,
        StatusUpdate, WellLocation,
    },
    scheduler::{Routine, RoutineError, RoutineSnapshot},
    vision::{self, Analysis, CandidateObject},
};
use eyre::{Error, Result};
use image::RgbImage;
use nalgebra::{Point3, Vector3};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// States of the picking procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RobotState {
    /// Parked over the dish, streaming preview frames, waiting for the
    /// operator.
    Idle,
    /// Taking an overview frame.
    CaptureFrame,
    /// Running the vision pipeline and choosing targets.
    AnalyzeFrame,
    /// Converting chosen targets to robot coordinates.
    ApproachTarget,
    /// Aspirating each chosen target.
    PickupSample,
    /// Re-imaging the dish to confirm the picks took.
    VerifyPickup,
    /// Returning the aspirated liquid after a failed pick.
    DepositBack,
    /// Delivering the picked samples to the destination well.
    TransferToWell,
    /// Agitating the dish to redistribute clumped objects.
    AutoShake,
    /// Suspended by the operator, resuming into the interrupted state.
    Paused,
    /// Routine finished.
    Completed,
    /// Operator canceled the run.
    Canceled,
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CaptureFrame => "capture_frame",
            Self::AnalyzeFrame => "analyze_frame",
            Self::ApproachTarget => "approach_target",
            Self::PickupSample => "pickup_sample",
            Self::VerifyPickup => "verify_pickup",
            Self::DepositBack => "deposit_liquid_back",
            Self::TransferToWell => "transfer_to_well",
            Self::AutoShake => "auto_shake",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct SignalState {
    paused: AtomicBool,
    canceled: AtomicBool,
}

/// Operator control signals shared between the plan's worker thread and the
/// controlling thread.
///
/// The plan polls these at state boundaries, so a pause takes effect after
/// the current hardware sequence finishes rather than mid-motion.
#[derive(Clone, Default)]
pub struct Signals(Arc<SignalState>);

impl Signals {
    /// Creates a new signal pair in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a pause at the next state boundary.
    pub fn pause(&self) {
        self.0.paused.store(true, Ordering::Relaxed);
    }

    /// Clears a pause request.
    pub fn resume(&self) {
        self.0.paused.store(false, Ordering::Relaxed);
    }

    /// Flips the pause request.
    pub fn toggle_pause(&self) {
        self.0.paused.fetch_xor(true, Ordering::Relaxed);
    }

    /// Requests cancellation. Irreversible for the current run.
    pub fn cancel(&self) {
        self.0.canceled.store(true, Ordering::Relaxed);
    }

    /// Whether a pause is requested.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.0.paused.load(Ordering::Relaxed)
    }

    /// Whether cancellation is requested.
    #[must_use]
    pub fn canceled(&self) -> bool {
        self.0.canceled.load(Ordering::Relaxed)
    }
}

/// [`Plan`] builder.
#[derive(Default)]
pub struct Builder {
    hold_in_idle: bool,
    seed: Option<u64>,
}

impl Builder {
    /// Makes the plan start paused in the idle state until the operator
    /// resumes it.
    #[must_use]
    pub fn hold_in_idle(mut self, hold: bool) -> Self {
        self.hold_in_idle = hold;
        self
    }

    /// Seeds target sampling for reproducible runs.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds a new [`Plan`].
    #[must_use]
    pub fn build(
        self,
        config: PickingConfig,
        calibration: Calibration,
        routine: Routine,
        signals: Signals,
    ) -> Plan {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Plan {
            state: RobotState::Idle,
            config,
            calibration,
            routine,
            signals,
            analysis: Analysis::default(),
            chosen: Vec::new(),
            world_coordinates: Vec::new(),
            current_frame: None,
            current_well: None,
            hold_in_idle: self.hold_in_idle,
            rng,
        }
    }
}

/// The picking procedure.
pub struct Plan {
    state: RobotState,
    config: PickingConfig,
    calibration: Calibration,
    routine: Routine,
    signals: Signals,
    analysis: Analysis,
    chosen: Vec<CandidateObject>,
    world_coordinates: Vec<(f64, f64)>,
    current_frame: Option<RgbImage>,
    current_well: Option<String>,
    hold_in_idle: bool,
    rng: StdRng,
}

/// Fatal errors halt the run; everything else is retried.
fn is_fatal(err: &Error) -> bool {
    err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<CalibrationError>().is_some()
        || err.downcast_ref::<RoutineError>().is_some()
}

impl Plan {
    /// Creates a new [`Builder`].
    #[must_use]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Current state, for observers.
    #[must_use]
    pub fn state(&self) -> RobotState {
        self.state
    }

    /// Runs the picking procedure to completion, cancellation, or a fatal
    /// error.
    pub fn run<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<RoutineSnapshot> {
        let mut resume_state = None;
        loop {
            if self.signals.canceled() && self.state != RobotState::Completed {
                self.state = RobotState::Canceled;
            }
            match self.state {
                RobotState::Completed => {
                    self.publish(rig, StatusTone::Success, "Picking procedure finished");
                    break;
                }
                RobotState::Canceled => {
                    log::warn!("Picking procedure canceled by the operator");
                    // Best effort: a retract fault must not swallow the
                    // cancellation report.
                    if let Err(err) = rig.robot.retract_axis(Mount::Left) {
                        log::warn!("Failed to retract while canceling: {err:?}");
                    }
                    self.publish(rig, StatusTone::Warning, "Picking procedure canceled");
                    break;
                }
                _ => {}
            }
            if self.signals.paused() && self.state != RobotState::Idle {
                if resume_state.is_none() {
                    resume_state = Some(self.state);
                    self.state = RobotState::Paused;
                    self.publish(rig, StatusTone::Paused, "Paused");
                }
                thread::sleep(LOOP_INTERVAL);
                continue;
            }
            if let Some(interrupted) = resume_state.take() {
                self.state = interrupted;
            }
            if let Err(err) = self.step(rig) {
                if is_fatal(&err) {
                    log::error!("Fatal error in state {}: {err:?}", self.state);
                    self.publish(rig, StatusTone::Failure, &format!("Halted: {err}"));
                    return Err(err);
                }
                log::warn!("Transient error in state {}, retrying: {err:?}", self.state);
                self.publish(rig, StatusTone::Warning, &format!("Retrying: {err}"));
                thread::sleep(RETRY_DELAY);
                continue;
            }
            thread::sleep(LOOP_INTERVAL);
        }
        Ok(self.routine.snapshot())
    }

    fn publish<R, F, S: StatusSink>(
        &self,
        rig: &Rig<R, F, S>,
        tone: StatusTone,
        message: &str,
    ) {
        rig.sink.status(StatusUpdate {
            state: self.state.to_string(),
            message: message.into(),
            tone,
        });
    }

    fn publish_frame<R, F, S: StatusSink>(
        &self,
        rig: &Rig<R, F, S>,
        frame: &RgbImage,
        verify_centers: &[(f64, f64)],
    ) {
        let mut image = frame.clone();
        annotate::draw_overlays(
            &mut image,
            &self.analysis,
            &self.chosen,
            verify_centers,
            &self.config,
            &self.calibration,
        );
        let mut annotated = AnnotatedFrame::new(image, &self.analysis);
        annotated.current_well = self.current_well.clone();
        annotated.paused = self.signals.paused();
        rig.sink.frame(annotated);
    }

    fn step<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        match self.state {
            RobotState::Idle => self.state_idle(rig),
            RobotState::CaptureFrame => self.state_capture_frame(rig),
            RobotState::AnalyzeFrame => self.state_analyze_frame(rig),
            RobotState::ApproachTarget => self.state_approach_target(),
            RobotState::PickupSample => self.state_pickup_sample(rig),
            RobotState::VerifyPickup => self.state_verify_pickup(rig),
            RobotState::DepositBack => self.state_deposit_back(rig),
            RobotState::TransferToWell => self.state_transfer_to_well(rig),
            RobotState::AutoShake => self.state_auto_shake(rig),
            RobotState::Paused | RobotState::Completed | RobotState::Canceled => Ok(()),
        }
    }

    fn overview_position(&self) -> Point3<f64> {
        Point3::new(
            self.calibration.calib_origin.x,
            self.calibration.calib_origin.y,
            OVERVIEW_HEIGHT,
        )
    }

    fn capture<F: FrameSource>(&self, frames: &mut F) -> Result<Option<RgbImage>> {
        let frame = frames.capture_frame(&self.config.overview_camera, FRAME_TIMEOUT)?;
        Ok(frame.map(|frame| frames.undistort(frame)))
    }

    /// Parks over the dish with the lights off and streams preview frames
    /// until the operator resumes.
    fn state_idle<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        self.publish(rig, StatusTone::Idle, "Idle, waiting for the operator");
        rig.robot.retract_axis(Mount::Left)?;
        rig.robot
            .move_to_coordinates(self.overview_position(), self.config.dish_bottom, false)?;
        if rig.robot.lights_on() {
            rig.robot.toggle_lights()?;
        }
        if self.hold_in_idle {
            self.signals.pause();
        }
        while self.signals.paused() && !self.signals.canceled() {
            if let Some(frame) = self.capture(&mut rig.frames)? {
                self.analysis = vision::analyze(&frame, &self.config, &self.calibration);
                self.publish_frame(rig, &frame, &[]);
            }
            thread::sleep(LOOP_INTERVAL);
        }
        self.state = RobotState::CaptureFrame;
        Ok(())
    }

    fn state_capture_frame<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        self.publish(rig, StatusTone::Busy, "Capturing overview frame");
        rig.robot
            .move_to_coordinates(self.overview_position(), self.config.dish_bottom, false)?;
        thread::sleep(SETTLE_AFTER_MOVE);
        let Some(frame) = self.capture(&mut rig.frames)? else {
            log::warn!("No frame from {}, retrying", self.config.overview_camera);
            return Ok(());
        };
        self.current_frame = Some(frame);
        self.state = RobotState::AnalyzeFrame;
        Ok(())
    }

    /// Analyzes the latest frame and chooses targets for the current well.
    fn state_analyze_frame<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        let Some(frame) = self.current_frame.take() else {
            self.state = RobotState::CaptureFrame;
            return Ok(());
        };
        self.analysis = vision::analyze(&frame, &self.config, &self.calibration);
        let isolated: Vec<CandidateObject> = self.analysis.isolated().cloned().collect();
        if isolated.is_empty() {
            log::info!("No isolated objects found, shaking the dish");
            self.chosen.clear();
            self.publish_frame(rig, &frame, &[]);
            self.publish(rig, StatusTone::Warning, "No isolated objects, shaking");
            self.state = RobotState::AutoShake;
            return Ok(());
        }

        let Some(well) = self.routine.get_next_well() else {
            self.state = RobotState::Completed;
            return Ok(());
        };
        let owed = self.routine.remaining_current() as usize;
        let count = if self.config.one_by_one { 1 } else { owed.min(isolated.len()) };
        self.chosen = isolated
            .choose_multiple(&mut self.rng, count)
            .cloned()
            .collect();
        log::info!(
            "Filling well {well}: {} of {} isolated objects chosen",
            self.chosen.len(),
            isolated.len()
        );
        self.current_well = Some(well);
        self.publish_frame(rig, &frame, &[]);
        self.current_frame = Some(frame);
        self.state = RobotState::ApproachTarget;
        Ok(())
    }

    /// Converts the chosen targets' pixel centers to robot coordinates.
    fn state_approach_target(&mut self) -> Result<()> {
        self.world_coordinates = self
            .chosen
            .iter()
            .map(|candidate| {
                let physical = self.calibration.pixel_to_physical(
                    candidate.center_px.0,
                    candidate.center_px.1,
                    self.calibration.calib_origin,
                );
                (physical.x, physical.y)
            })
            .collect();
        self.state = RobotState::PickupSample;
        Ok(())
    }

    /// Aspirates each target: approach from above, descend to pickup height,
    /// aspirate, retract.
    fn state_pickup_sample<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        self.publish(
            rig,
            StatusTone::Busy,
            &format!("Picking {} targets", self.world_coordinates.len()),
        );
        let pickup_height = self.config.pickup_height();
        for &(x, y) in &self.world_coordinates {
            rig.robot.move_to_coordinates(
                Point3::new(x, y, pickup_height + APPROACH_CLEARANCE),
                self.config.dish_bottom,
                true,
            )?;
            rig.robot.move_to_coordinates(
                Point3::new(x, y, pickup_height),
                self.config.dish_bottom,
                true,
            )?;
            rig.robot
                .aspirate_in_place(self.config.vol, self.config.flow_rate)?;
            rig.robot.move_relative(Axis::Z, RETRACT_DISTANCE)?;
        }
        self.state = RobotState::VerifyPickup;
        Ok(())
    }

    /// Re-images the dish and checks whether any pickable object remains
    /// within the failure radius of a pick site, which means the pick
    /// failed.
    fn state_verify_pickup<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        rig.robot
            .move_to_coordinates(self.overview_position(), self.config.dish_bottom, true)?;
        thread::sleep(SETTLE_BEFORE_VERIFY);
        let Some(frame) = self.capture(&mut rig.frames)? else {
            log::warn!("No frame for pickup verification, retrying");
            return Ok(());
        };
        self.analysis = vision::analyze(&frame, &self.config, &self.calibration);

        let pick_sites: Vec<(f64, f64)> =
            self.chosen.iter().map(|c| c.center_px).collect();
        let mut miss_occurred = false;
        for &(prev_x, prev_y) in &pick_sites {
            let missed = self.analysis.pickable().any(|candidate| {
                let (cx, cy) = candidate.center_px;
                let distance_mm = ((cx - prev_x).powi(2) + (cy - prev_y).powi(2)).sqrt()
                    * self.calibration.pixel_to_mm_ratio;
                distance_mm <= self.config.failure_threshold
            });
            if missed {
                log::warn!("Miss detected at well {:?}", self.current_well);
                self.routine.update_well(false)?;
                miss_occurred = true;
            }
        }
        if !miss_occurred {
            for _ in &pick_sites {
                self.routine.update_well(true)?;
            }
        }

        self.publish_frame(rig, &frame, &pick_sites);
        if miss_occurred {
            self.publish(rig, StatusTone::Warning, "Pick missed, depositing back");
            self.state = RobotState::DepositBack;
        } else {
            self.state = RobotState::TransferToWell;
        }
        Ok(())
    }

    /// Returns the aspirated liquid just above the first pick site so a
    /// failed pick doesn't carry dish medium off to the plate.
    fn state_deposit_back<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        let Some(&(x, y)) = self.world_coordinates.first() else {
            self.state = RobotState::CaptureFrame;
            return Ok(());
        };
        let pickup_height = self.config.pickup_height();
        rig.robot.move_to_coordinates(
            Point3::new(x, y, pickup_height + APPROACH_CLEARANCE),
            self.config.dish_bottom,
            true,
        )?;
        rig.robot.move_to_coordinates(
            Point3::new(x, y, pickup_height + DEPOSIT_BACK_CLEARANCE),
            self.config.dish_bottom,
            true,
        )?;
        let volume = self.config.vol * self.world_coordinates.len() as f64;
        rig.robot.dispense_in_place(volume, self.config.flow_rate)?;
        thread::sleep(SETTLE_AFTER_DEPOSIT_BACK);
        rig.robot.move_relative(Axis::Z, RETRACT_DISTANCE)?;
        self.state = RobotState::CaptureFrame;
        Ok(())
    }

    /// Carries the picked samples to the destination well and dispenses at
    /// its bottom.
    fn state_transfer_to_well<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        let Some(well) = self.current_well.clone() else {
            self.state = RobotState::CaptureFrame;
            return Ok(());
        };
        self.publish(rig, StatusTone::Busy, &format!("Transferring to well {well}"));
        let slot = self.routine.slot().to_owned();
        let lateral = Vector3::new(self.config.well_offset_x, self.config.well_offset_y, 0.0);
        rig.robot.move_to_well(
            &slot,
            &well,
            WellLocation::Top,
            lateral + Vector3::new(0.0, 0.0, WELL_TOP_CLEARANCE),
        )?;
        let volume = self.config.vol * self.world_coordinates.len() as f64;
        rig.robot.dispense(
            &slot,
            &well,
            WellLocation::Bottom,
            lateral + Vector3::new(0.0, 0.0, self.config.deposit_offset_z),
            volume,
            self.config.flow_rate,
        )?;
        thread::sleep(Duration::from_secs_f64(self.config.wait_time_after_deposit));
        rig.robot.move_to_well(
            &slot,
            &well,
            WellLocation::Top,
            lateral + Vector3::new(0.0, 0.0, WELL_TOP_CLEARANCE),
        )?;
        rig.robot
            .move_to_coordinates(self.overview_position(), self.config.dish_bottom, true)?;

        self.current_well = self.routine.get_next_well();
        if self.routine.is_done() {
            self.state = RobotState::Completed;
        } else {
            self.state = RobotState::CaptureFrame;
        }
        Ok(())
    }

    /// Jogs the gantry back and forth over the dish to redistribute objects
    /// that clumped together.
    fn state_auto_shake<R: RobotArm, F: FrameSource, S: StatusSink>(
        &mut self,
        rig: &mut Rig<R, F, S>,
    ) -> Result<()> {
        rig.robot.retract_axis(Mount::Left)?;
        rig.robot.move_to_coordinates(
            Point3::new(SHAKE_LOCATION.0, SHAKE_LOCATION.1, SHAKE_LOCATION.2),
            0.0,
            false,
        )?;
        for _ in 0..SHAKE_JOG_COUNT {
            rig.robot.move_relative(Axis::X, -SHAKE_JOG_DISTANCE)?;
            rig.robot.move_relative(Axis::X, SHAKE_JOG_DISTANCE)?;
            thread::sleep(SHAKE_STROKE_PAUSE);
        }
        rig.robot.move_relative(Axis::X, SHAKE_TAIL_DISTANCE)?;
        thread::sleep(SHAKE_STROKE_PAUSE);
        rig.robot.move_relative(Axis::X, -SHAKE_TAIL_DISTANCE)?;
        rig.robot.retract_axis(Mount::Left)?;
        thread::sleep(SHAKE_SETTLE);
        self.state = RobotState::CaptureFrame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_toggle_and_cancel() {
        let signals = Signals::new();
        assert!(!signals.paused());
        signals.toggle_pause();
        assert!(signals.paused());
        signals.toggle_pause();
        assert!(!signals.paused());
        signals.cancel();
        assert!(signals.canceled());
    }

    #[test]
    fn state_names_match_display() {
        assert_eq!(RobotState::DepositBack.to_string(), "deposit_liquid_back");
        assert_eq!(RobotState::AutoShake.to_string(), "auto_shake");
        assert_eq!(RobotState::Paused.to_string(), "paused");
    }
}
