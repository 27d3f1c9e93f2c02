//! End-to-end picking runs against the simulated rig.

use cuboid_picker::{
    config::PickingConfig,
    plans::{Plan, Signals},
    rig::{
        sim::{self, CollectingSink, Disc, SimFrameSource, SimRobot},
        Axis, Mount, Rig, RobotArm, RobotError, StatusTone, WellLocation,
    },
    scheduler::{Destination, FillStrategy, Routine, WellPlan},
};
use nalgebra::{Point3, Vector3};
use std::{thread, time::Duration};

const FRAME_SIZE: u32 = 200;

fn test_config() -> PickingConfig {
    PickingConfig {
        circle_center: (100.0, 100.0),
        circle_radius: 90.0,
        one_by_one: true,
        ..PickingConfig::default()
    }
}

fn test_routine(wells: &[(&str, u32)]) -> Routine {
    let plan = WellPlan::custom(wells.iter().map(|(w, c)| ((*w).to_string(), *c)).collect());
    Routine::new(Destination { slot: "6".into(), plan }, FillStrategy::WellByWell).unwrap()
}

fn test_rig(dish: sim::Dish) -> Rig<SimRobot, SimFrameSource, CollectingSink> {
    let robot = SimRobot::new(dish.clone(), &sim::calibration()).unwrap();
    let frames = SimFrameSource::new(dish, FRAME_SIZE, FRAME_SIZE);
    Rig::new(robot, frames, CollectingSink::default())
}

/// Two well-separated objects, two samples owed: the run must pick both,
/// empty the dish, and report completion.
#[test]
fn picks_all_objects_into_the_well() {
    // 80 px apart is 1.76 mm at 0.022 mm/px, over the 1.7 mm isolation
    // minimum.
    let dish = sim::dish(vec![
        Disc { x: 60.0, y: 100.0, r: 8.0, hollow: false },
        Disc { x: 140.0, y: 100.0, r: 8.0, hollow: false },
    ]);
    let mut rig = test_rig(dish.clone());
    let mut plan = Plan::builder().seed(7).build(
        test_config(),
        sim::calibration(),
        test_routine(&[("A1", 2)]),
        Signals::new(),
    );

    let snapshot = plan.run(&mut rig).unwrap();
    assert!(snapshot.completed);
    assert_eq!(snapshot.total_filled, 2);
    assert_eq!(snapshot.filled["A1"], 2);
    assert_eq!(snapshot.missed.get("A1").copied().unwrap_or(0), 0);
    assert!(dish.lock().unwrap().discs.is_empty());

    let journal = rig.robot.journal.join("\n");
    assert!(journal.contains("aspirate"), "journal:\n{journal}");
    assert!(journal.contains("well 6/A1 Top"), "journal:\n{journal}");
    assert!(journal.contains("well 6/A1 Bottom"), "journal:\n{journal}");

    let updates = rig.sink.updates.lock().unwrap();
    assert!(updates.iter().any(|u| u.tone == StatusTone::Busy));
    assert!(updates.iter().any(|u| u.tone == StatusTone::Success));
}

/// Pausing mid-run suspends the procedure in a reported paused state;
/// resuming lets it finish.
#[test]
fn pause_suspends_and_resumes_the_run() {
    let dish = sim::dish(vec![Disc { x: 100.0, y: 100.0, r: 8.0, hollow: false }]);
    let mut rig = test_rig(dish);
    let signals = Signals::new();
    let mut plan = Plan::builder().seed(7).build(
        test_config(),
        sim::calibration(),
        test_routine(&[("A1", 1)]),
        signals.clone(),
    );

    let worker = thread::spawn(move || {
        let snapshot = plan.run(&mut rig).unwrap();
        (snapshot, rig)
    });
    // The first capture settle alone outlasts this, so the run is still
    // going when the pause lands and the loop is bound to observe it.
    thread::sleep(Duration::from_millis(200));
    signals.pause();
    thread::sleep(Duration::from_millis(700));
    signals.resume();

    let (snapshot, rig) = worker.join().unwrap();
    assert!(snapshot.completed);
    let updates = rig.sink.updates.lock().unwrap();
    assert!(updates
        .iter()
        .any(|u| u.state == "paused" && u.tone == StatusTone::Paused));
}

/// A silently failed aspiration leaves the object in the dish: the run must
/// detect the miss, deposit the liquid back, and retry until the well is
/// filled.
#[test]
fn detects_a_miss_and_retries() {
    let dish = sim::dish(vec![Disc { x: 100.0, y: 80.0, r: 8.0, hollow: false }]);
    dish.lock().unwrap().failed_picks = 1;
    let mut rig = test_rig(dish.clone());
    let mut plan = Plan::builder().seed(7).build(
        test_config(),
        sim::calibration(),
        test_routine(&[("A1", 1)]),
        Signals::new(),
    );

    let snapshot = plan.run(&mut rig).unwrap();
    assert!(snapshot.completed);
    assert_eq!(snapshot.filled["A1"], 1);
    assert_eq!(snapshot.missed["A1"], 1);
    assert!(dish.lock().unwrap().discs.is_empty());

    // The miss path dispenses back over the dish before the retry, so there
    // are two dispenses in total: one over the dish, one into the well.
    let dispenses = rig.robot.journal.iter().filter(|c| c.starts_with("dispense")).count();
    assert_eq!(dispenses, 2, "journal:\n{}", rig.robot.journal.join("\n"));
}

/// An empty-looking dish triggers the shake routine before picking resumes.
#[test]
fn shakes_the_dish_when_nothing_is_isolated() {
    let dish = sim::dish(vec![Disc { x: 100.0, y: 120.0, r: 8.0, hollow: false }]);
    dish.lock().unwrap().blank_frames = 1;
    let mut rig = test_rig(dish.clone());
    let mut plan = Plan::builder().seed(7).build(
        test_config(),
        sim::calibration(),
        test_routine(&[("A1", 1)]),
        Signals::new(),
    );

    let snapshot = plan.run(&mut rig).unwrap();
    assert!(snapshot.completed);

    let jogs = rig.robot.journal.iter().filter(|c| c.starts_with("jog X")).count();
    // Three strokes of two jogs each plus the two tail jogs.
    assert!(jogs >= 8, "journal:\n{}", rig.robot.journal.join("\n"));
}

/// Cancellation before the run starts stops it at the first state boundary
/// with the axis retracted and nothing delivered.
#[test]
fn cancel_stops_the_run() {
    let dish = sim::dish(vec![Disc { x: 100.0, y: 100.0, r: 8.0, hollow: false }]);
    let mut rig = test_rig(dish.clone());
    let signals = Signals::new();
    signals.cancel();
    let mut plan = Plan::builder().build(
        test_config(),
        sim::calibration(),
        test_routine(&[("A1", 1)]),
        signals,
    );

    let snapshot = plan.run(&mut rig).unwrap();
    assert!(!snapshot.completed);
    assert_eq!(snapshot.total_filled, 0);
    assert_eq!(dish.lock().unwrap().discs.len(), 1);
    assert!(rig.robot.journal.iter().any(|c| c.starts_with("retract")));
}

/// Simulated robot whose retract always jams, everything else delegated.
struct FaultyRetract(SimRobot);

impl RobotArm for FaultyRetract {
    fn home(&mut self) -> eyre::Result<()> {
        self.0.home()
    }

    fn toggle_lights(&mut self) -> eyre::Result<()> {
        self.0.toggle_lights()
    }

    fn lights_on(&self) -> bool {
        self.0.lights_on()
    }

    fn retract_axis(&mut self, _mount: Mount) -> eyre::Result<()> {
        Err(RobotError::Command("retract jammed".into()).into())
    }

    fn move_to_coordinates(
        &mut self,
        target: Point3<f64>,
        min_z_height: f64,
        force_direct: bool,
    ) -> eyre::Result<()> {
        self.0.move_to_coordinates(target, min_z_height, force_direct)
    }

    fn move_relative(&mut self, axis: Axis, distance: f64) -> eyre::Result<()> {
        self.0.move_relative(axis, distance)
    }

    fn aspirate_in_place(&mut self, volume: f64, flow_rate: f64) -> eyre::Result<()> {
        self.0.aspirate_in_place(volume, flow_rate)
    }

    fn dispense_in_place(&mut self, volume: f64, flow_rate: f64) -> eyre::Result<()> {
        self.0.dispense_in_place(volume, flow_rate)
    }

    fn move_to_well(
        &mut self,
        slot: &str,
        well: &str,
        location: WellLocation,
        offset: Vector3<f64>,
    ) -> eyre::Result<()> {
        self.0.move_to_well(slot, well, location, offset)
    }

    fn dispense(
        &mut self,
        slot: &str,
        well: &str,
        location: WellLocation,
        offset: Vector3<f64>,
        volume: f64,
        flow_rate: f64,
    ) -> eyre::Result<()> {
        self.0.dispense(slot, well, location, offset, volume, flow_rate)
    }

    fn position(&self) -> Point3<f64> {
        self.0.position()
    }
}

/// A retract fault during cancellation must not abort the teardown: the run
/// still ends in an orderly canceled report.
#[test]
fn cancel_reports_even_when_retract_fails() {
    let dish = sim::dish(vec![Disc { x: 100.0, y: 100.0, r: 8.0, hollow: false }]);
    let robot = FaultyRetract(SimRobot::new(dish.clone(), &sim::calibration()).unwrap());
    let frames = SimFrameSource::new(dish, FRAME_SIZE, FRAME_SIZE);
    let mut rig = Rig::new(robot, frames, CollectingSink::default());
    let signals = Signals::new();
    signals.cancel();
    let mut plan = Plan::builder().build(
        test_config(),
        sim::calibration(),
        test_routine(&[("A1", 1)]),
        signals,
    );

    let snapshot = plan.run(&mut rig).unwrap();
    assert!(!snapshot.completed);
    let updates = rig.sink.updates.lock().unwrap();
    assert!(updates
        .iter()
        .any(|u| u.state == "canceled" && u.tone == StatusTone::Warning));
}

/// Several objects and `one_by_one` disabled: one cycle may pick multiple
/// targets, but never more than the well still needs.
#[test]
fn batch_mode_fills_the_well_without_overshoot() {
    let dish = sim::dish(vec![
        Disc { x: 60.0, y: 60.0, r: 8.0, hollow: false },
        Disc { x: 140.0, y: 60.0, r: 8.0, hollow: false },
        Disc { x: 60.0, y: 140.0, r: 8.0, hollow: false },
        Disc { x: 140.0, y: 140.0, r: 8.0, hollow: false },
    ]);
    let config = PickingConfig { one_by_one: false, ..test_config() };
    let mut rig = test_rig(dish.clone());
    let mut plan = Plan::builder().seed(7).build(
        config,
        sim::calibration(),
        test_routine(&[("A1", 3)]),
        Signals::new(),
    );

    let snapshot = plan.run(&mut rig).unwrap();
    assert!(snapshot.completed);
    assert_eq!(snapshot.filled["A1"], 3);
    assert_eq!(dish.lock().unwrap().discs.len(), 1);
}
