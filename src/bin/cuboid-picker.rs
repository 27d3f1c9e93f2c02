#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]

use clap::StructOpt;
use cuboid_picker::{
    calibration::Calibration,
    cli::Cli,
    config::PickingConfig,
    logger,
    plans::{Plan, Signals},
    rig::{
        sim::{self, Disc, LogSink, SimFrameSource, SimRobot},
        Rig, RobotArm,
    },
    scheduler::{Destination, Routine, WellPlan},
};
use eyre::Result;
use std::{io::BufRead, thread};

fn main() -> Result<()> {
    color_eyre::install()?;
    logger::init();
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => PickingConfig::load(path)?,
        None => PickingConfig::default(),
    };
    let calibration = match &cli.calibration {
        Some(path) => Calibration::load(path)?,
        None => sim::calibration(),
    };
    let plan = match &cli.plan {
        Some(path) => WellPlan::load(path)?,
        None => WellPlan::uniform(cli.plate, cli.count),
    };
    let destination = Destination { slot: config.destination_slot.clone(), plan };
    let routine = Routine::new(destination, cli.fill_strategy)?;

    let config = PickingConfig { one_by_one: cli.one_by_one || config.one_by_one, ..config };
    let dish = sim::dish(seed_dish(&config));
    let robot = SimRobot::new(dish.clone(), &calibration)?;
    let frames = SimFrameSource::new(
        dish,
        (2.0 * config.circle_center.0) as u32,
        (2.0 * config.circle_center.1) as u32,
    );
    let mut rig = Rig::new(robot, frames, LogSink);
    rig.robot.home()?;

    let signals = Signals::new();
    let mut builder = Plan::builder().hold_in_idle(!cli.autostart);
    if let Some(seed) = cli.seed {
        builder = builder.seed(seed);
    }
    let mut plan = builder.build(config, calibration, routine, signals.clone());

    spawn_controller(signals.clone());
    log::info!("Picking procedure starting ('p' pause/resume, 'q' cancel)");
    let worker = thread::spawn(move || plan.run(&mut rig));
    let snapshot = match worker.join() {
        Ok(result) => result?,
        Err(panic) => std::panic::resume_unwind(panic),
    };

    log::info!(
        "Run finished: {}/{} samples delivered, completed: {}",
        snapshot.total_filled,
        snapshot.total_target,
        snapshot.completed
    );
    for (well, count) in &snapshot.filled {
        let missed = snapshot.missed.get(well).copied().unwrap_or(0);
        log::info!("  {well}: {count} filled, {missed} missed");
    }
    Ok(())
}

/// Objects in the simulated dish: a loose 5x5 spread inside the pickable
/// radius, enough to fill a default plate routine.
fn seed_dish(config: &PickingConfig) -> Vec<Disc> {
    let (cx, cy) = config.circle_center;
    let spacing = config.circle_radius / 3.0;
    let mut discs = Vec::new();
    for i in 0..5 {
        for j in 0..5 {
            discs.push(Disc {
                x: cx + (f64::from(i) - 2.0) * spacing,
                y: cy + (f64::from(j) - 2.0) * spacing,
                r: 8.0,
                hollow: false,
            });
        }
    }
    discs
}

/// Reads single-letter commands from stdin and maps them to plan signals.
fn spawn_controller(signals: Signals) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "p" => {
                    signals.toggle_pause();
                    log::info!("{}", if signals.paused() { "Pause requested" } else { "Resumed" });
                }
                "q" => {
                    signals.cancel();
                    log::info!("Cancel requested");
                    break;
                }
                _ => {}
            }
        }
    });
}
