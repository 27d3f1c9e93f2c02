use cuboid_picker::scheduler::{
    Destination, FillStrategy, PlateFormat, Routine, WellPlan,
};

fn routine(plan: WellPlan, strategy: FillStrategy) -> Routine {
    Routine::new(Destination { slot: "6".into(), plan }, strategy).unwrap()
}

/// Runs a routine to completion, returning the wells in delivery order.
fn drain(routine: &mut Routine) -> Vec<String> {
    let mut visits = Vec::new();
    while let Some(well) = routine.get_next_well() {
        visits.push(well);
        routine.update_well(true).unwrap();
        assert!(visits.len() <= 10_000, "routine never completed");
    }
    visits
}

#[test]
fn full_plate_well_by_well() {
    let mut routine = routine(
        WellPlan::uniform(PlateFormat::Wells24, 2),
        FillStrategy::WellByWell,
    );
    let visits = drain(&mut routine);
    assert_eq!(visits.len(), 48);
    assert_eq!(&visits[..4], ["A1", "A1", "A2", "A2"]);
    assert_eq!(visits.last().map(String::as_str), Some("D6"));
    let snapshot = routine.snapshot();
    assert!(snapshot.completed);
    assert_eq!(snapshot.total_filled, 48);
    assert!(snapshot.filled.values().all(|&count| count == 2));
}

#[test]
fn horizontal_fills_rows_in_letter_order() {
    let mut routine = routine(
        WellPlan::uniform(PlateFormat::Wells6, 2),
        FillStrategy::Horizontal,
    );
    let visits = drain(&mut routine);
    // Each well reaches its target before the order moves on.
    assert_eq!(
        visits,
        ["A1", "A1", "A2", "A2", "A3", "A3", "B1", "B1", "B2", "B2", "B3", "B3"]
    );
}

#[test]
fn horizontal_reorders_an_unsorted_plan() {
    let plan = WellPlan::custom(vec![("B1".into(), 1), ("A1".into(), 2)]);
    let mut routine = routine(plan, FillStrategy::Horizontal);
    assert_eq!(drain(&mut routine), ["A1", "A1", "B1"]);
}

#[test]
fn vertical_walks_columns_before_rows() {
    let mut routine = routine(
        WellPlan::uniform(PlateFormat::Wells6, 1),
        FillStrategy::Vertical,
    );
    assert_eq!(drain(&mut routine), ["A1", "B1", "A2", "B2", "A3", "B3"]);
}

#[test]
fn spread_out_finishes_least_owed_first() {
    let plan = WellPlan::custom(vec![
        ("A1".into(), 1),
        ("A2".into(), 3),
        ("A3".into(), 2),
    ]);
    let mut routine = routine(plan, FillStrategy::SpreadOut);
    let visits = drain(&mut routine);
    assert_eq!(visits.len(), 6);
    // The least-owed well comes first and gets finished before the order
    // moves to the next one up.
    assert_eq!(visits, ["A1", "A3", "A3", "A2", "A2", "A2"]);
}

#[test]
fn misses_leave_the_well_owed() {
    let mut routine = routine(
        WellPlan::custom(vec![("B2".into(), 1)]),
        FillStrategy::WellByWell,
    );
    assert_eq!(routine.get_next_well().as_deref(), Some("B2"));
    routine.update_well(false).unwrap();
    routine.update_well(false).unwrap();
    assert!(!routine.is_done());
    assert_eq!(routine.get_next_well().as_deref(), Some("B2"));
    routine.update_well(true).unwrap();
    assert!(routine.is_done());
    let snapshot = routine.snapshot();
    assert_eq!(snapshot.missed["B2"], 2);
    assert_eq!(snapshot.filled["B2"], 1);
}

#[test]
fn remaining_current_tracks_the_handed_out_well() {
    let mut routine = routine(
        WellPlan::custom(vec![("A1".into(), 3)]),
        FillStrategy::WellByWell,
    );
    assert_eq!(routine.remaining_current(), 0);
    routine.get_next_well();
    assert_eq!(routine.remaining_current(), 3);
    routine.update_well(true).unwrap();
    assert_eq!(routine.remaining_current(), 2);
}
