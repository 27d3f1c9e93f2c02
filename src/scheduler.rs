//! Destination well planning and run-time fill bookkeeping.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, fs, path::Path, str::FromStr};

/// Error raised by the well scheduler. Treated as fatal by the picking plan.
#[derive(Debug, thiserror::Error)]
pub enum RoutineError {
    /// An update was reported for a well the plan doesn't contain.
    #[error("well {0:?} is not part of the plan")]
    UnknownWell(String),
    /// The well plan file could not be read.
    #[error("failed to read well plan {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The well plan file could not be parsed.
    #[error("malformed well plan {path}: {source}")]
    Malformed {
        /// Path of the offending file.
        path: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// The well plan contains no wells with a positive target count.
    #[error("well plan is empty")]
    EmptyPlan,
}

/// Standard multi-well plate formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlateFormat {
    /// 6-well plate, 2 rows by 3 columns.
    Wells6,
    /// 24-well plate, 4 rows by 6 columns.
    Wells24,
    /// 48-well plate, 6 rows by 8 columns.
    Wells48,
    /// 96-well plate, 8 rows by 12 columns.
    Wells96,
    /// 384-well plate, 16 rows by 24 columns.
    Wells384,
}

impl PlateFormat {
    /// Number of rows on the plate.
    #[must_use]
    pub fn rows(self) -> u32 {
        match self {
            Self::Wells6 => 2,
            Self::Wells24 => 4,
            Self::Wells48 => 6,
            Self::Wells96 => 8,
            Self::Wells384 => 16,
        }
    }

    /// Number of columns on the plate.
    #[must_use]
    pub fn columns(self) -> u32 {
        match self {
            Self::Wells6 => 3,
            Self::Wells24 => 6,
            Self::Wells48 => 8,
            Self::Wells96 => 12,
            Self::Wells384 => 24,
        }
    }

    /// All well names in row-major order. Rows are lettered from `A`, columns
    /// numbered from `1`, so a 24-well plate runs `A1..A6, B1..B6, ..`.
    #[must_use]
    pub fn well_names(self) -> Vec<String> {
        let mut names = Vec::with_capacity((self.rows() * self.columns()) as usize);
        for row in 0..self.rows() {
            let letter = char::from(b'A' + row as u8);
            for column in 1..=self.columns() {
                names.push(format!("{letter}{column}"));
            }
        }
        names
    }
}

impl FromStr for PlateFormat {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "6" => Ok(Self::Wells6),
            "24" => Ok(Self::Wells24),
            "48" => Ok(Self::Wells48),
            "96" => Ok(Self::Wells96),
            "384" => Ok(Self::Wells384),
            _ => Err(eyre::eyre!("unsupported plate format: {s:?}")),
        }
    }
}

/// Order in which the scheduler walks the wells of the plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FillStrategy {
    /// Fill wells in plan insertion order.
    #[default]
    WellByWell,
    /// Fill wells sorted by column number, walking columns before rows.
    Vertical,
    /// Fill wells sorted by row letter, walking rows before columns.
    Horizontal,
    /// Fill the well with the fewest samples still owed first, ties broken
    /// by plan order.
    SpreadOut,
}

impl FromStr for FillStrategy {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "well_by_well" => Ok(Self::WellByWell),
            "vertical" => Ok(Self::Vertical),
            "horizontal" => Ok(Self::Horizontal),
            "spread_out" => Ok(Self::SpreadOut),
            _ => Err(eyre::eyre!("unsupported fill strategy: {s:?}")),
        }
    }
}

impl fmt::Display for FillStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WellByWell => "well_by_well",
            Self::Vertical => "vertical",
            Self::Horizontal => "horizontal",
            Self::SpreadOut => "spread_out",
        };
        f.write_str(s)
    }
}

/// Ordered list of target wells and how many samples each should receive.
///
/// Insertion order is the plan order; the vertical and horizontal strategies
/// reorder a copy of it at construction time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WellPlan(Vec<(String, u32)>);

impl WellPlan {
    /// Plan targeting every well of a plate with the same count.
    #[must_use]
    pub fn uniform(format: PlateFormat, count: u32) -> Self {
        Self(format.well_names().into_iter().map(|w| (w, count)).collect())
    }

    /// Plan over an explicit list of wells and counts.
    #[must_use]
    pub fn custom(wells: Vec<(String, u32)>) -> Self {
        Self(wells)
    }

    /// Loads a plan from a JSON file mapping well names to counts, keeping
    /// the file's key order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| RoutineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&contents)
            .map_err(|source| RoutineError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        let mut wells = Vec::with_capacity(map.len());
        for (well, value) in map {
            let count = value.as_u64().ok_or_else(|| RoutineError::Malformed {
                path: path.display().to_string(),
                source: serde::de::Error::custom(format!(
                    "count for well {well:?} is not a non-negative integer"
                )),
            })?;
            wells.push((well, count as u32));
        }
        Ok(Self(wells))
    }

    /// Wells in plan order.
    #[must_use]
    pub fn wells(&self) -> &[(String, u32)] {
        &self.0
    }

    /// Total number of samples the plan asks for.
    #[must_use]
    pub fn total_target(&self) -> u32 {
        self.0.iter().map(|(_, count)| count).sum()
    }
}

/// Where picked samples get deposited: a plate slot on the deck and the plan
/// of wells to fill there.
#[derive(Clone, Debug)]
pub struct Destination {
    /// Deck slot holding the destination plate.
    pub slot: String,
    /// Wells to fill and their target counts.
    pub plan: WellPlan,
}

/// Point-in-time progress summary of a routine.
#[derive(Clone, Debug, Serialize)]
pub struct RoutineSnapshot {
    /// Samples delivered per well.
    pub filled: HashMap<String, u32>,
    /// Failed pick attempts per well.
    pub missed: HashMap<String, u32>,
    /// Samples delivered in total.
    pub total_filled: u32,
    /// Samples the plan asks for in total.
    pub total_target: u32,
    /// Whether every well has reached its target.
    pub completed: bool,
}

/// Run-time scheduler over a [`Destination`].
///
/// Hands out the next well to fill according to the configured strategy and
/// keeps per-well fill and miss counts as the plan reports outcomes back.
#[derive(Clone, Debug)]
pub struct Routine {
    destination: Destination,
    strategy: FillStrategy,
    order: Vec<(String, u32)>,
    filled: HashMap<String, u32>,
    missed: HashMap<String, u32>,
    current_well: Option<String>,
}

impl Routine {
    /// Creates a scheduler over `destination` walking wells per `strategy`.
    pub fn new(destination: Destination, strategy: FillStrategy) -> Result<Self> {
        if destination.plan.total_target() == 0 {
            return Err(RoutineError::EmptyPlan.into());
        }
        let mut order = destination.plan.wells().to_vec();
        match strategy {
            FillStrategy::WellByWell | FillStrategy::SpreadOut => {}
            // Plan order is row-major, so walking columns first means sorting
            // by the numeric part.
            FillStrategy::Vertical => {
                order.sort_by_key(|(well, _)| {
                    let column = well
                        .get(1..)
                        .and_then(|digits| digits.parse::<u32>().ok())
                        .unwrap_or(u32::MAX);
                    (column, well.clone())
                });
            }
            // Stable sort by the row letter keeps ties in plan order.
            FillStrategy::Horizontal => {
                order.sort_by_key(|(well, _)| well.chars().next());
            }
        }
        let filled = order.iter().map(|(well, _)| (well.clone(), 0)).collect();
        let missed = order.iter().map(|(well, _)| (well.clone(), 0)).collect();
        Ok(Self { destination, strategy, order, filled, missed, current_well: None })
    }

    /// Deck slot of the destination plate.
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.destination.slot
    }

    /// Well the scheduler last handed out, if any.
    #[must_use]
    pub fn current_well(&self) -> Option<&str> {
        self.current_well.as_deref()
    }

    fn remaining(&self, well: &str, target: u32) -> u32 {
        target.saturating_sub(*self.filled.get(well).unwrap_or(&0))
    }

    /// Samples still owed to the well the scheduler last handed out.
    #[must_use]
    pub fn remaining_current(&self) -> u32 {
        let Some(current) = &self.current_well else {
            return 0;
        };
        self.order
            .iter()
            .find(|(well, _)| well == current)
            .map_or(0, |(well, target)| self.remaining(well, *target))
    }

    /// Next well to deliver to, or `None` when the plan is complete.
    ///
    /// Returns the first well of the strategy's fill order whose target is
    /// unmet. `spread_out` reorders by remaining count on every call; the
    /// other strategies keep the order fixed at construction. Calling this
    /// again without an intervening [`Self::update_well`] returns the same
    /// well.
    pub fn get_next_well(&mut self) -> Option<String> {
        let next = match self.strategy {
            // min_by_key keeps the first of tied wells, so ties fall back
            // to plan order.
            FillStrategy::SpreadOut => self
                .order
                .iter()
                .filter(|(well, target)| self.remaining(well, *target) > 0)
                .min_by_key(|(well, target)| self.remaining(well, *target))
                .map(|(well, _)| well.clone()),
            FillStrategy::WellByWell | FillStrategy::Vertical | FillStrategy::Horizontal => self
                .order
                .iter()
                .find(|(well, target)| self.remaining(well, *target) > 0)
                .map(|(well, _)| well.clone()),
        };
        self.current_well = next.clone();
        next
    }

    /// Records the outcome of a delivery attempt at the current well.
    pub fn update_well(&mut self, success: bool) -> Result<()> {
        let Some(well) = self.current_well.clone() else {
            return Err(RoutineError::UnknownWell(String::new()).into());
        };
        let counter = if success { &mut self.filled } else { &mut self.missed };
        let count = counter
            .get_mut(&well)
            .ok_or_else(|| RoutineError::UnknownWell(well.clone()))?;
        *count += 1;
        Ok(())
    }

    /// Whether every well has reached its target count.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.order
            .iter()
            .all(|(well, target)| self.remaining(well, *target) == 0)
    }

    /// Current progress summary.
    #[must_use]
    pub fn snapshot(&self) -> RoutineSnapshot {
        let total_filled = self.filled.values().sum();
        RoutineSnapshot {
            filled: self.filled.clone(),
            missed: self.missed.clone(),
            total_filled,
            total_target: self.destination.plan.total_target(),
            completed: self.is_done(),
        }
    }
}
