//! Parking topology: the validated descriptor a session is built from and
//! the runtime occupancy model.
//!
//! `Parking` is the wire-side description of a facility (dimensions, cell
//! matrix, tariffs). `ParkingLot` is the per-session runtime view: immutable
//! topology plus per-stall free bits, with every occupancy transition guarded
//! by the lot's own mutex.

use crate::pathfind;
use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Grid dimensions accepted by the simulator.
pub const MIN_DIM: usize = 4;
pub const MAX_DIM: usize = 6;

/// Maximum tariff rate, in currency units per hour.
pub const MAX_TARIFF: f64 = 1000.0;

/// One cell of the parking grid, as drawn in the facility editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    /// Drivable road
    #[serde(rename = ".")]
    Road,
    /// A parking stall
    #[serde(rename = "P")]
    Park,
    /// The single entrance, on the bottom row
    #[serde(rename = "I")]
    Entrance,
    /// The single exit, on the bottom row
    #[serde(rename = "O")]
    Exit,
    /// Decoration; blocks driving
    #[serde(rename = "D")]
    Decoration,
}

impl CellKind {
    /// Whether a car can drive through this cell.
    pub fn is_passable(self) -> bool {
        !matches!(self, CellKind::Decoration)
    }
}

/// Errors from validating a parking descriptor.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("width must be between {MIN_DIM} and {MAX_DIM}, got {0}")]
    Width(usize),

    #[error("height must be between {MIN_DIM} and {MAX_DIM}, got {0}")]
    Height(usize),

    #[error("expected {expected} rows of cells, got {got}")]
    RowCount { expected: usize, got: usize },

    #[error("row {row} has {got} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("expected exactly one entrance, found {0}")]
    EntranceCount(usize),

    #[error("expected exactly one exit, found {0}")]
    ExitCount(usize),

    #[error("entrance must be on the bottom row, found on row {0}")]
    EntranceRow(usize),

    #[error("exit must be on the bottom row, found on row {0}")]
    ExitRow(usize),

    #[error("tariff must be between 0 and {MAX_TARIFF}, got {0}")]
    Tariff(f64),
}

/// Parking facility descriptor, as received in the session init payload.
///
/// The cell matrix is row-major: the outer index walks rows (`height` of
/// them, top to bottom), the inner index walks columns (`width` of them).
/// Throughout the simulator the outer/row index is called `x` and the
/// inner/column index `y`, matching the coordinates reported in events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parking {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<Vec<CellKind>>,
    pub day_tariff: f64,
    pub night_tariff: f64,
}

impl Parking {
    /// Check the descriptor against the topology rules: 4..=6 dimensions,
    /// a full `height`x`width` matrix, exactly one entrance and one exit
    /// both on the bottom row, tariffs within range.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if !(MIN_DIM..=MAX_DIM).contains(&self.width) {
            return Err(TopologyError::Width(self.width));
        }
        if !(MIN_DIM..=MAX_DIM).contains(&self.height) {
            return Err(TopologyError::Height(self.height));
        }
        if self.cells.len() != self.height {
            return Err(TopologyError::RowCount {
                expected: self.height,
                got: self.cells.len(),
            });
        }
        for (row, cells) in self.cells.iter().enumerate() {
            if cells.len() != self.width {
                return Err(TopologyError::RowWidth {
                    row,
                    expected: self.width,
                    got: cells.len(),
                });
            }
        }

        let positions = |kind: CellKind| -> Vec<usize> {
            self.cells
                .iter()
                .enumerate()
                .flat_map(|(x, row)| row.iter().enumerate().map(move |(_, c)| (x, *c)))
                .filter(|(_, c)| *c == kind)
                .map(|(x, _)| x)
                .collect()
        };

        let entrances = positions(CellKind::Entrance);
        if entrances.len() != 1 {
            return Err(TopologyError::EntranceCount(entrances.len()));
        }
        if entrances[0] != self.height - 1 {
            return Err(TopologyError::EntranceRow(entrances[0]));
        }

        let exits = positions(CellKind::Exit);
        if exits.len() != 1 {
            return Err(TopologyError::ExitCount(exits.len()));
        }
        if exits[0] != self.height - 1 {
            return Err(TopologyError::ExitRow(exits[0]));
        }

        for tariff in [self.day_tariff, self.night_tariff] {
            if !(0.0..=MAX_TARIFF).contains(&tariff) {
                return Err(TopologyError::Tariff(tariff));
            }
        }

        Ok(())
    }
}

/// Coordinates of a parking stall: `x` is the row (outer) index, `y` the
/// column (inner) index, as reported on the wire in `park`/`leave` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stall {
    pub x: usize,
    pub y: usize,
}

/// Runtime parking lot for one session: immutable topology plus per-cell
/// free bits. Occupancy transitions happen under the lot's own mutex; the
/// session lock, when needed, is always taken first.
pub struct ParkingLot {
    cells: Vec<Vec<CellKind>>,
    entrance: (usize, usize),
    day_tariff: f64,
    night_tariff: f64,
    free: Mutex<Vec<bool>>,
}

impl ParkingLot {
    /// Build the runtime lot from a validated descriptor. All stalls start
    /// free.
    pub fn new(parking: &Parking) -> Self {
        let mut entrance = (0, 0);
        for (x, row) in parking.cells.iter().enumerate() {
            for (y, cell) in row.iter().enumerate() {
                if *cell == CellKind::Entrance {
                    entrance = (x, y);
                }
            }
        }

        let free = vec![true; parking.height * parking.width];

        Self {
            cells: parking.cells.clone(),
            entrance,
            day_tariff: parking.day_tariff,
            night_tariff: parking.night_tariff,
            free: Mutex::new(free),
        }
    }

    pub fn day_tariff(&self) -> f64 {
        self.day_tariff
    }

    pub fn night_tariff(&self) -> f64 {
        self.night_tariff
    }

    fn width(&self) -> usize {
        self.cells.first().map(Vec::len).unwrap_or(0)
    }

    fn index(&self, stall: Stall) -> usize {
        stall.x * self.width() + stall.y
    }

    /// Reserve the free stall nearest to the entrance.
    ///
    /// Runs the shortest-path search and flips the stall's free bit in one
    /// critical section, so a stall can only be handed out while it is free.
    /// Returns `None` when no free stall is reachable.
    pub fn occupy(&self) -> Option<Stall> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());

        let stall = pathfind::nearest_free_stall(&self.cells, self.entrance, &free)?;
        free[self.index(stall)] = false;
        gauge!("parksim_stalls_occupied").increment(1.0);

        Some(stall)
    }

    /// Free a previously reserved stall. Callers guarantee a single release
    /// per reservation.
    pub fn release(&self, stall: Stall) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        let idx = self.index(stall);
        free[idx] = true;
        gauge!("parksim_stalls_occupied").decrement(1.0);
    }

    /// Number of stalls currently reserved.
    pub fn occupied_count(&self) -> usize {
        let free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        self.cells
            .iter()
            .enumerate()
            .flat_map(|(x, row)| {
                row.iter()
                    .enumerate()
                    .map(move |(y, cell)| (Stall { x, y }, *cell))
            })
            .filter(|(stall, cell)| {
                *cell == CellKind::Park && !free[stall.x * self.width() + stall.y]
            })
            .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn cell(ch: char) -> CellKind {
        match ch {
            '.' => CellKind::Road,
            'P' => CellKind::Park,
            'I' => CellKind::Entrance,
            'O' => CellKind::Exit,
            'D' => CellKind::Decoration,
            other => panic!("unknown cell {other}"),
        }
    }

    pub(crate) fn parking_from_rows(rows: &[&str], day: f64, night: f64) -> Parking {
        Parking {
            width: rows[0].len(),
            height: rows.len(),
            cells: rows
                .iter()
                .map(|row| row.chars().map(cell).collect())
                .collect(),
            day_tariff: day,
            night_tariff: night,
        }
    }

    #[test]
    fn validate_accepts_simple_lot() {
        let parking = parking_from_rows(&["....", ".PP.", ".PP.", "I..O"], 10.0, 5.0);
        assert!(parking.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_dimensions() {
        let mut parking = parking_from_rows(&["....", ".PP.", ".PP.", "I..O"], 10.0, 5.0);
        parking.width = 3;
        assert!(matches!(parking.validate(), Err(TopologyError::Width(3))));

        let parking = parking_from_rows(&["...", ".P.", "I.O"], 10.0, 5.0);
        assert!(parking.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_entrance() {
        let parking = parking_from_rows(&["....", ".PP.", ".PP.", "...O"], 10.0, 5.0);
        assert!(matches!(
            parking.validate(),
            Err(TopologyError::EntranceCount(0))
        ));
    }

    #[test]
    fn validate_rejects_entrance_off_bottom_row() {
        let parking = parking_from_rows(&["I...", ".PP.", ".PP.", "...O"], 10.0, 5.0);
        assert!(matches!(
            parking.validate(),
            Err(TopologyError::EntranceRow(0))
        ));
    }

    #[test]
    fn validate_rejects_duplicate_exit() {
        let parking = parking_from_rows(&["....", ".PP.", ".PP.", "IO.O"], 10.0, 5.0);
        assert!(matches!(parking.validate(), Err(TopologyError::ExitCount(2))));
    }

    #[test]
    fn validate_rejects_out_of_range_tariff() {
        let parking = parking_from_rows(&["....", ".PP.", ".PP.", "I..O"], 1000.5, 5.0);
        assert!(matches!(parking.validate(), Err(TopologyError::Tariff(_))));
    }

    #[test]
    fn cell_kind_round_trips_through_serde() {
        let json = r#"[[".","P"],["I","O"]]"#;
        let cells: Vec<Vec<CellKind>> = serde_json::from_str(json).unwrap();
        assert_eq!(cells[0][1], CellKind::Park);
        assert_eq!(serde_json::to_string(&cells).unwrap(), json);
    }

    #[test]
    fn occupy_reserves_nearest_stall() {
        let parking = parking_from_rows(&["....", ".PP.", ".PP.", "I..O"], 10.0, 5.0);
        let lot = ParkingLot::new(&parking);

        // Entrance is (3, 0); row 2 column 1 is two steps away.
        assert_eq!(lot.occupy(), Some(Stall { x: 2, y: 1 }));
        assert_eq!(lot.occupied_count(), 1);
    }

    #[test]
    fn occupy_exhausts_the_lot() {
        let parking = parking_from_rows(&["....", ".PP.", "....", "I..O"], 10.0, 5.0);
        let lot = ParkingLot::new(&parking);

        assert!(lot.occupy().is_some());
        assert!(lot.occupy().is_some());
        assert_eq!(lot.occupy(), None);
        assert_eq!(lot.occupied_count(), 2);
    }

    #[test]
    fn release_makes_stall_available_again() {
        let parking = parking_from_rows(&["....", ".PP.", "....", "I..O"], 10.0, 5.0);
        let lot = ParkingLot::new(&parking);

        let first = lot.occupy().unwrap();
        let second = lot.occupy().unwrap();
        assert_eq!(lot.occupy(), None);

        lot.release(first);
        assert_eq!(lot.occupy(), Some(first));

        lot.release(second);
        lot.release(first);
        assert_eq!(lot.occupied_count(), 0);
    }

    #[test]
    fn decoration_blocks_stalls_behind_it() {
        // The only stall is walled off by decorations.
        let parking = parking_from_rows(&["DDD.", "PDD.", "DDD.", "I..O"], 10.0, 5.0);
        let lot = ParkingLot::new(&parking);
        assert_eq!(lot.occupy(), None);
    }
}
