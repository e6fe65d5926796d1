use crate::config::AppConfig;
use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

/// A bounded grid coordinate. Both components are `< map_size`; values are only
/// ever constructed through the validation boundary below.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct GridPos {
    pub x: u8,
    pub y: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl GridPos {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// The neighboring position in `direction`, or `None` when the step would
    /// exit the grid.
    pub fn step(&self, direction: Direction, map_size: u8) -> Option<GridPos> {
        let (x, y) = (self.x, self.y);
        let next = match direction {
            Direction::Up => (x, y.checked_sub(1)?),
            Direction::Down => (x, y.checked_add(1)?),
            Direction::Left => (x.checked_sub(1)?, y),
            Direction::Right => (x.checked_add(1)?, y),
        };
        if next.0 >= map_size || next.1 >= map_size {
            return None;
        }
        Some(GridPos::new(next.0, next.1))
    }
}

/// One authoritative ledger read, already validated. Replaced wholesale on each
/// accepted fetch, never mutated in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub current_position: GridPos,
    pub start_position: GridPos,
    pub end_position: GridPos,
    pub pending_reward: u64,
    pub active: bool,
    pub has_protection: bool,
    pub protection_was_purchased: bool,
    pub move_count: u64,
}

impl Snapshot {
    pub fn at_goal(&self) -> bool {
        self.current_position == self.end_position
    }
}

/// The loose wire shape of a ledger read. Field types are whatever the node
/// serves; nothing downstream touches this before `Snapshot::try_from_raw`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawGameRecord {
    pub current_position: [u64; 2],
    pub start_position: [u64; 2],
    pub end_position: [u64; 2],
    pub pending_reward: u64,
    pub active: bool,
    pub has_protection: bool,
    pub protection_was_purchased: bool,
    pub move_count: u64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{field} component {value} is outside the {map_size}x{map_size} grid")]
    OutOfBounds {
        field: &'static str,
        value: u64,
        map_size: u8,
    },
}

/// A snapshot that contradicts the monotonicity guarantees of a single run.
/// Such reads are discarded rather than reconciled.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SuccessionViolation {
    #[error("move count decreased from {previous} to {current} within a run")]
    MoveCountDecreased { previous: u64, current: u64 },
    #[error("protection purchase flag reverted within a run")]
    PurchaseFlagCleared,
    #[error("protection appeared without a recorded purchase")]
    ProtectionAppeared,
}

fn bounded(field: &'static str, raw: [u64; 2], map_size: u8) -> Result<GridPos, RecordError> {
    for value in raw {
        if value >= u64::from(map_size) {
            return Err(RecordError::OutOfBounds {
                field,
                value,
                map_size,
            });
        }
    }
    Ok(GridPos::new(raw[0] as u8, raw[1] as u8))
}

impl Snapshot {
    /// Strict validation boundary between raw ledger reads and everything else.
    /// Malformed reads are rejected, never best-effort coerced.
    pub fn try_from_raw(raw: &RawGameRecord, map_size: u8) -> Result<Self, RecordError> {
        Ok(Self {
            current_position: bounded("current_position", raw.current_position, map_size)?,
            start_position: bounded("start_position", raw.start_position, map_size)?,
            end_position: bounded("end_position", raw.end_position, map_size)?,
            pending_reward: raw.pending_reward,
            active: raw.active,
            has_protection: raw.has_protection,
            protection_was_purchased: raw.protection_was_purchased,
            move_count: raw.move_count,
        })
    }
}

/// Cross-snapshot monotonicity checks. Only applicable while the run stayed
/// active across both reads; a run boundary resets every counter legitimately.
pub fn check_succession(
    previous: &Snapshot,
    current: &Snapshot,
) -> Result<(), SuccessionViolation> {
    if !(previous.active && current.active) {
        return Ok(());
    }
    if current.move_count < previous.move_count {
        return Err(SuccessionViolation::MoveCountDecreased {
            previous: previous.move_count,
            current: current.move_count,
        });
    }
    if previous.protection_was_purchased && !current.protection_was_purchased {
        return Err(SuccessionViolation::PurchaseFlagCleared);
    }
    if current.has_protection && !previous.has_protection && !current.protection_was_purchased {
        return Err(SuccessionViolation::ProtectionAppeared);
    }
    Ok(())
}

impl RawGameRecord {
    /// Canonical in-bounds record, handy for fakes and tests.
    pub fn example(config: &AppConfig) -> Self {
        let goal = u64::from(config.map_size) - 1;
        Self {
            current_position: [0, 0],
            start_position: [0, 0],
            end_position: [goal, goal],
            pending_reward: 0,
            active: true,
            has_protection: false,
            protection_was_purchased: false,
            move_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn snap(active: bool, move_count: u64) -> Snapshot {
        Snapshot {
            current_position: GridPos::new(1, 1),
            start_position: GridPos::new(0, 0),
            end_position: GridPos::new(7, 7),
            pending_reward: 10,
            active,
            has_protection: false,
            protection_was_purchased: false,
            move_count,
        }
    }

    #[test]
    fn try_from_raw__in_bounds_record__produces_snapshot() {
        // given
        let raw = RawGameRecord {
            current_position: [3, 4],
            start_position: [0, 0],
            end_position: [7, 7],
            pending_reward: 250,
            active: true,
            has_protection: true,
            protection_was_purchased: true,
            move_count: 5,
        };

        // when
        let snapshot = Snapshot::try_from_raw(&raw, 8).unwrap();

        // then
        assert_eq!(snapshot.current_position, GridPos::new(3, 4));
        assert_eq!(snapshot.pending_reward, 250);
        assert!(snapshot.has_protection);
    }

    #[test]
    fn try_from_raw__coordinate_at_map_size__is_rejected() {
        // given
        let mut raw = RawGameRecord::example(&AppConfig::default());
        raw.current_position = [8, 0];

        // when
        let err = Snapshot::try_from_raw(&raw, 8).unwrap_err();

        // then
        assert_eq!(
            err,
            RecordError::OutOfBounds {
                field: "current_position",
                value: 8,
                map_size: 8,
            }
        );
    }

    #[test]
    fn step__at_grid_edge__returns_none() {
        let pos = GridPos::new(0, 0);
        assert_eq!(pos.step(Direction::Up, 8), None);
        assert_eq!(pos.step(Direction::Left, 8), None);
        assert_eq!(pos.step(Direction::Down, 8), Some(GridPos::new(0, 1)));

        let far = GridPos::new(7, 7);
        assert_eq!(far.step(Direction::Right, 8), None);
        assert_eq!(far.step(Direction::Up, 8), Some(GridPos::new(7, 6)));
    }

    #[test]
    fn check_succession__move_count_decreased_while_active__is_violation() {
        // given
        let previous = snap(true, 5);
        let current = snap(true, 3);

        // when
        let err = check_succession(&previous, &current).unwrap_err();

        // then
        assert_eq!(
            err,
            SuccessionViolation::MoveCountDecreased {
                previous: 5,
                current: 3,
            }
        );
    }

    #[test]
    fn check_succession__run_boundary__resets_counters_legitimately() {
        // given: the old run ended and a fresh one started with a lower count
        let previous = snap(false, 9);
        let current = snap(true, 0);

        // then
        assert!(check_succession(&previous, &current).is_ok());
    }

    #[test]
    fn check_succession__protection_appears_with_purchase_flag__is_accepted() {
        // given
        let mut previous = snap(true, 2);
        previous.has_protection = false;
        let mut current = snap(true, 2);
        current.has_protection = true;
        current.protection_was_purchased = true;

        // then
        assert!(check_succession(&previous, &current).is_ok());
    }

    #[test]
    fn check_succession__protection_appears_without_purchase__is_violation() {
        // given
        let previous = snap(true, 2);
        let mut current = snap(true, 2);
        current.has_protection = true;

        // when
        let err = check_succession(&previous, &current).unwrap_err();

        // then
        assert_eq!(err, SuccessionViolation::ProtectionAppeared);
    }

    #[test]
    fn raw_record__round_trips_through_json() {
        // The wire shape must survive the node's JSON encoding untouched.
        let raw = RawGameRecord::example(&AppConfig::default());
        let encoded = serde_json::to_string(&raw).unwrap();
        let decoded: RawGameRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(raw, decoded);
    }
}
