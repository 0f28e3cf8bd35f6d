use crate::core::value::{Value, compare_keys};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

/// Checkpoint marking how far capture has progressed.
///
/// Positions of the same kind are totally ordered; `Placeholder` sorts before
/// and `Finished` after any other position. Positions of different capture
/// kinds (or inventory positions of different tables) are not comparable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub enum Position {
    /// Unknown or initial position.
    #[default]
    Placeholder,

    /// Inventory cursor: every row of `table` whose key is `<= after` is applied.
    PrimaryKey { table: String, after: Vec<Value> },

    /// Incremental log position (LSN, binlog offset, ...).
    Log { lsn: u64 },

    /// Capture is exhausted.
    Finished,
}

impl Position {
    pub fn is_finished(&self) -> bool {
        matches!(self, Position::Finished)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Position::Placeholder)
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Position::*;
        match (self, other) {
            (Placeholder, Placeholder) | (Finished, Finished) => Some(Ordering::Equal),
            (Placeholder, _) | (_, Finished) => Some(Ordering::Less),
            (_, Placeholder) | (Finished, _) => Some(Ordering::Greater),
            (Log { lsn: a }, Log { lsn: b }) => Some(a.cmp(b)),
            (
                PrimaryKey {
                    table: ta,
                    after: ka,
                },
                PrimaryKey {
                    table: tb,
                    after: kb,
                },
            ) if ta == tb => compare_keys(ka, kb),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Placeholder => f.write_str("placeholder"),
            Position::PrimaryKey { table, after } => {
                let keys = after
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "pk:{table}:{keys}")
            }
            Position::Log { lsn } => write!(f, "lsn:{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF),
            Position::Finished => f.write_str("finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(table: &str, id: i64) -> Position {
        Position::PrimaryKey {
            table: table.into(),
            after: vec![Value::Int(id)],
        }
    }

    #[test]
    fn placeholder_and_finished_bound_every_kind() {
        assert!(Position::Placeholder < Position::Log { lsn: 0 });
        assert!(Position::Placeholder < pk("t", 1));
        assert!(Position::Log { lsn: u64::MAX } < Position::Finished);
        assert!(pk("t", 100) < Position::Finished);
    }

    #[test]
    fn same_kind_positions_are_ordered() {
        assert!(Position::Log { lsn: 10 } < Position::Log { lsn: 11 });
        assert!(pk("t", 1) < pk("t", 2));
    }

    #[test]
    fn different_kinds_do_not_compare() {
        assert_eq!(pk("t", 1).partial_cmp(&Position::Log { lsn: 1 }), None);
        assert_eq!(pk("a", 1).partial_cmp(&pk("b", 1)), None);
    }

    #[test]
    fn displays_log_position_like_an_lsn() {
        let pos = Position::Log {
            lsn: (1u64 << 32) | 0x2A,
        };
        assert_eq!(pos.to_string(), "lsn:1/2A");
    }
}
