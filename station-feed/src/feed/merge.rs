//! How pushed row updates are folded into the local list.

use std::fmt;
use std::str::FromStr;

use crate::domain::Station;

/// Error returned when parsing an unknown merge policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge policy {0:?} (expected \"refetch\" or \"patch\")")]
pub struct InvalidMergePolicy(String);

/// Strategy for applying a pushed update.
///
/// The two trade staleness against cost:
/// - `Refetch` re-runs the bootstrap query on every update. The list always
///   converges on the backend, at one query per update.
/// - `Patch` replaces the matching row in place using the pushed payload.
///   No queries, but an update for a row the list does not hold is lost
///   until the next bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    #[default]
    Refetch,
    Patch,
}

impl FromStr for MergePolicy {
    type Err = InvalidMergePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refetch" => Ok(MergePolicy::Refetch),
            "patch" => Ok(MergePolicy::Patch),
            _ => Err(InvalidMergePolicy(s.to_string())),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Refetch => f.write_str("refetch"),
            MergePolicy::Patch => f.write_str("patch"),
        }
    }
}

/// Replace the entry whose identifier matches `row`.
///
/// Order and every other entry are left as they were. Returns `false`, and
/// leaves the list untouched, when no entry matches.
pub fn patch_station(stations: &mut [Station], row: Station) -> bool {
    match stations.iter_mut().find(|s| s.id == row.id) {
        Some(existing) => {
            *existing = row;
            true
        }
        None => false,
    }
}
