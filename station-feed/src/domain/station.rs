//! Station record and identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend-assigned station identifier.
///
/// Identifiers are unique within a route's station list and never change
/// for the lifetime of a row.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(i64);

impl StationId {
    pub fn new(id: i64) -> Self {
        StationId(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StationId({})", self.0)
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single transit stop's live status, as stored in the backend table.
///
/// Field values are mirrored verbatim from the backend row. The client
/// never writes stations back, so there is no validation beyond what
/// deserialization enforces.
///
/// # Examples
///
/// ```
/// use station_feed::domain::Station;
///
/// let row = r#"{"id":3,"estacion":"A","estado":"on-time","eta":4,"ruta":1}"#;
/// let station: Station = serde_json::from_str(row).unwrap();
/// assert_eq!(station.id.get(), 3);
/// assert_eq!(station.name, "A");
/// assert_eq!(station.eta_minutes, 4.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Row identifier.
    pub id: StationId,

    /// Human-readable station name.
    #[serde(rename = "estacion")]
    pub name: String,

    /// Status label (e.g. "on-time", "delayed", "arrived").
    /// The set of values is owned by whoever writes the table.
    #[serde(rename = "estado")]
    pub status: String,

    /// Estimated arrival, in minutes.
    #[serde(rename = "eta")]
    pub eta_minutes: f64,
}

impl Station {
    /// Create a station record.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        status: impl Into<String>,
        eta_minutes: f64,
    ) -> Self {
        Self {
            id: StationId(id),
            name: name.into(),
            status: status.into(),
            eta_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_backend_row() {
        let json = r#"{"id":1,"estacion":"B","estado":"delayed","eta":12,"ruta":1,"created_at":"2025-01-01"}"#;
        let station: Station = serde_json::from_str(json).unwrap();

        assert_eq!(station, Station::new(1, "B", "delayed", 12.0));
    }

    #[test]
    fn decodes_fractional_eta() {
        let json = r#"{"id":7,"estacion":"C","estado":"on-time","eta":2.5}"#;
        let station: Station = serde_json::from_str(json).unwrap();
        assert_eq!(station.eta_minutes, 2.5);
    }

    #[test]
    fn rejects_row_without_name() {
        let json = r#"{"id":1,"estado":"delayed","eta":12}"#;
        assert!(serde_json::from_str::<Station>(json).is_err());
    }

    #[test]
    fn encodes_with_backend_column_names() {
        let station = Station::new(3, "A", "on-time", 4.0);
        let value = serde_json::to_value(&station).unwrap();

        assert_eq!(value["id"], 3);
        assert_eq!(value["estacion"], "A");
        assert_eq!(value["estado"], "on-time");
        assert_eq!(value["eta"], 4.0);
    }

    #[test]
    fn station_id_ordering() {
        assert!(StationId::new(3) > StationId::new(1));
        assert_eq!(format!("{:?}", StationId::new(3)), "StationId(3)");
        assert_eq!(StationId::new(3).to_string(), "3");
    }
}
