//! Plain-text rendering of a feed snapshot.

use std::fmt::Write;

use crate::feed::{FeedPhase, FeedSnapshot};

/// Render a snapshot as the terminal station board.
///
/// ```
/// use station_feed::board::render_board;
/// use station_feed::domain::RouteId;
/// use station_feed::feed::FeedSnapshot;
///
/// let board = render_board(&FeedSnapshot::new(RouteId::new(1)));
/// assert!(board.contains("No data yet..."));
/// ```
pub fn render_board(snapshot: &FeedSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Stations - Route {}", snapshot.route);
    if let Some(status) = &snapshot.channel {
        let _ = writeln!(out, "[channel: {status}]");
    }
    if let Some(error) = &snapshot.error {
        let _ = writeln!(out, "Error: {error}");
    }

    if snapshot.stations.is_empty() {
        if snapshot.error.is_none() {
            let line = match snapshot.phase {
                FeedPhase::Terminated => "Feed closed.",
                _ => "No data yet...",
            };
            let _ = writeln!(out, "{line}");
        }
        return out;
    }

    for station in &snapshot.stations {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Station: {}", station.name);
        let _ = writeln!(out, "  Status:  {}", station.status);
        let _ = writeln!(out, "  ETA:     {} min", station.eta_minutes);
    }

    out
}
