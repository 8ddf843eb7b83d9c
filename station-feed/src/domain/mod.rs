//! Domain types for the station feed.
//!
//! These mirror the rows of the backend's station table. The backend is
//! the source of truth; the client only reads.

mod route;
mod station;

pub use route::{InvalidRouteId, RouteId};
pub use station::{Station, StationId};
