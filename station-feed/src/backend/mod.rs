//! Data backend: where station rows and their changes come from.
//!
//! The backend is a hosted Postgres table behind two surfaces:
//! - a REST query endpoint, used for the bootstrap fetch
//! - a realtime push service, which streams row changes over a websocket
//!
//! [`DataBackend`] is the seam between the feed and the outside world;
//! [`SupabaseBackend`] talks to the real service and [`MockBackend`] serves
//! in-memory rows for tests and offline runs.

mod channel;
mod client;
mod error;
mod mock;
mod protocol;
mod realtime;
mod supabase;

pub use channel::{
    CHANNEL_BUFFER, ChangeEvent, ChangeFilter, ChangeKind, ChannelHandle, ChannelMessage,
    ChannelStatus,
};
pub use client::{BackendConfig, RestClient};
pub use error::{BackendError, PostgrestError};
pub use mock::MockBackend;
pub use protocol::PhoenixMessage;
pub use realtime::RealtimeClient;
pub use supabase::SupabaseBackend;

use crate::domain::{RouteId, Station};

/// Table holding the station rows.
pub const STATIONS_TABLE: &str = "temporal";

/// Schema of [`STATIONS_TABLE`].
pub const STATIONS_SCHEMA: &str = "public";

/// Column holding each row's route.
pub const ROUTE_COLUMN: &str = "ruta";

/// Query and push-subscription operations against the station table.
#[allow(async_fn_in_trait)]
pub trait DataBackend {
    /// Fetch every station on `route`, ordered by identifier descending.
    async fn fetch_stations(&self, route: RouteId) -> Result<Vec<Station>, BackendError>;

    /// Open a push channel delivering the changes selected by `filter`.
    async fn open_channel(&self, filter: &ChangeFilter) -> Result<ChannelHandle, BackendError>;
}
