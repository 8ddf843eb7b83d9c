//! Push channel types shared by all backends.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

use crate::domain::{RouteId, Station};

use super::{ROUTE_COLUMN, STATIONS_SCHEMA, STATIONS_TABLE};

/// Number of messages buffered per channel before slow receivers lag.
pub const CHANNEL_BUFFER: usize = 64;

/// Row operation kind reported by the push service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// Which row changes a push channel delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub route: RouteId,
    pub schema: String,
    pub table: String,
    pub event: ChangeKind,
}

impl ChangeFilter {
    /// Updates to the station table for one route.
    pub fn station_updates(route: RouteId) -> Self {
        Self {
            route,
            schema: STATIONS_SCHEMA.to_string(),
            table: STATIONS_TABLE.to_string(),
            event: ChangeKind::Update,
        }
    }

    /// Row filter expression in the backend's `column=eq.value` syntax.
    pub fn filter_expr(&self) -> String {
        format!("{ROUTE_COLUMN}=eq.{}", self.route)
    }

    /// Channel topic name. One topic per route.
    pub fn topic(&self) -> String {
        format!("realtime:{}-route-{}", self.table, self.route)
    }
}

/// Connection-status transitions reported for a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The join was acknowledged; changes will be delivered.
    Subscribed,
    /// No join acknowledgement arrived in time.
    TimedOut,
    /// The channel was closed, by either side.
    Closed,
    /// The backend reported an error for this channel.
    ChannelError(String),
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Subscribed => f.write_str("SUBSCRIBED"),
            ChannelStatus::TimedOut => f.write_str("TIMED_OUT"),
            ChannelStatus::Closed => f.write_str("CLOSED"),
            ChannelStatus::ChannelError(reason) => write!(f, "CHANNEL_ERROR: {reason}"),
        }
    }
}

/// A decoded row change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// The row after the change.
    pub row: Station,
    pub commit_timestamp: DateTime<Utc>,
}

/// Everything a push channel delivers to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// An open push channel.
///
/// The backend side owns the broadcast sender and the teardown receiver;
/// subscribers call [`ChannelHandle::receiver`]. Closing (explicitly or on
/// drop) signals the backend side to tear the channel down. The signal
/// fires at most once.
///
/// The handle keeps only a receiver, so once the backend side finishes,
/// every subscriber's `recv` ends with `Closed` after draining.
#[derive(Debug)]
pub struct ChannelHandle {
    messages: broadcast::Receiver<ChannelMessage>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChannelHandle {
    pub fn new(messages: &broadcast::Sender<ChannelMessage>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            messages: messages.subscribe(),
            shutdown: Some(shutdown),
        }
    }

    /// A new receiver for messages sent after this call.
    pub fn receiver(&self) -> broadcast::Receiver<ChannelMessage> {
        self.messages.resubscribe()
    }

    /// Whether the channel is still usable: not closed here, and the
    /// backend side still holds its end of the teardown signal.
    pub fn is_open(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Signal teardown. Returns `false` if the handle was already closed.
    pub fn close(&mut self) -> bool {
        match self.shutdown.take() {
            Some(tx) => {
                // The backend task may already be gone; nothing to do then.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}
