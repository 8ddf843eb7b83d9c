//! Feed lifecycle phase and the snapshot handed to observers.

use std::fmt;

use crate::backend::ChannelStatus;
use crate::domain::{RouteId, Station};

/// Where a feed is in its mount cycle.
///
/// ```text
/// Idle -> Bootstrapping -> Ready
///                       \-> Errored
/// (any) -> Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Idle,
    Bootstrapping,
    Ready,
    /// The initial bootstrap failed. Terminal until the feed is dropped.
    Errored,
    Terminated,
}

impl FeedPhase {
    /// Whether pushed updates are still applied in this phase.
    pub fn accepts_updates(self) -> bool {
        matches!(
            self,
            FeedPhase::Idle | FeedPhase::Bootstrapping | FeedPhase::Ready
        )
    }
}

impl fmt::Display for FeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedPhase::Idle => "idle",
            FeedPhase::Bootstrapping => "bootstrapping",
            FeedPhase::Ready => "ready",
            FeedPhase::Errored => "errored",
            FeedPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Immutable view of a feed, published after every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub route: RouteId,
    pub phase: FeedPhase,
    pub stations: Vec<Station>,
    /// Message of the most recent failed fetch, cleared by a successful one.
    pub error: Option<String>,
    /// Last status reported by the push channel, if any.
    pub channel: Option<ChannelStatus>,
}

impl FeedSnapshot {
    pub fn new(route: RouteId) -> Self {
        Self {
            route,
            phase: FeedPhase::Idle,
            stations: Vec::new(),
            error: None,
            channel: None,
        }
    }
}
