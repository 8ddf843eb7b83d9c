//! Client-side synchronization of a route's station list.
//!
//! A [`StationFeed`] bootstraps its list with one query, subscribes to the
//! route's push channel through a shared [`ChannelRegistry`], and folds
//! pushed updates in according to its [`MergePolicy`].

mod merge;
mod registry;
mod state;
mod station_feed;

pub use merge::{InvalidMergePolicy, MergePolicy, patch_station};
pub use registry::{ChannelRegistry, Subscription};
pub use state::{FeedPhase, FeedSnapshot};
pub use station_feed::{FeedError, FeedEvent, StationFeed};
