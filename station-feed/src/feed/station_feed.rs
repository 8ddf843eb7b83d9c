//! The station feed: bootstrap, subscribe, merge.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BackendError, ChangeEvent, ChangeFilter, ChannelMessage, ChannelStatus, DataBackend,
};
use crate::domain::{RouteId, Station};

use super::merge::{MergePolicy, patch_station};
use super::registry::{ChannelRegistry, Subscription};
use super::state::{FeedPhase, FeedSnapshot};

/// Errors from feed operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The feed was unsubscribed; it cannot be used again.
    #[error("feed has been terminated")]
    Terminated,
}

/// Something the feed should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Message(ChannelMessage),
    /// The receiver fell behind and `n` messages were lost.
    Lagged(u64),
}

/// Live, in-memory mirror of one route's stations.
///
/// The feed owns its station list and at most one channel lease. All
/// mutation goes through `&mut self`, so it is driven from a single task.
/// Observers read [`FeedSnapshot`]s from [`StationFeed::watch`].
///
/// Dropping the feed releases its channel lease.
pub struct StationFeed<B> {
    backend: B,
    registry: Arc<ChannelRegistry>,
    policy: MergePolicy,
    state: FeedSnapshot,
    subscription: Option<Subscription>,
    observers: watch::Sender<FeedSnapshot>,
}

impl<B: DataBackend> StationFeed<B> {
    pub fn new(
        backend: B,
        registry: Arc<ChannelRegistry>,
        route: RouteId,
        policy: MergePolicy,
    ) -> Self {
        let state = FeedSnapshot::new(route);
        let (observers, _) = watch::channel(state.clone());
        Self {
            backend,
            registry,
            policy,
            state,
            subscription: None,
            observers,
        }
    }

    pub fn route(&self) -> RouteId {
        self.state.route
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn phase(&self) -> FeedPhase {
        self.state.phase
    }

    /// Stations in display order.
    pub fn stations(&self) -> &[Station] {
        &self.state.stations
    }

    /// Message of the most recent failed fetch.
    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn snapshot(&self) -> &FeedSnapshot {
        &self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Receiver that sees a new snapshot after every state change.
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.observers.subscribe()
    }

    /// Fetch the route's stations and replace the local list.
    ///
    /// On failure the error message is recorded and the list is left as it
    /// was. A failure from `Idle` moves the feed to `Errored`; a failed
    /// refetch from `Ready` keeps it `Ready` with the last-known list.
    pub async fn bootstrap(&mut self) -> Result<&[Station], FeedError> {
        if self.state.phase == FeedPhase::Terminated {
            return Err(FeedError::Terminated);
        }

        let initial = self.state.phase != FeedPhase::Ready;
        if initial {
            self.state.phase = FeedPhase::Bootstrapping;
            self.publish();
        }

        let route = self.state.route;
        match self.backend.fetch_stations(route).await {
            Ok(rows) => {
                info!(route = %route, count = rows.len(), "Stations loaded");
                self.state.stations = rows;
                self.state.error = None;
                self.state.phase = FeedPhase::Ready;
                self.publish();
                Ok(&self.state.stations)
            }
            Err(e) => {
                error!(route = %route, error = %e, "Failed to fetch stations");
                self.state.error = Some(e.to_string());
                if initial {
                    self.state.phase = FeedPhase::Errored;
                }
                self.publish();
                Err(e.into())
            }
        }
    }

    /// Lease the route's push channel. A no-op if already subscribed.
    ///
    /// A failure is recorded as the channel status; the list is untouched.
    pub async fn subscribe(&mut self) -> Result<(), FeedError> {
        if self.state.phase == FeedPhase::Terminated {
            return Err(FeedError::Terminated);
        }
        if self.subscription.is_some() {
            debug!(route = %self.state.route, "Already subscribed");
            return Ok(());
        }

        let filter = ChangeFilter::station_updates(self.state.route);
        match self.registry.acquire(&self.backend, filter).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(e) => {
                warn!(route = %self.state.route, error = %e, "Failed to subscribe");
                self.state.channel = Some(ChannelStatus::ChannelError(e.to_string()));
                self.publish();
                Err(e.into())
            }
        }
    }

    /// Release the channel lease and terminate the feed.
    ///
    /// Safe to call any number of times, subscribed or not.
    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            drop(subscription);
            info!(route = %self.state.route, "Unsubscribed");
        }
        if self.state.phase != FeedPhase::Terminated {
            self.state.phase = FeedPhase::Terminated;
            self.publish();
        }
    }

    /// Wait for the next channel event. `None` when not subscribed.
    ///
    /// When the backend has finished the channel, the lease is released and
    /// the feed is left unsubscribed; a later `subscribe` opens a new one.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        let subscription = self.subscription.as_mut()?;
        match subscription.recv().await {
            Ok(msg) => Some(FeedEvent::Message(msg)),
            Err(RecvError::Lagged(n)) => Some(FeedEvent::Lagged(n)),
            Err(RecvError::Closed) => {
                self.subscription = None;
                info!(route = %self.state.route, "Push channel ended");
                None
            }
        }
    }

    /// React to one channel event.
    pub async fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Message(ChannelMessage::Status(status)) => self.on_status(status),
            FeedEvent::Message(ChannelMessage::Change(change)) => self.on_change(change).await,
            FeedEvent::Lagged(missed) => {
                if !self.state.phase.accepts_updates() {
                    return;
                }
                warn!(route = %self.state.route, missed, "Missed channel messages, refetching");
                self.refetch().await;
            }
        }
    }

    /// Run one mount cycle: subscribe, bootstrap, then apply events until
    /// `shutdown` resolves. Always ends unsubscribed.
    ///
    /// Subscribing first means changes committed while the bootstrap query
    /// is in flight are buffered, not lost.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        // Failures are recorded in the snapshot; the cycle carries on.
        let _ = self.subscribe().await;
        let _ = self.bootstrap().await;

        loop {
            if self.subscription.is_none() {
                (&mut shutdown).await;
                break;
            }
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.next_event() => match event {
                    Some(event) => self.apply(event).await,
                    None => {
                        (&mut shutdown).await;
                        break;
                    }
                },
            }
        }

        self.unsubscribe();
    }

    fn on_status(&mut self, status: ChannelStatus) {
        let route = self.state.route;
        match &status {
            ChannelStatus::Subscribed => info!(route = %route, "Channel status: {status}"),
            ChannelStatus::Closed => info!(route = %route, "Channel status: {status}"),
            ChannelStatus::TimedOut | ChannelStatus::ChannelError(_) => {
                warn!(route = %route, "Channel status: {status}")
            }
        }
        self.state.channel = Some(status);
        self.publish();
    }

    async fn on_change(&mut self, change: ChangeEvent) {
        let route = self.state.route;
        if !self.state.phase.accepts_updates() {
            debug!(route = %route, phase = %self.state.phase, "Ignoring update");
            return;
        }

        match self.policy {
            MergePolicy::Refetch => {
                debug!(route = %route, id = %change.row.id, "Update received, refetching");
                self.refetch().await;
            }
            MergePolicy::Patch => {
                let id = change.row.id;
                if patch_station(&mut self.state.stations, change.row) {
                    debug!(route = %route, id = %id, "Patched station");
                    self.publish();
                } else {
                    // Stays stale until the next bootstrap.
                    warn!(route = %route, id = %id, "Dropping update for station not in list");
                }
            }
        }
    }

    async fn refetch(&mut self) {
        // bootstrap logs and records the failure itself
        let _ = self.bootstrap().await;
    }

    fn publish(&self) {
        self.observers.send_replace(self.state.clone());
    }
}
