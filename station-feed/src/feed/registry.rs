//! Get-or-create registry of push channels, keyed by route.
//!
//! Every feed on a route shares one backend channel. Each subscriber holds
//! a [`Subscription`] lease; the channel is torn down when the last lease
//! is dropped. A channel the backend has closed on its own is replaced on
//! the next acquire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ChangeFilter, ChannelHandle, ChannelMessage, DataBackend};
use crate::domain::RouteId;

struct Entry {
    handle: ChannelHandle,
    leases: usize,
    /// Distinguishes a replacement channel from the one it replaced.
    generation: u64,
}

#[derive(Default)]
struct Channels {
    entries: HashMap<RouteId, Entry>,
    next_generation: u64,
}

/// Shared registry of open push channels.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<Channels>,
    /// Serializes channel creation so two callers cannot both open one.
    opening: tokio::sync::Mutex<()>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the channel for `filter.route`, opening it if none is open.
    pub async fn acquire<B: DataBackend>(
        self: &Arc<Self>,
        backend: &B,
        filter: ChangeFilter,
    ) -> Result<Subscription, BackendError> {
        let route = filter.route;
        let _opening = self.opening.lock().await;

        if let Some((receiver, generation)) = self.lease_existing(route) {
            debug!(route = %route, "Reusing open push channel");
            return Ok(Subscription {
                registry: Arc::clone(self),
                route,
                generation,
                receiver,
            });
        }

        let handle = backend.open_channel(&filter).await?;
        let receiver = handle.receiver();
        let generation = {
            let mut channels = self.lock();
            let generation = channels.next_generation;
            channels.next_generation += 1;
            channels.entries.insert(
                route,
                Entry {
                    handle,
                    leases: 1,
                    generation,
                },
            );
            generation
        };
        info!(route = %route, topic = %filter.topic(), "Opened push channel");

        Ok(Subscription {
            registry: Arc::clone(self),
            route,
            generation,
            receiver,
        })
    }

    /// Whether a live channel is registered for `route`.
    pub fn is_open(&self, route: RouteId) -> bool {
        self.lock()
            .entries
            .get(&route)
            .is_some_and(|e| e.handle.is_open())
    }

    /// Number of live leases on `route`'s channel.
    pub fn lease_count(&self, route: RouteId) -> usize {
        self.lock().entries.get(&route).map_or(0, |e| e.leases)
    }

    /// Lease the registered channel if it is still open. A channel the
    /// backend has finished is dropped from the registry instead; its
    /// remaining leases release nothing.
    fn lease_existing(
        &self,
        route: RouteId,
    ) -> Option<(broadcast::Receiver<ChannelMessage>, u64)> {
        let mut channels = self.lock();
        let entry = channels.entries.get_mut(&route)?;
        if entry.handle.is_open() {
            entry.leases += 1;
            return Some((entry.handle.receiver(), entry.generation));
        }

        warn!(
            route = %route,
            stale_leases = entry.leases,
            "Push channel closed by backend, replacing it"
        );
        channels.entries.remove(&route);
        None
    }

    fn release(&self, route: RouteId, generation: u64) {
        let mut channels = self.lock();
        let Some(entry) = channels.entries.get_mut(&route) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        entry.leases -= 1;
        if entry.leases == 0
            && let Some(mut entry) = channels.entries.remove(&route)
        {
            entry.handle.close();
            info!(route = %route, "Closed push channel");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One subscriber's lease on a registry channel.
///
/// Dropping the lease releases it; this happens exactly once.
pub struct Subscription {
    registry: Arc<ChannelRegistry>,
    route: RouteId,
    generation: u64,
    receiver: broadcast::Receiver<ChannelMessage>,
}

impl Subscription {
    pub fn route(&self) -> RouteId {
        self.route
    }

    /// Wait for the next channel message. `Closed` once the backend has
    /// finished the channel and every buffered message was read.
    pub async fn recv(&mut self) -> Result<ChannelMessage, RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release(self.route, self.generation);
    }
}
