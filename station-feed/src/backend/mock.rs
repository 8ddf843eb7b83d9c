//! In-memory backend for tests and offline runs.
//!
//! Serves station rows from memory (optionally loaded from a JSON fixture)
//! and lets the caller push row updates into open channels by hand.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{RwLock, broadcast, oneshot};

use crate::domain::{RouteId, Station};

use super::DataBackend;
use super::channel::{
    CHANNEL_BUFFER, ChangeEvent, ChangeFilter, ChangeKind, ChannelHandle, ChannelMessage,
    ChannelStatus,
};
use super::error::BackendError;

/// One fixture row: a station plus the route it belongs to.
#[derive(Debug, Deserialize)]
struct FixtureRow {
    ruta: RouteId,
    #[serde(flatten)]
    station: Station,
}

/// Backend side of one opened channel. Both ends are dropped once the
/// channel is finished, as the realtime session task does on exit.
struct MockChannel {
    filter: ChangeFilter,
    messages: Option<broadcast::Sender<ChannelMessage>>,
    shutdown: Option<oneshot::Receiver<()>>,
}

impl MockChannel {
    fn is_closed(&mut self) -> bool {
        let closed = match &mut self.shutdown {
            Some(rx) => !matches!(rx.try_recv(), Err(TryRecvError::Empty)),
            None => true,
        };
        if closed {
            self.finish();
        }
        closed
    }

    fn finish(&mut self) {
        self.messages = None;
        self.shutdown = None;
    }
}

#[derive(Default)]
struct MockState {
    rows: RwLock<HashMap<RouteId, Vec<Station>>>,
    fetch_failures: Mutex<VecDeque<BackendError>>,
    open_failures: Mutex<VecDeque<BackendError>>,
    channels: Mutex<Vec<MockChannel>>,
    fetch_calls: AtomicUsize,
}

/// Mock backend that serves rows from memory.
///
/// Clones share state, so a test can keep one clone to drive pushes while
/// the feed owns another.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows from a JSON fixture: an array of table rows, each with a
    /// `ruta` column.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| BackendError::Api {
            status: 0,
            message: format!("Failed to read {:?}: {}", path, e),
        })?;

        let fixture: Vec<FixtureRow> =
            serde_json::from_str(&json).map_err(|e| BackendError::json(e, &json))?;

        let mut rows: HashMap<RouteId, Vec<Station>> = HashMap::new();
        for row in fixture {
            let stations = rows.entry(row.ruta).or_default();
            if stations.iter().any(|s| s.id == row.station.id) {
                return Err(BackendError::Api {
                    status: 0,
                    message: format!(
                        "Duplicate station id {} for route {} in {:?}",
                        row.station.id, row.ruta, path
                    ),
                });
            }
            stations.push(row.station);
        }

        Ok(Self {
            state: Arc::new(MockState {
                rows: RwLock::new(rows),
                ..MockState::default()
            }),
        })
    }

    /// Replace the rows stored for a route.
    pub async fn set_rows(&self, route: RouteId, rows: Vec<Station>) {
        self.state.rows.write().await.insert(route, rows);
    }

    /// Routes that have rows, in ascending order.
    pub async fn routes(&self) -> Vec<RouteId> {
        let mut routes: Vec<_> = self.state.rows.read().await.keys().copied().collect();
        routes.sort();
        routes
    }

    /// Make the next fetch fail. A `PostgrestError` becomes a query error.
    pub fn fail_next_fetch(&self, err: impl Into<BackendError>) {
        lock(&self.state.fetch_failures).push_back(err.into());
    }

    /// Make the next channel open fail.
    pub fn fail_next_open(&self, err: BackendError) {
        lock(&self.state.open_failures).push_back(err);
    }

    /// Number of fetches served (including failed ones).
    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of channels ever opened.
    pub fn opened_channels(&self) -> usize {
        lock(&self.state.channels).len()
    }

    /// Number of opened channels whose handle has since been closed.
    pub fn closed_channels(&self) -> usize {
        lock(&self.state.channels)
            .iter_mut()
            .map(MockChannel::is_closed)
            .filter(|&closed| closed)
            .count()
    }

    /// Close open channels on `route` from the server side: subscribers see
    /// a `Closed` status, then their receivers end. Returns how many
    /// channels were closed.
    pub fn close_from_server(&self, route: RouteId) -> usize {
        let mut channels = lock(&self.state.channels);
        let mut closed = 0;
        for channel in channels.iter_mut() {
            if channel.filter.route != route || channel.is_closed() {
                continue;
            }
            if let Some(tx) = &channel.messages {
                let _ = tx.send(ChannelMessage::Status(ChannelStatus::Closed));
            }
            channel.finish();
            closed += 1;
        }
        closed
    }

    /// Apply an update to the stored row and push it to open channels on
    /// `route`. Returns how many channels it was delivered to.
    ///
    /// The stored row is only replaced if it exists; the event is pushed
    /// either way, like a change committed by another writer.
    pub async fn push_update(&self, route: RouteId, row: Station) -> usize {
        if let Some(rows) = self.state.rows.write().await.get_mut(&route)
            && let Some(existing) = rows.iter_mut().find(|s| s.id == row.id)
        {
            *existing = row.clone();
        }

        let event = ChangeEvent {
            kind: ChangeKind::Update,
            row,
            commit_timestamp: Utc::now(),
        };
        self.deliver(route, ChannelMessage::Change(event))
    }

    /// Push a status transition to open channels on `route`.
    pub fn push_status(&self, route: RouteId, status: ChannelStatus) -> usize {
        self.deliver(route, ChannelMessage::Status(status))
    }

    fn deliver(&self, route: RouteId, msg: ChannelMessage) -> usize {
        let mut channels = lock(&self.state.channels);
        let mut delivered = 0;
        for channel in channels.iter_mut() {
            if channel.filter.route != route || channel.is_closed() {
                continue;
            }
            if let Some(tx) = &channel.messages
                && tx.send(msg.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

impl DataBackend for MockBackend {
    async fn fetch_stations(&self, route: RouteId) -> Result<Vec<Station>, BackendError> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = lock(&self.state.fetch_failures).pop_front() {
            return Err(err);
        }

        let mut rows = self
            .state
            .rows
            .read()
            .await
            .get(&route)
            .cloned()
            .unwrap_or_default();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn open_channel(&self, filter: &ChangeFilter) -> Result<ChannelHandle, BackendError> {
        if let Some(err) = lock(&self.state.open_failures).pop_front() {
            return Err(err);
        }

        let (messages, _) = broadcast::channel(CHANNEL_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = ChannelHandle::new(&messages, shutdown_tx);
        lock(&self.state.channels).push(MockChannel {
            filter: filter.clone(),
            messages: Some(messages),
            shutdown: Some(shutdown_rx),
        });

        Ok(handle)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PostgrestError;
    use std::io::Write;

    fn route() -> RouteId {
        RouteId::new(1)
    }

    #[tokio::test]
    async fn fetch_orders_by_id_descending() {
        let backend = MockBackend::new();
        backend
            .set_rows(
                route(),
                vec![
                    Station::new(1, "B", "delayed", 12.0),
                    Station::new(3, "A", "on-time", 4.0),
                    Station::new(2, "C", "on-time", 7.0),
                ],
            )
            .await;

        let rows = backend.fetch_stations(route()).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|s| s.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(backend.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_route_is_empty() {
        let backend = MockBackend::new();
        assert!(backend.fetch_stations(RouteId::new(9)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_failure_applies_once() {
        let backend = MockBackend::new();
        backend.fail_next_fetch(PostgrestError::new("boom"));

        assert!(backend.fetch_stations(route()).await.is_err());
        assert!(backend.fetch_stations(route()).await.is_ok());
        assert_eq!(backend.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn push_reaches_only_matching_route() {
        let backend = MockBackend::new();
        let one = backend
            .open_channel(&ChangeFilter::station_updates(route()))
            .await
            .unwrap();
        let two = backend
            .open_channel(&ChangeFilter::station_updates(RouteId::new(2)))
            .await
            .unwrap();
        let mut rx_one = one.receiver();
        let _rx_two = two.receiver();

        let delivered = backend
            .push_update(route(), Station::new(1, "B", "arrived", 0.0))
            .await;
        assert_eq!(delivered, 1);

        match rx_one.recv().await.unwrap() {
            ChannelMessage::Change(event) => assert_eq!(event.row.status, "arrived"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn push_updates_stored_row() {
        let backend = MockBackend::new();
        backend
            .set_rows(route(), vec![Station::new(1, "B", "delayed", 12.0)])
            .await;

        backend
            .push_update(route(), Station::new(1, "B", "arrived", 0.0))
            .await;

        let rows = backend.fetch_stations(route()).await.unwrap();
        assert_eq!(rows[0].status, "arrived");
    }

    #[tokio::test]
    async fn tracks_closed_channels() {
        let backend = MockBackend::new();
        let mut handle = backend
            .open_channel(&ChangeFilter::station_updates(route()))
            .await
            .unwrap();

        assert_eq!(backend.opened_channels(), 1);
        assert_eq!(backend.closed_channels(), 0);

        handle.close();
        assert_eq!(backend.closed_channels(), 1);
        // Counting again must not change the answer
        assert_eq!(backend.closed_channels(), 1);

        assert_eq!(
            backend
                .push_update(route(), Station::new(1, "B", "arrived", 0.0))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn load_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id":3,"estacion":"A","estado":"on-time","eta":4,"ruta":1}},
                {{"id":1,"estacion":"B","estado":"delayed","eta":12,"ruta":1}},
                {{"id":5,"estacion":"Z","estado":"on-time","eta":1,"ruta":2}}
            ]"#
        )
        .unwrap();

        let backend = MockBackend::from_json_file(file.path()).unwrap();
        let routes = backend.routes().await;
        let rows = backend.fetch_stations(route()).await.unwrap();

        assert_eq!(routes, vec![RouteId::new(1), RouteId::new(2)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], Station::new(3, "A", "on-time", 4.0));
    }

    #[tokio::test]
    async fn queued_failure_can_be_any_backend_error() {
        let backend = MockBackend::new();
        backend.fail_next_fetch(BackendError::ChannelClosed);

        assert!(matches!(
            backend.fetch_stations(route()).await,
            Err(BackendError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn server_close_ends_receivers() {
        let backend = MockBackend::new();
        let handle = backend
            .open_channel(&ChangeFilter::station_updates(route()))
            .await
            .unwrap();
        let mut rx = handle.receiver();

        assert_eq!(backend.close_from_server(route()), 1);

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelMessage::Status(ChannelStatus::Closed)
        );
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(!handle.is_open());
        assert_eq!(backend.closed_channels(), 1);
        assert_eq!(backend.close_from_server(route()), 0);
    }

    #[test]
    fn fixture_rejects_duplicate_ids_within_a_route() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id":1,"estacion":"A","estado":"on-time","eta":4,"ruta":1}},
                {{"id":1,"estacion":"B","estado":"delayed","eta":12,"ruta":1}}
            ]"#
        )
        .unwrap();

        match MockBackend::from_json_file(file.path()) {
            Err(BackendError::Api { status: 0, message }) => {
                assert!(message.contains("Duplicate station id 1"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("duplicate ids were accepted"),
        }
    }

    #[test]
    fn same_id_on_different_routes_is_allowed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id":1,"estacion":"A","estado":"on-time","eta":4,"ruta":1}},
                {{"id":1,"estacion":"A","estado":"on-time","eta":4,"ruta":2}}
            ]"#
        )
        .unwrap();

        assert!(MockBackend::from_json_file(file.path()).is_ok());
    }

    #[test]
    fn missing_fixture_is_an_error() {
        assert!(MockBackend::from_json_file("/nonexistent/stations.json").is_err());
    }
}
