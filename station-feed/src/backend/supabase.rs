//! Hosted backend: REST queries plus realtime push channels.

use crate::domain::{RouteId, Station};

use super::DataBackend;
use super::channel::{ChangeFilter, ChannelHandle};
use super::client::{BackendConfig, RestClient};
use super::error::BackendError;
use super::realtime::RealtimeClient;

/// The production [`DataBackend`].
#[derive(Debug, Clone)]
pub struct SupabaseBackend {
    rest: RestClient,
    realtime: RealtimeClient,
}

impl SupabaseBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            rest: RestClient::new(config)?,
            realtime: RealtimeClient::new(config)?,
        })
    }
}

impl DataBackend for SupabaseBackend {
    async fn fetch_stations(&self, route: RouteId) -> Result<Vec<Station>, BackendError> {
        self.rest.fetch_stations(route).await
    }

    async fn open_channel(&self, filter: &ChangeFilter) -> Result<ChannelHandle, BackendError> {
        self.realtime.open(filter).await
    }
}
