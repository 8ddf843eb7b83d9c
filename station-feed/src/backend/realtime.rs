//! Realtime push channel client.
//!
//! Each opened channel gets its own websocket and a background task that
//! owns it. The task joins the topic, sends heartbeats, decodes frames into
//! [`ChannelMessage`]s and broadcasts them. Closing the [`ChannelHandle`]
//! makes the task leave the topic and close the socket.

use std::ops::ControlFlow;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::channel::{CHANNEL_BUFFER, ChangeFilter, ChannelHandle, ChannelMessage, ChannelStatus};
use super::client::BackendConfig;
use super::error::BackendError;
use super::protocol::{self, Inbound, PhoenixMessage};

/// Protocol version requested from the push service.
const PROTOCOL_VSN: &str = "1.0.0";

/// Ref used for the join request; the leave refers back to it.
const JOIN_REF: &str = "1";

/// Client for the realtime push service.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    socket_url: String,
    api_key: String,
    heartbeat: Duration,
    join_timeout: Duration,
}

impl RealtimeClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            socket_url: socket_url(&config.url, &config.api_key)?,
            api_key: config.api_key.clone(),
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            join_timeout: Duration::from_secs(config.join_timeout_secs),
        })
    }

    /// Connect, join the filter's topic and start the channel task.
    ///
    /// Returns once the join request is on the wire. The join outcome
    /// arrives later as a [`ChannelStatus`] message.
    pub async fn open(&self, filter: &ChangeFilter) -> Result<ChannelHandle, BackendError> {
        let (socket, _response) = connect_async(self.socket_url.as_str()).await?;
        let (mut sink, stream) = socket.split();

        let topic = filter.topic();
        let join = PhoenixMessage::join(filter, &self.api_key, JOIN_REF);
        sink.send(Message::Text(join.encode()?.into())).await?;
        debug!(topic = %topic, "Sent channel join");

        let (messages, _) = broadcast::channel(CHANNEL_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = ChannelHandle::new(&messages, shutdown_tx);

        // The session holds the only sender, so its exit closes every receiver.
        let session = ChannelSession {
            topic,
            messages,
            heartbeat: self.heartbeat,
            join_timeout: self.join_timeout,
            next_ref: 2,
        };
        tokio::spawn(session.run(sink, stream, shutdown_rx));

        Ok(handle)
    }
}

/// Websocket endpoint for a project URL: same host, ws(s) scheme.
fn socket_url(base: &Url, api_key: &str) -> Result<String, BackendError> {
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(BackendError::Api {
                status: 0,
                message: format!("unsupported URL scheme: {other}"),
            });
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme).map_err(|_| BackendError::Api {
        status: 0,
        message: format!("cannot switch {base} to {scheme}"),
    })?;
    url.set_path("/realtime/v1/websocket");
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VSN);

    Ok(url.into())
}

/// State owned by one channel's background task.
struct ChannelSession {
    topic: String,
    messages: broadcast::Sender<ChannelMessage>,
    heartbeat: Duration,
    join_timeout: Duration,
    next_ref: u64,
}

impl ChannelSession {
    async fn run<W, R>(mut self, mut sink: W, mut stream: R, mut shutdown: oneshot::Receiver<()>)
    where
        W: Sink<Message, Error = WsError> + Unpin,
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        // First tick is immediate, skip it
        heartbeat.tick().await;

        let join_deadline = tokio::time::sleep(self.join_timeout);
        tokio::pin!(join_deadline);
        let mut awaiting_join = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.leave(&mut sink).await;
                    self.publish(ChannelMessage::Status(ChannelStatus::Closed));
                    break;
                }
                _ = heartbeat.tick() => {
                    let msg_ref = self.take_ref();
                    if let Err(e) = send(&mut sink, &PhoenixMessage::heartbeat(&msg_ref)).await {
                        warn!(topic = %self.topic, error = %e, "Heartbeat failed");
                        self.publish(ChannelMessage::Status(ChannelStatus::ChannelError(e.to_string())));
                        self.publish(ChannelMessage::Status(ChannelStatus::Closed));
                        break;
                    }
                }
                _ = &mut join_deadline, if awaiting_join => {
                    awaiting_join = false;
                    warn!(topic = %self.topic, "Channel join timed out");
                    self.publish(ChannelMessage::Status(ChannelStatus::TimedOut));
                }
                frame = stream.next() => {
                    if self.on_frame(frame, &mut awaiting_join).is_break() {
                        break;
                    }
                }
            }
        }

        debug!(topic = %self.topic, "Channel task finished");
    }

    /// Handle one socket read. Breaks when the channel is finished.
    fn on_frame(
        &self,
        frame: Option<Result<Message, WsError>>,
        awaiting_join: &mut bool,
    ) -> ControlFlow<()> {
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                self.publish(ChannelMessage::Status(ChannelStatus::Closed));
                return ControlFlow::Break(());
            }
            // Ping/pong are answered by tungstenite itself
            Some(Ok(_)) => return ControlFlow::Continue(()),
            Some(Err(e)) => {
                warn!(topic = %self.topic, error = %e, "Socket error");
                self.publish(ChannelMessage::Status(ChannelStatus::ChannelError(e.to_string())));
                self.publish(ChannelMessage::Status(ChannelStatus::Closed));
                return ControlFlow::Break(());
            }
        };

        match protocol::decode(text.as_str(), &self.topic) {
            Ok(Inbound::Reply { msg_ref, ok, reason }) if msg_ref.as_deref() == Some(JOIN_REF) => {
                *awaiting_join = false;
                let status = if ok {
                    info!(topic = %self.topic, "Channel subscribed");
                    ChannelStatus::Subscribed
                } else {
                    let reason = reason.unwrap_or_default();
                    warn!(topic = %self.topic, reason = %reason, "Channel join rejected");
                    ChannelStatus::ChannelError(reason)
                };
                self.publish(ChannelMessage::Status(status));
            }
            Ok(Inbound::Change(event)) => {
                debug!(topic = %self.topic, id = %event.row.id, "Row change received");
                self.publish(ChannelMessage::Change(event));
            }
            Ok(Inbound::Error(reason)) => {
                warn!(topic = %self.topic, reason = %reason, "Channel error");
                self.publish(ChannelMessage::Status(ChannelStatus::ChannelError(reason)));
            }
            Ok(Inbound::Closed) => {
                self.publish(ChannelMessage::Status(ChannelStatus::Closed));
                return ControlFlow::Break(());
            }
            Ok(Inbound::Reply { .. } | Inbound::Ignored) => {}
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Undecodable frame, skipping");
            }
        }

        ControlFlow::Continue(())
    }

    async fn leave<W>(&mut self, sink: &mut W)
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let msg_ref = self.take_ref();
        let leave = PhoenixMessage::leave(&self.topic, &msg_ref, JOIN_REF);
        if let Err(e) = send(sink, &leave).await {
            debug!(topic = %self.topic, error = %e, "Leave not sent");
        }
        if let Err(e) = sink.close().await {
            debug!(topic = %self.topic, error = %e, "Socket close failed");
        }
    }

    fn take_ref(&mut self) -> String {
        let r = self.next_ref;
        self.next_ref += 1;
        r.to_string()
    }

    fn publish(&self, msg: ChannelMessage) {
        // No receivers is fine: everyone may have unsubscribed already.
        let _ = self.messages.send(msg);
    }
}

async fn send<W>(sink: &mut W, msg: &PhoenixMessage) -> Result<(), BackendError>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    sink.send(Message::Text(msg.encode()?.into())).await?;
    Ok(())
}
