//! Client for the broker's WebSocket protocol.
//!
//! One `PubSubClient` is one connection. `publish` and `unsubscribe` wait for
//! the broker's `response`, matched by request id. `subscribe` returns as soon
//! as the request is written; payloads for every subscription on the
//! connection, and each subscription's `stream_end`, arrive on the receiver
//! handed out by `take_events`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::transport::message::{ClientMessage, ResponseStatus, ServerMessage};
use crate::utils::error::{ClientError, ErrorCode};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>>;

pub struct PubSubClient {
    outbound: mpsc::UnboundedSender<WsMessage>,
    pending: Pending,
    next_request_id: AtomicU64,
    events: Option<mpsc::UnboundedReceiver<ServerMessage>>,
    closed: CancellationToken,
    send_loop: JoinHandle<()>,
    recv_loop: JoinHandle<()>,
}

impl PubSubClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        info!(url, "connecting to broker");
        let (ws_stream, _response) = connect_async(url).await?;
        info!(url, "broker connection established");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let (events_tx, events) = mpsc::unbounded_channel::<ServerMessage>();
        let pending: Pending = Arc::default();
        let closed = CancellationToken::new();

        let send_loop = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(error = %e, "failed to send to broker");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let recv_loop = {
            let pending = pending.clone();
            let closed = closed.clone();

            tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    let text = match msg {
                        Ok(WsMessage::Text(text)) => text,
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "error receiving from broker");
                            break;
                        }
                    };

                    let server_msg = match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "unreadable frame from broker");
                            continue;
                        }
                    };

                    if let ServerMessage::Response {
                        request_id: Some(id),
                        ..
                    } = &server_msg
                    {
                        let id = *id;
                        let waiter = lock(&pending).remove(&id);
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(server_msg);
                        }
                        continue;
                    }

                    let _ = events_tx.send(server_msg);
                }

                debug!("stream closed by server");
                closed.cancel();
                lock(&pending).clear();
            })
        };

        Ok(Self {
            outbound,
            pending,
            next_request_id: AtomicU64::new(1),
            events: Some(events),
            closed,
            send_loop,
            recv_loop,
        })
    }

    /// Payload and `stream_end` frames. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.events.take()
    }

    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ClientError> {
        debug!(topic, "publish request initiated");
        self.call(|request_id| ClientMessage::Publish {
            request_id: Some(request_id),
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    /// Open a subscription stream. Returns once the request is sent.
    pub fn subscribe(&self, topic: &str, subscriber_id: &str) -> Result<u64, ClientError> {
        debug!(topic, subscriber_id, "subscribe request initiated");
        let request_id = self.next_request_id();
        self.send(&ClientMessage::Subscribe {
            request_id: Some(request_id),
            topic: topic.to_string(),
            subscriber_id: subscriber_id.to_string(),
        })?;
        Ok(request_id)
    }

    pub async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), ClientError> {
        debug!(topic, subscriber_id, "unsubscribe request initiated");
        self.call(|request_id| ClientMessage::Unsubscribe {
            request_id: Some(request_id),
            topic: topic.to_string(),
            subscriber_id: subscriber_id.to_string(),
        })
        .await
    }

    /// Close the connection; every open subscription on it ends.
    pub async fn close(self) {
        let PubSubClient {
            outbound,
            send_loop,
            recv_loop,
            ..
        } = self;

        drop(outbound);
        let _ = send_loop.await;
        recv_loop.abort();
        info!("closed broker connection");
    }

    async fn call(&self, build: impl FnOnce(u64) -> ClientMessage) -> Result<(), ClientError> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);

        if let Err(e) = self.send(&build(request_id)) {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }

        let reply = tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| ClientError::ConnectionClosed)?,
            _ = self.closed.cancelled() => return Err(ClientError::ConnectionClosed),
        };
        match reply {
            ServerMessage::Response {
                status: ResponseStatus::Ok,
                ..
            } => Ok(()),
            ServerMessage::Response { code, message, .. } => Err(ClientError::Broker {
                code: code.unwrap_or(ErrorCode::Internal),
                message: message.unwrap_or_default(),
            }),
            _ => Err(ClientError::ConnectionClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        if self.closed.is_cancelled() {
            return Err(ClientError::ConnectionClosed);
        }
        let text = serde_json::to_string(msg)?;
        self.outbound
            .send(WsMessage::text(text))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Turn a `stream_end` frame's status into a result.
pub fn stream_end_result(msg: &ServerMessage) -> Option<Result<(), ClientError>> {
    match msg {
        ServerMessage::StreamEnd {
            status: ResponseStatus::Ok,
            ..
        } => Some(Ok(())),
        ServerMessage::StreamEnd { code, message, .. } => Some(Err(ClientError::Broker {
            code: code.unwrap_or(ErrorCode::Internal),
            message: message.clone().unwrap_or_default(),
        })),
        _ => None,
    }
}

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ServerMessage>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
