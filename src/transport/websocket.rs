//! WebSocket transport
//!
//! This file implements the WebSocket server that translates protocol JSON
//! messages into broker operations. Responsibilities:
//! - Accept TCP/WebSocket connections until the shutdown token fires
//! - Give each connection a `SubscriberStream` drained by a send loop
//! - Answer `publish` and `unsubscribe` with a `response` frame
//! - Register each `subscribe` in request order, then park its session on a
//!   task of its own and send `stream_end` when it terminates
//! - End a parked session when the same connection unsubscribes it
//!
//! Closing the connection closes its stream: every session opened over it
//! ends, and pushes to its stale registry entries fail from then on. On
//! broker shutdown the stream stays open until every session has queued its
//! `stream_end`, and the send loop drains the queue before closing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::session::SessionState;
use crate::broker::{Broker, SubscriberStream};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::ServerError;

pub struct Server {
    listener: TcpListener,
    broker: Arc<Broker>,
}

impl Server {
    pub async fn bind(addr: &str, broker: Arc<Broker>) -> Result<Self, ServerError> {
        info!(addr, "creating websocket server");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self { listener, broker })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the broker's shutdown token is cancelled,
    /// then wait for the open connections to say goodbye.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        let shutdown = self.broker.shutdown_token().clone();
        let mut connections = JoinSet::new();
        info!("websocket server listening on ws://{addr}");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(%addr, "shutting down server");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "accepted tcp connection");
                        connections.spawn(handle_connection(stream, self.broker.clone()));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        }

        while connections.join_next().await.is_some() {}
        debug!(%addr, "all connections closed");
        Ok(())
    }
}

pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> Result<(), ServerError> {
    Server::bind(addr, broker).await?.run().await
}

/// Per-connection state seen by `handle_message`.
pub(crate) struct Connection {
    stream: SubscriberStream,
    sessions: JoinSet<()>,
    /// Release tokens of the sessions this connection holds open, by
    /// `(topic, subscriber_id)`.
    released: HashMap<(String, String), CancellationToken>,
}

impl Connection {
    pub(crate) fn new(stream: SubscriberStream) -> Self {
        Self {
            stream,
            sessions: JoinSet::new(),
            released: HashMap::new(),
        }
    }

    /// Wait for every parked session. Each one ends once the stream closes,
    /// the broker shuts down, or it is released.
    pub(crate) async fn join_sessions(&mut self) {
        while self.sessions.join_next().await.is_some() {}
        self.released.clear();
    }

    fn release(&mut self, topic: &str, subscriber_id: &str) {
        let key = (topic.to_string(), subscriber_id.to_string());
        if let Some(token) = self.released.remove(&key) {
            token.cancel();
        }
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Broker>) {
    let handshake = tokio::select! {
        _ = broker.shutdown_token().cancelled() => return,
        handshake = accept_async(stream) => handshake,
    };
    let ws_stream = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake error");
            return;
        }
    };

    let peer = format!("peer-{}", Uuid::new_v4());
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let stream = SubscriberStream::new(peer.clone(), tx);
    info!(%peer, "peer connected");

    let send_loop = {
        let stream = stream.clone();
        let peer = peer.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = ws_sender.send(msg).await {
                            warn!(%peer, error = %e, "failed to send message");
                            break;
                        }
                    }
                    _ = stream.closed() => break,
                }
            }

            stream.close();
            let _ = ws_sender.close().await;
            debug!(%peer, "send loop closed");
        })
    };

    let shutdown = broker.shutdown_token().clone();
    let mut conn = Connection::new(stream.clone());
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = stream.closed() => break,
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(WsMessage::Text(text))) => handle_message(&broker, &mut conn, text.as_str()),
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(%peer, error = %e, "websocket receive error");
                break;
            }
        }
    }

    // A peer that went away must close the stream to wake its sessions. On
    // shutdown the sessions wake on their own and their `stream_end` frames
    // have to be queued before the stream closes.
    if !shutdown.is_cancelled() {
        info!(%peer, "peer disconnected");
        stream.close();
    }
    conn.join_sessions().await;
    stream.close();
    let _ = send_loop.await;
    debug!(%peer, "connection closed");
}

pub(crate) fn handle_message(broker: &Arc<Broker>, conn: &mut Connection, text: &str) {
    while conn.sessions.try_join_next().is_some() {}

    let stream = &conn.stream;
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(
                peer = %stream.peer,
                error = %err,
                "invalid client message: {}",
                text.chars().take(100).collect::<String>()
            );
            reply(
                stream,
                &ServerMessage::Error {
                    message: format!("invalid client message: {err}"),
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Publish {
            request_id,
            topic,
            payload,
        } => {
            let result = broker.publish(&topic, &payload);
            reply(stream, &ServerMessage::response(request_id, &result));
        }
        ClientMessage::Subscribe {
            request_id,
            topic,
            subscriber_id,
        } => {
            let opened = broker.open_session(&topic, &subscriber_id, stream.clone());
            match opened {
                Ok(mut session) => {
                    let broker = broker.clone();
                    let stream = stream.clone();
                    let released = CancellationToken::new();
                    if session.state() == SessionState::Active {
                        conn.released
                            .insert((topic.clone(), subscriber_id.clone()), released.clone());
                    }

                    conn.sessions.spawn(async move {
                        let result = tokio::select! {
                            biased;
                            result = broker.hold_session(&mut session) => result,
                            _ = released.cancelled() => {
                                debug!(subscriber_id = %subscriber_id, topic = %topic, "session released by unsubscribe");
                                Ok(())
                            }
                        };
                        reply(
                            &stream,
                            &ServerMessage::stream_end(request_id, &topic, &subscriber_id, &result),
                        );
                    });
                }
                Err(e) => reply(
                    stream,
                    &ServerMessage::stream_end(request_id, &topic, &subscriber_id, &Err(e)),
                ),
            }
        }
        ClientMessage::Unsubscribe {
            request_id,
            topic,
            subscriber_id,
        } => {
            let result = broker.unsubscribe(&topic, &subscriber_id);
            reply(&conn.stream, &ServerMessage::response(request_id, &result));
            if result.is_ok() {
                conn.release(&topic, &subscriber_id);
            }
        }
    }
}

fn reply(stream: &SubscriberStream, msg: &ServerMessage) {
    if let Err(e) = stream.send_message(msg) {
        debug!(peer = %stream.peer, error = %e, "dropping reply to closed stream");
    }
}
