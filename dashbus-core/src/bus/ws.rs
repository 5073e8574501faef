//! WebSocket transport.
//!
//! Each connection splits the socket into a writer task, which encodes
//! outbound [`ClientMessage`]s, and a reader task, which decodes frames into
//! [`ServerMessage`]s. When the reader stops, the inbound channel closes and
//! the session treats the connection as dropped.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{self, ClientMessage, Frame, ServerMessage, SUBPROTOCOL};
use super::transport::{Connection, Connector, MessageSink};
use crate::config::{Endpoint, SessionConfig};
use crate::error::{Error, Result};

/// Connects to NetworkTables 4 endpoints over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    client_name: String,
}

impl WebSocketConnector {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.client_name.clone())
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connection>> {
        let url = endpoint.url(&self.client_name);
        let target = endpoint.to_string();
        Box::pin(async move {
            let connect_error = |reason: String| Error::Connect {
                endpoint: target.clone(),
                reason,
            };

            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| connect_error(e.to_string()))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

            let (stream, _response) = connect_async(request)
                .await
                .map_err(|e| connect_error(e.to_string()))?;
            tracing::debug!(%url, "websocket open");

            let (mut write, mut read) = stream.split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
            let started = Instant::now();

            let writer = tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    let timestamp = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
                    let frame = match protocol::encode(&message, timestamp) {
                        Ok(Frame::Text(text)) => Message::Text(text),
                        Ok(Frame::Binary(bytes)) => Message::Binary(bytes),
                        Err(err) => {
                            tracing::warn!(%err, "dropping unencodable message");
                            continue;
                        }
                    };
                    if let Err(err) = write.send(frame).await {
                        tracing::debug!(%err, "websocket write failed");
                        break;
                    }
                }
                let _ = write.close().await;
            });

            let reader = tokio::spawn(async move {
                while let Some(frame) = read.next().await {
                    let messages = match frame {
                        Ok(Message::Text(text)) => protocol::decode_text(&text),
                        Ok(Message::Binary(bytes)) => protocol::decode_binary(&bytes),
                        Ok(Message::Close(reason)) => {
                            tracing::debug!(?reason, "endpoint closed the websocket");
                            break;
                        }
                        Ok(_) => continue,
                        Err(err) => {
                            tracing::debug!(%err, "websocket read failed");
                            break;
                        }
                    };
                    for message in messages {
                        if inbound_tx.send(message).is_err() {
                            return;
                        }
                    }
                }
            });

            let sink = WebSocketSink {
                outbound: outbound_tx,
                writer,
                reader,
            };
            Ok(Connection::new(Arc::new(sink), inbound_rx))
        })
    }
}

struct WebSocketSink {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl MessageSink for WebSocketSink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound.send(message).map_err(|_| Error::Closed)
    }

    fn close(&self) {
        self.writer.abort();
        self.reader.abort();
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.close();
    }
}
