/*
[INPUT]:  WebSocket URL and outbound text frames
[OUTPUT]: Inbound frames and lifecycle events via a channel
[POS]:    WebSocket layer - single connection I/O task
[UPDATE]: When changing connection logic or lifecycle semantics
*/

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::{ClearnodeError, Result};

const CHANNEL_CAPACITY: usize = 100;

/// Lifecycle and data events of one connection.
///
/// `Closed` is always the last event and is emitted exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed,
}

/// Handle to one WebSocket connection.
///
/// Clones share the connection. Payloads are never interpreted here.
#[derive(Debug, Clone)]
pub struct WsTransport {
    outbound_tx: Arc<SenderSlot>,
}

impl WsTransport {
    /// Open a connection and start its I/O task
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (ws_stream, _response) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let outbound_state = Arc::new(Mutex::new(Some(outbound_tx)));
        let outbound_state_for_task = outbound_state.clone();

        info!(url, "ws connected");
        let _ = event_tx.send(TransportEvent::Opened).await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(message) => {
                                if let Err(err) = write.send(message).await {
                                    let event = TransportEvent::Error(err.to_string());
                                    let _ = event_tx.send(event).await;
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Close(frame))) => {
                                debug!(?frame, "ws close frame received");
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(message)) => {
                                let Some(text) = frame_text(message) else {
                                    continue;
                                };
                                if event_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                warn!(error = %err, "ws read failed");
                                let _ = event_tx.send(TransportEvent::Error(err.to_string())).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            lock_sender(&outbound_state_for_task).take();
            info!("ws closed");
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok((
            Self {
                outbound_tx: outbound_state,
            },
            event_rx,
        ))
    }

    /// Queue a text frame; fails once the connection has closed
    pub async fn send(&self, text: String) -> Result<()> {
        let sender = lock_sender(&self.outbound_tx)
            .clone()
            .ok_or(ClearnodeError::NotConnected)?;

        sender
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|_| ClearnodeError::NotConnected)
    }

    /// Whether the connection can still carry frames
    pub fn is_open(&self) -> bool {
        lock_sender(&self.outbound_tx).is_some()
    }

    /// Close the connection. Safe to call from `Drop`; later calls are no-ops.
    pub fn close(&self) {
        let sender = lock_sender(&self.outbound_tx).take();
        if sender.is_some() {
            debug!("ws close requested");
        }
        // Dropping the last sender makes the I/O task send a close frame and exit.
        drop(sender);
    }
}

type SenderSlot = Mutex<Option<mpsc::Sender<WsMessage>>>;

fn lock_sender(slot: &SenderSlot) -> MutexGuard<'_, Option<mpsc::Sender<WsMessage>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn frame_text(message: WsMessage) -> Option<String> {
    match message {
        WsMessage::Text(text) => Some(text.to_string()),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}
