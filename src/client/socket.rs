//! Streaming-channel lifecycle.
//!
//! Owns the WebSocket connection and the single background read task that
//! feeds inbound text frames through the codec and dispatches decoded
//! application messages to the router. The channel object is exclusively
//! owned by the client; nothing else writes to the socket directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::codec::{self, Frame, FrameSink};
use super::dispatch::MessageRouter;
use crate::error::{LinkError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Write half shared between the public send path and the codec's keep-alive
/// replies.
struct ChannelSink {
    writer: Arc<Mutex<WsSink>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, frame: &str) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|err| LinkError::Transport(format!("streaming channel send failed: {err}")))
    }
}

pub(crate) struct SocketChannel {
    writer: Arc<Mutex<WsSink>>,
    open: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl SocketChannel {
    /// Open the channel and spawn the read task. Resolves once the
    /// transport-level handshake completes; a failure during the attempt is
    /// returned to the caller and no channel is produced.
    pub(crate) async fn connect(
        url: &str,
        router: MessageRouter,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self> {
        let (stream, _response) = connect_async(url).await.map_err(|err| {
            LinkError::Transport(format!("streaming channel connect failed: {err}"))
        })?;
        debug!(url, "streaming channel open");

        let (sink, read) = stream.split();
        let writer = Arc::new(Mutex::new(sink));
        let open = Arc::new(AtomicBool::new(true));
        let reader_task = tokio::spawn(read_loop(
            read,
            writer.clone(),
            router,
            open.clone(),
            on_close,
        ));

        Ok(Self {
            writer,
            open,
            reader_task,
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) async fn send(&self, frame: &str) -> Result<()> {
        if !self.is_open() {
            return Err(LinkError::Transport(
                "streaming channel is closed".to_string(),
            ));
        }
        ChannelSink {
            writer: self.writer.clone(),
        }
        .send_frame(frame)
        .await
    }

    /// Close the channel. Safe to call on an already-closed channel.
    pub(crate) async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.writer.lock().await.send(Message::Close(None)).await;
        self.reader_task.abort();
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Single-threaded read loop: frames are decoded and dispatched in arrival
/// order. Decode failures are terminal at the codec and never tear down the
/// loop; transport errors and server closes do.
async fn read_loop(
    mut read: SplitStream<WsStream>,
    writer: Arc<Mutex<WsSink>>,
    router: MessageRouter,
    open: Arc<AtomicBool>,
    on_close: impl Fn() + Send + Sync + 'static,
) {
    let mut sink = ChannelSink { writer };

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Frame::Message(message) = codec::decode_frame(text.as_str(), &mut sink).await
                {
                    router.dispatch(&message);
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = sink
                    .writer
                    .lock()
                    .await
                    .send(Message::Pong(payload))
                    .await;
            }
            Ok(Message::Close(_)) => {
                debug!("streaming channel closed by server");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "streaming channel transport error");
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    on_close();
}
