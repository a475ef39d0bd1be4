//!The streaming channel: one persistent full-duplex websocket connection
//!carrying compressed frames in both directions, one frame per binary
//!message, no envelope.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use styler_core::error::ChannelError;
use styler_core::{
    ChannelEvent, ChannelOpener, ChannelState, FrameBuffer, FrameChannel, ResultSink,
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

///Opens `StreamChannel`s against a fixed endpoint.
pub struct WsChannelOpener {
    endpoint: String,
}

impl WsChannelOpener {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }
}

impl ChannelOpener for WsChannelOpener {
    fn open(
        &self,
        sink: Arc<dyn ResultSink>,
    ) -> (Box<dyn FrameChannel>, mpsc::Receiver<ChannelEvent>) {
        let (channel, events) = StreamChannel::open(self.endpoint.clone(), sink);
        (Box::new(channel), events)
    }
}

///One streaming connection. The capacity-1 outbound queue is the whole
///backpressure policy: a frame the connection cannot take immediately is
///dropped, never queued, so neither memory nor latency grows when the
///service falls behind.
pub struct StreamChannel {
    state_rx: watch::Receiver<ChannelState>,
    out_tx: mpsc::Sender<FrameBuffer>,
    cancel: CancellationToken,
}

impl StreamChannel {
    ///Begin connecting. The returned channel is `Connecting`; `Opened` (or
    ///a connect error) arrives on the event receiver.
    pub fn open(
        endpoint: String,
        sink: Arc<dyn ResultSink>,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (out_tx, out_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tokio::spawn(run_connection(
            endpoint,
            sink,
            state_tx,
            out_rx,
            event_tx,
            cancel.clone(),
        ));

        (Self { state_rx, out_tx, cancel }, event_rx)
    }
}

impl FrameChannel for StreamChannel {
    fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    fn try_send(&self, frame: FrameBuffer) -> bool {
        if self.state() != ChannelState::Open {
            return false;
        }
        self.out_tx.try_send(frame).is_ok()
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

async fn run_connection(
    endpoint: String,
    sink: Arc<dyn ResultSink>,
    state_tx: watch::Sender<ChannelState>,
    mut out_rx: mpsc::Receiver<FrameBuffer>,
    event_tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let ws = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            state_tx.send_replace(ChannelState::Closed);
            let _ = event_tx.send(ChannelEvent::Closed).await;
            return;
        },
        connected = tokio_tungstenite::connect_async(endpoint.as_str()) => match connected {
            Ok((ws, _response)) => ws,
            Err(err) => {
                warn!("could not connect to {}: {}", endpoint, err);
                state_tx.send_replace(ChannelState::Closed);
                let _ = event_tx
                    .send(ChannelEvent::Error(ChannelError::Connect(err.to_string())))
                    .await;
                return;
            }
        },
    };

    info!("stream channel connected to {}", endpoint);
    state_tx.send_replace(ChannelState::Open);
    let _ = event_tx.send(ChannelEvent::Opened).await;

    let (mut ws_tx, mut ws_rx) = ws.split();

    let outcome: Result<(), ChannelError> = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                state_tx.send_replace(ChannelState::Closing);
                if let Err(err) = ws_tx.send(Message::Close(None)).await {
                    debug!("close frame not delivered: {}", err);
                }
                break Ok(());
            },
            frame = out_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = ws_tx.send(Message::Binary(frame.bytes.into())).await {
                        break Err(ChannelError::Io(err.to_string()));
                    }
                },
                //every handle is gone, treat like a close request
                None => {
                    state_tx.send_replace(ChannelState::Closing);
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break Ok(());
                },
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Binary(payload))) => {
                    sink.on_frame(FrameBuffer::new(payload.to_vec()));
                },
                Some(Ok(Message::Close(_))) | None => {
                    break Err(ChannelError::AbruptClose);
                },
                Some(Ok(Message::Text(text))) => {
                    warn!("ignoring unexpected text message: {}", text);
                },
                Some(Ok(_)) => {} //ping/pong, handled by the protocol layer
                Some(Err(err)) => {
                    break Err(ChannelError::Protocol(err.to_string()));
                },
            },
        }
    };

    state_tx.send_replace(ChannelState::Closed);
    match outcome {
        Ok(()) => {
            let _ = event_tx.send(ChannelEvent::Closed).await;
        }
        Err(err) => {
            let _ = event_tx.send(ChannelEvent::Error(err)).await;
        }
    }
    debug!("stream channel task shutting down!");
}
