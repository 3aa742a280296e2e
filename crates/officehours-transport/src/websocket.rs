//! WebSocket channel for native clients.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use officehours_core::{
    Channel, ChannelError, ChannelEvent, Connector, ReadyState,
    channel::{CLOSE_ABNORMAL, CLOSE_NORMAL},
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use uuid::Uuid;

/// Close code reported when the peer's close frame carries no code.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens [`WsChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Channel = WsChannel;

    fn open(&self, url: &str) -> WsChannel {
        WsChannel::connect(url)
    }
}

enum Command {
    Send(String),
    Close { code: u16, reason: String },
}

/// WebSocket connection driven by a background task.
///
/// The task reports `Open`, forwards text frames (and binary frames that
/// are valid UTF-8) as messages, and always ends with a `Close` event. A
/// connection that fails, or ends without a close frame, is reported as an
/// `Error` followed by `Close` with code 1006.
pub struct WsChannel {
    state: watch::Receiver<ReadyState>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WsChannel {
    /// Start connecting to `url`.
    ///
    /// # Panics
    /// Panics when called outside of a Tokio runtime.
    #[must_use]
    pub fn connect(url: &str) -> Self {
        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let socket = Socket {
            id,
            state: state_tx,
            events: event_tx,
        };
        tokio::spawn(socket.run(url.to_string(), command_rx));

        Self {
            state: state_rx,
            events: event_rx,
            commands: command_tx,
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    fn send(&self, text: String) -> Result<(), ChannelError> {
        if self.ready_state() != ReadyState::Open {
            return Err(ChannelError::NotOpen);
        }
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self, code: u16, reason: &str) {
        let _ = self.commands.send(Command::Close {
            code,
            reason: reason.to_string(),
        });
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

/// Task side of a [`WsChannel`].
struct Socket {
    id: Uuid,
    state: watch::Sender<ReadyState>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Socket {
    fn emit(&self, event: ChannelEvent) {
        // Nobody listens once the channel was dropped.
        let _ = self.events.send(event);
    }

    fn finish(&self, code: u16, reason: String) {
        self.state.send_replace(ReadyState::Closed);
        tracing::debug!(channel_id = %self.id, code, "websocket closed");
        self.emit(ChannelEvent::Close { code, reason });
    }

    fn fail(&self, detail: String) {
        tracing::warn!(channel_id = %self.id, error = %detail, "websocket error");
        self.emit(ChannelEvent::Error(detail));
        self.finish(CLOSE_ABNORMAL, String::new());
    }

    async fn run(self, url: String, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(channel_id = %self.id, %url, "connecting websocket");

        let connect = connect_async(url.as_str());
        tokio::pin!(connect);
        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                command = commands.recv() => match command {
                    // Sends are rejected until the channel is open.
                    Some(Command::Send(_)) => {}
                    Some(Command::Close { code, reason }) => {
                        self.finish(code, reason);
                        return;
                    }
                    None => {
                        self.state.send_replace(ReadyState::Closed);
                        return;
                    }
                },
            }
        };

        let stream = match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        self.state.send_replace(ReadyState::Open);
        self.emit(ChannelEvent::Open);

        let (mut sender, mut receiver) = stream.split();
        let mut peer_close: Option<(u16, String)> = None;
        let mut commands_open = true;

        loop {
            tokio::select! {
                message = receiver.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(ChannelEvent::Message(text.as_str().to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => self.emit(ChannelEvent::Message(text)),
                        Err(_) => {
                            tracing::warn!(channel_id = %self.id, "ignoring non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        self.state.send_replace(ReadyState::Closing);
                        peer_close = Some(frame.map_or_else(
                            || (CLOSE_NO_STATUS, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_string()),
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        match peer_close.take() {
                            Some((code, reason)) => self.finish(code, reason),
                            None => self.fail(e.to_string()),
                        }
                        return;
                    }
                    None => {
                        match peer_close.take() {
                            Some((code, reason)) => self.finish(code, reason),
                            None => self.fail("connection ended without a close frame".to_string()),
                        }
                        return;
                    }
                },
                command = commands.recv(), if commands_open => {
                    let outgoing = match command {
                        Some(Command::Send(text)) => Message::Text(text.into()),
                        Some(Command::Close { code, reason }) => {
                            self.state.send_replace(ReadyState::Closing);
                            Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            }))
                        }
                        None => {
                            // Channel dropped: finish the closing handshake unattended.
                            commands_open = false;
                            if *self.state.borrow() != ReadyState::Open {
                                continue;
                            }
                            self.state.send_replace(ReadyState::Closing);
                            Message::Close(Some(CloseFrame {
                                code: CloseCode::from(CLOSE_NORMAL),
                                reason: String::new().into(),
                            }))
                        }
                    };
                    if let Err(e) = sender.send(outgoing).await {
                        tracing::debug!(channel_id = %self.id, error = %e, "websocket send failed");
                    }
                }
            }
        }
    }
}
