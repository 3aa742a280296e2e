//! In-memory channel used by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use officehours_core::{Channel, ChannelError, ChannelEvent, Connector, ReadyState};
use tokio::sync::mpsc;

/// Server side of one [`FakeChannel`].
#[derive(Clone)]
pub struct FakeRemote {
    pub url: String,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<Mutex<ReadyState>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FakeRemote {
    fn emit(&self, event: ChannelEvent) {
        // The client may already have dropped the channel.
        let _ = self.events.send(event);
    }

    pub fn accept(&self) {
        *self.state.lock().unwrap() = ReadyState::Open;
        self.emit(ChannelEvent::Open);
    }

    pub fn push(&self, text: &str) {
        self.emit(ChannelEvent::Message(text.to_string()));
    }

    pub fn fail(&self, detail: &str) {
        self.emit(ChannelEvent::Error(detail.to_string()));
    }

    pub fn close(&self, code: u16) {
        *self.state.lock().unwrap() = ReadyState::Closed;
        self.emit(ChannelEvent::close(code));
    }

    /// Code the client closed this channel with, if it did.
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }

    /// Whether the client dropped its end of the channel.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

pub struct FakeChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    state: Arc<Mutex<ReadyState>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Channel for FakeChannel {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    fn send(&self, text: String) -> Result<(), ChannelError> {
        if self.ready_state() != ReadyState::Open {
            return Err(ChannelError::NotOpen);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&mut self, code: u16, _reason: &str) {
        *self.closed_with.lock().unwrap() = Some(code);
        *self.state.lock().unwrap() = ReadyState::Closing;
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

/// Connector that records every channel it opens.
#[derive(Clone, Default)]
pub struct FakeConnector {
    remotes: Arc<Mutex<Vec<FakeRemote>>>,
    refuse: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose channels all fail right away, like an unreachable server.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Number of channels opened so far.
    pub fn opened(&self) -> usize {
        self.remotes.lock().unwrap().len()
    }

    pub fn remote(&self, index: usize) -> FakeRemote {
        self.remotes.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> FakeRemote {
        let remotes = self.remotes.lock().unwrap();
        remotes[remotes.len() - 1].clone()
    }
}

impl Connector for FakeConnector {
    type Channel = FakeChannel;

    fn open(&self, url: &str) -> FakeChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ReadyState::Connecting));
        let closed_with = Arc::new(Mutex::new(None));
        let sent = Arc::new(Mutex::new(Vec::new()));

        let remote = FakeRemote {
            url: url.to_string(),
            events: tx,
            state: Arc::clone(&state),
            closed_with: Arc::clone(&closed_with),
            sent: Arc::clone(&sent),
        };
        if self.refuse {
            remote.fail("connection refused");
            remote.close(1006);
        }
        self.remotes.lock().unwrap().push(remote);

        FakeChannel {
            events: rx,
            state,
            closed_with,
            sent,
        }
    }
}
