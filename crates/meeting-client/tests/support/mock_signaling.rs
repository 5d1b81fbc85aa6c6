//! Channel-backed signaling service double.
//!
//! Every accepted dial hands the test a [`ServerEnd`]: the service side of
//! the connection, with the client's commands on one half and the test's
//! scripted events on the other. Dropping the server end looks like an
//! unexpected disconnect to the client.

use async_trait::async_trait;
use common::types::{ConnectionId, RoomId};
use meeting_client::signaling::protocol::{ClientCommand, ServerEvent};
use meeting_client::signaling::transport::{
    CommandSink, Connector, EventSource, TransportError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::EXPECT_TIMEOUT;

/// Service side of one accepted connection.
pub struct ServerEnd {
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl ServerEnd {
    /// Next command from the client, failing the test after a bounded wait.
    pub async fn recv_command(&mut self) -> ClientCommand {
        tokio::time::timeout(EXPECT_TIMEOUT, self.commands.recv())
            .await
            .expect("timed out waiting for a client command")
            .expect("client command channel closed")
    }

    /// Assert that no command arrives within `window`.
    pub async fn expect_no_command(&mut self, window: Duration) {
        if let Ok(Some(command)) = tokio::time::timeout(window, self.commands.recv()).await {
            panic!("unexpected client command: {command:?}");
        }
    }

    /// Expect a `JoinRoom` command and return its room id.
    pub async fn expect_join_room(&mut self) -> RoomId {
        match self.recv_command().await {
            ClientCommand::JoinRoom { room_id, .. } => room_id,
            other => panic!("expected JoinRoom, got {other:?}"),
        }
    }

    /// Expect a `SendOffer` command and return its destination.
    pub async fn expect_send_offer(&mut self) -> ConnectionId {
        match self.recv_command().await {
            ClientCommand::SendOffer {
                to_connection_id, ..
            } => to_connection_id,
            other => panic!("expected SendOffer, got {other:?}"),
        }
    }

    /// Deliver an event to the client.
    pub fn send(&self, event: ServerEvent) {
        self.events
            .as_ref()
            .expect("connection already dropped")
            .send(event)
            .expect("client event channel closed");
    }

    /// Simulate an unexpected disconnect.
    pub fn drop_connection(&mut self) {
        self.events = None;
    }
}

/// Scriptable [`Connector`]: each dial yields a fresh channel pair.
pub struct ChannelConnector {
    server_ends: mpsc::UnboundedSender<ServerEnd>,
    fail_next: Mutex<u32>,
}

/// Test-side stream of accepted connections.
pub struct Acceptor {
    incoming: mpsc::UnboundedReceiver<ServerEnd>,
}

impl Acceptor {
    /// Wait for the client's next dial.
    pub async fn accept(&mut self) -> ServerEnd {
        tokio::time::timeout(EXPECT_TIMEOUT, self.incoming.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Assert that no dial happens within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(window, self.incoming.recv()).await {
            panic!("unexpected connection attempt");
        }
    }
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, Acceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                server_ends: tx,
                fail_next: Mutex::new(0),
            }),
            Acceptor { incoming: rx },
        )
    }

    /// Refuse the next `count` dials.
    pub fn fail_next_dials(&self, count: u32) {
        *self.fail_next.lock().expect("connector mock poisoned") = count;
    }
}

struct ChanSink {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

#[async_trait]
impl CommandSink for ChanSink {
    async fn send(&mut self, command: ClientCommand) -> Result<(), TransportError> {
        self.tx
            .send(command)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {}
}

struct ChanSource {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
impl EventSource for ChanSource {
    async fn next_event(&mut self) -> Option<Result<ServerEvent, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn CommandSink>, Box<dyn EventSource>), TransportError> {
        {
            let mut fail = self.fail_next.lock().expect("connector mock poisoned");
            if *fail > 0 {
                *fail -= 1;
                return Err(TransportError::Connect("dial refused".to_string()));
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        self.server_ends
            .send(ServerEnd {
                commands: cmd_rx,
                events: Some(evt_tx),
            })
            .map_err(|_| TransportError::Connect("acceptor gone".to_string()))?;

        Ok((
            Box::new(ChanSink { tx: cmd_tx }),
            Box::new(ChanSource { rx: evt_rx }),
        ))
    }
}
