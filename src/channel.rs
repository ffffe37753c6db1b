//! Self-healing WebSocket channel from a watcher to the master
//!
//! One control loop per channel owns the physical connection:
//!
//! ```text
//!                 ┌──────────── connect() / internal reconnect ───────────┐
//!                 v                                                       │
//! Disconnected ──> Connecting ──ok──> Connected ──close / error──> Disconnected
//!      ^               │                  │
//!      └─────fail──────┘                  └─ tick: ping, outbound: text frame
//! ```
//!
//! Delivery is at-most-once. Messages submitted while not connected are
//! dropped, and nothing queued before a disconnect is replayed after the
//! reconnect. Owners that need the peer to be current re-send full state from
//! the connect handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{FileWatcherError, Result};
use crate::protocol::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Callback run by the control loop on connect or disconnect
type Handler = Box<dyn Fn() + Send + Sync>;

/// Configuration for a resilient channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL of the master's watcher endpoint
    pub url: String,
    /// Keepalive / reconnect period (default: 2s)
    pub keepalive_interval: Duration,
    /// Deadline for a single frame write (default: 1s)
    pub write_timeout: Duration,
    /// Deadline for establishing a connection (default: 5s)
    pub connect_timeout: Duration,
    /// Outbound queue capacity (default: 10)
    pub queue_capacity: usize,
    /// Inbound queue capacity (default: 16)
    pub inbound_capacity: usize,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keepalive_interval: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            queue_capacity: 10,
            inbound_capacity: 16,
        }
    }

    /// `ws://{addr}{path}`
    pub fn for_address(addr: &str, path: &str) -> Self {
        Self::new(format!("ws://{}{}", addr, path))
    }
}

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
        }
    }
}

/// Counters for a channel's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub connects: u64,
    pub disconnects: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    disconnects: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
enum Control {
    Connect,
    Close,
}

/// Builder for a [`ResilientChannel`]
pub struct ChannelBuilder {
    config: ChannelConfig,
    on_connect: Option<Handler>,
    on_disconnect: Option<Handler>,
}

impl ChannelBuilder {
    /// Run `handler` on the control loop after every successful connect
    pub fn on_connect<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(handler));
        self
    }

    /// Run `handler` on the control loop whenever a live connection is lost
    pub fn on_disconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(handler));
        self
    }

    /// Spawn the control loop. Nothing connects until [`ResilientChannel::connect`].
    ///
    /// Returns the channel and the stream of decoded inbound messages.
    pub fn spawn(self) -> (ResilientChannel, mpsc::Receiver<Envelope>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let counters = Arc::new(Counters::default());

        let url = self.config.url.clone();
        let link = Link {
            config: self.config,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
            state: state_tx,
            counters: Arc::clone(&counters),
            inbound: inbound_tx,
            sink: None,
            reader: None,
            ticker: None,
            reconnect_requested: false,
        };
        let task = tokio::spawn(link.run(control_rx, outbound_rx));

        let channel = ResilientChannel {
            url,
            control: control_tx,
            outbound: outbound_tx,
            state: state_rx,
            counters,
            task: Mutex::new(Some(task)),
        };

        (channel, inbound_rx)
    }
}

/// Handle to a channel's control loop
///
/// Dropping the handle stops the loop.
pub struct ResilientChannel {
    url: String,
    control: mpsc::UnboundedSender<Control>,
    outbound: mpsc::Sender<Envelope>,
    state: watch::Receiver<ChannelState>,
    counters: Arc<Counters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResilientChannel {
    pub fn builder(config: ChannelConfig) -> ChannelBuilder {
        ChannelBuilder {
            config,
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Start connecting (and keep reconnecting) unless already connected
    pub fn connect(&self) {
        let _ = self.control.send(Control::Connect);
    }

    /// Queue a message, waiting while the queue is full.
    ///
    /// Success only means the message was queued: it is still dropped if the
    /// channel is not connected when the loop picks it up.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| FileWatcherError::ChannelClosed)
    }

    /// Queue a message without waiting; a full queue drops it.
    pub fn try_send(&self, envelope: Envelope) -> bool {
        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                Counters::bump(&self.counters.dropped);
                tracing::debug!("Outbound queue full, dropping {} message", envelope.kind());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn stats(&self) -> ChannelStats {
        self.counters.snapshot()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the connection and stop the loop. Idempotent.
    pub async fn close(&self) {
        let _ = self.control.send(Control::Close);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Channel task failed ({})", e);
            }
        }
    }
}

impl std::fmt::Debug for ResilientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientChannel")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

/// State owned by the control loop
struct Link {
    config: ChannelConfig,
    on_connect: Option<Handler>,
    on_disconnect: Option<Handler>,
    state: watch::Sender<ChannelState>,
    counters: Arc<Counters>,
    inbound: mpsc::Sender<Envelope>,
    sink: Option<WsSink>,
    reader: Option<WsReader>,
    ticker: Option<Interval>,
    reconnect_requested: bool,
}

impl Link {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut outbound: mpsc::Receiver<Envelope>,
    ) {
        loop {
            if std::mem::take(&mut self.reconnect_requested) {
                self.connect().await;
            }

            tokio::select! {
                command = control.recv() => match command {
                    Some(Control::Connect) => {
                        self.arm_ticker();
                        self.connect().await;
                    }
                    Some(Control::Close) | None => break,
                },
                _ = next_tick(&mut self.ticker) => self.on_tick().await,
                envelope = outbound.recv() => match envelope {
                    Some(envelope) => self.deliver(envelope).await,
                    None => break,
                },
                frame = next_frame(&mut self.reader) => self.on_frame(frame).await,
            }
        }

        self.shutdown().await;
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    fn arm_ticker(&mut self) {
        if self.ticker.is_none() {
            let period = self.config.keepalive_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
    }

    async fn connect(&mut self) {
        if self.sink.is_some() {
            tracing::debug!("Already connected to {}", self.config.url);
            return;
        }

        self.set_state(ChannelState::Connecting);
        tracing::info!("Attempting to connect to {}", self.config.url);

        match timeout(self.config.connect_timeout, connect_async(self.config.url.as_str())).await
        {
            Ok(Ok((stream, _response))) => {
                let (sink, reader) = stream.split();
                self.sink = Some(sink);
                self.reader = Some(reader);
                self.set_state(ChannelState::Connected);
                Counters::bump(&self.counters.connects);
                tracing::info!("Connected to {}", self.config.url);

                if let Some(handler) = &self.on_connect {
                    handler();
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Unable to connect to {} ({})", self.config.url, e);
                self.set_state(ChannelState::Disconnected);
            }
            Err(_) => {
                tracing::warn!("Timed out connecting to {}", self.config.url);
                self.set_state(ChannelState::Disconnected);
            }
        }
    }

    async fn on_tick(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            self.connect().await;
            return;
        };

        match timeout(self.config.write_timeout, sink.send(Message::Ping(Vec::new()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Keepalive failed ({})", e);
                self.drop_connection();
            }
            Err(_) => {
                tracing::warn!("Keepalive timed out");
                self.drop_connection();
            }
        }
    }

    async fn deliver(&mut self, envelope: Envelope) {
        let Some(sink) = self.sink.as_mut() else {
            // At-most-once: never held for a later connection
            Counters::bump(&self.counters.dropped);
            tracing::debug!("Not connected, dropping {} message", envelope.kind());
            return;
        };

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                Counters::bump(&self.counters.dropped);
                tracing::warn!("Unable to encode {} message ({})", envelope.kind(), e);
                return;
            }
        };

        match timeout(self.config.write_timeout, sink.send(Message::Text(json))).await {
            Ok(Ok(())) => Counters::bump(&self.counters.sent),
            Ok(Err(e)) => {
                Counters::bump(&self.counters.dropped);
                tracing::warn!("Error sending message ({})", e);
                self.drop_connection();
            }
            Err(_) => {
                Counters::bump(&self.counters.dropped);
                tracing::warn!("Timed out sending message");
                self.drop_connection();
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.forward(&text),
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!("Ignoring binary frame ({} bytes)", data.len());
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!("Disconnected: {:?}", frame);
                self.finish_close_handshake().await;
                self.drop_connection();
            }
            // Ping replies are handled by the protocol layer
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!("Connection error ({})", e);
                self.drop_connection();
            }
            None => {
                tracing::info!("Connection closed by {}", self.config.url);
                self.drop_connection();
            }
        }
    }

    fn forward(&self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Unable to decode inbound message ({})", e);
                return;
            }
        };

        match self.inbound.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!("Inbound queue full, dropping {} message", envelope.kind());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Flush the queued reply to a peer-initiated close
    async fn finish_close_handshake(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        match timeout(self.config.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Could not complete close handshake ({})", e),
            Err(_) => tracing::debug!("Timed out completing close handshake"),
        }
    }

    /// Tear down a lost connection and ask for a reconnect
    fn drop_connection(&mut self) {
        let was_connected = self.sink.take().is_some();
        self.reader = None;
        if !was_connected {
            return;
        }

        self.set_state(ChannelState::Disconnected);
        Counters::bump(&self.counters.disconnects);
        if let Some(handler) = &self.on_disconnect {
            handler();
        }
        self.reconnect_requested = true;
    }

    async fn shutdown(&mut self) {
        self.ticker = None;
        self.reader = None;

        if let Some(mut sink) = self.sink.take() {
            match timeout(self.config.write_timeout, sink.close()).await {
                Ok(Ok(())) => tracing::info!("Connection closed"),
                Ok(Err(e)) => tracing::warn!("Could not close existing connection ({})", e),
                Err(_) => tracing::warn!("Timed out closing connection"),
            }
        }

        self.set_state(ChannelState::Disconnected);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn next_frame(reader: &mut Option<WsReader>) -> Option<std::result::Result<Message, WsError>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}
