//! A stand-in master that records what watchers send

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use file_watcher::master::WATCHER_PATH;

/// Frame observed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    /// End of a server-initiated close; `acknowledged` if the client replied
    /// with its own close frame
    ClosedByServer { acknowledged: bool },
}

pub struct RecordingServer {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Frame>,
    connections: Arc<AtomicUsize>,
    kick: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl RecordingServer {
    /// Start on an ephemeral local port
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.expect("Failed to bind server");
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let (kick, _) = broadcast::channel(4);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            frames_tx,
            Arc::clone(&connections),
            kick.clone(),
        ));

        Self {
            addr,
            frames,
            connections,
            kick,
            accept_task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, WATCHER_PATH)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close every live connection from the server side
    pub fn kick_all(&self) {
        let _ = self.kick.send(());
    }

    pub async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(10), self.frames.recv())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Server stopped")
    }

    /// Next text frame, skipping keepalives
    pub async fn next_text(&mut self) -> String {
        loop {
            if let Frame::Text(text) = self.next_frame().await {
                return text;
            }
        }
    }

    /// Stop accepting and close every connection, releasing the port
    pub async fn stop(self) {
        self.kick_all();
        self.accept_task.abort();
        let _ = self.accept_task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    frames: mpsc::UnboundedSender<Frame>,
    connections: Arc<AtomicUsize>,
    kick: broadcast::Sender<()>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(record_connection(stream, frames.clone(), kick.subscribe()));
    }
}

async fn record_connection(
    stream: TcpStream,
    frames: mpsc::UnboundedSender<Frame>,
    mut kick: broadcast::Receiver<()>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = ws.close(None).await;
                let mut acknowledged = false;
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_close() {
                        acknowledged = true;
                    }
                }
                let _ = frames.send(Frame::ClosedByServer { acknowledged });
                return;
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames.send(Frame::Text(text));
                }
                Some(Ok(Message::Ping(_))) => {
                    let _ = frames.send(Frame::Ping);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}
