//! Watchers, master and query API running together on local ports

mod common;

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::folder_contents;
use file_watcher::master::{serve_queries, serve_watchers, WATCHER_PATH};
use file_watcher::{
    ChannelConfig, FilesResponse, MonitorConfig, SessionRegistry, WatcherAgent,
};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Master {
    watcher_addr: SocketAddr,
    public_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
}

impl Master {
    async fn start() -> Self {
        let watchers = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let public = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let watcher_addr = watchers.local_addr().unwrap();
        let public_addr = public.local_addr().unwrap();
        let registry = Arc::new(SessionRegistry::new());

        tokio::spawn(serve_watchers(watchers, Arc::clone(&registry)));
        tokio::spawn(serve_queries(public, Arc::clone(&registry)));

        Self {
            watcher_addr,
            public_addr,
            registry,
        }
    }

    fn watcher_url(&self) -> String {
        format!("ws://{}{}", self.watcher_addr, WATCHER_PATH)
    }

    async fn files(&self) -> Vec<String> {
        let response: FilesResponse = reqwest::get(format!("http://{}/files", self.public_addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        response.files.into_iter().map(|f| f.filename).collect()
    }

    async fn files_become(&self, expected: &[&str]) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let files = self.files().await;
            if files == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "files never became {:?}, last saw {:?}",
                expected,
                files
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn connect_client(&self) -> Client {
        let (ws, _) = connect_async(self.watcher_url()).await.unwrap();
        ws
    }
}

async fn report(client: &mut Client, name: &str, files: &[&str]) {
    let json = folder_contents(name, files).to_json().unwrap();
    client.send(Message::Text(json)).await.unwrap();
}

#[tokio::test]
async fn test_empty_master_serves_empty_list() {
    let master = Master::start().await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/files", master.public_addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({ "files": [] }));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let master = Master::start().await;

    let response = reqwest::get(format!("http://{}/folders", master.public_addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_single_watcher_listing_is_served() {
    let master = Master::start().await;
    let mut client = master.connect_client().await;

    report(&mut client, "/data", &["y.txt", "x.txt"]).await;
    master.files_become(&["x.txt", "y.txt"]).await;
}

#[tokio::test]
async fn test_sessions_are_merged_and_removed_on_disconnect() {
    let master = Master::start().await;
    let mut first = master.connect_client().await;
    let mut second = master.connect_client().await;

    report(&mut first, "/one", &["b"]).await;
    report(&mut second, "/two", &["a", "b"]).await;
    master.files_become(&["a", "b"]).await;

    // A new report for the same folder replaces the previous one
    report(&mut second, "/two", &["c"]).await;
    master.files_become(&["b", "c"]).await;

    first.close(None).await.unwrap();
    master.files_become(&["c"]).await;

    drop(second);
    master.files_become(&[]).await;
    assert_eq!(master.registry.session_count(), 0);
}

#[tokio::test]
async fn test_agent_reports_existing_and_new_files() {
    let master = Master::start().await;
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("seed.txt"), "seed").unwrap();

    let mut channel_config = ChannelConfig::new(master.watcher_url());
    channel_config.keepalive_interval = Duration::from_millis(200);
    let monitor_config = MonitorConfig {
        debounce_duration: Duration::from_millis(50),
    };

    let agent = WatcherAgent::new(&[dir.path().to_path_buf()], monitor_config, channel_config)
        .unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let agent_task = tokio::spawn(agent.run(async {
        let _ = stop_rx.await;
    }));

    // Full state is sent on connect
    master.files_become(&["seed.txt"]).await;

    fs::write(dir.path().join("new.txt"), "new").unwrap();
    master.files_become(&["new.txt", "seed.txt"]).await;

    fs::remove_file(dir.path().join("seed.txt")).unwrap();
    master.files_become(&["new.txt"]).await;

    stop_tx.send(()).unwrap();
    agent_task.await.unwrap().unwrap();
    master.files_become(&[]).await;
}

#[tokio::test]
async fn test_agent_reports_every_folder() {
    let master = Master::start().await;
    let inbox = TempDir::new().unwrap();
    let outbox = TempDir::new().unwrap();
    fs::write(inbox.path().join("a.txt"), "a").unwrap();
    fs::write(outbox.path().join("b.txt"), "b").unwrap();

    let monitor_config = MonitorConfig {
        debounce_duration: Duration::from_millis(50),
    };
    let agent = WatcherAgent::new(
        &[inbox.path().to_path_buf(), outbox.path().to_path_buf()],
        monitor_config,
        ChannelConfig::new(master.watcher_url()),
    )
    .unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let agent_task = tokio::spawn(agent.run(async {
        let _ = stop_rx.await;
    }));

    master.files_become(&["a.txt", "b.txt"]).await;
    assert_eq!(master.registry.session_count(), 1);

    // A change in one folder leaves the other folder's files in place
    fs::write(inbox.path().join("c.txt"), "c").unwrap();
    master.files_become(&["a.txt", "b.txt", "c.txt"]).await;

    stop_tx.send(()).unwrap();
    agent_task.await.unwrap().unwrap();
    master.files_become(&[]).await;
}
