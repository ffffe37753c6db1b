//! Watcher-side orchestration of the folder monitor and the master channel
//!
//! The monitor only runs while the channel is connected. Every (re)connect
//! resends a fresh snapshot of every folder, so the master never keeps state
//! from before a connection drop.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::channel::{ChannelConfig, ResilientChannel};
use crate::error::Result;
use crate::fswatch::{FolderMonitor, MonitorConfig, SettledEvent};
use crate::protocol::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentSignal {
    Connected,
}

/// Watches folders and reports them over a resilient channel
pub struct WatcherAgent {
    monitor: Arc<FolderMonitor>,
    channel: ResilientChannel,
    settled: mpsc::UnboundedReceiver<SettledEvent>,
    inbound: mpsc::Receiver<Envelope>,
    signals: mpsc::UnboundedReceiver<AgentSignal>,
}

impl WatcherAgent {
    /// Register every folder and prepare the channel. Nothing connects yet.
    pub fn new(
        folders: &[PathBuf],
        monitor_config: MonitorConfig,
        channel_config: ChannelConfig,
    ) -> Result<Self> {
        let (monitor, settled) = FolderMonitor::new(monitor_config)?;
        let monitor = Arc::new(monitor);
        for folder in folders {
            monitor.add_folder(folder)?;
        }

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let on_connect_monitor = Arc::clone(&monitor);
        let on_disconnect_monitor = Arc::clone(&monitor);

        let (channel, inbound) = ResilientChannel::builder(channel_config)
            .on_connect(move || {
                on_connect_monitor.start();
                let _ = signal_tx.send(AgentSignal::Connected);
            })
            .on_disconnect(move || on_disconnect_monitor.stop())
            .spawn();

        Ok(Self {
            monitor,
            channel,
            settled,
            inbound,
            signals,
        })
    }

    pub fn channel(&self) -> &ResilientChannel {
        &self.channel
    }

    pub fn monitor(&self) -> &FolderMonitor {
        &self.monitor
    }

    /// Run until `shutdown` completes, then close the channel and the monitor.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.channel.connect();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                Some(event) = self.settled.recv() => {
                    tracing::debug!(
                        "'{}' settled with {} files",
                        event.snapshot.name,
                        event.snapshot.files.len()
                    );
                    if let Err(e) = self.channel.send(Envelope::from(event.snapshot)).await {
                        break Err(e);
                    }
                }
                Some(signal) = self.signals.recv() => match signal {
                    AgentSignal::Connected => {
                        if let Err(e) = self.send_all_folders().await {
                            break Err(e);
                        }
                    }
                },
                Some(envelope) = self.inbound.recv() => {
                    tracing::info!("Received {} message from master", envelope.kind());
                }
            }
        };

        self.channel.close().await;
        self.monitor.close();
        result
    }

    async fn send_all_folders(&self) -> Result<()> {
        for folder in self.monitor.folders() {
            match folder.snapshot() {
                Ok(snapshot) => self.channel.send(Envelope::from(snapshot)).await?,
                Err(e) => {
                    tracing::warn!("Could not get the current files of '{}' ({})", folder.name(), e);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for WatcherAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherAgent")
            .field("monitor", &self.monitor)
            .field("channel", &self.channel)
            .finish()
    }
}
