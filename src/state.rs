//! Application state management
//! Builds the bluest transport and the manager, and owns the handles the
//! rest of the application talks to.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::bluetooth::{self, BluestTransport, ChannelSink, SinkEvent};
use crate::core::{BluetoothHandle, BluetoothManager};

/// Application state for one bridge session
pub struct AppState {
    pub config: AppConfig,
    /// Requests to the running manager
    pub bluetooth: BluetoothHandle,
    /// Discovery, readiness and failure notifications
    pub events: UnboundedReceiver<SinkEvent>,
    manager_task: JoinHandle<()>,
}

impl AppState {
    /// Opens the default adapter and starts the manager
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let (radio_events, inbound) = bluetooth::channel();
        let transport = BluestTransport::new(radio_events).await?;
        transport.watch_adapter();

        let (sink, events) = ChannelSink::channel();
        let manager = BluetoothManager::new(
            config.gatt,
            Box::new(transport),
            Arc::new(sink),
            inbound,
        );
        let bluetooth = manager.handle();
        let manager_task = tokio::spawn(manager.run());

        Ok(Self {
            config,
            bluetooth,
            events,
            manager_task,
        })
    }

    /// Tears the session down and waits for the manager to stop
    pub async fn shutdown(self) -> Result<()> {
        self.bluetooth.shutdown().await?;
        self.manager_task.await?;
        Ok(())
    }
}
