//! Bluetooth manager for the serial bridge
//! This module provides the main interface for bluetooth operations.
//! Radio callbacks and user requests share one inbound channel and are
//! applied to the state machine one at a time.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::catalog::GattCatalog;
use crate::core::bluetooth::constants::INBOUND_CHANNEL_CAPACITY;
use crate::core::bluetooth::events::{EventSink, RadioEvent};
use crate::core::bluetooth::machine::{ConnectionStateMachine, SessionStatus};
use crate::core::bluetooth::transport::RadioTransport;
use crate::core::bluetooth::types::PeripheralHandle;
use crate::error::{BridgeError, Result};

type Reply<T> = oneshot::Sender<T>;

enum Request {
    StartScan,
    StopScan,
    Connect {
        peripheral: PeripheralHandle,
        reply: Reply<Result<()>>,
    },
    Disconnect,
    ReadSignalStrength {
        reply: Reply<Result<()>>,
    },
    Send {
        data: Vec<u8>,
        reply: Reply<Result<()>>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    Shutdown,
}

enum Inbound {
    Radio(RadioEvent),
    Request(Request),
}

/// Creates the inbound channel shared by the transport and the manager.
///
/// The transport end is weak: only `BluetoothHandle`s keep the channel
/// open, so the run loop ends once the last handle is dropped.
pub fn channel() -> (RadioEventSender, InboundReceiver) {
    let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    (
        RadioEventSender { tx: tx.downgrade() },
        InboundReceiver { rx, tx },
    )
}

/// Transport-side end of the inbound channel
#[derive(Clone)]
pub struct RadioEventSender {
    tx: mpsc::WeakSender<Inbound>,
}

impl RadioEventSender {
    /// Queues a radio event; returns false once the manager has stopped
    pub async fn send(&self, event: RadioEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(Inbound::Radio(event)).await.is_ok(),
            None => false,
        }
    }
}

pub struct InboundReceiver {
    rx: mpsc::Receiver<Inbound>,
    tx: mpsc::Sender<Inbound>,
}

/// Owns the state machine and applies inbound messages in arrival order
pub struct BluetoothManager {
    machine: ConnectionStateMachine,
    inbound: InboundReceiver,
}

impl BluetoothManager {
    pub fn new(
        catalog: GattCatalog,
        transport: Box<dyn RadioTransport>,
        sink: Arc<dyn EventSink>,
        inbound: InboundReceiver,
    ) -> Self {
        Self {
            machine: ConnectionStateMachine::new(catalog, transport, sink),
            inbound,
        }
    }

    /// Cloneable handle for issuing requests to the running manager
    pub fn handle(&self) -> BluetoothHandle {
        BluetoothHandle {
            tx: self.inbound.tx.clone(),
        }
    }

    /// Processes messages until shutdown or until every handle is dropped
    pub async fn run(self) {
        let BluetoothManager {
            mut machine,
            inbound: InboundReceiver { mut rx, tx },
        } = self;
        drop(tx);

        info!("Bluetooth manager started");
        while let Some(message) = rx.recv().await {
            match message {
                Inbound::Radio(event) => machine.handle(event),
                Inbound::Request(Request::Shutdown) => break,
                Inbound::Request(request) => Self::dispatch(&mut machine, request),
            }
        }
        machine.stop_scan();
        machine.disconnect();
        info!("Bluetooth manager stopped");
    }

    fn dispatch(machine: &mut ConnectionStateMachine, request: Request) {
        match request {
            Request::StartScan => machine.start_scan(),
            Request::StopScan => machine.stop_scan(),
            Request::Connect { peripheral, reply } => {
                Self::respond(reply, machine.connect(peripheral));
            }
            Request::Disconnect => machine.disconnect(),
            Request::ReadSignalStrength { reply } => {
                Self::respond(reply, machine.read_signal_strength());
            }
            Request::Send { data, reply } => Self::respond(reply, machine.send(data)),
            Request::Status { reply } => Self::respond(reply, machine.status()),
            Request::Shutdown => {}
        }
    }

    fn respond<T>(reply: Reply<T>, value: T) {
        if reply.send(value).is_err() {
            debug!("Requester went away before the reply was sent");
        }
    }
}

/// Async front door to a running BluetoothManager
#[derive(Clone)]
pub struct BluetoothHandle {
    tx: mpsc::Sender<Inbound>,
}

impl BluetoothHandle {
    pub async fn start_scan(&self) -> Result<()> {
        self.submit(Request::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.submit(Request::StopScan).await
    }

    /// Begins connecting. Readiness is reported through the EventSink.
    pub async fn connect(&self, peripheral: PeripheralHandle) -> Result<()> {
        self.request(|reply| Request::Connect { peripheral, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.submit(Request::Disconnect).await
    }

    pub async fn read_signal_strength(&self) -> Result<()> {
        self.request(|reply| Request::ReadSignalStrength { reply })
            .await?
    }

    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.request(|reply| Request::Send { data, reply }).await?
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Request::Status { reply }).await
    }

    /// Stops scanning, drops any session and ends the run loop
    pub async fn shutdown(&self) -> Result<()> {
        self.submit(Request::Shutdown).await
    }

    async fn submit(&self, request: Request) -> Result<()> {
        self.tx
            .send(Inbound::Request(request))
            .await
            .map_err(|_| BridgeError::ManagerClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.submit(build(reply)).await?;
        response.await.map_err(|_| BridgeError::ManagerClosed)
    }
}
