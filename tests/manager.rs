//! Drives the BluetoothManager run loop against an in-process radio that
//! answers every command the way a serial-bridge module would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ble_serial_bridge_lib::BridgeError;
use ble_serial_bridge_lib::core::bluetooth::{
    self, AdapterState, BluetoothHandle, BluetoothManager, ChannelSink, CharacteristicInfo,
    CharacteristicRef, GattCatalog, Generation, Phase, PeripheralHandle, PeripheralId,
    RadioEvent, RadioEventSender, RadioTransport, SinkEvent, WriteMode, UUID_SERIAL_SERVICE,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// Simulated radio with one serial peripheral in range
struct SimulatedRadio {
    events: RadioEventSender,
    peripheral: PeripheralHandle,
    ack_write: bool,
    /// Services reported on discovery
    services: Vec<Uuid>,
    writes: Arc<Mutex<Vec<(Vec<u8>, WriteMode)>>>,
    released: Arc<Mutex<Vec<PeripheralId>>>,
}

impl SimulatedRadio {
    fn reply(&self, event: RadioEvent) {
        let events = self.events.clone();
        tokio::spawn(async move {
            events.send(event).await;
        });
    }
}

impl RadioTransport for SimulatedRadio {
    fn start_scan(&self) {
        self.reply(RadioEvent::PeripheralDiscovered {
            peripheral: self.peripheral.clone(),
            rssi: Some(-58),
        });
    }

    fn stop_scan(&self) {}

    fn retrieve_connected(&self) {}

    fn connect(&self, generation: Generation, peripheral: &PeripheralId) {
        self.reply(RadioEvent::Connected {
            generation,
            peripheral: peripheral.clone(),
        });
    }

    fn disconnect(&self, peripheral: &PeripheralId) {
        self.released.lock().unwrap().push(peripheral.clone());
    }

    fn discover_services(&self, generation: Generation, peripheral: &PeripheralId) {
        self.reply(RadioEvent::ServicesDiscovered {
            generation,
            peripheral: peripheral.clone(),
            services: self.services.clone(),
        });
    }

    fn discover_characteristics(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        service: Uuid,
        filter: Uuid,
    ) {
        self.reply(RadioEvent::CharacteristicsDiscovered {
            generation,
            peripheral: peripheral.clone(),
            service,
            characteristics: vec![CharacteristicInfo {
                id: filter,
                supports_ack_write: self.ack_write,
                supports_unack_write: true,
                supports_notify: true,
            }],
        });
    }

    fn set_notify(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        characteristic: CharacteristicRef,
        _enabled: bool,
    ) {
        self.reply(RadioEvent::NotifyStateChanged {
            generation,
            peripheral: peripheral.clone(),
            characteristic: characteristic.characteristic,
            error: None,
        });
    }

    fn read_signal_strength(&self, generation: Generation, peripheral: &PeripheralId) {
        self.reply(RadioEvent::SignalStrengthRead {
            generation,
            peripheral: peripheral.clone(),
            result: Ok(-47),
        });
    }

    fn write_value(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        characteristic: CharacteristicRef,
        data: Vec<u8>,
        mode: WriteMode,
    ) {
        let echo = data.clone();
        self.writes.lock().unwrap().push((data, mode));
        self.reply(RadioEvent::WriteAcknowledged {
            generation,
            peripheral: peripheral.clone(),
            characteristic: characteristic.characteristic,
            error: Some("write rejected".to_string()),
        });
        self.reply(RadioEvent::ValueNotified {
            generation,
            peripheral: peripheral.clone(),
            characteristic: characteristic.characteristic,
            data: echo,
        });
    }
}

struct Bridge {
    handle: BluetoothHandle,
    radio: RadioEventSender,
    events: UnboundedReceiver<SinkEvent>,
    writes: Arc<Mutex<Vec<(Vec<u8>, WriteMode)>>>,
    released: Arc<Mutex<Vec<PeripheralId>>>,
    peripheral: PeripheralHandle,
    task: JoinHandle<()>,
}

impl Bridge {
    async fn start(ack_write: bool, services: Vec<Uuid>) -> Self {
        let (radio, inbound) = bluetooth::channel();
        let peripheral = PeripheralHandle::new("sim-hm10", Some("HMSoft".into()), None);
        let writes = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(Mutex::new(Vec::new()));
        let transport = SimulatedRadio {
            events: radio.clone(),
            peripheral: peripheral.clone(),
            ack_write,
            services,
            writes: writes.clone(),
            released: released.clone(),
        };
        let (sink, events) = ChannelSink::channel();
        let manager = BluetoothManager::new(
            GattCatalog::default(),
            Box::new(transport),
            Arc::new(sink),
            inbound,
        );
        let handle = manager.handle();
        let task = tokio::spawn(manager.run());

        assert!(radio
            .send(RadioEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await);

        Self {
            handle,
            radio,
            events,
            writes,
            released,
            peripheral,
            task,
        }
    }

    async fn next_event(&mut self) -> SinkEvent {
        timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for sink event")
            .expect("sink closed")
    }

    async fn wait_until(&mut self, mut predicate: impl FnMut(&SinkEvent) -> bool) -> SinkEvent {
        loop {
            let event = self.next_event().await;
            if predicate(&event) {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn scan_connect_and_become_ready() {
    let mut bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;

    bridge.handle.start_scan().await.unwrap();
    match bridge.next_event().await {
        SinkEvent::Discovered { peripheral, rssi } => {
            assert_eq!(peripheral, bridge.peripheral);
            assert_eq!(rssi, Some(-58));
        }
        other => panic!("expected discovery, got {:?}", other),
    }
    bridge.handle.stop_scan().await.unwrap();

    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    let ready = bridge
        .wait_until(|e| matches!(e, SinkEvent::Ready(_)))
        .await;
    assert_eq!(ready, SinkEvent::Ready(bridge.peripheral.clone()));

    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.phase, Phase::Ready);
    assert_eq!(status.write_mode, WriteMode::AckRequired);
    assert_eq!(status.connected.as_ref(), Some(&bridge.peripheral));
    assert!(!status.scanning);
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let mut bridge = Bridge::start(false, vec![UUID_SERIAL_SERVICE]).await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;

    let err = bridge
        .handle
        .connect(PeripheralHandle::new("other", None, None))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::InvalidPhase {
            operation: "connect",
            phase: Phase::Ready
        }
    );
    assert_eq!(
        bridge.handle.status().await.unwrap().write_mode,
        WriteMode::NoAck
    );
}

#[tokio::test]
async fn send_reports_write_failure_and_echo() {
    let mut bridge = Bridge::start(false, vec![UUID_SERIAL_SERVICE]).await;
    assert!(bridge.handle.send(b"early".to_vec()).await.is_err());

    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;

    bridge.handle.send(b"AT\r\n".to_vec()).await.unwrap();
    let failure = bridge
        .wait_until(|e| matches!(e, SinkEvent::WriteFailed { .. }))
        .await;
    assert!(matches!(failure, SinkEvent::WriteFailed { reason, .. } if reason == "write rejected"));
    let echo = bridge
        .wait_until(|e| matches!(e, SinkEvent::BytesReceived { .. }))
        .await;
    assert!(matches!(echo, SinkEvent::BytesReceived { data, .. } if data == b"AT\r\n"));

    assert_eq!(
        bridge.writes.lock().unwrap().clone(),
        vec![(b"AT\r\n".to_vec(), WriteMode::NoAck)]
    );
}

#[tokio::test]
async fn signal_strength_is_reported() {
    let mut bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;

    bridge.handle.read_signal_strength().await.unwrap();
    let reading = bridge
        .wait_until(|e| matches!(e, SinkEvent::SignalStrength { .. }))
        .await;
    assert!(matches!(reading, SinkEvent::SignalStrength { rssi: -47, .. }));
    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.connected.and_then(|p| p.rssi), Some(-47));
}

#[tokio::test]
async fn peripheral_without_services_reports_not_found() {
    let mut bridge = Bridge::start(true, vec![]).await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();

    let event = bridge
        .wait_until(|e| matches!(e, SinkEvent::ServiceNotFound(_)))
        .await;
    assert_eq!(event, SinkEvent::ServiceNotFound(bridge.peripheral.clone()));
    assert_eq!(
        bridge.handle.status().await.unwrap().phase,
        Phase::DiscoveringServices
    );
}

#[tokio::test]
async fn stale_callback_after_reconnect_is_dropped() {
    let mut bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;
    let old_generation = bridge.handle.status().await.unwrap().generation;

    bridge.handle.disconnect().await.unwrap();
    bridge
        .wait_until(|e| matches!(e, SinkEvent::Disconnected(_)))
        .await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;

    // A queued disconnect from the old session must not tear down the new one.
    assert!(bridge
        .radio
        .send(RadioEvent::Disconnected {
            generation: old_generation,
            peripheral: bridge.peripheral.id.clone(),
        })
        .await);
    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.phase, Phase::Ready);
    assert!(status.generation > old_generation);
}

#[tokio::test]
async fn power_off_resets_and_blocks_connect() {
    let mut bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;

    assert!(bridge
        .radio
        .send(RadioEvent::AdapterStateChanged(AdapterState::PoweredOff))
        .await);
    bridge
        .wait_until(|e| matches!(e, SinkEvent::Disconnected(_)))
        .await;

    let status = bridge.handle.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert!(status.connected.is_none());
    assert!(status.write_characteristic.is_none());
    assert_eq!(
        bridge.released.lock().unwrap().clone(),
        vec![bridge.peripheral.id.clone()]
    );

    let err = bridge
        .handle
        .connect(bridge.peripheral.clone())
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::AdapterNotReady(AdapterState::PoweredOff));
}

#[tokio::test]
async fn shutdown_closes_the_handle() {
    let bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;
    bridge.handle.shutdown().await.unwrap();

    // The loop may still be draining; give it a moment to exit.
    let closed = timeout(Duration::from_secs(1), async {
        loop {
            if bridge.handle.status().await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn run_loop_ends_when_last_handle_is_dropped() {
    let bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;
    let Bridge {
        handle,
        radio,
        task,
        ..
    } = bridge;

    // The transport still holds its sender; that alone must not keep the loop alive.
    drop(handle);
    assert!(timeout(Duration::from_secs(1), task).await.is_ok());
    assert!(!radio
        .send(RadioEvent::AdapterStateChanged(AdapterState::PoweredOff))
        .await);
}

#[tokio::test]
async fn link_loss_releases_platform_objects() {
    let mut bridge = Bridge::start(true, vec![UUID_SERIAL_SERVICE]).await;
    bridge.handle.connect(bridge.peripheral.clone()).await.unwrap();
    bridge.wait_until(|e| matches!(e, SinkEvent::Ready(_))).await;
    let generation = bridge.handle.status().await.unwrap().generation;

    assert!(bridge
        .radio
        .send(RadioEvent::Disconnected {
            generation,
            peripheral: bridge.peripheral.id.clone(),
        })
        .await);
    bridge
        .wait_until(|e| matches!(e, SinkEvent::Disconnected(_)))
        .await;

    assert_eq!(
        bridge.released.lock().unwrap().clone(),
        vec![bridge.peripheral.id.clone()]
    );
    assert_eq!(bridge.handle.status().await.unwrap().phase, Phase::Idle);
}
