//! Inbound radio events and the outbound EventSink contract.

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::{
    AdapterState, CharacteristicInfo, Generation, PeripheralHandle, PeripheralId,
};

/// Everything the radio reports back to the core.
///
/// Per-session callbacks carry the `Generation` the originating command was
/// issued under; the transport echoes it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    AdapterStateChanged(AdapterState),
    PeripheralDiscovered {
        peripheral: PeripheralHandle,
        rssi: Option<i16>,
    },
    Connected {
        generation: Generation,
        peripheral: PeripheralId,
    },
    ConnectFailed {
        generation: Generation,
        peripheral: PeripheralId,
        reason: String,
    },
    /// The link dropped without the core asking for it
    Disconnected {
        generation: Generation,
        peripheral: PeripheralId,
    },
    ServicesDiscovered {
        generation: Generation,
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        generation: Generation,
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    },
    NotifyStateChanged {
        generation: Generation,
        peripheral: PeripheralId,
        characteristic: Uuid,
        error: Option<String>,
    },
    ValueNotified {
        generation: Generation,
        peripheral: PeripheralId,
        characteristic: Uuid,
        data: Vec<u8>,
    },
    WriteAcknowledged {
        generation: Generation,
        peripheral: PeripheralId,
        characteristic: Uuid,
        error: Option<String>,
    },
    SignalStrengthRead {
        generation: Generation,
        peripheral: PeripheralId,
        result: Result<i16, String>,
    },
}

impl RadioEvent {
    /// Session tag of a per-session callback, None for adapter and scan events
    pub fn generation(&self) -> Option<Generation> {
        match self {
            RadioEvent::AdapterStateChanged(_) | RadioEvent::PeripheralDiscovered { .. } => None,
            RadioEvent::Connected { generation, .. }
            | RadioEvent::ConnectFailed { generation, .. }
            | RadioEvent::Disconnected { generation, .. }
            | RadioEvent::ServicesDiscovered { generation, .. }
            | RadioEvent::CharacteristicsDiscovered { generation, .. }
            | RadioEvent::NotifyStateChanged { generation, .. }
            | RadioEvent::ValueNotified { generation, .. }
            | RadioEvent::WriteAcknowledged { generation, .. }
            | RadioEvent::SignalStrengthRead { generation, .. } => Some(*generation),
        }
    }
}

/// Consumer of discovery and connection notifications.
///
/// Only discovery and readiness must be handled; every failure hook defaults
/// to doing nothing.
pub trait EventSink: Send + Sync {
    fn on_peripheral_discovered(&self, peripheral: &PeripheralHandle, rssi: Option<i16>);

    fn on_peripheral_ready(&self, peripheral: &PeripheralHandle);

    fn on_connect_failed(&self, _peripheral: &PeripheralHandle, _reason: &str) {}

    /// Discovery finished without finding the target characteristic
    fn on_service_not_found(&self, _peripheral: &PeripheralHandle) {}

    fn on_notify_failed(&self, _peripheral: &PeripheralHandle, _reason: &str) {}

    fn on_write_failed(&self, _peripheral: &PeripheralHandle, _reason: &str) {}

    fn on_disconnected(&self, _peripheral: &PeripheralHandle) {}

    fn on_signal_strength(&self, _peripheral: &PeripheralHandle, _rssi: i16) {}

    fn on_signal_strength_failed(&self, _peripheral: &PeripheralHandle, _reason: &str) {}

    fn on_bytes_received(&self, _peripheral: &PeripheralHandle, _data: &[u8]) {}
}

/// Owned form of every EventSink callback, for consumers that prefer a channel
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Discovered {
        peripheral: PeripheralHandle,
        rssi: Option<i16>,
    },
    Ready(PeripheralHandle),
    ConnectFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    ServiceNotFound(PeripheralHandle),
    NotifyFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    WriteFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    Disconnected(PeripheralHandle),
    SignalStrength {
        peripheral: PeripheralHandle,
        rssi: i16,
    },
    SignalStrengthFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    BytesReceived {
        peripheral: PeripheralHandle,
        data: Vec<u8>,
    },
}

/// Forwards callbacks into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding sink event");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_peripheral_discovered(&self, peripheral: &PeripheralHandle, rssi: Option<i16>) {
        self.forward(SinkEvent::Discovered {
            peripheral: peripheral.clone(),
            rssi,
        });
    }

    fn on_peripheral_ready(&self, peripheral: &PeripheralHandle) {
        self.forward(SinkEvent::Ready(peripheral.clone()));
    }

    fn on_connect_failed(&self, peripheral: &PeripheralHandle, reason: &str) {
        self.forward(SinkEvent::ConnectFailed {
            peripheral: peripheral.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_service_not_found(&self, peripheral: &PeripheralHandle) {
        self.forward(SinkEvent::ServiceNotFound(peripheral.clone()));
    }

    fn on_notify_failed(&self, peripheral: &PeripheralHandle, reason: &str) {
        self.forward(SinkEvent::NotifyFailed {
            peripheral: peripheral.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_write_failed(&self, peripheral: &PeripheralHandle, reason: &str) {
        self.forward(SinkEvent::WriteFailed {
            peripheral: peripheral.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_disconnected(&self, peripheral: &PeripheralHandle) {
        self.forward(SinkEvent::Disconnected(peripheral.clone()));
    }

    fn on_signal_strength(&self, peripheral: &PeripheralHandle, rssi: i16) {
        self.forward(SinkEvent::SignalStrength {
            peripheral: peripheral.clone(),
            rssi,
        });
    }

    fn on_signal_strength_failed(&self, peripheral: &PeripheralHandle, reason: &str) {
        self.forward(SinkEvent::SignalStrengthFailed {
            peripheral: peripheral.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_bytes_received(&self, peripheral: &PeripheralHandle, data: &[u8]) {
        self.forward(SinkEvent::BytesReceived {
            peripheral: peripheral.clone(),
            data: data.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_only_on_session_callbacks() {
        let adapter = RadioEvent::AdapterStateChanged(AdapterState::PoweredOn);
        assert_eq!(adapter.generation(), None);

        let connected = RadioEvent::Connected {
            generation: Generation(3),
            peripheral: "dev".into(),
        };
        assert_eq!(connected.generation(), Some(Generation(3)));
    }

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        let handle = PeripheralHandle::new("dev", None, None);

        sink.on_peripheral_discovered(&handle, Some(-60));
        sink.on_peripheral_ready(&handle);
        sink.on_write_failed(&handle, "timeout");

        assert_eq!(
            rx.recv().await,
            Some(SinkEvent::Discovered {
                peripheral: handle.clone(),
                rssi: Some(-60)
            })
        );
        assert_eq!(rx.recv().await, Some(SinkEvent::Ready(handle.clone())));
        assert!(matches!(
            rx.recv().await,
            Some(SinkEvent::WriteFailed { reason, .. }) if reason == "timeout"
        ));
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.on_peripheral_ready(&PeripheralHandle::new("dev", None, None));
    }
}
