//! Notification handling for the serial characteristic
//! This module subscribes to the characteristic and forwards every
//! notification to the manager as a radio event.

use std::sync::Mutex;

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::events::RadioEvent;
use crate::core::bluetooth::manager::RadioEventSender;
use crate::core::bluetooth::types::{Generation, PeripheralId};

/// Notification handler for serial data
pub struct NotificationHandler {
    events: RadioEventSender,
    cancel_token: Mutex<CancellationToken>,
}

impl NotificationHandler {
    pub fn new(events: RadioEventSender) -> Self {
        Self {
            events,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Subscribes to `characteristic`, replacing any earlier subscription
    pub fn subscribe(
        &self,
        generation: Generation,
        peripheral: PeripheralId,
        characteristic: Characteristic,
    ) {
        let cancel_token = {
            let mut guard = self.cancel_token.lock().unwrap_or_else(|e| e.into_inner());
            guard.cancel();
            *guard = CancellationToken::new();
            guard.clone()
        };
        let events = self.events.clone();

        info!("Subscribing to notifications...");
        tokio::spawn(async move {
            Self::process_notifications(generation, peripheral, characteristic, events, cancel_token)
                .await;
        });
    }

    pub fn unsubscribe(&self) {
        self.cancel_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    async fn process_notifications(
        generation: Generation,
        peripheral: PeripheralId,
        characteristic: Characteristic,
        events: RadioEventSender,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                events
                    .send(RadioEvent::NotifyStateChanged {
                        generation,
                        peripheral,
                        characteristic: uuid,
                        error: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        };

        events
            .send(RadioEvent::NotifyStateChanged {
                generation,
                peripheral: peripheral.clone(),
                characteristic: uuid,
                error: None,
            })
            .await;

        info!("Listening for serial notifications...");
        loop {
            tokio::select! {
                item = notification_stream.next() => {
                    let item = item.map(|r| r.map_err(|e| e.to_string()));
                    let is_value = matches!(item, Some(Ok(_)));
                    let event = Self::stream_event(generation, peripheral.clone(), uuid, item);
                    if !events.send(event).await || !is_value {
                        break;
                    }
                }
                _ = cancel_token.cancelled() => {
                    debug!("Notification subscription cancelled");
                    break;
                }
            }
        }
    }

    /// Maps one notification stream item to the event the manager sees.
    /// A stream error leaves the subscription dead, so it is reported as a
    /// notify failure; the end of the stream means the link dropped.
    fn stream_event(
        generation: Generation,
        peripheral: PeripheralId,
        characteristic: Uuid,
        item: Option<std::result::Result<Vec<u8>, String>>,
    ) -> RadioEvent {
        match item {
            Some(Ok(data)) => {
                debug!("Received serial data: {:?}", data);
                RadioEvent::ValueNotified {
                    generation,
                    peripheral,
                    characteristic,
                    data,
                }
            }
            Some(Err(reason)) => {
                error!("Error in notification stream: {}", reason);
                RadioEvent::NotifyStateChanged {
                    generation,
                    peripheral,
                    characteristic,
                    error: Some(reason),
                }
            }
            None => {
                info!("Notification stream ended");
                RadioEvent::Disconnected {
                    generation,
                    peripheral,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_SERIAL_CHAR;

    fn event(item: Option<std::result::Result<Vec<u8>, String>>) -> RadioEvent {
        NotificationHandler::stream_event(Generation(4), "dev-1".into(), UUID_SERIAL_CHAR, item)
    }

    #[test]
    fn values_become_notifications() {
        assert_eq!(
            event(Some(Ok(b"OK".to_vec()))),
            RadioEvent::ValueNotified {
                generation: Generation(4),
                peripheral: "dev-1".into(),
                characteristic: UUID_SERIAL_CHAR,
                data: b"OK".to_vec(),
            }
        );
    }

    #[test]
    fn stream_error_is_reported_as_notify_failure() {
        assert_eq!(
            event(Some(Err("GATT error".into()))),
            RadioEvent::NotifyStateChanged {
                generation: Generation(4),
                peripheral: "dev-1".into(),
                characteristic: UUID_SERIAL_CHAR,
                error: Some("GATT error".into()),
            }
        );
    }

    #[test]
    fn stream_end_is_reported_as_link_loss() {
        assert_eq!(
            event(None),
            RadioEvent::Disconnected {
                generation: Generation(4),
                peripheral: "dev-1".into(),
            }
        );
    }
}
