//! Payload sending over the serial characteristic
//! This module is the attach point for byte-stream writes once the link is ready.

use anyhow::Result;
use log::debug;

use crate::core::bluetooth::manager::BluetoothHandle;

/// Default ATT payload size of serial-bridge modules (23-byte MTU minus header)
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Payload writer trait
#[async_trait::async_trait]
pub trait PayloadWriter {
    /// Write one packet to the peripheral
    async fn write_packet(&self, packet: &[u8]) -> Result<()>;
}

#[async_trait::async_trait]
impl PayloadWriter for BluetoothHandle {
    async fn write_packet(&self, packet: &[u8]) -> Result<()> {
        self.send(packet.to_vec()).await?;
        Ok(())
    }
}

/// Splits payloads into packets the peripheral can accept
pub struct SerialWriter<T: PayloadWriter> {
    writer: T,
    chunk_size: usize,
}

impl<T: PayloadWriter> SerialWriter<T> {
    pub fn new(writer: T) -> Self {
        Self::with_chunk_size(writer, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(writer: T, chunk_size: usize) -> Self {
        Self {
            writer,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Send `data` as consecutive packets
    pub async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        for packet in data.chunks(self.chunk_size) {
            debug!("Sending {} byte packet", packet.len());
            self.writer.write_packet(packet).await?;
        }
        Ok(())
    }

    /// Send a line of text terminated with CRLF
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.send_bytes(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingWriter(Arc<Mutex<Vec<Vec<u8>>>>);

    #[async_trait::async_trait]
    impl PayloadWriter for RecordingWriter {
        async fn write_packet(&self, packet: &[u8]) -> Result<()> {
            self.0.lock().unwrap().push(packet.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn payloads_are_split_into_packets() {
        let recorder = RecordingWriter::default();
        let writer = SerialWriter::new(recorder.clone());

        writer.send_bytes(&[7u8; 45]).await.unwrap();

        let sizes: Vec<_> = recorder.0.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }

    #[tokio::test]
    async fn lines_end_with_crlf() {
        let recorder = RecordingWriter::default();
        let writer = SerialWriter::with_chunk_size(recorder.clone(), 4);

        writer.send_line("AT+V").await.unwrap();

        let packets = recorder.0.lock().unwrap().clone();
        assert_eq!(packets, vec![b"AT+V".to_vec(), b"\r\n".to_vec()]);
    }
}
