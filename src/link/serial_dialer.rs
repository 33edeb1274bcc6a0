use super::{Dialer, LinkStream};
use crate::platform::Peer;
use async_trait::async_trait;
use std::io;
use tokio_serial::SerialPortBuilderExt;
use tracing::*;

/// Opens the RFCOMM device node a paired rover is bound to.
pub struct SerialDialer {
    baud_rate: u32,
}

impl SerialDialer {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

#[async_trait]
impl Dialer for SerialDialer {
    async fn dial(&self, peer: &Peer) -> io::Result<LinkStream> {
        let serial_port = tokio_serial::new(&peer.port, self.baud_rate)
            .open_native_async()
            .map_err(io::Error::from)?;
        debug!("Opened {} at {} baud", peer.port, self.baud_rate);
        Ok(Box::new(serial_port))
    }
}
