//! TCP front end for the virtual device
//!
//! Exposes a [`VirtualDevice`] the way a network serial adapter exposes the
//! optical head, so a client configured with `tcp://host:port` can talk to it.

use crate::device::VirtualDevice;
use optolink_core::{OptolinkError, OptolinkResult};
use optolink_transport::TcpTransport;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Listener accepting host connections for one virtual device
///
/// Every accepted connection is served in its own task; all of them share
/// the device memory.
///
/// # Usage Example
/// ```rust,no_run
/// use optolink_device::{DeviceListener, VirtualDevice};
/// use optolink_protocol::ProtocolKind;
///
/// # async fn run() -> optolink_core::OptolinkResult<()> {
/// let device = VirtualDevice::new(ProtocolKind::P300);
/// let listener = DeviceListener::new(device, "127.0.0.1:3333".parse().unwrap());
/// listener.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceListener {
    device: VirtualDevice,
    address: SocketAddr,
}

impl DeviceListener {
    pub fn new(device: VirtualDevice, address: SocketAddr) -> Self {
        Self { device, address }
    }

    pub fn device(&self) -> &VirtualDevice {
        &self.device
    }

    /// Bind the configured address and accept connections indefinitely
    ///
    /// # Errors
    /// Returns error if binding to the address fails
    pub async fn start(&self) -> OptolinkResult<()> {
        let listener = TcpListener::bind(self.address).await.map_err(|e| {
            OptolinkError::Connection(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("Failed to bind to {}: {}", self.address, e),
            ))
        })?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> OptolinkResult<()> {
        let local = listener.local_addr().map_err(OptolinkError::Connection)?;
        log::info!(
            "Virtual {} device listening on {}",
            self.device.protocol(),
            local
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    log::info!("Accepted connection from {}", peer_addr);
                    let device = self.device.clone();
                    tokio::spawn(async move {
                        let transport = TcpTransport::from_connected_stream(stream, None);
                        if let Err(e) = device.serve(transport).await {
                            log::error!("Error serving {}: {}", peer_addr, e);
                        }
                        log::info!("Connection from {} closed", peer_addr);
                    });
                }
                Err(e) => {
                    log::error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}
