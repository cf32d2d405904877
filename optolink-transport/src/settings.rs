//! Transport selection from a port string

use crate::error::OptolinkResult;
use crate::serial::{SerialSettings, SerialTransport};
use crate::stream::TransportLayer;
use crate::tcp::{TcpSettings, TcpTransport};
use std::time::Duration;

/// Which physical transport to open
#[derive(Debug, Clone)]
pub enum TransportSettings {
    Serial(SerialSettings),
    Tcp(TcpSettings),
}

impl TransportSettings {
    /// Select a transport from a port identifier
    ///
    /// `tcp://host:port` selects a network serial adapter; anything else is
    /// taken as a local serial device name.
    pub fn from_port(port: &str, baud_rate: u32, timeout: Duration) -> OptolinkResult<Self> {
        if port.starts_with("tcp://") {
            Ok(TransportSettings::Tcp(TcpSettings::from_url(port, timeout)?))
        } else {
            Ok(TransportSettings::Serial(SerialSettings::with_timeout(
                port.to_string(),
                baud_rate,
                timeout,
            )))
        }
    }

    /// Create the (unopened) transport
    pub fn build(self) -> Box<dyn TransportLayer> {
        match self {
            TransportSettings::Serial(settings) => Box::new(SerialTransport::new(settings)),
            TransportSettings::Tcp(settings) => Box::new(TcpTransport::new(settings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_port() {
        let timeout = Duration::from_secs(1);
        match TransportSettings::from_port("tcp://10.0.0.5:8888", 4800, timeout).unwrap() {
            TransportSettings::Tcp(settings) => {
                assert_eq!(settings.address, "10.0.0.5:8888");
                assert_eq!(settings.timeout, Some(timeout));
            }
            other => panic!("unexpected {:?}", other),
        }
        match TransportSettings::from_port("/dev/ttyUSB0", 4800, timeout).unwrap() {
            TransportSettings::Serial(settings) => assert_eq!(settings.baud_rate, 4800),
            other => panic!("unexpected {:?}", other),
        }
        assert!(TransportSettings::from_port("tcp://broken", 4800, timeout).is_err());
    }
}
