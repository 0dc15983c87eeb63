pub mod encoder;
pub mod messages;
pub mod session;

pub use encoder::{BinaryEncoder, OscEncoder};
pub use messages::FeatureMessage;
pub use session::{SessionStats, TransportSession};

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5);

/// Independent outgoing streams. Binary payloads use one endpoint per feature, every OSC
/// packet goes to the shared OSC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureStream {
    SignalLevel,
    InstantValue,
    Impulse,
    TimeInfo,
    Fft,
    Osc,
}

impl FeatureStream {
    pub const COUNT: usize = 6;

    pub const ALL: [FeatureStream; FeatureStream::COUNT] = [
        FeatureStream::SignalLevel,
        FeatureStream::InstantValue,
        FeatureStream::Impulse,
        FeatureStream::TimeInfo,
        FeatureStream::Fft,
        FeatureStream::Osc,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn default_port(self) -> u16 {
        match self {
            FeatureStream::SignalLevel => 7001,
            FeatureStream::InstantValue => 7002,
            FeatureStream::Impulse => 7003,
            FeatureStream::TimeInfo => 7004,
            FeatureStream::Fft => 7005,
            FeatureStream::Osc => 9000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureStream::SignalLevel => "signal level",
            FeatureStream::InstantValue => "instant value",
            FeatureStream::Impulse => "impulse",
            FeatureStream::TimeInfo => "time info",
            FeatureStream::Fft => "fft",
            FeatureStream::Osc => "osc",
        }
    }
}

/// Transport used for the binary feature streams. OSC is always sent as datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

/// Where each stream is delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub host: IpAddr,
    pub ports: [u16; FeatureStream::COUNT],
    pub protocol: Protocol,
    pub connect_timeout: Duration,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            ports: FeatureStream::ALL.map(FeatureStream::default_port),
            protocol: Protocol::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Endpoints {
    pub fn address(&self, stream: FeatureStream) -> SocketAddr {
        SocketAddr::new(self.host, self.ports[stream.index()])
    }

    pub fn protocol_for(&self, stream: FeatureStream) -> Protocol {
        match stream {
            FeatureStream::Osc => Protocol::Udp,
            _ => self.protocol,
        }
    }
}

/// Destination for encoded feature messages.
///
/// Called from the audio thread: implementations must not block, and failures stay inside
/// the sink.
pub trait FeatureSink {
    fn send(&mut self, stream: FeatureStream, payload: &[u8]);
}

/// One transport session per feature stream.
pub struct NetworkSink {
    sessions: Vec<TransportSession>,
}

impl NetworkSink {
    pub fn connect(endpoints: &Endpoints) -> Result<Self> {
        let sessions = FeatureStream::ALL
            .iter()
            .map(|&stream| {
                let address = endpoints.address(stream);
                match endpoints.protocol_for(stream) {
                    Protocol::Udp => TransportSession::datagram(address),
                    Protocol::Tcp => Ok(TransportSession::stream(address, endpoints.connect_timeout)),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Feature streams ready on {} ({:?}, OSC on port {})",
            endpoints.host,
            endpoints.protocol,
            endpoints.ports[FeatureStream::Osc.index()]
        );

        Ok(Self { sessions })
    }

    pub fn session(&self, stream: FeatureStream) -> &TransportSession {
        &self.sessions[stream.index()]
    }

    pub fn stats(&self, stream: FeatureStream) -> Arc<SessionStats> {
        self.session(stream).stats()
    }
}

impl FeatureSink for NetworkSink {
    fn send(&mut self, stream: FeatureStream, payload: &[u8]) {
        self.sessions[stream.index()].send(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    #[test]
    fn test_default_ports() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.address(FeatureStream::SignalLevel).port(), 7001);
        assert_eq!(endpoints.address(FeatureStream::Fft).port(), 7005);
        assert_eq!(endpoints.address(FeatureStream::Osc).port(), 9000);
        assert!(endpoints.address(FeatureStream::Impulse).ip().is_loopback());
    }

    #[test]
    fn test_osc_is_always_datagram() {
        let endpoints = Endpoints {
            protocol: Protocol::Tcp,
            ..Endpoints::default()
        };
        assert_eq!(endpoints.protocol_for(FeatureStream::Osc), Protocol::Udp);
        assert_eq!(endpoints.protocol_for(FeatureStream::Impulse), Protocol::Tcp);
    }

    #[test]
    fn test_network_sink_routes_by_stream() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut endpoints = Endpoints::default();
        endpoints.ports[FeatureStream::Impulse.index()] = receiver.local_addr().unwrap().port();

        let mut sink = NetworkSink::connect(&endpoints).unwrap();
        sink.send(FeatureStream::Impulse, b"beat");

        let mut buffer = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], b"beat");
        assert_eq!(sink.stats(FeatureStream::Impulse).sent(), 1);
    }
}
