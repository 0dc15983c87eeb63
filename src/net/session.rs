use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::error::Result;

/// Stream frames carry a little-endian `u32` length before the payload.
pub const FRAME_HEADER_LEN: usize = 4;

/// Frame buffer capacity reserved up front. Larger payloads grow it once.
const INITIAL_FRAME_CAPACITY: usize = 16 * 1024;

/// Counters and connection health, readable from any thread.
#[derive(Debug, Default)]
pub struct SessionStats {
    connected: AtomicBool,
    sent: AtomicU64,
    dropped: AtomicU64,
    connect_attempts: AtomicU64,
    disconnects: AtomicU64,
}

impl SessionStats {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Connections closed after a failed or short write.
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }
}

enum Channel {
    Datagram {
        socket: UdpSocket,
    },
    Stream {
        stream: Option<TcpStream>,
        connect_timeout: Duration,
        frame: Vec<u8>,
    },
}

/// Delivery of encoded messages to one endpoint.
///
/// `send` never blocks for longer than one bounded connect attempt and never reports errors:
/// a datagram that cannot be sent is counted and dropped, a stream that fails to write is
/// closed and reconnected lazily on the next send.
pub struct TransportSession {
    endpoint: SocketAddr,
    channel: Channel,
    stats: Arc<SessionStats>,
}

impl TransportSession {
    /// Connectionless session. Binding the local socket is the only fallible step.
    pub fn datagram(endpoint: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if endpoint.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;

        let stats = Arc::new(SessionStats::default());
        stats.connected.store(true, Ordering::Relaxed);

        Ok(Self {
            endpoint,
            channel: Channel::Datagram { socket },
            stats,
        })
    }

    /// Connection-oriented session. One connect attempt is made immediately; failing it is
    /// fine, the next `send` tries again.
    pub fn stream(endpoint: SocketAddr, connect_timeout: Duration) -> Self {
        let mut session = Self {
            endpoint,
            channel: Channel::Stream {
                stream: None,
                connect_timeout,
                frame: Vec::with_capacity(INITIAL_FRAME_CAPACITY),
            },
            stats: Arc::new(SessionStats::default()),
        };

        if !session.reconnect() {
            info!("{} not reachable yet, will retry on next send", endpoint);
        }
        session
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stats.is_connected()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// Sends one message. Returns whether it left the process.
    pub fn send(&mut self, payload: &[u8]) -> bool {
        let delivered = if let Channel::Datagram { socket } = &self.channel {
            socket
                .send_to(payload, self.endpoint)
                .map(|written| written == payload.len())
                .unwrap_or(false)
        } else {
            self.send_framed(payload)
        };

        let counter = if delivered {
            &self.stats.sent
        } else {
            &self.stats.dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    fn send_framed(&mut self, payload: &[u8]) -> bool {
        if !self.stats.is_connected() && !self.reconnect() {
            return false;
        }

        let Channel::Stream {
            stream: Some(stream),
            frame,
            ..
        } = &mut self.channel
        else {
            return false;
        };

        frame.clear();
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);

        let expected = frame.len();
        // A short write would leave a partial frame on the wire, so it counts as a failure
        match stream.write(frame) {
            Ok(written) if written == expected => true,
            Ok(written) => {
                debug!("Short write to {} ({} of {} bytes), resetting", self.endpoint, written, expected);
                self.disconnect();
                false
            }
            Err(e) => {
                debug!("Write to {} failed: {}, resetting connection", self.endpoint, e);
                self.disconnect();
                false
            }
        }
    }

    /// A single bounded connect attempt.
    fn reconnect(&mut self) -> bool {
        let Channel::Stream {
            stream,
            connect_timeout,
            ..
        } = &mut self.channel
        else {
            return true;
        };

        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = stream.take() {
            let _ = old.shutdown(Shutdown::Both);
        }

        let connected = TcpStream::connect_timeout(&self.endpoint, *connect_timeout).and_then(|s| {
            s.set_nonblocking(true)?;
            s.set_nodelay(true)?;
            Ok(s)
        });

        match connected {
            Ok(s) => {
                // Later reconnects show up in the counters instead
                if self.stats.disconnects() == 0 {
                    info!("Connected to {}", self.endpoint);
                } else {
                    debug!("Reconnected to {}", self.endpoint);
                }
                *stream = Some(s);
                self.stats.connected.store(true, Ordering::Relaxed);
                true
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", self.endpoint, e);
                self.stats.connected.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Channel::Stream { stream, .. } = &mut self.channel {
            if let Some(old) = stream.take() {
                let _ = old.shutdown(Shutdown::Both);
            }
        }
        self.stats.connected.store(false, Ordering::Relaxed);
        self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        stream.read_exact(&mut header).unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(header) as usize];
        stream.read_exact(&mut payload).unwrap();
        payload
    }

    #[test]
    fn test_datagram_delivery() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut session = TransportSession::datagram(receiver.local_addr().unwrap()).unwrap();
        assert!(session.send(&[1, 2, 3]));

        let mut buffer = [0u8; 8];
        let (len, _) = receiver.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[1, 2, 3]);
        assert_eq!(session.stats().sent(), 1);
    }

    #[test]
    fn test_unreachable_stream_never_blocks() {
        let endpoint: SocketAddr = ([127, 0, 0, 1], unused_port()).into();
        let mut session = TransportSession::stream(endpoint, Duration::from_millis(50));
        assert!(!session.is_connected());

        for _ in 0..20 {
            let started = Instant::now();
            assert!(!session.send(b"level"));
            assert!(started.elapsed() < Duration::from_millis(500));
            assert!(!session.is_connected());
        }

        let stats = session.stats();
        assert_eq!(stats.dropped(), 20);
        assert_eq!(stats.sent(), 0);
        // One attempt at construction and one per send
        assert_eq!(stats.connect_attempts(), 21);
    }

    #[test]
    fn test_stream_frames_payloads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap();

        let mut session = TransportSession::stream(endpoint, Duration::from_secs(1));
        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert!(session.is_connected());

        assert!(session.send(b"first"));
        assert!(session.send(b"second"));
        assert_eq!(read_frame(&mut peer), b"first");
        assert_eq!(read_frame(&mut peer), b"second");
    }

    #[test]
    fn test_stream_reconnects_when_consumer_appears() {
        let port = unused_port();
        let endpoint: SocketAddr = ([127, 0, 0, 1], port).into();

        let mut session = TransportSession::stream(endpoint, Duration::from_millis(50));
        assert!(!session.send(b"lost"));
        assert!(!session.is_connected());

        let listener = TcpListener::bind(endpoint).unwrap();
        let consumer = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            read_frame(&mut peer)
        });

        assert!(session.send(b"found"));
        assert!(session.is_connected());
        assert_eq!(consumer.join().unwrap(), b"found");
    }

    #[test]
    fn test_stream_drops_connection_after_write_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap();

        let mut session = TransportSession::stream(endpoint, Duration::from_millis(50));
        let (peer, _) = listener.accept().unwrap();
        drop(peer);
        drop(listener);

        // The first writes may still land in the kernel buffer before the reset arrives
        let mut disconnected = false;
        for _ in 0..50 {
            session.send(b"into the void");
            if !session.is_connected() {
                disconnected = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert!(disconnected);
        let stats = session.stats();
        assert!(stats.dropped() >= 1);
        assert_eq!(stats.disconnects(), 1);
    }

    #[test]
    fn test_datagram_failure_is_counted() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut session = TransportSession::datagram(receiver.local_addr().unwrap()).unwrap();

        // Larger than any UDP payload
        assert!(!session.send(&vec![0u8; 70_000]));
        let stats = session.stats();
        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.sent(), 0);
        assert!(session.is_connected());

        assert!(session.send(b"after"));
        let mut buffer = [0u8; 8];
        let (len, _) = receiver.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], b"after");
        assert_eq!(stats.sent(), 1);
    }
}
