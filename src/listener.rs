use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, never, select, unbounded, Sender};
use log::{debug, info, warn};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use signal_tap::config::{load_config, Config};
use signal_tap::net::session::FRAME_HEADER_LEN;
use signal_tap::net::{FeatureMessage, FeatureStream, Protocol};

/// Largest frame accepted from a stream connection.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Largest datagram the UDP stack can hand over.
const MAX_DATAGRAM_LEN: usize = 65536;

#[derive(Parser)]
#[command(name = "signal-listener")]
#[command(about = "Receive and print the messages published by signal-tap")]
struct Args {
    /// Settings file shared with signal-tap (same host, ports and protocol)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,
}

type Received = (FeatureStream, signal_tap::Result<FeatureMessage>);

fn decode(stream: FeatureStream, payload: &[u8]) -> signal_tap::Result<FeatureMessage> {
    match stream {
        FeatureStream::Osc => FeatureMessage::decode_osc(payload),
        _ => FeatureMessage::decode_binary(stream, payload),
    }
}

fn receive_datagrams(stream: FeatureStream, socket: UdpSocket, sender: Sender<Received>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        match socket.recv_from(&mut buffer) {
            Ok((size, _)) => {
                if sender.send((stream, decode(stream, &buffer[..size]))).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("{} socket error: {}", stream.name(), e);
                break;
            }
        }
    }
}

/// Reads one length-prefixed frame. `Ok(false)` means the peer closed between frames.
fn read_frame(connection: &mut impl Read, payload: &mut Vec<u8>) -> std::io::Result<bool> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match connection.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
        ));
    }
    payload.resize(len, 0);
    connection.read_exact(payload)?;
    Ok(true)
}

fn receive_frames(stream: FeatureStream, listener: TcpListener, sender: Sender<Received>) {
    let mut payload = Vec::new();
    for connection in listener.incoming() {
        let mut connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                warn!("{} accept failed: {}", stream.name(), e);
                continue;
            }
        };
        let peer = connection.peer_addr().map(|addr| addr.to_string()).unwrap_or_default();
        info!("{} connection from {}", stream.name(), peer);

        loop {
            match read_frame(&mut connection, &mut payload) {
                Ok(true) => {
                    if sender.send((stream, decode(stream, &payload))).is_err() {
                        return;
                    }
                }
                Ok(false) => {
                    info!("{} connection from {} closed", stream.name(), peer);
                    break;
                }
                Err(e) => {
                    warn!("{} connection from {} failed: {}", stream.name(), peer, e);
                    break;
                }
            }
        }
    }
}

fn spawn_receiver(stream: FeatureStream, address: SocketAddr, protocol: Protocol, sender: Sender<Received>) -> Result<()> {
    match protocol {
        Protocol::Udp => {
            let socket = UdpSocket::bind(address).with_context(|| format!("binding {} on udp {}", stream.name(), address))?;
            thread::spawn(move || receive_datagrams(stream, socket, sender));
        }
        Protocol::Tcp => {
            let listener = TcpListener::bind(address).with_context(|| format!("binding {} on tcp {}", stream.name(), address))?;
            thread::spawn(move || receive_frames(stream, listener, sender));
        }
    }
    info!("Listening for {} on {:?} {}", stream.name(), protocol, address);
    Ok(())
}

fn describe(message: &FeatureMessage) -> String {
    match message {
        FeatureMessage::SignalLevel(m) | FeatureMessage::InstantValue(m) => {
            format!("channel {} level {:.4}", m.signal_id, m.signal_level)
        }
        FeatureMessage::Impulse(m) => format!("channel {} beat", m.signal_id),
        FeatureMessage::TimeInfo(m) => format!(
            "{} ppq {:.2} bpm {:.1}",
            if m.is_playing { "playing" } else { "stopped" },
            m.position,
            m.bpm
        ),
        FeatureMessage::SpectralBands(m) => {
            let bands: Vec<String> = m.bands.iter().map(|band| format!("{:.2}", band)).collect();
            format!("channel {} f0 {:.1} Hz bands [{}]", m.signal_id, m.fundamental_frequency, bands.join(" "))
        }
        FeatureMessage::LinearSpectrum(m) => format!(
            "channel {} f0 {:.1} Hz {} bins",
            m.signal_id,
            m.fundamental_frequency,
            m.magnitudes.len()
        ),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let endpoints = config.endpoints()?;

    let (sender, receiver) = unbounded();
    for stream in FeatureStream::ALL {
        spawn_receiver(stream, endpoints.address(stream), endpoints.protocol_for(stream), sender.clone())?;
    }
    drop(sender);

    let deadline = match args.duration {
        Some(seconds) => after(Duration::from_secs_f64(seconds)),
        None => never(),
    };

    let mut received = [0u64; FeatureStream::COUNT];
    let mut rejected = 0u64;
    loop {
        select! {
            recv(receiver) -> message => match message {
                Ok((stream, Ok(message))) => {
                    received[stream.index()] += 1;
                    info!("{:<13} {}", message.name(), describe(&message));
                }
                Ok((stream, Err(e))) => {
                    rejected += 1;
                    debug!("Undecodable {} payload: {}", stream.name(), e);
                }
                Err(_) => break,
            },
            recv(deadline) -> _ => break,
        }
    }

    for stream in FeatureStream::ALL {
        info!("{:<13} {} messages", stream.name(), received[stream.index()]);
    }
    if rejected > 0 {
        warn!("{} payloads could not be decoded", rejected);
    }
    Ok(())
}
