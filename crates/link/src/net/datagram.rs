use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{SessionIdentity, Settings, TransportKind};
use crate::error::{Error, Result};

use super::protocol::{HANDSHAKE_PROBE, SensorReading, contains_token, encode_frame};
use super::state::HandshakeMode;
use super::transport::{LinkEvent, Transport};

const DATA_BUFFER_SIZE: usize = 2048;
const BEACON_BUFFER_SIZE: usize = 128;
const LISTEN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DatagramConfig {
    pub bind_ip: IpAddr,
    pub local_port: u16,
    pub remote_port: u16,
    pub multicast_addr: Ipv4Addr,
    pub multicast_port: u16,
    pub interface: Ipv4Addr,
    pub group_tag: String,
}

impl DatagramConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port: settings.local_port,
            remote_port: settings.remote_port,
            multicast_addr: settings.multicast_address,
            multicast_port: settings.multicast_port,
            interface: Ipv4Addr::UNSPECIFIED,
            group_tag: settings.multicast_group.clone(),
        }
    }
}

enum Inbound {
    Data(Vec<u8>),
    Beacon(Vec<u8>, SocketAddr),
    Failed(String),
}

/// UDP data socket plus a multicast socket listening for host beacons.
pub struct DatagramTransport {
    config: DatagramConfig,
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    inbound: Option<Receiver<Inbound>>,
    shutdown: Arc<AtomicBool>,
    listeners: Vec<JoinHandle<()>>,
}

impl DatagramTransport {
    pub fn new(config: DatagramConfig) -> Self {
        Self {
            config,
            socket: None,
            peer: None,
            inbound: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            listeners: Vec::new(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn bind_beacon_socket(&self) -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind((self.config.bind_ip, self.config.multicast_port))?;
        if let Err(e) = socket.join_multicast_v4(&self.config.multicast_addr, &self.config.interface) {
            log::warn!(
                "could not join multicast group {}: {}, listening for unicast beacons only",
                self.config.multicast_addr,
                e
            );
        }
        Ok(socket)
    }

    fn spawn_listener<F>(
        &mut self,
        name: &str,
        socket: UdpSocket,
        buffer_size: usize,
        tx: Sender<Inbound>,
        wrap: F,
    ) -> Result<()>
    where
        F: Fn(Vec<u8>, SocketAddr) -> Inbound + Send + 'static,
    {
        socket.set_read_timeout(Some(LISTEN_POLL))?;
        let shutdown = Arc::clone(&self.shutdown);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; buffer_size];
                while !shutdown.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buffer) {
                        Ok((size, addr)) => {
                            if tx.send(wrap(buffer[..size].to_vec(), addr)).is_err() {
                                break;
                            }
                        }
                        Err(ref e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            if shutdown.load(Ordering::SeqCst) {
                                break;
                            }
                            if tx.send(Inbound::Failed(e.to_string())).is_err() {
                                break;
                            }
                            thread::sleep(LISTEN_POLL);
                        }
                    }
                }
                log::debug!("datagram listener exiting");
            })?;

        self.listeners.push(handle);
        Ok(())
    }

    fn send_bytes(&self, bytes: &[u8]) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
        let peer = self
            .peer
            .ok_or_else(|| Error::Transport("no peer address learned yet".to_string()))?;
        Ok(socket.send_to(bytes, peer)?)
    }
}

impl Transport for DatagramTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn handshake_mode(&self) -> HandshakeMode {
        HandshakeMode::Token
    }

    fn open(&mut self, _identity: &SessionIdentity) -> Result<()> {
        self.close();
        self.shutdown = Arc::new(AtomicBool::new(false));

        let socket = UdpSocket::bind((self.config.bind_ip, self.config.local_port))?;
        let beacon = self.bind_beacon_socket()?;
        let (tx, rx) = mpsc::channel();

        self.spawn_listener("bodylink-udp-data", socket.try_clone()?, DATA_BUFFER_SIZE, tx.clone(), |data, _| {
            Inbound::Data(data)
        })?;
        self.spawn_listener("bodylink-udp-beacon", beacon, BEACON_BUFFER_SIZE, tx, Inbound::Beacon)?;

        log::info!(
            "datagram transport listening on {} (beacons on port {})",
            socket.local_addr()?,
            self.config.multicast_port
        );
        self.socket = Some(socket);
        self.inbound = Some(rx);
        Ok(())
    }

    fn receive(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        let Some(rx) = self.inbound.as_ref() else {
            return events;
        };

        let mut beacons = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(Inbound::Data(data)) => events.push(LinkEvent::Data(data)),
                Ok(Inbound::Beacon(payload, source)) => beacons.push((payload, source)),
                Ok(Inbound::Failed(message)) => events.push(LinkEvent::Failed(message)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    events.push(LinkEvent::Failed("datagram listeners stopped".to_string()));
                    break;
                }
            }
        }

        for (payload, source) in beacons {
            if !contains_token(&payload, &self.config.group_tag) {
                log::debug!("ignoring beacon from {} for another group", source);
                continue;
            }

            let peer = SocketAddr::new(source.ip(), self.config.remote_port);
            if self.peer != Some(peer) {
                log::info!("learned host address {}", peer);
                self.peer = Some(peer);
            }
            events.push(LinkEvent::Beacon { source });
        }

        events
    }

    fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    fn send_handshake(&mut self) -> Result<usize> {
        self.send_bytes(HANDSHAKE_PROBE.as_bytes())
    }

    fn send_readings(&mut self, readings: &[SensorReading]) -> Result<usize> {
        let frame = encode_frame(readings)?;
        self.send_bytes(&frame)
    }

    fn drop_peer(&mut self) {
        // The host address stays valid across sessions; beacons refresh it.
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.listeners.drain(..) {
            let _ = handle.join();
        }
        self.inbound = None;
        self.socket = None;
    }

    fn set_group_tag(&mut self, tag: &str) {
        self.config.group_tag = tag.to_string();
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.close();
    }
}
