use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{SessionIdentity, Settings, TransportKind};
use crate::error::{Error, Result};

use super::protocol::{HANDSHAKE_PROBE, SensorReading, encode_frame};
use super::state::HandshakeMode;
use super::transport::{LinkEvent, Outbox, Transport};

const READ_BUFFER_SIZE: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub bind_addr: SocketAddr,
}

impl StreamConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], settings.local_port)),
        }
    }
}

enum Inbound {
    Accepted(TcpStream, SocketAddr),
    Data(u64, Vec<u8>),
    Closed(u64),
    Failed(u64, String),
}

struct Connection {
    id: u64,
    addr: SocketAddr,
    stream: TcpStream,
    outbox: Outbox,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    fn close(mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.outbox.close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        log::info!("closed connection to {}", self.addr);
    }
}

/// Listens for a single host connection at a time.
pub struct StreamTransport {
    config: StreamConfig,
    local_addr: Option<SocketAddr>,
    shutdown: Arc<AtomicBool>,
    occupied: Arc<AtomicBool>,
    tx: Option<Sender<Inbound>>,
    inbound: Option<Receiver<Inbound>>,
    acceptor: Option<JoinHandle<()>>,
    connection: Option<Connection>,
    next_id: u64,
}

impl StreamTransport {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            local_addr: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            occupied: Arc::new(AtomicBool::new(false)),
            tx: None,
            inbound: None,
            acceptor: None,
            connection: None,
            next_id: 1,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn spawn_acceptor(&mut self, listener: TcpListener, tx: Sender<Inbound>) -> Result<()> {
        listener.set_nonblocking(true)?;
        let shutdown = Arc::clone(&self.shutdown);
        let occupied = Arc::clone(&self.occupied);

        let handle = thread::Builder::new()
            .name("bodylink-tcp-accept".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, addr)) => {
                            if occupied.swap(true, Ordering::SeqCst) {
                                log::warn!("refusing {}: a host is already connected", addr);
                                let _ = stream.shutdown(Shutdown::Both);
                                continue;
                            }
                            if tx.send(Inbound::Accepted(stream, addr)).is_err() {
                                break;
                            }
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(POLL_INTERVAL);
                        }
                        Err(e) => {
                            log::error!("accept failed: {}", e);
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
                log::debug!("accept loop exiting");
            })?;

        self.acceptor = Some(handle);
        Ok(())
    }

    fn attach(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;

        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;

        let tx = self.tx.clone().ok_or(Error::NotStarted)?;
        let shutdown = Arc::clone(&self.shutdown);
        let mut reader_stream = stream.try_clone()?;

        let reader = thread::Builder::new()
            .name(format!("bodylink-tcp-read-{}", id))
            .spawn(move || {
                let mut buffer = [0u8; READ_BUFFER_SIZE];
                while !shutdown.load(Ordering::SeqCst) {
                    let event = match reader_stream.read(&mut buffer) {
                        Ok(0) => Inbound::Closed(id),
                        Ok(n) => Inbound::Data(id, buffer[..n].to_vec()),
                        Err(ref e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => Inbound::Failed(id, e.to_string()),
                    };

                    let done = !matches!(event, Inbound::Data(..));
                    if tx.send(event).is_err() || done {
                        break;
                    }
                }
            })?;

        let outbox = Outbox::spawn(&format!("bodylink-tcp-write-{}", id), stream.try_clone()?)?;

        log::info!("host connected from {}", addr);
        self.connection = Some(Connection {
            id,
            addr,
            stream,
            outbox,
            reader: Some(reader),
        });
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.occupied.store(false, Ordering::SeqCst);
    }

    fn current_id(&self) -> Option<u64> {
        self.connection.as_ref().map(|c| c.id)
    }

    fn outbox(&self) -> Result<&Outbox> {
        self.connection
            .as_ref()
            .map(|c| &c.outbox)
            .ok_or_else(|| Error::Transport("no host connected".to_string()))
    }
}

impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn handshake_mode(&self) -> HandshakeMode {
        HandshakeMode::Token
    }

    fn open(&mut self, _identity: &SessionIdentity) -> Result<()> {
        self.close();
        self.shutdown = Arc::new(AtomicBool::new(false));
        self.occupied = Arc::new(AtomicBool::new(false));

        let listener = TcpListener::bind(self.config.bind_addr)?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel();

        self.spawn_acceptor(listener, tx.clone())?;
        self.tx = Some(tx);
        self.inbound = Some(rx);
        self.local_addr = Some(local_addr);

        log::info!("stream transport listening on {}", local_addr);
        Ok(())
    }

    fn receive(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        let mut pending = Vec::new();

        if let Some(rx) = self.inbound.as_ref() {
            loop {
                match rx.try_recv() {
                    Ok(inbound) => pending.push(inbound),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        events.push(LinkEvent::Failed("stream listeners stopped".to_string()));
                        break;
                    }
                }
            }
        }

        for inbound in pending {
            match inbound {
                Inbound::Accepted(stream, addr) => {
                    if self.connection.is_some() {
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    match self.attach(stream, addr) {
                        Ok(()) => events.push(LinkEvent::PeerAttached),
                        Err(e) => {
                            self.occupied.store(false, Ordering::SeqCst);
                            events.push(LinkEvent::Failed(e.to_string()));
                        }
                    }
                }
                Inbound::Data(id, data) if Some(id) == self.current_id() => {
                    events.push(LinkEvent::Data(data));
                }
                Inbound::Closed(id) if Some(id) == self.current_id() => {
                    self.detach();
                    events.push(LinkEvent::PeerDetached);
                }
                Inbound::Failed(id, message) if Some(id) == self.current_id() => {
                    self.detach();
                    events.push(LinkEvent::Failed(message));
                }
                _ => {}
            }
        }

        if self.connection.as_ref().is_some_and(|c| c.outbox.has_failed()) {
            self.detach();
            events.push(LinkEvent::Failed("write to host failed".to_string()));
        }

        events
    }

    fn has_peer(&self) -> bool {
        self.connection.is_some()
    }

    fn send_handshake(&mut self) -> Result<usize> {
        self.outbox()?.send(HANDSHAKE_PROBE.as_bytes().to_vec())
    }

    fn send_readings(&mut self, readings: &[SensorReading]) -> Result<usize> {
        let frame = encode_frame(readings)?;
        self.outbox()?.send(frame)
    }

    fn drop_peer(&mut self) {
        self.detach();
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        self.detach();
        self.tx = None;
        self.inbound = None;
        self.local_addr = None;
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_binds_local_port() {
        let settings = Settings {
            local_port: 4567,
            ..Default::default()
        };
        assert_eq!(StreamConfig::from_settings(&settings).bind_addr.port(), 4567);
    }

    #[test]
    fn test_send_without_host_fails() {
        let mut transport = StreamTransport::new(StreamConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
        });
        transport.open(&SessionIdentity::default()).unwrap();
        assert!(transport.local_addr().is_some());
        assert!(!transport.has_peer());
        assert!(matches!(transport.send_handshake(), Err(Error::Transport(_))));
        transport.close();
        assert!(transport.local_addr().is_none());
    }
}
