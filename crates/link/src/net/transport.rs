use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use crate::config::{SessionIdentity, TransportKind};
use crate::error::{Error, Result};

use super::protocol::SensorReading;
use super::state::HandshakeMode;

/// Something a listener thread observed on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Beacon { source: SocketAddr },
    Data(Vec<u8>),
    PeerAttached,
    PeerDetached,
    Failed(String),
}

/// One concrete way of moving readings to a host.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn handshake_mode(&self) -> HandshakeMode;

    /// Binds sockets and starts listener threads or advertising.
    fn open(&mut self, identity: &SessionIdentity) -> Result<()>;

    /// Everything the listeners observed since the previous call. Never blocks.
    fn receive(&mut self) -> Vec<LinkEvent>;

    /// Whether there is currently a peer to send to.
    fn has_peer(&self) -> bool;

    fn send_handshake(&mut self) -> Result<usize>;

    fn send_readings(&mut self, readings: &[SensorReading]) -> Result<usize>;

    /// Lets go of the current peer after a timeout or link error.
    fn drop_peer(&mut self);

    /// Stops listeners and releases every handle. Idempotent.
    fn close(&mut self);

    fn set_group_tag(&mut self, _tag: &str) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub handshakes_sent: u64,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub messages_dropped: u64,
}

/// Writer thread so a slow peer never blocks the tick.
pub struct Outbox {
    tx: Option<Sender<Vec<u8>>>,
    failed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Outbox {
    pub fn spawn<W>(name: &str, mut writer: W) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = Arc::clone(&failed);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for bytes in rx {
                    if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                        log::warn!("write failed: {}", e);
                        failed_flag.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            failed,
            handle: Some(handle),
        })
    }

    pub fn send(&self, bytes: Vec<u8>) -> Result<usize> {
        if self.has_failed() {
            return Err(Error::Transport("writer stopped".to_string()));
        }

        let len = bytes.len();
        let tx = self.tx.as_ref().ok_or(Error::NotStarted)?;
        tx.send(bytes)
            .map_err(|_| Error::Transport("writer stopped".to_string()))?;
        Ok(len)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn close(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_outbox_writes_in_order() {
        let sink = SharedSink::default();
        let mut outbox = Outbox::spawn("test-outbox", sink.clone()).unwrap();

        assert_eq!(outbox.send(b"ACKN".to_vec()).unwrap(), 4);
        outbox.send(b"{}".to_vec()).unwrap();
        outbox.close();

        assert_eq!(sink.0.lock().unwrap().as_slice(), b"ACKN{}");
    }

    #[test]
    fn test_outbox_reports_failure() {
        let outbox = Outbox::spawn("test-broken", BrokenSink).unwrap();
        let _ = outbox.send(b"ACKN".to_vec());

        let start = std::time::Instant::now();
        while !outbox.has_failed() && start.elapsed() < std::time::Duration::from_secs(2) {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(outbox.has_failed());
        assert!(outbox.send(b"ACKN".to_vec()).is_err());
    }

    #[test]
    fn test_send_after_close_fails() {
        let mut outbox = Outbox::spawn("test-closed", SharedSink::default()).unwrap();
        outbox.close();
        assert!(matches!(outbox.send(vec![1]), Err(Error::NotStarted)));
    }
}
