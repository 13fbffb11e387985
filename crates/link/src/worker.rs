use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::net::{ConnectionState, LinkStats};
use crate::sensor::SensorSample;
use crate::session::{Session, SessionEvent};

#[derive(Debug, Clone)]
pub enum NodeInput {
    Sample(SensorSample),
    Reset,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStatus {
    pub state: ConnectionState,
    pub stats: LinkStats,
    pub ticks: u64,
}

/// Drives a session on its own thread at the configured tick interval.
pub struct SessionWorker {
    input: Sender<NodeInput>,
    events: Receiver<SessionEvent>,
    status: Arc<Mutex<WorkerStatus>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SessionWorker {
    pub fn spawn(mut session: Session) -> Result<Self> {
        session.start()?;

        let (input_tx, input_rx) = mpsc::channel::<NodeInput>();
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>();
        let status = Arc::new(Mutex::new(WorkerStatus::default()));
        let running = Arc::new(AtomicBool::new(true));

        let interval = session.config().tick_interval;
        let status_handle = Arc::clone(&status);
        let running_flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("bodylink-session".to_string())
            .spawn(move || {
                let _exit = ClearOnExit(Arc::clone(&running_flag));
                let mut ticks = 0u64;
                while running_flag.load(Ordering::SeqCst) {
                    let started = Instant::now();

                    for input in input_rx.try_iter() {
                        match input {
                            NodeInput::Sample(sample) => session.push_sample(sample),
                            NodeInput::Reset => session.request_reset(),
                        }
                    }

                    session.tick();
                    ticks += 1;
                    publish(&mut session, &event_tx, &status_handle, ticks);

                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }

                session.stop();
                publish(&mut session, &event_tx, &status_handle, ticks);
            })?;

        Ok(Self {
            input: input_tx,
            events: event_rx,
            status,
            running,
            handle: Some(handle),
        })
    }

    pub fn push(&self, input: NodeInput) {
        let _ = self.input.send(input);
    }

    pub fn try_events(&self) -> Vec<SessionEvent> {
        self.events.try_iter().collect()
    }

    pub fn wait_event(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stops the tick thread, which closes the transport before reporting Disconnected.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lowers the running flag when the tick thread ends, even by panic.
struct ClearOnExit(Arc<AtomicBool>);

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn publish(
    session: &mut Session,
    events: &Sender<SessionEvent>,
    status: &Mutex<WorkerStatus>,
    ticks: u64,
) {
    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    status.state = session.state();
    status.stats = session.stats();
    status.ticks = ticks;
    drop(status);

    for event in session.drain_events() {
        let _ = events.send(event);
    }
}
