//! Scripted transports and fetchers for channel lifecycle tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Semaphore, mpsc};

use livefeed::{
    ChannelError, ChannelResult, FallbackFetcher, TransportEvent, TransportFactory,
    TransportHandle,
};

/// Payload type used across the scenario tests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tick {
    pub seq: u64,
}

pub fn tick_json(seq: u64) -> String {
    format!("{{\"seq\":{seq}}}")
}

/// One scripted response to a factory `open()` call.
pub enum ScriptedOpen {
    /// The open attempt fails.
    Fail(&'static str),
    /// The open attempt succeeds with this handle.
    Succeed(ScriptedHandle),
}

/// Factory that replays a script of open outcomes. Once the script is
/// exhausted, further opens pend forever (they still count).
pub struct ScriptedFactory {
    script: Mutex<VecDeque<ScriptedOpen>>,
    opens: AtomicU32,
}

impl ScriptedFactory {
    pub fn new(script: impl IntoIterator<Item = ScriptedOpen>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            opens: AtomicU32::new(0),
        })
    }

    /// Append another outcome to the script.
    pub fn push(&self, open: ScriptedOpen) {
        self.script.lock().expect("script lock").push_back(open);
    }

    /// Number of `open()` calls observed so far.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn open(&self, _endpoint: &str) -> ChannelResult<Box<dyn TransportHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(ScriptedOpen::Fail(reason)) => Err(ChannelError::Transport(reason.into())),
            Some(ScriptedOpen::Succeed(handle)) => Ok(Box::new(handle)),
            None => std::future::pending().await,
        }
    }
}

/// Transport handle fed by the test through an event sender.
pub struct ScriptedHandle {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    closed: Arc<AtomicBool>,
}

/// Create a handle plus its controls: an event feeder and a flag recording
/// whether the manager closed the handle.
pub fn scripted_handle() -> (
    ScriptedHandle,
    mpsc::UnboundedSender<TransportEvent>,
    Arc<AtomicBool>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        ScriptedHandle {
            events: rx,
            closed: Arc::clone(&closed),
        },
        tx,
        closed,
    )
}

#[async_trait]
impl TransportHandle for ScriptedHandle {
    async fn next_event(&mut self) -> TransportEvent {
        match self.events.recv().await {
            Some(event) => event,
            // Feeder dropped without a terminal event: stay silent so tests
            // control every transition explicitly.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Fetcher returning `Tick { seq: poll_seq }` immediately, counting calls.
pub struct CountingFetcher {
    calls: AtomicU32,
    pub poll_seq: u64,
}

impl CountingFetcher {
    pub fn new(poll_seq: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            poll_seq,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackFetcher<Tick> for CountingFetcher {
    async fn fetch(&self) -> ChannelResult<Tick> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Tick { seq: self.poll_seq })
    }
}

/// Fetcher that blocks until the test releases a permit.
pub struct GatedFetcher {
    gate: Semaphore,
    calls: AtomicU32,
    pub poll_seq: u64,
}

impl GatedFetcher {
    pub fn new(poll_seq: u64) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicU32::new(0),
            poll_seq,
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackFetcher<Tick> for GatedFetcher {
    async fn fetch(&self) -> ChannelResult<Tick> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(Tick { seq: self.poll_seq })
    }
}
