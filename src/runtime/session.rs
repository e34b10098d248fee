//! Framed session over one transport stream.
//!
//! A session runs two tasks once started:
//! - the read pipeline: header -> body -> message callback -> next header,
//!   with the idle timer armed only while waiting for a header,
//! - the write drain: pops encoded frames off an ordered queue and writes
//!   them one at a time.
//!
//! Both tasks hold an `Arc<Session>`, so the session outlives every
//! in-flight operation. State moves `Open -> Closing -> Closed`; `Closing`
//! lasts until both tasks have observed the shutdown signal and exited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::{CloseReason, TransportError};
use crate::runtime::codec::{Codec, HEADER_SIZE};
use crate::runtime::lock;

/// Any bidirectional byte stream a session can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Invoked with each decoded message body, on the session's read task.
pub type MessageCallback = Arc<dyn Fn(&Arc<Session>, Bytes) + Send + Sync>;

/// Invoked at most once when the session closes.
pub type CloseCallback = Box<dyn FnOnce(&Arc<Session>, CloseReason) + Send>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// Close requested, I/O tasks still draining.
    Closing,
    Closed,
}

/// Per-session settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub codec: Codec,
    /// Close with `Timeout` if no header arrives within this window.
    pub idle_timeout: Option<Duration>,
}

impl SessionOptions {
    /// Build options from a timeout in seconds, 0 meaning disabled.
    pub fn new(codec: Codec, idle_timeout_secs: u64) -> Self {
        Self {
            codec,
            idle_timeout: (idle_timeout_secs > 0).then(|| Duration::from_secs(idle_timeout_secs)),
        }
    }
}

/// Transport halves and queue receiver, parked until `startup`.
struct Parked {
    reader: BoxedReader,
    writer: BoxedWriter,
    outbound: mpsc::UnboundedReceiver<Bytes>,
}

struct Lifecycle {
    state: SessionState,
    parked: Option<Parked>,
    /// Running I/O tasks.
    in_flight: usize,
}

/// A live, framed connection.
pub struct Session {
    id: u64,
    address: String,
    options: SessionOptions,
    lifecycle: Mutex<Lifecycle>,
    on_message: Mutex<Option<MessageCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
    context: OnceLock<String>,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Wrap a transport. Nothing is read until [`Session::startup`].
    pub fn new<T: Transport>(stream: T, address: impl Into<String>, options: SessionOptions) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            address: address.into(),
            options,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Open,
                parked: Some(Parked {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    outbound: rx,
                }),
                in_flight: 0,
            }),
            on_message: Mutex::new(None),
            on_close: Mutex::new(None),
            context: OnceLock::new(),
            outbound: tx,
            shutdown,
        })
    }

    /// Process-unique identity, used as a set key by owners.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display address resolved when the transport was accepted or connected.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> SessionState {
        lock(&self.lifecycle).state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn set_on_message(&self, cb: impl Fn(&Arc<Session>, Bytes) + Send + Sync + 'static) {
        *lock(&self.on_message) = Some(Arc::new(cb));
    }

    pub fn set_on_close(&self, cb: impl FnOnce(&Arc<Session>, CloseReason) + Send + 'static) {
        *lock(&self.on_close) = Some(Box::new(cb));
    }

    /// Owner bookkeeping. Can be set once; later attempts return the rejected value.
    pub fn set_context(&self, context: String) -> Result<(), String> {
        self.context.set(context)
    }

    pub fn context(&self) -> Option<&str> {
        self.context.get().map(String::as_str)
    }

    /// Spawn the read pipeline and the write drain. Must run inside a tokio runtime.
    ///
    /// Calling it twice, or after close, does nothing.
    pub fn startup(self: &Arc<Self>) {
        let parked = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != SessionState::Open {
                return;
            }
            let Some(parked) = lifecycle.parked.take() else {
                return;
            };
            lifecycle.in_flight = 2;
            parked
        };

        debug!(peer = %self.address, session = self.id, "Session started");
        tokio::spawn(Arc::clone(self).read_loop(parked.reader));
        tokio::spawn(Arc::clone(self).write_loop(parked.writer, parked.outbound));
    }

    /// Encode `message` and queue it behind any earlier writes.
    ///
    /// Writes on a closed session, and messages too large for the header
    /// encoding, are dropped.
    pub fn write(&self, message: &[u8]) {
        if !self.is_open() {
            trace!(peer = %self.address, "Dropping write on closed session");
            return;
        }
        match self.options.codec.encode(message) {
            Ok(frame) => {
                // The receiver lives until the write task exits, which only happens after close.
                let _ = self.outbound.send(frame);
            }
            Err(e) => warn!(peer = %self.address, error = %e, "Dropping unencodable message"),
        }
    }

    /// Close and notify the owner through the close callback.
    pub fn close(self: &Arc<Self>) {
        self.close_with(CloseReason::Shutdown);
    }

    /// Clear both callbacks, then close. The owner is not notified.
    pub fn shutdown(self: &Arc<Self>) {
        lock(&self.on_message).take();
        lock(&self.on_close).take();
        self.close_with(CloseReason::Shutdown);
    }

    fn close_with(self: &Arc<Self>, reason: CloseReason) {
        let abandoned = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != SessionState::Open {
                return;
            }
            lifecycle.state = if lifecycle.in_flight > 0 {
                SessionState::Closing
            } else {
                SessionState::Closed
            };
            lifecycle.parked.take()
        };
        // Never started: the transport is dropped here.
        drop(abandoned);

        self.shutdown.send_replace(true);
        lock(&self.on_message).take();

        debug!(peer = %self.address, session = self.id, %reason, "Session closed");

        let on_close = lock(&self.on_close).take();
        if let Some(cb) = on_close {
            cb(self, reason);
        }
    }

    fn io_finished(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.in_flight = lifecycle.in_flight.saturating_sub(1);
        if lifecycle.in_flight == 0 && lifecycle.state == SessionState::Closing {
            lifecycle.state = SessionState::Closed;
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader) {
        let mut shutdown = self.shutdown.subscribe();
        let outcome = tokio::select! {
            reason = self.read_frames(&mut reader) => Some(reason),
            _ = closed(&mut shutdown) => None,
        };
        if let Some(reason) = outcome {
            self.close_with(reason);
        }
        self.io_finished();
    }

    async fn read_frames(self: &Arc<Self>, reader: &mut BoxedReader) -> CloseReason {
        let codec = self.options.codec;
        let mut header = [0u8; HEADER_SIZE];

        loop {
            // The idle timer restarts with every header read and never covers the body.
            let read = reader.read_exact(&mut header);
            let result = match self.options.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, read).await {
                    Ok(result) => result,
                    Err(_) => return CloseReason::Timeout,
                },
                None => read.await,
            };
            if let Err(e) = result {
                return TransportError::from(&e).into();
            }

            let len = match codec.peek_body_size(&header) {
                Ok(len) => len,
                Err(e) => {
                    warn!(peer = %self.address, error = %e, "Bad frame header");
                    return e.into();
                }
            };

            let mut body = BytesMut::zeroed(len);
            if let Err(e) = reader.read_exact(&mut body).await {
                return TransportError::from(&e).into();
            }
            trace!(peer = %self.address, len, "frame in");

            self.dispatch(body.freeze());
        }
    }

    fn dispatch(self: &Arc<Self>, body: Bytes) {
        let cb = lock(&self.on_message).clone();
        if let Some(cb) = cb {
            cb(self, body);
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: BoxedWriter,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
    ) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let frame = tokio::select! {
                biased;
                _ = closed(&mut shutdown) => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let result = tokio::select! {
                biased;
                _ = closed(&mut shutdown) => break,
                result = writer.write_all(&frame) => result,
            };
            if let Err(e) = result {
                warn!(peer = %self.address, error = %e, "Write failed");
                self.close_with(TransportError::from(&e).into());
                break;
            }
            trace!(peer = %self.address, len = frame.len() - HEADER_SIZE, "frame out");
        }

        let _ = writer.shutdown().await;
        self.io_finished();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("context", &self.context.get())
            .finish()
    }
}

/// Resolves once the shutdown flag is raised (or its sender is gone).
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closing| *closing).await;
}
