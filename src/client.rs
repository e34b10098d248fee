//! Reconnecting client.
//!
//! Drives one session at a time through
//! `Disconnected -> Connecting -> Handshaking -> Established -> Disconnected`
//! forever, until the shutdown future resolves:
//!
//! - a failed connect, or the close of an established session, arms the
//!   reconnect timer before the next attempt,
//! - every successful connect sends exactly one handshake (`<id>$`),
//! - replies are buffered until the delimiter arrives; the bytes before it
//!   become the assigned id,
//! - keep-alive writes start only once the handshake reply is in.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::error::CloseReason;
use crate::protocols::broker::handshake;
use crate::runtime::session::MessageCallback;
use crate::runtime::{lock, Session, SessionOptions, Transport};

/// Opens outbound transports.
pub trait Connector: Send + Sync + 'static {
    type Stream: Transport;

    /// Where connections go, for logging.
    fn endpoint(&self) -> &str;

    /// Connect, returning the stream and the peer's display address.
    fn connect(&self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;
}

/// Connects to a fixed TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

impl TcpConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> impl Future<Output = io::Result<(TcpStream, String)>> + Send {
        let endpoint = self.endpoint.clone();
        async move {
            let stream = TcpStream::connect(&endpoint).await?;
            stream.set_nodelay(true)?;
            let address = stream.peer_addr()?.to_string();
            Ok((stream, address))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Handshaking,
    Established,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub session: SessionOptions,
    /// Delay before each reconnect attempt.
    pub reconnect_interval: Duration,
    /// Keep-alive period; `None` disables keep-alive.
    pub keepalive_interval: Option<Duration>,
    pub keepalive_payload: Bytes,
    /// Sent as `<handshake_id>$` right after connecting.
    pub handshake_id: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            reconnect_interval: Duration::from_secs(3),
            keepalive_interval: None,
            keepalive_payload: Bytes::from_static(b"hello"),
            handshake_id: "hello".to_string(),
        }
    }
}

/// Read-only view of a running client.
#[derive(Clone)]
pub struct ClientHandle {
    state: watch::Receiver<ClientState>,
    id: Arc<Mutex<Option<String>>>,
}

impl ClientHandle {
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Id assigned by the current connection's handshake reply.
    pub fn id(&self) -> Option<String> {
        lock(&self.id).clone()
    }

    /// Wait until the client reaches `state`.
    pub async fn wait_for(&mut self, state: ClientState) {
        let _ = self.state.wait_for(|current| *current == state).await;
    }
}

enum Event {
    Message(Bytes),
    Closed(CloseReason),
}

enum Flow {
    Reconnect,
    Shutdown,
}

pub struct Client<C: Connector> {
    connector: C,
    options: ClientOptions,
    on_message: MessageCallback,
    state: watch::Sender<ClientState>,
    id: Arc<Mutex<Option<String>>>,
}

impl<C: Connector> Client<C> {
    pub fn new(connector: C, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            connector,
            options,
            on_message: Arc::new(|session: &Arc<Session>, message: Bytes| {
                trace!(peer = %session.address(), len = message.len(), "Message ignored");
            }),
            state,
            id: Arc::new(Mutex::new(None)),
        }
    }

    /// Handler for messages received once the session is established.
    pub fn set_on_message(&mut self, cb: impl Fn(&Arc<Session>, Bytes) + Send + Sync + 'static) {
        self.on_message = Arc::new(cb);
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            state: self.state.subscribe(),
            id: Arc::clone(&self.id),
        }
    }

    /// Run the connect/handshake/reconnect cycle until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            self.state.send_replace(ClientState::Connecting);
            let connected = tokio::select! {
                _ = shutdown.as_mut() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok((stream, address)) => {
                    if let Flow::Shutdown = self.run_session(stream, address, shutdown.as_mut()).await {
                        break;
                    }
                }
                Err(e) => warn!(endpoint = %self.connector.endpoint(), error = %e, "Connect failed"),
            }

            self.state.send_replace(ClientState::Disconnected);
            debug!(interval = ?self.options.reconnect_interval, "Waiting before reconnect");
            tokio::select! {
                _ = shutdown.as_mut() => break,
                _ = tokio::time::sleep(self.options.reconnect_interval) => {}
            }
        }

        self.state.send_replace(ClientState::Disconnected);
        info!("Client stopped");
    }

    async fn run_session<F>(&self, stream: C::Stream, address: String, mut shutdown: Pin<&mut F>) -> Flow
    where
        F: Future<Output = ()> + Send,
    {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let session = Session::new(stream, address, self.options.session);

        let tx = events_tx.clone();
        session.set_on_message(move |_, message| {
            let _ = tx.send(Event::Message(message));
        });
        session.set_on_close(move |_, reason| {
            let _ = events_tx.send(Event::Closed(reason));
        });

        info!(peer = %session.address(), "Connected");
        self.state.send_replace(ClientState::Handshaking);
        session.startup();
        session.write(&handshake::request(&self.options.handshake_id));

        let mut reply = BytesMut::new();
        let mut keepalive: Option<Interval> = None;
        let mut established = false;

        let flow = loop {
            tokio::select! {
                _ = shutdown.as_mut() => {
                    session.shutdown();
                    break Flow::Shutdown;
                }
                _ = tick(&mut keepalive) => {
                    trace!(peer = %session.address(), "Keep-alive");
                    session.write(&self.options.keepalive_payload);
                }
                event = events.recv() => match event {
                    Some(Event::Message(message)) => {
                        if established {
                            (self.on_message)(&session, message);
                        } else {
                            reply.extend_from_slice(&message);
                            if let Some(id) = self.complete_handshake(&reply) {
                                info!(peer = %session.address(), id = %id, "Handshake complete");
                                established = true;
                                keepalive = self.options.keepalive_interval.map(keepalive_timer);
                            }
                        }
                    }
                    Some(Event::Closed(reason)) => {
                        warn!(peer = %session.address(), %reason, "Connection closed");
                        break Flow::Reconnect;
                    }
                    None => break Flow::Reconnect,
                },
            }
        };

        lock(&self.id).take();
        flow
    }

    /// Record the id once the buffered reply holds the delimiter.
    fn complete_handshake(&self, reply: &[u8]) -> Option<String> {
        let (id, _) = handshake::parse(reply).ok()?;
        let id = String::from_utf8_lossy(id).into_owned();
        *lock(&self.id) = Some(id.clone());
        self.state.send_replace(ClientState::Established);
        Some(id)
    }
}

fn keepalive_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Next keep-alive tick, or never if keep-alive is not armed.
async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Codec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestConnector {
        failures: AtomicUsize,
        attempts: Arc<Mutex<Vec<Instant>>>,
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    impl Connector for TestConnector {
        type Stream = DuplexStream;

        fn endpoint(&self) -> &str {
            "test-server"
        }

        fn connect(&self) -> impl Future<Output = io::Result<(DuplexStream, String)>> + Send {
            lock(&self.attempts).push(Instant::now());
            let result = if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            } else {
                let (local, peer) = tokio::io::duplex(4096);
                let _ = self.peers.send(peer);
                Ok((local, "test-server".to_string()))
            };
            async move { result }
        }
    }

    struct Running {
        handle: ClientHandle,
        attempts: Arc<Mutex<Vec<Instant>>>,
        peers: mpsc::UnboundedReceiver<DuplexStream>,
        messages: mpsc::UnboundedReceiver<Bytes>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    }

    fn start(failures: usize, options: ClientOptions) -> Running {
        let (peer_tx, peers) = mpsc::unbounded_channel();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let connector = TestConnector {
            failures: AtomicUsize::new(failures),
            attempts: Arc::clone(&attempts),
            peers: peer_tx,
        };

        let mut client = Client::new(connector, options);
        let (msg_tx, messages) = mpsc::unbounded_channel();
        client.set_on_message(move |_, message| {
            let _ = msg_tx.send(message);
        });
        let handle = client.handle();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(client.run_until(async {
            let _ = stop_rx.await;
        }));

        Running {
            handle,
            attempts,
            peers,
            messages,
            stop,
            task,
        }
    }

    async fn read_frame(peer: &mut DuplexStream) -> Vec<u8> {
        let mut header = [0u8; 4];
        peer.read_exact(&mut header).await.unwrap();
        let mut body = vec![0u8; Codec::default().peek_body_size(&header).unwrap()];
        peer.read_exact(&mut body).await.unwrap();
        body
    }

    async fn send_frame(peer: &mut DuplexStream, msg: &[u8]) {
        peer.write_all(&Codec::default().encode(msg).unwrap()).await.unwrap();
    }

    async fn assert_silent(peer: &mut DuplexStream, window: Duration) {
        let mut buf = [0u8; 1];
        assert!(tokio::time::timeout(window, peer.read(&mut buf)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_failures_then_handshakes_once() {
        let mut c = start(3, ClientOptions::default());

        let mut peer = c.peers.recv().await.unwrap();
        assert_eq!(read_frame(&mut peer).await, b"hello$");
        assert_eq!(c.handle.state(), ClientState::Handshaking);

        send_frame(&mut peer, b"abc$").await;
        c.handle.wait_for(ClientState::Established).await;
        assert_eq!(c.handle.id().as_deref(), Some("abc"));

        let attempts = lock(&c.attempts).clone();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(3) && gap < Duration::from_secs(4));
        }

        // No second handshake on the same connection.
        assert_silent(&mut peer, Duration::from_secs(30)).await;

        c.stop.send(()).unwrap();
        c.task.await.unwrap();
        assert_eq!(c.handle.state(), ClientState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_reply_may_span_messages() {
        let mut c = start(0, ClientOptions::default());
        let mut peer = c.peers.recv().await.unwrap();
        read_frame(&mut peer).await;

        send_frame(&mut peer, b"ab").await;
        send_frame(&mut peer, b"c$tail").await;
        c.handle.wait_for(ClientState::Established).await;
        assert_eq!(c.handle.id().as_deref(), Some("abc"));

        send_frame(&mut peer, b"steady").await;
        assert_eq!(&c.messages.recv().await.unwrap()[..], b"steady");
        assert!(c.messages.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_starts_after_handshake() {
        let options = ClientOptions {
            keepalive_interval: Some(Duration::from_secs(5)),
            keepalive_payload: Bytes::from_static(b"ka"),
            ..ClientOptions::default()
        };
        let mut c = start(0, options);
        let mut peer = c.peers.recv().await.unwrap();
        assert_eq!(read_frame(&mut peer).await, b"hello$");

        // Nothing is sent while the handshake is outstanding.
        assert_silent(&mut peer, Duration::from_secs(20)).await;

        send_frame(&mut peer, b"id$").await;
        c.handle.wait_for(ClientState::Established).await;
        let established = Instant::now();

        assert_eq!(read_frame(&mut peer).await, b"ka");
        assert!(established.elapsed() >= Duration::from_secs(5));
        assert_eq!(read_frame(&mut peer).await, b"ka");
        assert!(established.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_returns_to_disconnected_and_reconnects() {
        let mut c = start(0, ClientOptions::default());

        let mut first = c.peers.recv().await.unwrap();
        read_frame(&mut first).await;
        send_frame(&mut first, b"one$").await;
        c.handle.wait_for(ClientState::Established).await;

        drop(first);
        c.handle.wait_for(ClientState::Disconnected).await;
        assert_eq!(c.handle.id(), None);

        let mut second = c.peers.recv().await.unwrap();
        assert_eq!(read_frame(&mut second).await, b"hello$");
        send_frame(&mut second, b"two$").await;
        c.handle.wait_for(ClientState::Established).await;
        assert_eq!(c.handle.id().as_deref(), Some("two"));

        let attempts = lock(&c.attempts).clone();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let c = start(usize::MAX, ClientOptions::default());
        tokio::time::sleep(Duration::from_secs(10)).await;

        c.stop.send(()).unwrap();
        c.task.await.unwrap();
        assert_eq!(c.handle.state(), ClientState::Disconnected);
        assert_eq!(lock(&c.attempts).len(), 4);
    }

    #[tokio::test]
    async fn test_tcp_connector_resolves_peer_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = TcpConnector::new(addr.to_string());
        assert_eq!(connector.endpoint(), addr.to_string());

        let (_stream, address) = connector.connect().await.unwrap();
        assert_eq!(address, addr.to_string());
    }
}
