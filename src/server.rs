//! TCP acceptor that turns inbound connections into sessions.
//!
//! Each accepted stream is wrapped in a [`Session`], wired to the
//! [`SessionHandler`] and started; the loop then goes straight back to
//! accepting. Session lifetime is fully decoupled from the accept loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::CloseReason;
use crate::runtime::{lock, Session, SessionOptions, SessionRegistry};

/// Listen backlog handed to the kernel.
const LISTEN_BACKLOG: i32 = 1024;

/// Owner-side view of session events.
///
/// Handlers that want to end a session should use [`Session::close`], so
/// the acceptor sees the close and releases the session's slot.
pub trait SessionHandler: Send + Sync + 'static {
    /// A session was accepted and is about to start reading.
    fn on_connect(&self, _session: &Arc<Session>) {}

    /// A complete message arrived.
    fn on_message(&self, session: &Arc<Session>, message: Bytes);

    /// The session closed. Fires once per session.
    fn on_close(&self, _session: &Arc<Session>, _reason: CloseReason) {}
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    options: SessionOptions,
    handler: Arc<dyn SessionHandler>,
    registry: Arc<Mutex<SessionRegistry>>,
}

impl Server {
    /// Bind a listener on `addr` and build a server around it.
    pub fn bind(
        addr: SocketAddr,
        options: SessionOptions,
        max_connections: usize,
        handler: Arc<dyn SessionHandler>,
    ) -> io::Result<Self> {
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        Ok(Self::new(listener, options, max_connections, handler))
    }

    pub fn new(
        listener: TcpListener,
        options: SessionOptions,
        max_connections: usize,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self {
            listener,
            options,
            handler,
            registry: Arc::new(Mutex::new(SessionRegistry::new(max_connections))),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` resolves, then stop accepting and close every live session.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(address = %self.listener.local_addr()?, "Server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => self.start_session(stream),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }

        let Server {
            listener, registry, ..
        } = self;
        drop(listener);

        let sessions = lock(&registry).drain();
        info!(sessions = sessions.len(), "Server shutting down");
        for session in sessions {
            session.close();
        }
        Ok(())
    }

    fn start_session(&self, stream: TcpStream) {
        // A peer that vanished before we could resolve it is dropped, not fatal.
        let address = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => {
                debug!(error = %e, "Discarding connection with unresolvable peer");
                return;
            }
        };
        let _ = stream.set_nodelay(true);

        let session = Session::new(stream, address, self.options);
        let key = match lock(&self.registry).insert(Arc::clone(&session)) {
            Some(key) => key,
            None => {
                warn!(peer = %session.address(), "Connection limit reached, dropping");
                return;
            }
        };

        let handler = Arc::clone(&self.handler);
        session.set_on_message(move |session, message| handler.on_message(session, message));

        let handler = Arc::clone(&self.handler);
        let registry = Arc::clone(&self.registry);
        session.set_on_close(move |session, reason| {
            lock(&registry).remove(key);
            info!(peer = %session.address(), %reason, "Connection closed");
            handler.on_close(session, reason);
        });

        info!(peer = %session.address(), "New connection");
        self.handler.on_connect(&session);
        session.startup();
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
