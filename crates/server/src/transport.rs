//! WebSocket transport.
//!
//! One thread accepts TCP connections; each client then gets its own thread
//! that performs the WebSocket handshake, forwards inbound text frames to the
//! [`Dispatcher`] and drains the client's outbound queue.
//!
//! Broadcasting never blocks: every client has a bounded queue and a full
//! queue drops the frame for that client only.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use tama_ws_core::{Broadcast, Dispatcher, Outbound};
use tungstenite::{Error as WsError, Message, WebSocket};

/// How long a connection thread waits for inbound data before checking its
/// outbound queue.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on a single socket write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// A client must complete the WebSocket handshake within this time.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    id: u64,
    addr: SocketAddr,
    tx: SyncSender<String>,
}

#[derive(Default)]
struct Hub {
    clients: Vec<Client>,
    closed: bool,
}

/// Registry of connected clients and their outbound queues.
pub struct ClientHub {
    state: Mutex<Hub>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl ClientHub {
    pub fn new(queue_depth: usize) -> Self {
        ClientHub {
            state: Mutex::new(Hub::default()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// `None` once the hub is closed.
    fn register(&self, addr: SocketAddr) -> Option<(u64, Receiver<String>)> {
        let mut hub = self.lock();
        if hub.closed {
            return None;
        }
        let (tx, rx) = mpsc::sync_channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        hub.clients.push(Client { id, addr, tx });
        Some((id, rx))
    }

    fn unregister(&self, id: u64) {
        self.lock().clients.retain(|c| c.id != id);
    }

    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every outbound queue and refuse new clients; connection threads
    /// flush what is left and close their sockets.
    pub fn close_all(&self) {
        let mut hub = self.lock();
        hub.closed = true;
        hub.clients.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Broadcast for ClientHub {
    fn broadcast(&self, text: &str) {
        self.lock().clients.retain(|client| match client.tx.try_send(text.to_owned()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("[{}] outbound queue full, dropping frame", client.addr);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Listening WebSocket server.
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    handshake_timeout: Duration,
}

impl Server {
    pub fn bind(host: &str, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        let addr = listener.local_addr()?;
        info!("WebSocket server listening on ws://{}", addr);
        Ok(Server { listener, addr, handshake_timeout: HANDSHAKE_TIMEOUT })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept clients on a background thread.
    ///
    /// Connection thread handles are collected in the returned registry so the
    /// caller can wait for them to flush after halting.
    pub fn spawn(
        self,
        hub: Arc<ClientHub>,
        outbound: Outbound,
        dispatcher: Dispatcher,
    ) -> Arc<Mutex<Vec<JoinHandle<()>>>> {
        let sessions: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let registry = sessions.clone();
        let handshake_timeout = self.handshake_timeout;
        thread::spawn(move || {
            for stream in self.listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let hub = hub.clone();
                let outbound = outbound.clone();
                let dispatcher = dispatcher.clone();
                let handle = thread::spawn(move || {
                    if let Err(e) = serve_client(stream, handshake_timeout, &hub, &outbound, &dispatcher) {
                        warn!("connection error: {}", e);
                    }
                });
                let mut sessions = registry.lock().unwrap_or_else(|p| p.into_inner());
                sessions.retain(|h| !h.is_finished());
                sessions.push(handle);
            }
        });
        sessions
    }
}

fn is_timeout(e: &WsError) -> bool {
    matches!(e, WsError::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

fn serve_client(
    stream: TcpStream,
    handshake_timeout: Duration,
    hub: &ClientHub,
    outbound: &Outbound,
    dispatcher: &Dispatcher,
) -> Result<(), WsError> {
    let addr = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    // a silent peer must not pin this thread past shutdown
    stream.set_read_timeout(Some(handshake_timeout))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let mut ws = tungstenite::accept(stream).map_err(|e| match e {
        tungstenite::HandshakeError::Failure(e) => e,
        tungstenite::HandshakeError::Interrupted(_) => {
            WsError::Io(std::io::Error::new(ErrorKind::TimedOut, "handshake timed out"))
        }
    })?;
    ws.get_ref().set_read_timeout(Some(POLL_INTERVAL))?;

    let Some((id, rx)) = hub.register(addr) else {
        debug!("[{}] hub closed, dropping connection", addr);
        let _ = ws.close(None);
        let _ = ws.flush();
        return Ok(());
    };
    info!("[{}] connected ({} clients)", addr, hub.len());
    // the joining client needs the current screen regardless of change suppression
    outbound.refresh_screen();

    let result = session_loop(&mut ws, addr, &rx, dispatcher);
    hub.unregister(id);
    info!("[{}] disconnected", addr);
    result
}

fn session_loop(
    ws: &mut WebSocket<TcpStream>,
    addr: SocketAddr,
    rx: &Receiver<String>,
    dispatcher: &Dispatcher,
) -> Result<(), WsError> {
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => {
                debug!("[{}] {}", addr, text.as_str());
                dispatcher.on_message(&text);
            }
            Ok(Message::Binary(_)) => warn!("[{}] binary frame ignored", addr),
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return Ok(()),
            Err(e) => return Err(e),
        }

        loop {
            match rx.try_recv() {
                Ok(text) => ws.send(Message::text(text))?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // hub closed: queue fully flushed, say goodbye
                    ws.close(None)?;
                    ws.flush()?;
                    return Ok(());
                }
            }
        }
    }
}
