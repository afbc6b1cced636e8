use crate::protocol::{Frame, FrameKind, InboundMsg, OutboundMsg};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;

pub const DEFAULT_ADDR: &str = "127.0.0.1:7777";

struct ActiveClient {
    ws: tungstenite::WebSocket<TcpStream>,
    socket_addr: SocketAddr,
}

/// Websocket server thread standing in for the native host's loopback socket.
/// One UI at a time: a new connection replaces the previous one.
pub struct NetworkThread {
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    listen_addr: SocketAddr,
}

impl NetworkThread {
    pub fn spawn(in_tx: Sender<InboundMsg>, out_rx: Receiver<OutboundMsg>) -> io::Result<Self> {
        Self::spawn_with_addr(DEFAULT_ADDR, in_tx, out_rx)
    }

    pub fn spawn_with_addr(
        addr: &str,
        in_tx: Sender<InboundMsg>,
        out_rx: Receiver<OutboundMsg>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);

        let join_handle =
            thread::spawn(move || run_server(listener, in_tx, out_rx, shutdown_for_thread));

        Ok(Self {
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
            listen_addr,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_server(
    listener: TcpListener,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
) {
    let mut active: Option<ActiveClient> = None;

    while !shutdown.load(Ordering::Relaxed) {
        loop {
            match listener.accept() {
                Ok((stream, socket_addr)) => {
                    let Some(ws) = accept_client(stream) else {
                        continue;
                    };

                    if let Some(mut prev) = active.take() {
                        info!(addr = %prev.socket_addr, "replacing ui connection");
                        let _ = prev.ws.close(None);
                        let _ = in_tx.try_send(InboundMsg::ClientDisconnected);
                    }

                    if in_tx
                        .try_send(InboundMsg::ClientConnected { socket_addr })
                        .is_err()
                    {
                        warn!(addr = %socket_addr, "host loop busy, refusing ui connection");
                        let mut ws = ws;
                        let _ = ws.close(None);
                        continue;
                    }

                    info!(addr = %socket_addr, "ui connected");
                    active = Some(ActiveClient { ws, socket_addr });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("ws accept failed: {e}");
                    break;
                }
            }
        }

        if let Some(client) = active.as_mut() {
            loop {
                match out_rx.try_recv() {
                    Ok(OutboundMsg::Send { frame }) => {
                        if client.ws.send(Message::Text(frame.into())).is_err() {
                            let _ = client.ws.close(None);
                            active = None;
                            let _ = in_tx.try_send(InboundMsg::ClientDisconnected);
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
        }

        // At most one inbound message per pass; the read timeout keeps the loop moving.
        if let Some(client) = active.as_mut() {
            match client.ws.read() {
                Ok(msg) => {
                    if handle_inbound(&in_tx, client, msg).is_err() {
                        let _ = client.ws.close(None);
                        active = None;
                        let _ = in_tx.try_send(InboundMsg::ClientDisconnected);
                    }
                }
                Err(tungstenite::Error::Io(e))
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    debug!("ui connection closed: {e}");
                    active = None;
                    let _ = in_tx.try_send(InboundMsg::ClientDisconnected);
                }
            }
        } else {
            thread::sleep(Duration::from_millis(25));
        }
    }

    if let Some(mut client) = active {
        let _ = client.ws.close(None);
    }
}

fn accept_client(stream: TcpStream) -> Option<tungstenite::WebSocket<TcpStream>> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));

    let ws = match tungstenite::accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            warn!("ws handshake failed: {e}");
            return None;
        }
    };
    let _ = ws.get_ref().set_read_timeout(Some(Duration::from_millis(30)));
    Some(ws)
}

fn handle_inbound(
    in_tx: &Sender<InboundMsg>,
    client: &mut ActiveClient,
    msg: Message,
) -> Result<(), ()> {
    let text = match msg {
        Message::Text(s) => s.to_string(),
        Message::Binary(_) => return Ok(()),
        Message::Ping(payload) => {
            let _ = client.ws.send(Message::Pong(payload));
            return Ok(());
        }
        Message::Pong(_) => return Ok(()),
        Message::Close(_) => return Err(()),
        Message::Frame(_) => return Ok(()),
    };

    match in_tx.try_send(InboundMsg::Frame { text: text.clone() }) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            // Only calls can be answered; anything else is dropped.
            if let Ok(frame) = Frame::parse(&text) {
                if frame.kind == FrameKind::Call {
                    let reply = Frame::reject(frame.method, "host busy");
                    let _ = client.ws.send(Message::Text(reply.encode().into()));
                }
            }
            Ok(())
        }
        Err(TrySendError::Disconnected(_)) => Err(()),
    }
}
