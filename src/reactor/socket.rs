//! Socket ownership for the reactor.
//!
//! Every socket is driven by small tokio tasks that only move bytes. Reads,
//! errors and connect completions come back to the loop as [`ReactorEvent`]s;
//! writes go out through a per-socket queue drained by a writer task.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::common::error::{ConnectionError, ConnectionResult};
use crate::reactor::{EndpointId, ReactorEvent};

const READ_CHUNK: usize = 8192;
const MAX_DATAGRAM: usize = 65536;

/// Identifies one socket for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketToken(u64);

impl std::fmt::Display for SocketToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Udp,
}

/// Data delivered to an endpoint's `on_readable` hook.
#[derive(Debug)]
pub enum Readable {
    /// Bytes read from a stream socket.
    Stream(Bytes),
    /// One datagram.
    Datagram { data: Bytes, from: SocketAddr },
    /// The peer closed the stream (zero-length read).
    Closed,
}

/// A freshly connected or bound socket waiting to be registered.
#[derive(Debug)]
pub enum OpenedSocket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

struct PendingSocket {
    owner: EndpointId,
    kind: SocketKind,
    task: Option<JoinHandle<()>>,
}

struct ManagedSocket {
    owner: EndpointId,
    writer: Option<UnboundedSender<Bytes>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

/// All sockets currently owned by endpoints.
pub struct SocketSet {
    next_token: u64,
    pending: HashMap<SocketToken, PendingSocket>,
    active: HashMap<SocketToken, ManagedSocket>,
    closing: Vec<JoinHandle<()>>,
    events: UnboundedSender<ReactorEvent>,
    detached: bool,
}

impl SocketSet {
    pub fn new(events: UnboundedSender<ReactorEvent>) -> Self {
        Self {
            next_token: 1,
            pending: HashMap::new(),
            active: HashMap::new(),
            closing: Vec::new(),
            events,
            detached: false,
        }
    }

    /// A set that never touches the network. Opens stay pending until a
    /// test attaches them.
    #[cfg(test)]
    pub fn detached(events: UnboundedSender<ReactorEvent>) -> Self {
        Self {
            detached: true,
            ..Self::new(events)
        }
    }

    fn allocate(&mut self) -> SocketToken {
        let token = SocketToken(self.next_token);
        self.next_token += 1;
        token
    }

    /// Start a TCP connect. Completion arrives as `ReactorEvent::Opened`.
    pub fn open_tcp(&mut self, owner: EndpointId, host: &str, port: u16) -> SocketToken {
        let token = self.allocate();
        let task = (!self.detached).then(|| {
            let events = self.events.clone();
            let host = host.to_string();
            tokio::spawn(async move {
                let result = connect_tcp(&host, port).await.map(OpenedSocket::Tcp);
                if events
                    .send(ReactorEvent::Opened { owner, token, result })
                    .is_err()
                {
                    trace!(%token, "Reactor gone before connect completed");
                }
            })
        });
        self.pending.insert(
            token,
            PendingSocket {
                owner,
                kind: SocketKind::Tcp,
                task,
            },
        );
        token
    }

    /// Start a UDP bind. Completion arrives as `ReactorEvent::Opened`.
    pub fn bind_udp(&mut self, owner: EndpointId, host: &str, port: u16) -> SocketToken {
        let token = self.allocate();
        let task = (!self.detached).then(|| {
            let events = self.events.clone();
            let host = host.to_string();
            tokio::spawn(async move {
                let result = UdpSocket::bind((host.as_str(), port))
                    .await
                    .map(OpenedSocket::Udp)
                    .map_err(|source| ConnectionError::BindFailed { host, port, source });
                if events
                    .send(ReactorEvent::Opened { owner, token, result })
                    .is_err()
                {
                    trace!(%token, "Reactor gone before bind completed");
                }
            })
        });
        self.pending.insert(
            token,
            PendingSocket {
                owner,
                kind: SocketKind::Udp,
                task,
            },
        );
        token
    }

    pub fn is_pending(&self, token: SocketToken) -> bool {
        self.pending.contains_key(&token)
    }

    pub fn is_registered(&self, token: SocketToken) -> bool {
        self.active.contains_key(&token)
    }

    #[cfg(test)]
    pub fn owner_of(&self, token: SocketToken) -> Option<EndpointId> {
        self.active
            .get(&token)
            .map(|socket| socket.owner)
            .or_else(|| self.pending.get(&token).map(|socket| socket.owner))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Drop a pending entry whose open failed.
    pub fn forget_pending(&mut self, token: SocketToken) {
        self.pending.remove(&token);
    }

    /// Register a completed open and start its I/O tasks.
    ///
    /// Returns the peer address for TCP and the local address for UDP.
    pub fn register(
        &mut self,
        token: SocketToken,
        opened: OpenedSocket,
    ) -> ConnectionResult<SocketAddr> {
        let Some(pending) = self.pending.remove(&token) else {
            return Err(ConnectionError::NotRegistered);
        };
        let owner = pending.owner;

        let (addr, socket) = match opened {
            OpenedSocket::Tcp(stream) => {
                let addr = stream.peer_addr()?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%token, "Failed to set TCP_NODELAY: {}", e);
                }
                let (read_half, write_half) = stream.into_split();
                let (tx, rx) = mpsc::unbounded_channel();
                let reader = tokio::spawn(read_stream(read_half, owner, token, self.events.clone()));
                let writer = tokio::spawn(write_stream(write_half, rx, owner, token, self.events.clone()));
                (
                    addr,
                    ManagedSocket {
                        owner,
                        writer: Some(tx),
                        reader_task: Some(reader),
                        writer_task: Some(writer),
                    },
                )
            }
            OpenedSocket::Udp(socket) => {
                let addr = socket.local_addr()?;
                let reader = tokio::spawn(read_datagrams(socket, owner, token, self.events.clone()));
                (
                    addr,
                    ManagedSocket {
                        owner,
                        writer: None,
                        reader_task: Some(reader),
                        writer_task: None,
                    },
                )
            }
        };

        debug!(%token, %addr, "Socket registered");
        self.active.insert(token, socket);
        Ok(addr)
    }

    /// Queue bytes on a registered stream socket.
    pub fn send(&mut self, token: SocketToken, data: Bytes) -> ConnectionResult<()> {
        let writer = self
            .active
            .get(&token)
            .and_then(|socket| socket.writer.as_ref())
            .ok_or(ConnectionError::NotRegistered)?;
        writer
            .send(data)
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    /// Deregister a socket. Queued writes are still flushed before the
    /// write half shuts down. Returns false if the token was unknown.
    pub fn close(&mut self, token: SocketToken) -> bool {
        if let Some(pending) = self.pending.remove(&token) {
            if let Some(task) = pending.task {
                task.abort();
            }
            debug!(%token, "Pending socket cancelled");
            return true;
        }

        let Some(mut socket) = self.active.remove(&token) else {
            return false;
        };
        if let Some(reader) = socket.reader_task.take() {
            reader.abort();
        }
        // Dropping the sender lets the writer drain and exit.
        socket.writer.take();
        if let Some(writer) = socket.writer_task.take() {
            self.closing.push(writer);
        }
        self.closing.retain(|task| !task.is_finished());
        debug!(%token, "Socket closed");
        true
    }

    /// Close everything and hand back the writer tasks still flushing.
    pub fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        let tokens: Vec<SocketToken> = self
            .pending
            .keys()
            .chain(self.active.keys())
            .copied()
            .collect();
        for token in tokens {
            self.close(token);
        }
        std::mem::take(&mut self.closing)
    }

    /// Register a pending socket without any I/O task and return the queue
    /// its writes land in.
    #[cfg(test)]
    pub fn attach_detached(&mut self, token: SocketToken) -> Option<UnboundedReceiver<Bytes>> {
        let pending = self.pending.remove(&token)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.active.insert(
            token,
            ManagedSocket {
                owner: pending.owner,
                writer: (pending.kind == SocketKind::Tcp).then_some(tx),
                reader_task: None,
                writer_task: None,
            },
        );
        Some(rx)
    }

    /// Most recent pending socket of `kind` owned by `owner`.
    #[cfg(test)]
    pub fn pending_token(&self, owner: EndpointId, kind: SocketKind) -> Option<SocketToken> {
        self.pending
            .iter()
            .filter(|(_, socket)| socket.owner == owner && socket.kind == kind)
            .map(|(token, _)| *token)
            .max_by_key(|token| token.0)
    }
}

/// Resolve `host` off the loop and try each address in order.
async fn connect_tcp(host: &str, port: u16) -> ConnectionResult<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ConnectionError::ResolveFailed {
            host: host.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectionError::NoAddresses {
            host: host.to_string(),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, "Connect attempt failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(ConnectionError::ConnectFailed {
        host: host.to_string(),
        port,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address connected")),
    })
}

async fn read_stream(
    mut half: OwnedReadHalf,
    owner: EndpointId,
    token: SocketToken,
    events: UnboundedSender<ReactorEvent>,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        let event = match half.read_buf(&mut buf).await {
            Ok(0) => ReactorEvent::Readable {
                owner,
                token,
                data: Readable::Closed,
            },
            Ok(n) => {
                trace!(%token, bytes = n, "Read");
                ReactorEvent::Readable {
                    owner,
                    token,
                    data: Readable::Stream(buf.split().freeze()),
                }
            }
            Err(error) => ReactorEvent::Error { owner, token, error },
        };
        let last = !matches!(
            event,
            ReactorEvent::Readable {
                data: Readable::Stream(_),
                ..
            }
        );
        if events.send(event).is_err() || last {
            return;
        }
    }
}

async fn write_stream(
    mut half: OwnedWriteHalf,
    mut queue: UnboundedReceiver<Bytes>,
    owner: EndpointId,
    token: SocketToken,
    events: UnboundedSender<ReactorEvent>,
) {
    while let Some(chunk) = queue.recv().await {
        if let Err(error) = half.write_all(&chunk).await {
            if events
                .send(ReactorEvent::Error { owner, token, error })
                .is_err()
            {
                trace!(%token, "Reactor gone while reporting write error");
            }
            return;
        }
    }
    if let Err(e) = half.shutdown().await {
        trace!(%token, "Write shutdown failed: {}", e);
    }
}

async fn read_datagrams(
    socket: UdpSocket,
    owner: EndpointId,
    token: SocketToken,
    events: UnboundedSender<ReactorEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let event = match socket.recv_from(&mut buf).await {
            Ok((n, from)) => ReactorEvent::Readable {
                owner,
                token,
                data: Readable::Datagram {
                    data: Bytes::copy_from_slice(&buf[..n]),
                    from,
                },
            },
            Err(error) => ReactorEvent::Error { owner, token, error },
        };
        let failed = matches!(event, ReactorEvent::Error { .. });
        if events.send(event).is_err() || failed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_open_and_attach() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sockets = SocketSet::detached(tx);

        let token = sockets.open_tcp(3, "irc.example.net", 6667);
        assert!(sockets.is_pending(token));
        assert_eq!(sockets.pending_token(3, SocketKind::Tcp), Some(token));
        assert_eq!(sockets.owner_of(token), Some(3));
        assert!(matches!(
            sockets.send(token, Bytes::from_static(b"x")),
            Err(ConnectionError::NotRegistered)
        ));

        let mut written = sockets.attach_detached(token).unwrap();
        assert!(sockets.is_registered(token));
        sockets.send(token, Bytes::from_static(b"NICK Bot\r\n")).unwrap();
        assert_eq!(written.try_recv().unwrap(), Bytes::from_static(b"NICK Bot\r\n"));

        assert!(sockets.close(token));
        assert!(!sockets.is_registered(token));
        assert!(!sockets.close(token));
    }

    #[test]
    fn test_udp_socket_has_no_writer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sockets = SocketSet::detached(tx);
        let token = sockets.bind_udp(0, "0.0.0.0", 25585);
        sockets.attach_detached(token).unwrap();
        assert!(sockets.is_registered(token));
        assert!(sockets.send(token, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_close_pending_socket() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sockets = SocketSet::detached(tx);
        let token = sockets.open_tcp(0, "localhost", 1);
        assert!(sockets.close(token));
        assert!(!sockets.is_pending(token));
        assert!(sockets.attach_detached(token).is_none());
    }
}
