//! A single connection to a build host: one socket, one outbound queue of
//! framed blocks, one inbound queue of decoded messages, and the partial
//! send/receive state the I/O worker resumes from cycle to cycle.
//!
//! The application side only ever touches `send`, `receive` and `close`; the
//! drive methods are called from the I/O worker alone.

use crate::net::frame::{frame, Unframer};
use crate::net::manager::Shared;
use crate::net::{NetError, NetResult, Notification, Observer};
use crate::proto::{self, Message, ProtoResult};
use mio::net::TcpStream;
use mio::{Interest, Token};
use plumb::dispatch::Dispatch;
use plumb::logging;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub type ConnectionId = usize;

// Upper bound on dequeue-and-write cycles per drive call, so one busy
// connection cannot starve the rest of the write set.
const SEND_BATCH: usize = 10;
const RECV_CHUNK: usize = 4096;

/// Socket-side state. Touched only by the I/O worker, except that `close`
/// tears it down.
struct Wire {
    stream: Option<TcpStream>,
    pending: Option<PartialSend>,
    unframer: Unframer,
    interest: Option<Interest>,
}

struct PartialSend {
    block: Vec<u8>,
    sent: usize,
}

pub struct Connection {
    id: ConnectionId,
    host: String,
    port: u16,
    manager: Weak<Shared>,
    dispatch: Arc<dyn Dispatch>,
    observer: Option<Arc<Observer>>,
    connected: AtomicBool,
    closed: AtomicBool,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    inbound: Mutex<VecDeque<Message>>,
    wire: Mutex<Wire>,
    log: logging::Logger,
}

impl Connection {
    /// Creation is the manager's business; a fresh connection has already
    /// issued its non-blocking connect and immediately announces that fact.
    pub(crate) fn new(
        id: ConnectionId,
        host: &str,
        port: u16,
        stream: TcpStream,
        manager: Weak<Shared>,
        dispatch: Arc<dyn Dispatch>,
        observer: Option<Observer>,
        log: &logging::Logger,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection {
            id,
            host: host.to_string(),
            port,
            manager,
            dispatch,
            observer: observer.map(Arc::new),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            outbound: Mutex::new(VecDeque::new()),
            inbound: Mutex::new(VecDeque::new()),
            wire: Mutex::new(Wire {
                stream: Some(stream),
                pending: None,
                unframer: Unframer::new(),
                interest: Some(Interest::WRITABLE),
            }),
            log: log.new(logging::o!("connection_id" => id)),
        });

        connection.notify(Notification::Connecting);
        connection
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encodes, frames and queues a message. Never blocks and never fails for
    /// a disconnected-but-not-closed connection; queued bytes that never make
    /// it out are dropped when the connection closes.
    pub fn send(&self, message: &Message) -> ProtoResult<()> {
        let payload = proto::encode(message)?;

        self.outbound().push_back(frame(&payload));
        logging::trace!(self.log, "message queued"; "kind" => message.kind());

        if let Some(manager) = self.manager.upgrade() {
            manager.wake();
        }

        Ok(())
    }

    /// Takes the next decoded message off the inbound queue, if any.
    pub fn receive(&self) -> Option<Message> {
        self.inbound().pop_front()
    }

    /// Closes the connection: drops it from the manager, shuts the socket
    /// down both ways and raises `Closed` exactly once. Safe to call from any
    /// thread, any number of times.
    pub fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = self.manager.upgrade();
        if let Some(manager) = &manager {
            manager.forget(self.id);
        }

        {
            let mut wire = self.wire();
            if let Some(mut stream) = wire.stream.take() {
                if let Some(manager) = &manager {
                    let _ = manager.deregister(&mut stream);
                }
                let _ = stream.shutdown(Shutdown::Both);
            }
            wire.pending = None;
            wire.unframer.clear();
            wire.interest = None;
        }

        self.connected.store(false, Ordering::SeqCst);
        self.outbound().clear();

        logging::debug!(self.log, "connection closed";
                        "host" => self.host.as_str(),
                        "port" => self.port);

        self.notify(Notification::Closed);
    }

    /// True when the I/O worker should watch this connection for write
    /// readiness: a connect is still resolving, or there are bytes to move.
    pub(crate) fn is_writable(&self) -> bool {
        let wire = self.wire();

        wire.stream.is_some()
            && (!self.connected.load(Ordering::SeqCst)
                || wire.pending.is_some()
                || !self.outbound().is_empty())
    }

    /// Write-readiness driver. The first write-ready check after a connect
    /// resolves the attempt one way or the other; after that it moves queued
    /// blocks onto the socket.
    pub(crate) fn do_send(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if !self.connected.load(Ordering::SeqCst) {
            match self.finish_connect() {
                Ok(true) => {
                    self.connected.store(true, Ordering::SeqCst);
                    logging::debug!(self.log, "connection established";
                                    "host" => self.host.as_str(),
                                    "port" => self.port);
                    self.notify(Notification::Connected);
                }
                Ok(false) => return,
                Err(err) => {
                    logging::debug!(self.log, "connection failed";
                                    "host" => self.host.as_str(),
                                    "port" => self.port,
                                    "error" => ?err);
                    self.notify(Notification::ConnectionFailed);
                    self.close();
                    return;
                }
            }
        }

        if let Err(err) = self.flush_outbound() {
            logging::warn!(self.log, "send failed";
                           "host" => self.host.as_str(),
                           "port" => self.port,
                           "error" => ?err);
            self.notify(Notification::SendError);
            self.close();
        }
    }

    /// Read-readiness driver: drains whatever the socket has, frames out any
    /// completed messages and queues them, raising `Message` for each. A zero
    /// byte read is the peer saying goodbye.
    pub(crate) fn do_receive(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        match self.pull_inbound() {
            Ok(false) => (),
            Ok(true) => {
                logging::debug!(self.log, "peer closed the connection";
                                "host" => self.host.as_str(),
                                "port" => self.port);
                self.close();
            }
            Err(err) => {
                logging::warn!(self.log, "receive failed";
                               "host" => self.host.as_str(),
                               "port" => self.port,
                               "error" => ?err);
                self.notify(Notification::RecvError);
                self.close();
            }
        }
    }

    /// Brings the poll registration in line with what the connection needs
    /// right now. Re-registering while a write backlog exists also re-arms
    /// edge readiness, so a bounded `do_send` picks up where it left off.
    pub(crate) fn sync_interest(&self, registry: &mio::Registry) {
        let connected = self.connected.load(Ordering::SeqCst);

        let mut guard = self.wire();
        let backlog = guard.pending.is_some() || !self.outbound().is_empty();

        let interest = if !connected {
            Interest::WRITABLE
        } else if backlog {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        if !interest.is_writable() && guard.interest == Some(interest) {
            return;
        }

        let Wire {
            stream,
            interest: current,
            ..
        } = &mut *guard;

        let stream = match stream.as_mut() {
            Some(stream) => stream,
            None => return,
        };

        match registry.reregister(stream, Token(self.id), interest) {
            Ok(()) => *current = Some(interest),
            Err(err) => {
                logging::warn!(self.log, "interest update failed"; "error" => ?err);
            }
        }
    }

    /// Resolves a pending connect: a stored socket error fails it, a
    /// reachable peer address completes it, anything else is still in flight.
    fn finish_connect(&self) -> io::Result<bool> {
        let mut wire = self.wire();
        let stream = match wire.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(false),
        };

        if let Some(err) = stream.take_error()? {
            return Err(err);
        }

        match stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(ref err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn flush_outbound(&self) -> io::Result<()> {
        let mut guard = self.wire();
        let Wire {
            stream, pending, ..
        } = &mut *guard;

        let stream = match stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(()),
        };

        for _ in 0..SEND_BATCH {
            if pending.is_none() {
                match self.outbound().pop_front() {
                    Some(block) => *pending = Some(PartialSend { block, sent: 0 }),
                    None => break,
                }
            }

            let current = pending.as_mut().expect("pending send must exist");
            match stream.write(&current.block[current.sent..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => {
                    current.sent += count;
                    if current.sent == current.block.len() {
                        *pending = None;
                    } else {
                        // Partial write; the socket buffer is full, resume
                        // next cycle.
                        break;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Returns Ok(true) on orderly peer close.
    fn pull_inbound(self: &Arc<Self>) -> NetResult<bool> {
        let mut chunk = [0u8; RECV_CHUNK];

        let mut guard = self.wire();
        let Wire {
            stream, unframer, ..
        } = &mut *guard;

        let stream = match stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(false),
        };

        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(count) => {
                    unframer.extend(&chunk[..count]);

                    while let Some(payload) = unframer.next_payload()? {
                        let message = proto::decode(&payload).map_err(NetError::from)?;
                        logging::trace!(self.log, "message received"; "kind" => message.kind());
                        self.inbound().push_back(message);
                        self.notify(Notification::Message);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(NetError::from(err)),
            }
        }
    }

    /// Posts a notification onto the host's main thread. After close, only
    /// the final `Closed` gets through.
    fn notify(self: &Arc<Self>, event: Notification) {
        if event != Notification::Closed && self.closed.load(Ordering::SeqCst) {
            return;
        }

        if let Some(observer) = &self.observer {
            let observer = observer.clone();
            let connection = Arc::clone(self);
            self.dispatch
                .post(Box::new(move || (*observer)(&connection, event)));
        }
    }

    #[inline]
    fn wire(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().expect("Wire state lock poisoned")
    }

    #[inline]
    fn outbound(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.outbound.lock().expect("Outbound queue lock poisoned")
    }

    #[inline]
    fn inbound(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.inbound.lock().expect("Inbound queue lock poisoned")
    }
}
