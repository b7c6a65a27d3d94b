//! Owns the connection set and the single background I/O worker that drives
//! it. The manager hands out connections; the worker multiplexes them through
//! one readiness poll and calls their drive methods as sockets come ready.

use crate::net::connection::{Connection, ConnectionId};
use crate::net::{ErrorType, NetError, NetResult, Observer};
use indexmap::IndexMap;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use plumb::dispatch::Dispatch;
use plumb::logging;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAKER_TOKEN: Token = Token(0);
const FIRST_CONNECTION_ID: ConnectionId = 1;

const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const JOIN_TIMEOUT: Duration = Duration::from_millis(250);

/// State shared between the manager handle, the I/O worker and the
/// connections themselves (which reach back here to remove themselves and to
/// wake the poll when new outbound data appears).
pub(crate) struct Shared {
    connections: Mutex<IndexMap<ConnectionId, Arc<Connection>>>,
    registry: mio::Registry,
    waker: Waker,
    stop: AtomicBool,
    next_id: AtomicUsize,
    dispatch: Arc<dyn Dispatch>,
}

impl Shared {
    /// Drops a connection from the registry. Called from `Connection::close`.
    pub(crate) fn forget(&self, id: ConnectionId) {
        self.lock().swap_remove(&id);
    }

    pub(crate) fn deregister(&self, stream: &mut TcpStream) -> io::Result<()> {
        self.registry.deregister(stream)
    }

    /// Nudges the poll out of its timeout so freshly queued work is noticed
    /// immediately instead of on the next cycle.
    pub(crate) fn wake(&self) {
        let _ = self.waker.wake();
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, IndexMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .lock()
            .expect("Connection registry lock poisoned")
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    poll: Mutex<Option<Poll>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    log: logging::Logger,
}

impl ConnectionManager {
    /// Builds the manager and its poll. Nothing runs until `startup`.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        dispatch: Arc<dyn Dispatch>,
        log: L,
    ) -> NetResult<ConnectionManager> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::discard(),
        };

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let registry = poll.registry().try_clone()?;

        let shared = Arc::new(Shared {
            connections: Mutex::new(IndexMap::new()),
            registry,
            waker,
            stop: AtomicBool::new(false),
            next_id: AtomicUsize::new(FIRST_CONNECTION_ID),
            dispatch,
        });

        Ok(ConnectionManager {
            shared,
            poll: Mutex::new(Some(poll)),
            worker: Mutex::new(None),
            log,
        })
    }

    /// Launches the I/O worker.
    pub fn startup(&self) {
        let poll = self
            .poll
            .lock()
            .expect("Poll handoff lock poisoned")
            .take()
            .expect("I/O loop started twice");

        let shared = self.shared.clone();
        let log = self.log.new(logging::o!());

        let handle = thread::Builder::new()
            .name("girder-io".into())
            .spawn(move || run_loop(shared, poll, log))
            .expect("Failed to spawn the I/O thread");

        *self.worker.lock().expect("Worker handle lock poisoned") = Some(handle);
        logging::info!(self.log, "connection manager running");
    }

    /// Stops the I/O worker cooperatively, waits a bounded time for it to
    /// wind down, then closes every connection still in the registry.
    pub fn shutdown(&self) {
        logging::info!(self.log, "connection manager shutting down");

        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake();

        let worker = self.worker.lock().expect("Worker handle lock poisoned").take();
        if let Some(worker) = worker {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }

            if worker.is_finished() {
                let _ = worker.join();
            } else {
                logging::warn!(self.log, "io loop did not stop in time");
            }
        }

        let remaining: Vec<Arc<Connection>> = self.shared.lock().values().cloned().collect();
        for connection in remaining {
            connection.close();
        }
    }

    /// Starts a non-blocking connect to `host:port` and registers the new
    /// connection. The observer hears `Connecting` immediately; success or
    /// failure of the attempt arrives later through the same channel.
    pub fn connect(&self, host: &str, port: u16, observer: Observer) -> NetResult<Arc<Connection>> {
        let address = resolve(host, port)?;
        let mut stream = TcpStream::connect(address)?;

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .registry
            .register(&mut stream, Token(id), Interest::WRITABLE)?;

        let connection = Connection::new(
            id,
            host,
            port,
            stream,
            Arc::downgrade(&self.shared),
            self.shared.dispatch.clone(),
            Some(observer),
            &self.log,
        );

        self.shared.lock().insert(id, connection.clone());
        self.shared.wake();

        logging::debug!(self.log, "connection opened";
                        "host" => host,
                        "port" => port,
                        "connection_id" => id);

        Ok(connection)
    }

    /// All connections matching the given criteria; `None` matches anything.
    pub fn find_connections(&self, host: Option<&str>, port: Option<u16>) -> Vec<Arc<Connection>> {
        self.shared
            .lock()
            .values()
            .filter(|connection| {
                host.map_or(true, |host| connection.host() == host)
                    && port.map_or(true, |port| connection.port() == port)
            })
            .cloned()
            .collect()
    }
}

fn resolve(host: &str, port: u16) -> NetResult<SocketAddr> {
    let mut addresses = (host, port).to_socket_addrs().map_err(NetError::from)?;

    addresses
        .next()
        .ok_or(NetError::Fatal(ErrorType::AddrResolve))
}

/// The I/O worker. Each cycle: wait for readiness (bounded), drive the ready
/// connections, then bring every connection's registered interest back in
/// line with its current state so the next cycle sees what it should.
fn run_loop(shared: Arc<Shared>, mut poll: Poll, log: logging::Logger) {
    let mut events = Events::with_capacity(256);
    logging::debug!(log, "io loop running");

    while !shared.stop.load(Ordering::SeqCst) {
        if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            logging::error!(log, "readiness poll failed"; "error" => ?err);
            break;
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }

            let connection = shared.lock().get(&event.token().0).cloned();
            let connection = match connection {
                Some(connection) => connection,
                None => continue,
            };

            if event.is_writable() || event.is_error() {
                connection.do_send();
            }

            if event.is_readable() || event.is_read_closed() {
                connection.do_receive();
            }
        }

        let snapshot: Vec<Arc<Connection>> = shared.lock().values().cloned().collect();
        for connection in snapshot {
            connection.sync_interest(&shared.registry);
        }
    }

    logging::debug!(log, "io loop stopped");
}
