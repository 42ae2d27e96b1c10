//! Worker-pool server.
//!
//! Each serving entry point spawns `workers` threads, every one owning a
//! [`ParamBuffer`] and looping block-with-timeout → execute → send, plus
//! one reaper thread for idle sessions and replay entries.
//!
//! Stream transports also run an acceptor and one reader thread per
//! connection. Readers queue whole requests for the pool, so any number
//! of connections can stay open while `workers` bounds concurrent work.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cramrpc_auth::{AuthConfig, KeyRecord, UserData};
use cramrpc_transport::{DatagramSocket, IpcStream, Rendezvous, TcpSocket, TransportError};
use cramrpc_wire::{
    MessageReader, MessageWriter, ParamBuffer, Region, Status, WireConfig, WireError,
    HEADER_SIZE,
};
use tracing::{debug, info, warn};

#[cfg(unix)]
use cramrpc_transport::UnixDomainSocket;

use crate::config::ServerConfig;
use crate::dispatch::{Acl, Call, Dispatcher, Object, Outcome, Procedure};
use crate::error::{PeerError, Result};
use crate::replay::Identity;

/// A configured server, ready to serve one or more transports.
#[derive(Debug, Clone)]
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    next_connection: Arc<AtomicU64>,
}

/// Collects registrations before the server starts.
pub struct ServerBuilder {
    config: ServerConfig,
    procedures: Vec<(u32, Procedure)>,
    objects: Vec<(u32, Object)>,
    keys: Vec<KeyRecord>,
    acl: Option<Acl>,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            procedures: Vec::new(),
            objects: Vec::new(),
            keys: Vec::new(),
            acl: None,
        }
    }

    /// The dispatch table, for registration after start.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve a stream listener. Connections are not tied to workers: an
    /// idle client holds no worker while it stays connected.
    pub fn serve_stream(&self, listener: impl Into<StreamListener>) -> Result<ServerHandle> {
        let listener = listener.into();
        let transport = listener.name();
        let connections: Connections = Arc::default();
        let queue = Arc::new(RequestQueue::new(self.config.workers * QUEUE_DEPTH));
        let running = Arc::new(AtomicBool::new(true));
        info!(transport, workers = self.config.workers, "serving stream");

        let mut threads = Vec::with_capacity(self.config.workers + 2);
        for worker in 0..self.config.workers {
            let dispatcher = Arc::clone(&self.dispatcher);
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let config = self.config.clone();
            threads.push(spawn_worker(transport, worker, move || {
                stream_worker(&dispatcher, &queue, &running, &config)
            })?);
        }
        let acceptor = Acceptor {
            listener,
            dispatcher: Arc::clone(&self.dispatcher),
            connections: Arc::clone(&connections),
            queue: Arc::clone(&queue),
            next_connection: Arc::clone(&self.next_connection),
            running: Arc::clone(&running),
            config: self.config.clone(),
        };
        threads.push(
            thread::Builder::new()
                .name(format!("cramrpc-{transport}-accept"))
                .spawn(move || acceptor.run())
                .map_err(|err| PeerError::Transport(err.into()))?,
        );
        threads.push(self.spawn_reaper(&running)?);

        let stop = move || {
            close_all(&connections);
            queue.wake();
        };
        Ok(ServerHandle::new(running, threads, Box::new(stop)))
    }

    /// Serve a bound datagram socket; all workers share it.
    pub fn serve_datagram(&self, socket: DatagramSocket) -> Result<ServerHandle> {
        let socket = Arc::new(socket);
        let running = Arc::new(AtomicBool::new(true));
        info!(
            addr = ?socket.local_addr().ok(),
            workers = self.config.workers,
            "serving datagram"
        );

        let mut threads = Vec::with_capacity(self.config.workers + 1);
        for worker in 0..self.config.workers {
            let dispatcher = Arc::clone(&self.dispatcher);
            let socket = Arc::clone(&socket);
            let running = Arc::clone(&running);
            let config = self.config.clone();
            threads.push(spawn_worker("udp", worker, move || {
                datagram_worker(&dispatcher, &socket, &running, &config)
            })?);
        }
        threads.push(self.spawn_reaper(&running)?);
        Ok(ServerHandle::new(running, threads, Box::new(|| {})))
    }

    /// Serve a shared-memory rendezvous region.
    pub fn serve_memory(&self, region: Rendezvous) -> Result<ServerHandle> {
        let running = Arc::new(AtomicBool::new(true));
        info!(workers = self.config.workers, "serving shared memory");

        let mut threads = Vec::with_capacity(self.config.workers + 1);
        for worker in 0..self.config.workers {
            let dispatcher = Arc::clone(&self.dispatcher);
            let region = region.clone();
            let running = Arc::clone(&running);
            let config = self.config.clone();
            threads.push(spawn_worker("shm", worker, move || {
                memory_worker(&dispatcher, &region, &running, &config)
            })?);
        }
        threads.push(self.spawn_reaper(&running)?);
        Ok(ServerHandle::new(
            running,
            threads,
            Box::new(move || region.close()),
        ))
    }

    fn spawn_reaper(&self, running: &Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let running = Arc::clone(running);
        let interval = self.config.reaper_interval;
        let poll = self.config.poll_interval.min(interval);
        let idle = self.config.idle_timeout;
        thread::Builder::new()
            .name("cramrpc-reaper".to_string())
            .spawn(move || {
                let mut last = Instant::now();
                while running.load(Ordering::Acquire) {
                    thread::sleep(poll);
                    if last.elapsed() >= interval {
                        dispatcher.reap(idle, Instant::now());
                        last = Instant::now();
                    }
                }
            })
            .map_err(|err| PeerError::Transport(err.into()))
    }
}

impl ServerBuilder {
    /// Register a procedure handler.
    pub fn procedure<F>(mut self, id: u32, handler: F) -> Self
    where
        F: Fn(&mut Call<'_>) -> Status + Send + Sync + 'static,
    {
        self.procedures.push((id, Arc::new(handler)));
        self
    }

    /// Register an object instance, reachable from handlers through
    /// [`Call::instance`].
    pub fn object<O: Any + Send + Sync>(mut self, id: u32, instance: O) -> Self {
        self.objects.push((id, Arc::new(instance)));
        self
    }

    /// Register a key. Enables authentication with defaults if no auth
    /// config was given.
    pub fn key(mut self, key: KeyRecord) -> Self {
        if self.config.auth.is_none() {
            self.config.auth = Some(AuthConfig::default());
        }
        self.keys.push(key);
        self
    }

    /// Install the access-control hook.
    pub fn acl<F>(mut self, acl: F) -> Self
    where
        F: Fn(u32, u32, Option<&UserData>) -> bool + Send + Sync + 'static,
    {
        self.acl = Some(Arc::new(acl));
        self
    }

    pub fn build(self) -> Result<Server> {
        let dispatcher = Dispatcher::new(&self.config)?;
        for (id, procedure) in self.procedures {
            dispatcher.register_procedure(id, procedure)?;
        }
        for (id, object) in self.objects {
            dispatcher.register_object(id, object)?;
        }
        for key in self.keys {
            dispatcher.add_key(key)?;
        }
        dispatcher.set_acl(self.acl);
        Ok(Server {
            dispatcher: Arc::new(dispatcher),
            config: self.config,
            next_connection: Arc::new(AtomicU64::new(1)),
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("procedures", &self.procedures.len())
            .field("objects", &self.objects.len())
            .field("keys", &self.keys.len())
            .field("acl", &self.acl.is_some())
            .finish()
    }
}

/// Listening side of a stream transport.
#[derive(Debug)]
pub enum StreamListener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpSocket),
}

impl StreamListener {
    fn accept(&self, timeout: Duration) -> cramrpc_transport::Result<IpcStream> {
        match self {
            #[cfg(unix)]
            StreamListener::Unix(socket) => socket.accept_timeout(timeout),
            StreamListener::Tcp(socket) => socket.accept_timeout(timeout),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            #[cfg(unix)]
            StreamListener::Unix(socket) => socket.transport_name(),
            StreamListener::Tcp(socket) => socket.transport_name(),
        }
    }
}

#[cfg(unix)]
impl From<UnixDomainSocket> for StreamListener {
    fn from(socket: UnixDomainSocket) -> Self {
        StreamListener::Unix(socket)
    }
}

impl From<TcpSocket> for StreamListener {
    fn from(socket: TcpSocket) -> Self {
        StreamListener::Tcp(socket)
    }
}

/// Running server threads for one transport.
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    stop: Box<dyn Fn() + Send + Sync>,
}

impl ServerHandle {
    fn new(
        running: Arc<AtomicBool>,
        threads: Vec<JoinHandle<()>>,
        stop: Box<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            running,
            threads,
            stop,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask every worker to stop. Workers finish the request in hand.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("server shutting down");
        }
        (self.stop)();
    }

    /// Wait for every thread to exit. Call [`ServerHandle::shutdown`] first.
    pub fn join(mut self) -> Result<()> {
        let mut panicked = 0usize;
        for thread in std::mem::take(&mut self.threads) {
            if thread.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(PeerError::ShutdownFailed(format!(
                "{panicked} server thread(s) panicked"
            )));
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shutdown();
            for thread in self.threads.drain(..) {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("running", &self.is_running())
            .field("threads", &self.threads.len())
            .finish()
    }
}

fn spawn_worker<F>(transport: &str, worker: usize, run: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("cramrpc-{transport}-{worker}"))
        .spawn(move || {
            debug!(worker, "worker started");
            run();
            debug!(worker, "worker stopped");
        })
        .map_err(|err| PeerError::Transport(err.into()))
}

// Requests a reader may queue per worker before it waits for room.
const QUEUE_DEPTH: usize = 4;

type Connections = Arc<Mutex<HashMap<u64, Arc<Connection>>>>;

fn close_all(connections: &Connections) {
    let connections = connections.lock().unwrap_or_else(PoisonError::into_inner);
    for connection in connections.values() {
        connection.close();
    }
}

/// One accepted stream. Workers answer through the shared writer.
struct Connection {
    id: u64,
    stream: IpcStream,
    writer: Mutex<MessageWriter<IpcStream>>,
}

impl Connection {
    fn send(&self, message: &[u8]) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_message(message)?;
        Ok(())
    }

    // Unblocks the reader, which then cleans up.
    fn close(&self) {
        let _ = self.stream.shutdown();
    }
}

struct StreamRequest {
    connection: Arc<Connection>,
    message: Bytes,
}

/// Bounded hand-off from connection readers to the worker pool.
struct RequestQueue {
    pending: Mutex<VecDeque<StreamRequest>>,
    ready: Condvar,
    space: Condvar,
    capacity: usize,
}

impl RequestQueue {
    fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue `request`, waiting for room. False once the server stops.
    fn push(&self, request: StreamRequest, running: &AtomicBool, poll: Duration) -> bool {
        let mut pending = self.lock();
        while pending.len() >= self.capacity {
            if !running.load(Ordering::Acquire) {
                return false;
            }
            let (guard, _) = self
                .space
                .wait_timeout(pending, poll)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
        pending.push_back(request);
        self.ready.notify_one();
        true
    }

    fn pop(&self, timeout: Duration) -> Option<StreamRequest> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.lock();
        loop {
            if let Some(request) = pending.pop_front() {
                self.space.notify_one();
                return Some(request);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
    }

    fn wake(&self) {
        self.ready.notify_all();
        self.space.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StreamRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Acceptor {
    listener: StreamListener,
    dispatcher: Arc<Dispatcher>,
    connections: Connections,
    queue: Arc<RequestQueue>,
    next_connection: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    config: ServerConfig,
}

impl Acceptor {
    fn run(self) {
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        while self.running.load(Ordering::Acquire) {
            match self.listener.accept(self.config.poll_interval) {
                Ok(stream) => {
                    let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
                    match self.open(id, stream) {
                        Ok(reader) => readers.push(reader),
                        Err(err) => warn!(connection = id, error = %err, "could not open connection"),
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    thread::sleep(self.config.poll_interval);
                }
            }
            readers.retain(|reader| !reader.is_finished());
        }

        // A connection accepted while stopping may have missed the stop hook.
        close_all(&self.connections);
        for reader in readers {
            let _ = reader.join();
        }
    }

    fn open(&self, id: u64, stream: IpcStream) -> Result<JoinHandle<()>> {
        let wire = WireConfig {
            max_payload_size: self.config.max_payload,
            read_timeout: Some(self.config.idle_timeout),
            write_timeout: Some(self.config.idle_timeout),
        };
        debug!(connection = id, peer = %stream.peer_label(), "connection accepted");
        let reader = MessageReader::with_config_ipc(stream.try_clone()?, wire)?;
        let writer = MessageWriter::with_config_ipc(stream.try_clone()?, wire)?;
        let connection = Arc::new(Connection {
            id,
            stream,
            writer: Mutex::new(writer),
        });
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&connection));

        let ctx = ConnectionReader {
            connection,
            reader,
            dispatcher: Arc::clone(&self.dispatcher),
            connections: Arc::clone(&self.connections),
            queue: Arc::clone(&self.queue),
            running: Arc::clone(&self.running),
            config: self.config.clone(),
        };
        thread::Builder::new()
            .name(format!("cramrpc-conn-{id}"))
            .spawn(move || ctx.run())
            .map_err(|err| {
                if let Some(connection) = self
                    .connections
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id)
                {
                    connection.close();
                }
                PeerError::Transport(err.into())
            })
    }
}

/// Delimits requests off one connection and queues them.
struct ConnectionReader {
    connection: Arc<Connection>,
    reader: MessageReader<IpcStream>,
    dispatcher: Arc<Dispatcher>,
    connections: Connections,
    queue: Arc<RequestQueue>,
    running: Arc<AtomicBool>,
    config: ServerConfig,
}

impl ConnectionReader {
    fn run(mut self) {
        let id = self.connection.id;
        let mut region = Region::new(HEADER_SIZE, self.config.max_payload);
        while self.running.load(Ordering::Acquire) {
            match self.reader.read_message(&mut region) {
                Ok(_) => {}
                Err(WireError::ConnectionClosed) => break,
                Err(err) if err.is_timeout() => {
                    debug!(connection = id, "closing idle connection");
                    break;
                }
                Err(err) => {
                    // The stream can no longer be delimited.
                    warn!(connection = id, error = %err, "dropping malformed stream");
                    break;
                }
            }
            let request = StreamRequest {
                connection: Arc::clone(&self.connection),
                message: Bytes::copy_from_slice(region.message()),
            };
            if !self
                .queue
                .push(request, &self.running, self.config.poll_interval)
            {
                break;
            }
        }

        self.connection.close();
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.dispatcher.replay().forget(&Identity::Stream(id));
        debug!(connection = id, "connection ended");
    }
}

fn stream_worker(
    dispatcher: &Dispatcher,
    queue: &RequestQueue,
    running: &AtomicBool,
    config: &ServerConfig,
) {
    let mut buf = ParamBuffer::new(config.max_payload);
    while running.load(Ordering::Acquire) {
        let Some(request) = queue.pop(config.poll_interval) else {
            continue;
        };
        let connection = &request.connection;
        if let Err(err) = buf.input_mut().load(&request.message) {
            debug!(connection = connection.id, error = %err, "dropping oversized request");
            continue;
        }
        match dispatcher.execute(&mut buf, Identity::Stream(connection.id)) {
            Outcome::Fail => {}
            Outcome::Ok => {
                if let Err(err) = connection.send(buf.output().message()) {
                    debug!(connection = connection.id, error = %err, "reply failed");
                    connection.close();
                }
            }
            Outcome::Close => {
                let _ = connection.send(buf.output().message());
                connection.close();
            }
        }
    }
}

fn datagram_worker(
    dispatcher: &Dispatcher,
    socket: &DatagramSocket,
    running: &AtomicBool,
    config: &ServerConfig,
) {
    let capacity = config
        .max_payload
        .min(cramrpc_transport::udp::MAX_DATAGRAM - HEADER_SIZE);
    let mut buf = ParamBuffer::new(capacity);
    while running.load(Ordering::Acquire) {
        let received = socket.recv_from(buf.input_mut().receive_buf(), config.poll_interval);
        let (len, from) = match received {
            Ok(received) => received,
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                debug!(error = %err, "datagram receive failed");
                continue;
            }
        };
        if let Err(err) = buf.input_mut().set_received(len) {
            debug!(%from, error = %err, "dropping short datagram");
            continue;
        }
        match dispatcher.execute(&mut buf, Identity::Address(from)) {
            Outcome::Fail => {}
            Outcome::Ok | Outcome::Close => {
                if let Err(err) = socket.send_to(buf.output().message(), from) {
                    debug!(%from, error = %err, "datagram reply failed");
                }
            }
        }
    }
}

fn memory_worker(
    dispatcher: &Dispatcher,
    region: &Rendezvous,
    running: &AtomicBool,
    config: &ServerConfig,
) {
    let mut buf = ParamBuffer::new(config.max_payload);
    while running.load(Ordering::Acquire) {
        let request = match region.next_request(config.poll_interval) {
            Ok(request) => request,
            Err(TransportError::Shutdown) => break,
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                warn!(error = %err, "rendezvous wait failed");
                continue;
            }
        };
        if let Err(err) = buf.input_mut().load(request.message()) {
            debug!(client = request.client_id(), error = %err, "dropping oversized request");
            continue;
        }
        let identity = Identity::Mailbox(request.client_id());
        match dispatcher.execute(&mut buf, identity) {
            Outcome::Fail => {}
            Outcome::Ok => request.reply(buf.output().message()),
            Outcome::Close => {
                request.reply(buf.output().message());
                dispatcher.replay().forget(&identity);
            }
        }
    }
}
