//! Same-host shared-memory rendezvous.
//!
//! Every client owns one mailbox slot inside the shared region. A call
//! posts the request into the shared queue and signals "request ready";
//! a server worker takes it, runs it, writes the reply back into the
//! caller's slot and signals "response ready". The number of attached
//! clients is bounded by a counting semaphore sized to the worker count,
//! so a request never waits for a mailbox, only for a worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::sync::{Permit, Semaphore};

/// Server-side handle to a rendezvous region. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Rendezvous {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<RendezvousRequest>>,
    request_ready: Condvar,
    clients: Semaphore,
    closed: AtomicBool,
    next_slot: AtomicU64,
    max_message: usize,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    state: Mutex<SlotState>,
    response_ready: Condvar,
}

#[derive(Debug, Default)]
struct SlotState {
    response: Option<Bytes>,
    detached: bool,
}

/// Client attachment: one mailbox plus one semaphore unit.
#[derive(Debug)]
pub struct RendezvousClient {
    shared: Arc<Shared>,
    slot: Arc<Slot>,
    _permit: Permit,
}

/// A request taken off the shared queue by a server worker.
#[derive(Debug)]
pub struct RendezvousRequest {
    slot: Arc<Slot>,
    message: Bytes,
}

impl Rendezvous {
    /// Create a region admitting at most `max_clients` attached clients.
    pub fn new(max_clients: usize, max_message: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                request_ready: Condvar::new(),
                clients: Semaphore::new(max_clients),
                closed: AtomicBool::new(false),
                next_slot: AtomicU64::new(1),
                max_message,
            }),
        }
    }

    /// Attach a client, waiting at most `timeout` for a free mailbox.
    pub fn connect(&self, timeout: Duration) -> Result<RendezvousClient> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let permit = self
            .shared
            .clients
            .acquire_timeout(timeout)
            .ok_or(TransportError::Timeout)?;
        let id = self.shared.next_slot.fetch_add(1, Ordering::Relaxed);
        debug!(slot = id, "attached rendezvous client");
        Ok(RendezvousClient {
            shared: Arc::clone(&self.shared),
            slot: Arc::new(Slot {
                id,
                state: Mutex::new(SlotState::default()),
                response_ready: Condvar::new(),
            }),
            _permit: permit,
        })
    }

    /// Wait at most `timeout` for the next posted request.
    pub fn next_request(&self, timeout: Duration) -> Result<RendezvousRequest> {
        let deadline = Instant::now() + timeout;
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(TransportError::Shutdown);
            }
            if let Some(request) = queue.pop_front() {
                return Ok(request);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let (guard, _) = self
                .shared
                .request_ready
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
        }
    }

    /// Close the region: workers stop and clients fail their next call.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.request_ready.notify_all();
    }

    /// Mailboxes still free.
    pub fn free_slots(&self) -> usize {
        self.shared.clients.available()
    }

    /// Largest message accepted in either direction.
    pub fn max_message(&self) -> usize {
        self.shared.max_message
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "shm"
    }
}

impl RendezvousClient {
    /// Mailbox number, stable for the lifetime of this attachment.
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    /// Post one request.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        if message.len() > self.shared.max_message {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.shared.max_message,
            });
        }
        self.slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .response = None;
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(RendezvousRequest {
                slot: Arc::clone(&self.slot),
                message: Bytes::copy_from_slice(message),
            });
        self.shared.request_ready.notify_one();
        Ok(())
    }

    /// Wait at most `timeout` for the reply and copy it into `buf`.
    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(response) = state.response.take() {
                if response.len() > buf.len() {
                    return Err(TransportError::MessageTooLarge {
                        size: response.len(),
                        max: buf.len(),
                    });
                }
                buf[..response.len()].copy_from_slice(&response);
                return Ok(response.len());
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(TransportError::Shutdown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let (guard, _) = self
                .slot
                .response_ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

impl Drop for RendezvousClient {
    fn drop(&mut self) {
        self.slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detached = true;
        debug!(slot = self.slot.id, "detached rendezvous client");
    }
}

impl RendezvousRequest {
    /// The request bytes.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Mailbox the request came from.
    pub fn client_id(&self) -> u64 {
        self.slot.id
    }

    /// Deliver the reply. Replies to detached clients are discarded.
    pub fn reply(self, message: &[u8]) {
        let mut state = self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.detached {
            return;
        }
        state.response = Some(Bytes::copy_from_slice(message));
        self.slot.response_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_reply_roundtrip() {
        let region = Rendezvous::new(2, 1024);
        let client = region.connect(Duration::from_secs(1)).unwrap();

        let server = {
            let region = region.clone();
            std::thread::spawn(move || {
                let request = region.next_request(Duration::from_secs(5)).unwrap();
                let mut reply = request.message().to_vec();
                reply.reverse();
                request.reply(&reply);
            })
        };

        client.send(b"abc").unwrap();
        let mut buf = [0u8; 16];
        let len = client.recv(&mut buf, Duration::from_secs(5)).unwrap();
        assert_eq!(&buf[..len], b"cba");
        server.join().unwrap();
    }

    #[test]
    fn attachments_bounded_by_worker_count() {
        let region = Rendezvous::new(1, 64);
        let first = region.connect(Duration::from_millis(10)).unwrap();
        let err = region.connect(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        drop(first);
        assert!(region.connect(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn liveness_timeout_without_worker() {
        let region = Rendezvous::new(1, 64);
        let client = region.connect(Duration::from_millis(10)).unwrap();
        client.send(b"x").unwrap();
        let mut buf = [0u8; 4];
        let err = client.recv(&mut buf, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[test]
    fn close_fails_clients_and_workers() {
        let region = Rendezvous::new(1, 64);
        let client = region.connect(Duration::from_millis(10)).unwrap();
        region.close();
        assert!(matches!(client.send(b"x"), Err(TransportError::Shutdown)));
        assert!(matches!(
            region.next_request(Duration::from_millis(10)),
            Err(TransportError::Shutdown)
        ));
    }
}
