use std::time::Duration;

use cramrpc_transport::{Rendezvous, RendezvousClient};
use cramrpc_wire::Region;

use super::Transport;
use crate::error::{PeerError, Result};

/// Same-host shared-memory rendezvous. Nothing is lost, so the timeout
/// only guards against a dead server.
#[derive(Debug)]
pub struct MemoryTransport {
    client: RendezvousClient,
}

impl MemoryTransport {
    /// Attach to `region`, waiting at most `timeout` for a free mailbox.
    pub fn connect(region: &Rendezvous, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: region.connect(timeout)?,
        })
    }

    /// Mailbox number of this attachment.
    pub fn id(&self) -> u64 {
        self.client.id()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.client.send(message)?;
        Ok(())
    }

    fn receive(&mut self, region: &mut Region, timeout: Duration) -> Result<()> {
        match self.client.recv(region.receive_buf(), timeout) {
            Ok(len) => {
                region.set_received(len)?;
                Ok(())
            }
            Err(err) if err.is_timeout() => Err(PeerError::Timeout(timeout)),
            Err(err) => Err(err.into()),
        }
    }

    fn name(&self) -> &'static str {
        "shm"
    }
}
