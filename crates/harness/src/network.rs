use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use concord_core::Message;
use concord_engine::Schema;

use crate::error::HarnessError;
use crate::peer::TestPeer;
use crate::relay::{ConnectionId, Relay, RelayConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every queue is delivered first in, first out.
    InOrder,
    /// Each batch of queued messages is delivered in a seeded random order.
    Shuffled { seed: u64 },
}

/// A relay and its peers in one process. Messages cross the network as JSON
/// text and are only delivered when the network is pumped.
pub struct TestNetwork {
    relay: Relay,
    schemas: Vec<Schema>,
    peers: Vec<TestPeer>,
    by_connection: BTreeMap<ConnectionId, usize>,
    to_relay: Vec<(ConnectionId, String)>,
    inboxes: Vec<Vec<String>>,
    rng: Option<StdRng>,
}

impl TestNetwork {
    pub fn new(schemas: Vec<Schema>) -> Result<Self, HarnessError> {
        Ok(Self::with_relay(Relay::open(&RelayConfig::default())?, schemas))
    }

    pub fn with_relay(relay: Relay, schemas: Vec<Schema>) -> Self {
        Self {
            relay,
            schemas,
            peers: Vec::new(),
            by_connection: BTreeMap::new(),
            to_relay: Vec::new(),
            inboxes: Vec::new(),
            rng: None,
        }
    }

    pub fn set_delivery(&mut self, delivery: Delivery) {
        self.rng = match delivery {
            Delivery::InOrder => None,
            Delivery::Shuffled { seed } => Some(StdRng::seed_from_u64(seed)),
        };
    }

    /// Attach a new peer. It is connected once the network settles.
    pub fn add_peer(&mut self) -> Result<usize, HarnessError> {
        let connection = self.relay.connect();
        let peer = TestPeer::new(self.schemas.clone(), connection)?;
        let index = self.peers.len();
        self.by_connection.insert(connection, index);
        self.peers.push(peer);
        self.inboxes.push(Vec::new());
        Ok(index)
    }

    pub fn peer(&self, index: usize) -> &TestPeer {
        &self.peers[index]
    }

    pub fn peer_mut(&mut self, index: usize) -> &mut TestPeer {
        &mut self.peers[index]
    }

    pub fn peers(&self) -> &[TestPeer] {
        &self.peers
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Detach a peer from the relay. It keeps its state but receives
    /// nothing further.
    pub fn disconnect(&mut self, index: usize) {
        let connection = self.peers[index].connection();
        self.relay.disconnect(connection);
        self.by_connection.remove(&connection);
        self.inboxes[index].clear();
    }

    /// Flush every peer's queued transactions.
    pub fn flush_all(&mut self) -> Result<(), HarnessError> {
        for peer in &mut self.peers {
            peer.flush()?;
        }
        Ok(())
    }

    /// Deliver messages until every queue is empty. Returns how many
    /// messages were delivered.
    pub fn settle(&mut self) -> Result<usize, HarnessError> {
        let mut delivered = 0;
        loop {
            self.collect_outgoing()?;
            if self.to_relay.is_empty() && self.inboxes.iter().all(Vec::is_empty) {
                return Ok(delivered);
            }
            delivered += self.pump()?;
        }
    }

    fn collect_outgoing(&mut self) -> Result<(), HarnessError> {
        for peer in &mut self.peers {
            let connection = peer.connection();
            if !self.by_connection.contains_key(&connection) {
                peer.outgoing();
                continue;
            }
            for msg in peer.outgoing() {
                self.to_relay.push((connection, msg.to_json()?));
            }
        }
        Ok(())
    }

    /// One round: everything queued for the relay, then every inbox.
    fn pump(&mut self) -> Result<usize, HarnessError> {
        let mut delivered = 0;

        let mut batch = std::mem::take(&mut self.to_relay);
        if let Some(rng) = self.rng.as_mut() {
            batch.shuffle(rng);
        }
        for (from, text) in batch {
            delivered += 1;
            for (to, reply) in self.relay.handle_text(from, &text)? {
                match self.by_connection.get(&to) {
                    Some(&index) => self.inboxes[index].push(reply),
                    None => tracing::warn!(connection = to, "message for unknown connection"),
                }
            }
        }

        for index in 0..self.peers.len() {
            let mut inbox = std::mem::take(&mut self.inboxes[index]);
            if let Some(rng) = self.rng.as_mut() {
                inbox.shuffle(rng);
            }
            for text in inbox {
                delivered += 1;
                let msg = Message::from_json(&text)?;
                tracing::trace!(peer = index, msg_type = msg.msg_type(), "delivering");
                self.peers[index].receive(msg)?;
            }
        }
        Ok(delivered)
    }
}
