//! In-process cohort transport.
//!
//! [`LocalNetwork`] wires N endpoints together with bounded tokio channels.
//! Every message is framed by [`wire::encode`] on the way out and decoded on
//! the way in, so the in-process cohort exercises the same codec a socket
//! transport would. A full inbound channel makes the sender wait.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::messages::Message;
use crate::{wire, Entity, Result, Transport, TransportError};

/// Sending half of one node's inbound channel.
#[derive(Clone, Debug)]
pub struct FrameSender {
    to: u32,
    tx: mpsc::Sender<(u32, Vec<u8>)>,
}

impl FrameSender {
    /// Deliver a raw frame from roster index `from`.
    ///
    /// Waits while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the receiving node is gone.
    pub async fn send(&self, from: u32, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send((from, frame))
            .await
            .map_err(|_| TransportError::Closed(self.to))
    }
}

/// Receiving half of one node's inbound channel.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::Receiver<(u32, Vec<u8>)>,
}

impl Inbound {
    /// Create a bounded inbound channel for node `index`.
    pub fn channel(index: u32, capacity: usize) -> (FrameSender, Inbound) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (FrameSender { to: index, tx }, Inbound { rx })
    }

    /// Next inbound message with the sender's roster index.
    ///
    /// Frames that fail to decode are returned as errors so the caller can
    /// log and drop them. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<(u32, Result<Message>)> {
        let (from, frame) = self.rx.recv().await?;
        Some((from, wire::decode(&frame)))
    }
}

/// A fully connected in-process cohort.
#[derive(Debug)]
pub struct LocalNetwork {
    roster: Arc<Vec<Entity>>,
    senders: Arc<Vec<FrameSender>>,
    inbounds: Vec<Inbound>,
}

impl LocalNetwork {
    /// Build a cohort with one member per public key, in order.
    pub fn new(public_keys: &[[u8; 32]], capacity: usize) -> Self {
        let mut roster = Vec::with_capacity(public_keys.len());
        let mut senders = Vec::with_capacity(public_keys.len());
        let mut inbounds = Vec::with_capacity(public_keys.len());
        for (i, public_key) in public_keys.iter().enumerate() {
            let index = i as u32;
            let (tx, rx) = Inbound::channel(index, capacity);
            roster.push(Entity {
                index,
                public_key: *public_key,
            });
            senders.push(tx);
            inbounds.push(rx);
        }
        Self {
            roster: Arc::new(roster),
            senders: Arc::new(senders),
            inbounds,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.roster.len()
    }

    /// Whether the cohort is empty.
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Split into one `(endpoint, inbound)` pair per member, by index.
    pub fn into_parts(self) -> Vec<(LocalEndpoint, Inbound)> {
        let roster = self.roster;
        let senders = self.senders;
        self.inbounds
            .into_iter()
            .enumerate()
            .map(|(i, inbound)| {
                let endpoint = LocalEndpoint {
                    index: i as u32,
                    roster: Arc::clone(&roster),
                    senders: Arc::clone(&senders),
                };
                (endpoint, inbound)
            })
            .collect()
    }
}

/// One member's view of a [`LocalNetwork`].
#[derive(Clone, Debug)]
pub struct LocalEndpoint {
    index: u32,
    roster: Arc<Vec<Entity>>,
    senders: Arc<Vec<FrameSender>>,
}

impl Transport for LocalEndpoint {
    async fn broadcast(&self, msg: &Message) -> Result<()> {
        let frame = wire::encode(msg)?;
        let mut delivered = 0usize;
        let mut attempted = 0usize;
        for sender in self.senders.iter().filter(|s| s.to != self.index) {
            attempted += 1;
            match sender.send(self.index, frame.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        node = self.index,
                        peer = sender.to,
                        kind = msg.kind(),
                        error = %e,
                        "broadcast delivery failed"
                    );
                }
            }
        }
        if attempted > 0 && delivered == 0 {
            return Err(TransportError::Unreachable);
        }
        Ok(())
    }

    async fn send_to(&self, index: u32, msg: &Message) -> Result<()> {
        let sender = self
            .senders
            .get(index as usize)
            .ok_or(TransportError::UnknownPeer(index))?;
        let frame = wire::encode(msg)?;
        sender.send(self.index, frame).await
    }

    fn peers(&self) -> Vec<Entity> {
        self.roster.as_ref().clone()
    }

    fn self_index(&self) -> u32 {
        self.index
    }
}
