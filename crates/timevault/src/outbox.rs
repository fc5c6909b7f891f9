//! Outbound queue between the engine and the transport.
//!
//! The engine never awaits the network. Handlers push onto an unbounded
//! queue and a single delivery task drains it in order, so per-peer message
//! order is the order the engine produced them in. A peer whose channel is
//! full stalls only the delivery task; the engine keeps draining its inbox,
//! which keeps the forwarder and every other peer's channel moving.
//!
//! A broadcast that reaches no peer is reported back to the engine as
//! [`Input::Undelivered`]. Unicast failures are logged and dropped.

use timevault_transport::{Message, Transport};
use tokio::sync::mpsc;

use crate::engine::Input;

/// One queued send.
#[derive(Debug)]
pub enum Outgoing {
    /// To every other member.
    Broadcast(Message),
    /// To one member.
    Unicast {
        /// Roster index of the recipient.
        to: u32,
        /// The message.
        msg: Message,
    },
}

/// Sending half of the queue, owned by the engine.
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
}

/// Receiving half, drained by [`deliver`].
pub type OutboxQueue = mpsc::UnboundedReceiver<Outgoing>;

impl Outbox {
    /// Create a connected outbox and queue.
    pub fn channel() -> (Self, OutboxQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `msg` for every other member.
    pub fn broadcast(&self, msg: Message) {
        self.push(Outgoing::Broadcast(msg));
    }

    /// Queue `msg` for the member at `to`.
    pub fn send_to(&self, to: u32, msg: Message) {
        self.push(Outgoing::Unicast { to, msg });
    }

    fn push(&self, outgoing: Outgoing) {
        if self.tx.send(outgoing).is_err() {
            tracing::debug!("delivery task gone, message dropped");
        }
    }
}

/// Drain `queue` into `transport` until the queue closes.
pub async fn deliver<T: Transport>(
    transport: T,
    mut queue: OutboxQueue,
    inbox: mpsc::Sender<Input>,
) {
    let index = transport.self_index();
    while let Some(outgoing) = queue.recv().await {
        match outgoing {
            Outgoing::Broadcast(msg) => {
                if let Err(error) = transport.broadcast(&msg).await {
                    tracing::warn!(node = index, kind = msg.kind(), sid = msg.sid(), %error, "broadcast reached no peer");
                    if inbox.send(Input::Undelivered { msg, error }).await.is_err() {
                        return;
                    }
                }
            }
            Outgoing::Unicast { to, msg } => {
                if let Err(error) = transport.send_to(to, &msg).await {
                    tracing::warn!(node = index, to, kind = msg.kind(), sid = msg.sid(), %error, "message not delivered");
                }
            }
        }
    }
    tracing::debug!(node = index, "outbox closed, delivery task stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use timevault_crypto::group::{point_to_bytes, KeyPair};
    use timevault_transport::messages::{RevInit, SecConf};
    use timevault_transport::{LocalNetwork, TransportError};

    fn roster(n: usize) -> Vec<[u8; 32]> {
        (0..n)
            .map(|_| point_to_bytes(KeyPair::generate(&mut OsRng).public()))
            .collect()
    }

    fn conf(src_index: u32, seq: u32) -> Message {
        Message::SecConf(SecConf {
            src_index,
            sid: format!("TVSS_{src_index}_{seq}"),
        })
    }

    #[tokio::test]
    async fn test_delivers_in_queue_order() {
        let mut parts = LocalNetwork::new(&roster(2), 8).into_parts();
        let (_, mut peer) = parts.remove(1);
        let (endpoint, _own) = parts.remove(0);
        let (inbox, _rx) = mpsc::channel(4);

        let (outbox, queue) = Outbox::channel();
        let task = tokio::spawn(deliver(endpoint, queue, inbox));
        outbox.broadcast(conf(0, 0));
        outbox.send_to(1, conf(0, 1));
        outbox.broadcast(conf(0, 2));
        drop(outbox);
        task.await.expect("delivery task");

        for seq in 0..3 {
            let (from, msg) = peer.recv().await.expect("frame");
            assert_eq!(from, 0);
            assert_eq!(msg.expect("decode"), conf(0, seq));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_peer_channel_does_not_block_producer() {
        let mut parts = LocalNetwork::new(&roster(2), 1).into_parts();
        let (_, mut peer) = parts.remove(1);
        let (endpoint, _own) = parts.remove(0);
        let (inbox, _rx) = mpsc::channel(4);

        let (outbox, queue) = Outbox::channel();
        let _task = tokio::spawn(deliver(endpoint, queue, inbox));
        // Far more than the peer channel holds; queuing returns at once.
        for seq in 0..32 {
            outbox.send_to(1, conf(0, seq));
        }
        for seq in 0..32 {
            let (_, msg) = peer.recv().await.expect("frame");
            assert_eq!(msg.expect("decode"), conf(0, seq));
        }
    }

    #[tokio::test]
    async fn test_unreachable_broadcast_reported_to_engine() {
        let mut parts = LocalNetwork::new(&roster(2), 4).into_parts();
        drop(parts.remove(1));
        let (endpoint, _own) = parts.remove(0);
        let (inbox, mut rx) = mpsc::channel(4);

        let (outbox, queue) = Outbox::channel();
        let _task = tokio::spawn(deliver(endpoint, queue, inbox));
        let request = Message::RevInit(RevInit {
            src_index: 0,
            sid: "TVSS_0_0".to_string(),
        });
        outbox.broadcast(request.clone());
        // Unicast failures are only logged.
        outbox.send_to(1, conf(0, 0));

        match rx.recv().await {
            Some(Input::Undelivered { msg, error }) => {
                assert_eq!(msg, request);
                assert!(matches!(error, TransportError::Unreachable));
            }
            _ => unreachable!("expected an undelivered report"),
        }
        drop(outbox);
        assert!(rx.recv().await.is_none());
    }
}
