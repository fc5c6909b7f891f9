//! Integration test fixtures for TimeVault.
//!
//! Builds in-process cohorts on a [`LocalNetwork`] and wraps each endpoint in
//! a [`Tapped`] transport that counts outbound traffic and can misbehave on
//! request.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p timevault-integration-tests
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::OsRng;
use timevault::{TimeVault, VaultConfig};
use timevault_crypto::group::{point_to_bytes, KeyPair};
use timevault_transport::messages::RevShare;
use timevault_transport::{Entity, Inbound, LocalEndpoint, LocalNetwork, Message, Transport};

/// Inbound channel capacity used by every test cohort.
pub const CHANNEL_CAPACITY: usize = 256;

/// Outbound traffic seen by one [`Tapped`] transport.
#[derive(Debug, Default)]
pub struct Tap {
    broadcasts: Mutex<BTreeMap<&'static str, usize>>,
    unicasts: Mutex<BTreeMap<&'static str, usize>>,
}

impl Tap {
    /// Broadcasts of message kind `kind` ("SecInit", "RevInit", ...).
    pub fn broadcasts(&self, kind: &str) -> usize {
        count(&self.broadcasts, kind)
    }

    /// Point-to-point sends of message kind `kind`.
    pub fn unicasts(&self, kind: &str) -> usize {
        count(&self.unicasts, kind)
    }
}

fn count(map: &Mutex<BTreeMap<&'static str, usize>>, kind: &str) -> usize {
    map.lock()
        .map(|m| m.get(kind).copied().unwrap_or(0))
        .unwrap_or(0)
}

fn record(map: &Mutex<BTreeMap<&'static str, usize>>, kind: &'static str) {
    if let Ok(mut m) = map.lock() {
        *m.entry(kind).or_default() += 1;
    }
}

/// Transport wrapper that records outbound traffic.
///
/// With `duplicate_deals` set, every `SecInit` is broadcast twice.
pub struct Tapped<T> {
    inner: T,
    tap: Arc<Tap>,
    duplicate_deals: bool,
}

impl<T: Transport> Tapped<T> {
    /// Wrap `inner`, recording into `tap`.
    pub fn new(inner: T, tap: Arc<Tap>) -> Self {
        Self {
            inner,
            tap,
            duplicate_deals: false,
        }
    }

    /// Broadcast every deal twice.
    pub fn duplicating_deals(mut self) -> Self {
        self.duplicate_deals = true;
        self
    }
}

impl<T: Transport> Transport for Tapped<T> {
    async fn broadcast(&self, msg: &Message) -> timevault_transport::Result<()> {
        record(&self.tap.broadcasts, msg.kind());
        self.inner.broadcast(msg).await?;
        if self.duplicate_deals && matches!(msg, Message::SecInit(_)) {
            tracing::debug!(node = self.inner.self_index(), "sending duplicate deal");
            self.inner.broadcast(msg).await?;
        }
        Ok(())
    }

    async fn send_to(&self, index: u32, msg: &Message) -> timevault_transport::Result<()> {
        record(&self.tap.unicasts, msg.kind());
        self.inner.send_to(index, msg).await
    }

    fn peers(&self) -> Vec<Entity> {
        self.inner.peers()
    }

    fn self_index(&self) -> u32 {
        self.inner.self_index()
    }
}

/// How one member of a test cohort is brought up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Member {
    /// A normal engine.
    Honest,
    /// An engine that broadcasts every deal twice.
    DuplicatingDeals,
    /// Never started; its inbound channel is closed.
    Silent,
    /// Not started; the raw endpoint is handed to the test.
    Manual,
}

/// A member driven directly by the test.
pub struct ManualPeer {
    /// Its endpoint, for sending raw protocol messages.
    pub endpoint: LocalEndpoint,
    /// Its inbound channel, for observing what the cohort sends it.
    pub inbound: Inbound,
}

impl ManualPeer {
    /// Wait up to `wait` for the next `RevShare`, skipping other traffic.
    pub async fn next_share(&mut self, wait: Duration) -> Option<(u32, RevShare)> {
        loop {
            match tokio::time::timeout(wait, self.inbound.recv()).await {
                Ok(Some((from, Ok(Message::RevShare(share))))) => return Some((from, share)),
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

/// A running in-process cohort.
pub struct Cohort {
    nodes: Vec<Option<TimeVault>>,
    taps: Vec<Arc<Tap>>,
    manual: Vec<Option<ManualPeer>>,
}

impl Cohort {
    /// Start `n` honest nodes sharing `config`.
    pub fn start(n: usize, config: VaultConfig) -> Self {
        Self::start_with(&vec![Member::Honest; n], config)
    }

    /// Start one node per entry of `members`.
    pub fn start_with(members: &[Member], config: VaultConfig) -> Self {
        Self::start_on(members, config, CHANNEL_CAPACITY)
    }

    /// Like [`Cohort::start_with`], with `channel_capacity` frames per inbound
    /// channel.
    pub fn start_on(members: &[Member], config: VaultConfig, channel_capacity: usize) -> Self {
        let keys: Vec<KeyPair> = members
            .iter()
            .map(|_| KeyPair::generate(&mut OsRng))
            .collect();
        let public_keys: Vec<[u8; 32]> = keys.iter().map(|k| point_to_bytes(k.public())).collect();
        let parts = LocalNetwork::new(&public_keys, channel_capacity).into_parts();

        let mut nodes = Vec::with_capacity(members.len());
        let mut taps = Vec::with_capacity(members.len());
        let mut manual = Vec::with_capacity(members.len());
        for ((member, keys), (endpoint, inbound)) in members.iter().zip(keys).zip(parts) {
            let tap = Arc::new(Tap::default());
            let transport = Tapped::new(endpoint.clone(), Arc::clone(&tap));
            let node = match member {
                Member::Honest => Some(
                    TimeVault::start(config.clone(), keys, transport, inbound)
                        .expect("start node"),
                ),
                Member::DuplicatingDeals => Some(
                    TimeVault::start(config.clone(), keys, transport.duplicating_deals(), inbound)
                        .expect("start node"),
                ),
                Member::Silent => {
                    drop(inbound);
                    None
                }
                Member::Manual => {
                    manual.push(Some(ManualPeer { endpoint, inbound }));
                    nodes.push(None);
                    taps.push(tap);
                    continue;
                }
            };
            manual.push(None);
            nodes.push(node);
            taps.push(tap);
        }
        Self {
            nodes,
            taps,
            manual,
        }
    }

    /// Cohort size.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cohort is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Handle to running node `index`.
    pub fn node(&self, index: usize) -> &TimeVault {
        self.nodes[index].as_ref().expect("node is running")
    }

    /// Outbound traffic of node `index`.
    pub fn tap(&self, index: usize) -> &Tap {
        &self.taps[index]
    }

    /// Take the manual peer at `index`.
    pub fn take_manual(&mut self, index: usize) -> ManualPeer {
        self.manual[index].take().expect("manual peer")
    }

    /// Stop node `index`; its inbound channel closes with it.
    pub async fn stop(&mut self, index: usize) {
        if let Some(node) = self.nodes[index].take() {
            node.shutdown().await;
        }
    }

    /// Stop every running node.
    pub async fn shutdown(&mut self) {
        for index in 0..self.nodes.len() {
            self.stop(index).await;
        }
    }
}
