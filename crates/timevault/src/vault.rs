//! The public handle.
//!
//! [`TimeVault::start`] validates the cohort, spawns the engine with its
//! inbound forwarder and outbound delivery task, and returns a cloneable
//! handle. `seal` and `open` talk to the engine through its inbox and wait on
//! a oneshot reply; the ElGamal step runs on the caller's task.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use timevault_crypto::elgamal::{self, Ciphertext};
use timevault_crypto::group::{self, KeyPair, EMBED_CAPACITY};
use timevault_transport::{Inbound, Transport};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::VaultConfig;
use crate::engine::{self, Command, Engine, Input};
use crate::outbox::{self, Outbox};
use crate::registry::{SecretId, SecretStatus};
use crate::{Result, VaultError};

/// Output of [`TimeVault::seal`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    /// The DKG instance holding the decryption key.
    pub sid: SecretId,
    /// ElGamal ciphertext `(R, C)` under the joint public point.
    pub ciphertext: Ciphertext,
}

/// Handle to a running engine.
#[derive(Clone)]
pub struct TimeVault {
    index: u32,
    inbox: mpsc::Sender<Input>,
    engine: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimeVault {
    /// Validate the cohort and spawn the engine.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidArgument`] if the configuration is
    /// invalid for the cohort size, the roster is not indexed `0..N`, or
    /// `keys` does not match this node's roster entry.
    pub fn start<T: Transport>(
        config: VaultConfig,
        keys: KeyPair,
        transport: T,
        inbound: Inbound,
    ) -> Result<Self> {
        let peers = transport.peers();
        let thresholds = config.validate_for(peers.len())?;
        let index = transport.self_index();

        let mut roster = Vec::with_capacity(peers.len());
        for (position, entity) in peers.iter().enumerate() {
            if entity.index as usize != position {
                return Err(VaultError::InvalidArgument(format!(
                    "roster entry {position} carries index {}",
                    entity.index
                )));
            }
            let point = group::point_from_bytes(&entity.public_key).map_err(|e| {
                VaultError::InvalidArgument(format!("roster entry {position}: {e}"))
            })?;
            roster.push(point);
        }
        match roster.get(index as usize) {
            Some(own) if own == keys.public() => {}
            Some(_) => {
                return Err(VaultError::InvalidArgument(format!(
                    "key pair does not match roster entry {index}"
                )))
            }
            None => {
                return Err(VaultError::InvalidArgument(format!(
                    "self index {index} outside cohort of {}",
                    roster.len()
                )))
            }
        }

        let (tx, rx) = mpsc::channel(config.inbox_capacity);
        let (outbox, queue) = Outbox::channel();
        let forwarder = tokio::spawn(engine::forward_inbound(index, inbound, tx.clone()));
        let delivery = tokio::spawn(outbox::deliver(transport, queue, tx.clone()));
        let engine = Engine::new(
            index,
            keys,
            thresholds,
            roster,
            config.reveal_timeout(),
            tx.clone(),
            outbox,
        );
        let handle = tokio::spawn(engine.run(rx, vec![forwarder, delivery]));

        Ok(Self {
            index,
            inbox: tx,
            engine: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// This node's roster index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Encrypt `message` so that it can be opened once `duration` has elapsed.
    ///
    /// Runs a fresh DKG across the cohort and waits until the joint secret is
    /// formed locally.
    ///
    /// Durations travel in whole milliseconds; a fractional millisecond is
    /// rounded up.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidArgument`] for an empty message, a message over
    ///   29 bytes, or a zero duration
    /// - [`VaultError::TransportFailure`] if this node's deal could not be sent
    /// - [`VaultError::Cancelled`] if the engine stops first
    pub async fn seal(&self, message: &[u8], duration: Duration) -> Result<Sealed> {
        if message.is_empty() {
            return Err(VaultError::InvalidArgument("empty message".to_string()));
        }
        if message.len() > EMBED_CAPACITY {
            return Err(VaultError::InvalidArgument(format!(
                "message is {} bytes, capacity is {EMBED_CAPACITY}",
                message.len()
            )));
        }
        if duration.is_zero() {
            return Err(VaultError::InvalidArgument("zero duration".to_string()));
        }
        let duration = whole_millis(duration);

        let (sid, joint) = self
            .request(|reply| Command::Seal { duration, reply })
            .await?;
        let ciphertext = elgamal::seal(&joint, message, &mut OsRng)?;
        Ok(Sealed { sid, ciphertext })
    }

    /// Decrypt a sealed message once its secret has expired.
    ///
    /// # Errors
    ///
    /// - [`VaultError::UnknownSecret`] if `sid` is not known to this node
    /// - [`VaultError::NotYetExpired`] if the duration has not elapsed here
    /// - [`VaultError::ReconstructionFailed`] if fewer than T valid shares
    ///   arrive before the reveal timeout
    /// - [`VaultError::CryptoFailure`] if the ciphertext does not decrypt
    pub async fn open(&self, sid: &SecretId, ciphertext: &Ciphertext) -> Result<Vec<u8>> {
        let sid = sid.clone();
        let secret = self.request(|reply| Command::Open { sid, reply }).await?;
        Ok(elgamal::open(&secret, ciphertext)?)
    }

    /// Snapshot of the registry entry for `sid`.
    pub async fn status(&self, sid: &SecretId) -> Result<SecretStatus> {
        let sid = sid.clone();
        self.request(|reply| Command::Status { sid, reply }).await
    }

    /// Stop the engine. Pending `seal` and `open` calls fail with
    /// [`VaultError::Cancelled`]. Idempotent.
    pub async fn shutdown(&self) {
        let Some(handle) = self.engine.lock().await.take() else {
            return;
        };
        if self
            .inbox
            .send(Input::Command(Command::Shutdown))
            .await
            .is_err()
        {
            tracing::debug!(node = self.index, "engine already stopped");
        }
        if let Err(e) = handle.await {
            tracing::warn!(node = self.index, error = %e, "engine task ended abnormally");
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<R>>) -> Command,
    ) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(Input::Command(command(reply)))
            .await
            .map_err(|_| VaultError::Cancelled)?;
        rx.await.map_err(|_| VaultError::Cancelled)?
    }
}

/// `d` rounded up to a whole number of milliseconds.
fn whole_millis(d: Duration) -> Duration {
    let millis = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SecretState;
    use timevault_crypto::group::point_to_bytes;
    use timevault_transport::LocalNetwork;

    fn solo() -> TimeVault {
        let keys = KeyPair::generate(&mut OsRng);
        let mut parts = LocalNetwork::new(&[point_to_bytes(keys.public())], 16).into_parts();
        let (endpoint, inbound) = parts.remove(0);
        TimeVault::start(VaultConfig::default(), keys, endpoint, inbound).expect("start")
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_node_round_trip() {
        let vault = solo();
        let sealed = vault
            .seal(b"Hello World!", Duration::from_secs(5))
            .await
            .expect("seal");
        assert_eq!(sealed.sid.as_str(), "TVSS_0_0");

        let early = vault.open(&sealed.sid, &sealed.ciphertext).await;
        assert!(matches!(early, Err(VaultError::NotYetExpired(_))));

        tokio::time::sleep(Duration::from_secs(6)).await;
        let plaintext = vault
            .open(&sealed.sid, &sealed.ciphertext)
            .await
            .expect("open");
        assert_eq!(plaintext, b"Hello World!");
        let status = vault.status(&sealed.sid).await.expect("status");
        assert_eq!(status.state, SecretState::Reconstructed);
        vault.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_numbers_distinguish_seals() {
        let vault = solo();
        let a = vault.seal(b"a", Duration::from_secs(1)).await.expect("seal");
        let b = vault.seal(b"b", Duration::from_secs(1)).await.expect("seal");
        assert_ne!(a.sid, b.sid);
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let vault = solo();
        let d = Duration::from_secs(1);
        assert!(matches!(
            vault.seal(b"", d).await,
            Err(VaultError::InvalidArgument(_))
        ));
        assert!(matches!(
            vault.seal(&[1u8; EMBED_CAPACITY + 1], d).await,
            Err(VaultError::InvalidArgument(_))
        ));
        assert!(matches!(
            vault.seal(b"x", Duration::ZERO).await,
            Err(VaultError::InvalidArgument(_))
        ));
        vault.shutdown().await;
    }

    #[test]
    fn test_whole_millis_rounds_up() {
        assert_eq!(whole_millis(Duration::from_nanos(1)), Duration::from_millis(1));
        assert_eq!(whole_millis(Duration::from_micros(500)), Duration::from_millis(1));
        assert_eq!(whole_millis(Duration::from_micros(1500)), Duration::from_millis(2));
        assert_eq!(whole_millis(Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(whole_millis(Duration::MAX), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_millisecond_duration_is_sealed() {
        let vault = solo();
        let sealed = vault
            .seal(b"brief", Duration::from_micros(500))
            .await
            .expect("seal");
        let status = vault.status(&sealed.sid).await.expect("status");
        assert_eq!(status.duration, Duration::from_millis(1));

        tokio::time::sleep(Duration::from_millis(2)).await;
        let plaintext = vault
            .open(&sealed.sid, &sealed.ciphertext)
            .await
            .expect("open");
        assert_eq!(plaintext, b"brief");
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbox_below_cohort_minimum_rejected() {
        let keys = KeyPair::generate(&mut OsRng);
        let other = KeyPair::generate(&mut OsRng);
        let roster = [point_to_bytes(keys.public()), point_to_bytes(other.public())];
        let mut parts = LocalNetwork::new(&roster, 4).into_parts();
        let (endpoint, inbound) = parts.remove(0);
        let config = VaultConfig {
            inbox_capacity: 7,
            ..VaultConfig::default()
        };
        let result = TimeVault::start(config, keys, endpoint, inbound);
        assert!(matches!(result, Err(VaultError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_are_cancelled() {
        let vault = solo();
        vault.shutdown().await;
        vault.shutdown().await;
        let result = vault.seal(b"late", Duration::from_secs(1)).await;
        assert_eq!(result, Err(VaultError::Cancelled));
    }

    #[tokio::test]
    async fn test_mismatched_key_rejected() {
        let keys = KeyPair::generate(&mut OsRng);
        let other = KeyPair::generate(&mut OsRng);
        let mut parts = LocalNetwork::new(&[point_to_bytes(other.public())], 4).into_parts();
        let (endpoint, inbound) = parts.remove(0);
        let result = TimeVault::start(VaultConfig::default(), keys, endpoint, inbound);
        assert!(matches!(result, Err(VaultError::InvalidArgument(_))));
    }
}
